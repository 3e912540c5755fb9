use crate::commands::{block_on, migrated_pool, CommandResult};

pub fn run() -> CommandResult {
    block_on("migrate", async {
        match migrated_pool("migrate").await {
            Ok(pool) => {
                pool.close().await;
                CommandResult::success("migrate", "applied pending migrations")
            }
            Err(failure) => failure,
        }
    })
}
