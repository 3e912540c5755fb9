use chrono::Utc;
use sqlx::Row;

use parley_core::domain::bot::{BotConfig, BotId};

use super::{BotRepository, RepositoryError};
use crate::connection::timestamp;
use crate::DbPool;

/// Bots are stored as a JSON document plus a few queryable columns.
pub struct SqlBotRepository {
    pool: DbPool,
}

impl SqlBotRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BotRepository for SqlBotRepository {
    async fn get(&self, id: &BotId) -> Result<Option<BotConfig>, RepositoryError> {
        let row = sqlx::query("SELECT config_json FROM bot WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String =
                    row.try_get("config_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, bot: BotConfig) -> Result<(), RepositoryError> {
        let config_json = serde_json::to_string(&bot)?;
        let now = timestamp(&Utc::now());
        let plan = serde_json::to_value(bot.plan)?;

        sqlx::query(
            "INSERT INTO bot (id, name, bot_type, plan, config_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 bot_type = excluded.bot_type,
                 plan = excluded.plan,
                 config_json = excluded.config_json,
                 updated_at = excluded.updated_at",
        )
        .bind(&bot.id.0)
        .bind(&bot.name)
        .bind(bot.bot_type.as_str())
        .bind(plan.as_str().unwrap_or("free"))
        .bind(&config_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
