use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use parley_core::domain::approval::{ApprovalId, ApprovalRequest};
use parley_core::domain::bot::{BotConfig, BotId};
use parley_core::domain::knowledge::{KnowledgeChunk, QaEntry, QaEntryId};
use parley_core::domain::session::{Session, SessionId};
use parley_core::domain::usage::{UsageFilter, UsageRecord};

pub mod approval;
pub mod bot;
pub mod knowledge;
pub mod memory;
pub mod qa;
pub mod session;
pub mod usage;

pub use approval::SqlApprovalRepository;
pub use bot::SqlBotRepository;
pub use knowledge::SqlKnowledgeRepository;
pub use memory::{
    InMemoryApprovalRepository, InMemoryBotRepository, InMemoryKnowledgeRepository,
    InMemoryQaRepository, InMemorySessionRepository, InMemoryUsageRepository,
};
pub use qa::SqlQaRepository;
pub use session::SqlSessionRepository;
pub use usage::SqlUsageRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("conflicting record: {0}")]
    Conflict(String),
}

impl From<serde_json::Error> for RepositoryError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

#[async_trait]
pub trait BotRepository: Send + Sync {
    async fn get(&self, id: &BotId) -> Result<Option<BotConfig>, RepositoryError>;
    async fn save(&self, bot: BotConfig) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait QaRepository: Send + Sync {
    async fn list_by_bot(&self, bot_id: &BotId) -> Result<Vec<QaEntry>, RepositoryError>;
    /// Adds exactly one to the entry's hit counter. Counters never decrease.
    async fn increment_hit(&self, id: &QaEntryId) -> Result<(), RepositoryError>;
    async fn save(&self, entry: QaEntry) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait KnowledgeRepository: Send + Sync {
    async fn list_by_bot(&self, bot_id: &BotId) -> Result<Vec<KnowledgeChunk>, RepositoryError>;
    async fn save(&self, chunk: KnowledgeChunk) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError>;
    async fn upsert(&self, session: Session) -> Result<(), RepositoryError>;
    /// Most recently updated session of the bot other than `exclude`, updated at or after `since`.
    async fn latest_for_bot(
        &self,
        bot_id: &BotId,
        exclude: &SessionId,
        since: DateTime<Utc>,
    ) -> Result<Option<Session>, RepositoryError>;
}

#[async_trait]
pub trait UsageRepository: Send + Sync {
    async fn create(&self, record: UsageRecord) -> Result<(), RepositoryError>;
    async fn count(&self, filter: &UsageFilter) -> Result<u64, RepositoryError>;
    async fn sum_tokens(&self, filter: &UsageFilter) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn create(&self, request: ApprovalRequest) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &ApprovalId)
        -> Result<Option<ApprovalRequest>, RepositoryError>;
    async fn list_pending(&self, bot_id: &BotId) -> Result<Vec<ApprovalRequest>, RepositoryError>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use parley_core::domain::bot::{BotConfig, BotType};

    use super::{BotRepository, SqlBotRepository};
    use crate::{connect_with_settings, migrations, DbPool};

    pub async fn migrated_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    /// Inserts a parent bot row so that foreign keys are satisfied.
    pub async fn insert_bot(pool: &DbPool, bot_id: &str) -> BotConfig {
        let bot = BotConfig::new(bot_id, format!("Bot {bot_id}"), BotType::Knowledge);
        SqlBotRepository::new(pool.clone()).save(bot.clone()).await.expect("insert parent bot");
        bot
    }
}
