use parley_core::domain::usage::{UsageFilter, UsageRecord};

use super::{RepositoryError, UsageRepository};
use crate::connection::timestamp;
use crate::DbPool;

pub struct SqlUsageRepository {
    pool: DbPool,
}

impl SqlUsageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UsageRepository for SqlUsageRepository {
    async fn create(&self, record: UsageRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO usage_record (bot_id, kind, tokens, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&record.bot_id.0)
        .bind(record.kind.as_str())
        .bind(i64::try_from(record.tokens).unwrap_or(i64::MAX))
        .bind(timestamp(&record.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count(&self, filter: &UsageFilter) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM usage_record
             WHERE bot_id = ? AND (? IS NULL OR kind = ?) AND created_at >= ?",
        )
        .bind(&filter.bot_id.0)
        .bind(filter.kind.map(|kind| kind.as_str()))
        .bind(filter.kind.map(|kind| kind.as_str()))
        .bind(timestamp(&filter.since))
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn sum_tokens(&self, filter: &UsageFilter) -> Result<u64, RepositoryError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(tokens), 0) FROM usage_record
             WHERE bot_id = ? AND (? IS NULL OR kind = ?) AND created_at >= ?",
        )
        .bind(&filter.bot_id.0)
        .bind(filter.kind.map(|kind| kind.as_str()))
        .bind(filter.kind.map(|kind| kind.as_str()))
        .bind(timestamp(&filter.since))
        .fetch_one(&self.pool)
        .await?;

        Ok(total.max(0) as u64)
    }
}
