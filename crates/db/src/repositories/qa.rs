use sqlx::Row;

use parley_core::domain::bot::BotId;
use parley_core::domain::knowledge::{QaEntry, QaEntryId};

use super::{QaRepository, RepositoryError};
use crate::DbPool;

pub struct SqlQaRepository {
    pool: DbPool,
}

impl SqlQaRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<QaEntry, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());
    let id: String = row.try_get("id").map_err(decode)?;
    let bot_id: String = row.try_get("bot_id").map_err(decode)?;
    let confidence: f64 = row.try_get("confidence").map_err(decode)?;
    let verified: i64 = row.try_get("verified").map_err(decode)?;
    let hit_count: i64 = row.try_get("hit_count").map_err(decode)?;

    Ok(QaEntry {
        id: QaEntryId(id),
        bot_id: BotId(bot_id),
        question: row.try_get("question").map_err(decode)?,
        answer: row.try_get("answer").map_err(decode)?,
        confidence: confidence as f32,
        verified: verified != 0,
        hit_count: hit_count.max(0) as u64,
        source_type: row.try_get("source_type").map_err(decode)?,
    })
}

#[async_trait::async_trait]
impl QaRepository for SqlQaRepository {
    async fn list_by_bot(&self, bot_id: &BotId) -> Result<Vec<QaEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, bot_id, question, answer, confidence, verified, hit_count, source_type
             FROM qa_entry WHERE bot_id = ? ORDER BY rowid ASC",
        )
        .bind(&bot_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn increment_hit(&self, id: &QaEntryId) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE qa_entry SET hit_count = hit_count + 1 WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("qa entry `{}`", id.0)));
        }
        Ok(())
    }

    async fn save(&self, entry: QaEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO qa_entry
                 (id, bot_id, question, answer, confidence, verified, hit_count, source_type)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 question = excluded.question,
                 answer = excluded.answer,
                 confidence = excluded.confidence,
                 verified = excluded.verified,
                 hit_count = MAX(qa_entry.hit_count, excluded.hit_count),
                 source_type = excluded.source_type",
        )
        .bind(&entry.id.0)
        .bind(&entry.bot_id.0)
        .bind(&entry.question)
        .bind(&entry.answer)
        .bind(f64::from(entry.confidence.clamp(0.0, 1.0)))
        .bind(i64::from(entry.verified))
        .bind(i64::try_from(entry.hit_count).unwrap_or(i64::MAX))
        .bind(&entry.source_type)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use parley_core::domain::bot::BotId;
    use parley_core::domain::knowledge::{QaEntry, QaEntryId};

    use super::SqlQaRepository;
    use crate::repositories::test_support::{insert_bot, migrated_pool};
    use crate::repositories::QaRepository;

    fn entry(id: &str, bot: &str) -> QaEntry {
        QaEntry {
            id: QaEntryId(id.to_string()),
            bot_id: BotId(bot.to_string()),
            question: "Do you ship abroad?".to_string(),
            answer: "Yes, to all EU countries.".to_string(),
            confidence: 0.85,
            verified: false,
            hit_count: 0,
            source_type: "manual".to_string(),
        }
    }

    #[tokio::test]
    async fn list_by_bot_only_returns_that_bots_entries() {
        let pool = migrated_pool().await;
        insert_bot(&pool, "bot-1").await;
        insert_bot(&pool, "bot-2").await;
        let repo = SqlQaRepository::new(pool);

        repo.save(entry("qa-1", "bot-1")).await.expect("save 1");
        repo.save(entry("qa-2", "bot-1")).await.expect("save 2");
        repo.save(entry("qa-3", "bot-2")).await.expect("save 3");

        let entries = repo.list_by_bot(&BotId("bot-1".to_string())).await.expect("list");
        let ids = entries.iter().map(|entry| entry.id.0.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["qa-1", "qa-2"]);
        assert!((entries[0].confidence - 0.85).abs() < 1e-6);
    }

    #[tokio::test]
    async fn increment_hit_adds_one_and_missing_entry_errors() {
        let pool = migrated_pool().await;
        insert_bot(&pool, "bot-1").await;
        let repo = SqlQaRepository::new(pool);
        repo.save(entry("qa-1", "bot-1")).await.expect("save");

        repo.increment_hit(&QaEntryId("qa-1".to_string())).await.expect("increment");
        repo.increment_hit(&QaEntryId("qa-1".to_string())).await.expect("increment");

        let entries = repo.list_by_bot(&BotId("bot-1".to_string())).await.expect("list");
        assert_eq!(entries[0].hit_count, 2);

        assert!(repo.increment_hit(&QaEntryId("nope".to_string())).await.is_err());
    }

    #[tokio::test]
    async fn resave_keeps_higher_hit_count() {
        let pool = migrated_pool().await;
        insert_bot(&pool, "bot-1").await;
        let repo = SqlQaRepository::new(pool);
        repo.save(entry("qa-1", "bot-1")).await.expect("save");
        repo.increment_hit(&QaEntryId("qa-1".to_string())).await.expect("increment");

        repo.save(entry("qa-1", "bot-1")).await.expect("resave");

        let entries = repo.list_by_bot(&BotId("bot-1".to_string())).await.expect("list");
        assert_eq!(entries[0].hit_count, 1);
    }
}
