use sqlx::Row;

use parley_core::domain::bot::BotId;
use parley_core::domain::knowledge::{ChunkId, KnowledgeChunk};

use super::{KnowledgeRepository, RepositoryError};
use crate::DbPool;

pub struct SqlKnowledgeRepository {
    pool: DbPool,
}

impl SqlKnowledgeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<KnowledgeChunk, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());
    let id: String = row.try_get("id").map_err(decode)?;
    let bot_id: String = row.try_get("bot_id").map_err(decode)?;
    let embedding_json: String = row.try_get("embedding_json").map_err(decode)?;

    Ok(KnowledgeChunk {
        id: ChunkId(id),
        bot_id: BotId(bot_id),
        source_url: row.try_get("source_url").map_err(decode)?,
        title: row.try_get("title").map_err(decode)?,
        content: row.try_get("content").map_err(decode)?,
        embedding: serde_json::from_str(&embedding_json)?,
    })
}

#[async_trait::async_trait]
impl KnowledgeRepository for SqlKnowledgeRepository {
    async fn list_by_bot(&self, bot_id: &BotId) -> Result<Vec<KnowledgeChunk>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, bot_id, source_url, title, content, embedding_json
             FROM knowledge_chunk WHERE bot_id = ? ORDER BY rowid ASC",
        )
        .bind(&bot_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_chunk).collect()
    }

    async fn save(&self, chunk: KnowledgeChunk) -> Result<(), RepositoryError> {
        let embedding_json = serde_json::to_string(&chunk.embedding)?;

        sqlx::query(
            "INSERT INTO knowledge_chunk (id, bot_id, source_url, title, content, embedding_json)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 source_url = excluded.source_url,
                 title = excluded.title,
                 content = excluded.content,
                 embedding_json = excluded.embedding_json",
        )
        .bind(&chunk.id.0)
        .bind(&chunk.bot_id.0)
        .bind(&chunk.source_url)
        .bind(&chunk.title)
        .bind(&chunk.content)
        .bind(&embedding_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use parley_core::domain::bot::BotId;
    use parley_core::domain::knowledge::{ChunkId, KnowledgeChunk};

    use super::SqlKnowledgeRepository;
    use crate::repositories::test_support::{insert_bot, migrated_pool};
    use crate::repositories::KnowledgeRepository;

    #[tokio::test]
    async fn embeddings_survive_storage() {
        let pool = migrated_pool().await;
        insert_bot(&pool, "bot-1").await;
        let repo = SqlKnowledgeRepository::new(pool);

        let chunk = KnowledgeChunk {
            id: ChunkId("chunk-1".to_string()),
            bot_id: BotId("bot-1".to_string()),
            source_url: "https://example.com/returns".to_string(),
            title: "Returns".to_string(),
            content: "Items can be returned within 30 days.".to_string(),
            embedding: vec![0.25, -0.5, 1.0],
        };

        repo.save(chunk.clone()).await.expect("save");
        let chunks = repo.list_by_bot(&BotId("bot-1".to_string())).await.expect("list");

        assert_eq!(chunks, vec![chunk]);
    }
}
