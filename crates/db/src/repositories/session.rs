use chrono::{DateTime, Utc};
use sqlx::Row;

use parley_core::domain::bot::BotId;
use parley_core::domain::session::{Session, SessionId};

use super::{RepositoryError, SessionRepository};
use crate::connection::{parse_timestamp, timestamp};
use crate::DbPool;

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SESSION_COLUMNS: &str = "id, bot_id, messages_json, metadata_json, created_at, updated_at";

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());
    let id: String = row.try_get("id").map_err(decode)?;
    let bot_id: String = row.try_get("bot_id").map_err(decode)?;
    let messages_json: String = row.try_get("messages_json").map_err(decode)?;
    let metadata_json: String = row.try_get("metadata_json").map_err(decode)?;
    let created_at: String = row.try_get("created_at").map_err(decode)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode)?;

    Ok(Session {
        id: SessionId(id),
        bot_id: BotId(bot_id),
        messages: serde_json::from_str(&messages_json)?,
        metadata: serde_json::from_str(&metadata_json)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn find(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM chat_session WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_session).transpose()
    }

    async fn upsert(&self, session: Session) -> Result<(), RepositoryError> {
        let messages_json = serde_json::to_string(&session.messages)?;
        let metadata_json = serde_json::to_string(&session.metadata)?;

        let result = sqlx::query(
            "INSERT INTO chat_session
                 (id, bot_id, messages_json, metadata_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 messages_json = excluded.messages_json,
                 metadata_json = excluded.metadata_json,
                 updated_at = excluded.updated_at
             WHERE chat_session.bot_id = excluded.bot_id",
        )
        .bind(&session.id.0)
        .bind(&session.bot_id.0)
        .bind(&messages_json)
        .bind(&metadata_json)
        .bind(timestamp(&session.created_at))
        .bind(timestamp(&session.updated_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "session `{}` belongs to another bot",
                session.id.0
            )));
        }
        Ok(())
    }

    async fn latest_for_bot(
        &self,
        bot_id: &BotId,
        exclude: &SessionId,
        since: DateTime<Utc>,
    ) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_session
             WHERE bot_id = ? AND id != ? AND updated_at >= ?
             ORDER BY updated_at DESC
             LIMIT 1"
        ))
        .bind(&bot_id.0)
        .bind(&exclude.0)
        .bind(timestamp(&since))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_session).transpose()
    }
}
