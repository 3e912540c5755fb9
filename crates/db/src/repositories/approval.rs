use sqlx::Row;

use parley_core::domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
use parley_core::domain::bot::BotId;

use super::{ApprovalRepository, RepositoryError};
use crate::connection::{parse_timestamp, timestamp};
use crate::DbPool;

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_approval(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());
    let id: String = row.try_get("id").map_err(decode)?;
    let bot_id: String = row.try_get("bot_id").map_err(decode)?;
    let payload_json: String = row.try_get("payload_json").map_err(decode)?;
    let context_json: String = row.try_get("context_json").map_err(decode)?;
    let status_str: String = row.try_get("status").map_err(decode)?;
    let created_at: String = row.try_get("created_at").map_err(decode)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode)?;

    let status = ApprovalStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown approval status `{status_str}`")))?;

    Ok(ApprovalRequest {
        id: ApprovalId(id),
        bot_id: BotId(bot_id),
        action_type: row.try_get("action_type").map_err(decode)?,
        payload: serde_json::from_str(&payload_json)?,
        context: serde_json::from_str(&context_json)?,
        status,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

const APPROVAL_COLUMNS: &str =
    "id, bot_id, action_type, payload_json, context_json, status, created_at, updated_at";

#[async_trait::async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn create(&self, request: ApprovalRequest) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO approval_request (id, bot_id, action_type, payload_json, context_json,
                                           status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.bot_id.0)
        .bind(&request.action_type)
        .bind(serde_json::to_string(&request.payload)?)
        .bind(serde_json::to_string(&request.context)?)
        .bind(request.status.as_str())
        .bind(timestamp(&request.created_at))
        .bind(timestamp(&request.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {APPROVAL_COLUMNS} FROM approval_request WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(row_to_approval).transpose()
    }

    async fn list_pending(&self, bot_id: &BotId) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval_request
             WHERE bot_id = ? AND status = 'pending'
             ORDER BY created_at ASC"
        ))
        .bind(&bot_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_approval).collect()
    }
}
