use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::bot::BotId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// A side-effect held back for human sign-off. Created pending; other systems move it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub bot_id: BotId,
    pub action_type: String,
    pub payload: Value,
    pub context: Value,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn pending(
        bot_id: BotId,
        action_type: impl Into<String>,
        payload: Value,
        context: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ApprovalId(uuid::Uuid::new_v4().to_string()),
            bot_id,
            action_type: action_type.into(),
            payload,
            context,
            status: ApprovalStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
