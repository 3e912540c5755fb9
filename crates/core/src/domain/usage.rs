use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::bot::BotId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    Message,
    Embedding,
}

impl UsageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Embedding => "embedding",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "message" => Some(Self::Message),
            "embedding" => Some(Self::Embedding),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub bot_id: BotId,
    pub kind: UsageKind,
    pub tokens: u64,
    pub created_at: DateTime<Utc>,
}

/// Selects usage records of one bot created at or after `since`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsageFilter {
    pub bot_id: BotId,
    pub kind: Option<UsageKind>,
    pub since: DateTime<Utc>,
}

impl UsageFilter {
    pub fn matches(&self, record: &UsageRecord) -> bool {
        record.bot_id == self.bot_id
            && self.kind.map_or(true, |kind| kind == record.kind)
            && record.created_at >= self.since
    }
}
