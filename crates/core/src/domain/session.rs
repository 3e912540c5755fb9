use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::bot::BotId;
use crate::domain::conversation::ConversationTurn;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    B2b,
    B2c,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<Segment>,
}

impl SessionMetadata {
    /// Fields inferred from the newer metadata win; gaps keep the stored value.
    pub fn merged_with(&self, newer: &SessionMetadata) -> SessionMetadata {
        SessionMetadata {
            name: newer.name.clone().or_else(|| self.name.clone()),
            email: newer.email.clone().or_else(|| self.email.clone()),
            company: newer.company.clone().or_else(|| self.company.clone()),
            segment: newer.segment.or(self.segment),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub bot_id: BotId,
    pub messages: Vec<ConversationTurn>,
    pub metadata: SessionMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
