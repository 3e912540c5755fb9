use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), timestamp: Utc::now() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), timestamp: Utc::now() }
    }
}

/// Latest visitor message, if any.
pub fn last_user_message(history: &[ConversationTurn]) -> Option<&ConversationTurn> {
    history.iter().rev().find(|turn| turn.role == Role::User)
}

/// A conversation is on its first turn until the assistant has replied once.
pub fn is_first_turn(history: &[ConversationTurn]) -> bool {
    !history.iter().any(|turn| turn.role == Role::Assistant)
}
