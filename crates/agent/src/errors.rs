use thiserror::Error;

use parley_core::errors::{ApplicationError, DomainError};

/// Failures that abort a turn. Everything else degrades inside the pipeline.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("bot `{0}` was not found")]
    BotNotFound(String),
    #[error("too many requests from {ip} for bot `{bot_id}`")]
    RateLimited { ip: String, bot_id: String },
    #[error("generation failed: {0}")]
    Upstream(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl From<TurnError> for ApplicationError {
    fn from(value: TurnError) -> Self {
        match value {
            TurnError::BotNotFound(bot_id) => Self::Domain(DomainError::BotNotFound(bot_id)),
            TurnError::RateLimited { ip, bot_id } => {
                Self::RateLimited(format!("{ip} exceeded the request window for {bot_id}"))
            }
            TurnError::Upstream(message) => Self::Upstream(message),
            TurnError::Persistence(message) => Self::Persistence(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use parley_core::errors::ApplicationError;

    use super::TurnError;

    #[test]
    fn turn_errors_map_to_http_statuses() {
        let cases = [
            (TurnError::BotNotFound("bot-1".to_string()), 404),
            (TurnError::RateLimited { ip: "1.2.3.4".to_string(), bot_id: "b".to_string() }, 429),
            (TurnError::Upstream("timeout".to_string()), 500),
            (TurnError::Persistence("locked".to_string()), 500),
        ];

        for (error, expected) in cases {
            let interface = ApplicationError::from(error).into_interface("req-1");
            assert_eq!(interface.status_code(), expected);
            assert_eq!(interface.correlation_id(), "req-1");
        }
    }
}
