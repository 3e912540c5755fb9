use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqlitePoolOptions;

use crate::repositories::RepositoryError;

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

/// Fixed-width UTC timestamp so that text columns compare in time order.
pub(crate) fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid timestamp `{value}`: {error}")))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{parse_timestamp, timestamp};
    use crate::repositories::RepositoryError;

    #[test]
    fn stored_timestamps_parse_back_to_the_same_instant() {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).single().expect("valid instant");

        assert_eq!(parse_timestamp(&timestamp(&at)).expect("parse"), at);
    }

    #[test]
    fn malformed_timestamp_is_a_decode_error() {
        let error = parse_timestamp("yesterday").expect_err("garbage must not parse");

        assert!(matches!(
            error,
            RepositoryError::Decode(ref message) if message.contains("yesterday")
        ));
    }
}
