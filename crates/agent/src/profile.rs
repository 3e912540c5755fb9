use std::sync::{Arc, OnceLock};

use chrono::Duration;
use regex::Regex;
use tracing::warn;

use parley_core::clock::Clock;
use parley_core::domain::bot::BotId;
use parley_core::domain::conversation::{is_first_turn, last_user_message, ConversationTurn, Role};
use parley_core::domain::session::{Segment, Session, SessionId, SessionMetadata};
use parley_db::repositories::SessionRepository;

use crate::pii;
use crate::text::{mentions_business, normalize};

const RECALL_WINDOW_DAYS: i64 = 30;
const STOP_WORDS: &[&str] = &["and", "but", "as", "so", "och", "men", "som", "så"];

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email regex")
    })
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)\b(?:my name is|i'm called|i am called|jag heter|mitt namn är)",
            r"\s+(\p{L}[\p{L}'-]*)",
        ))
        .expect("valid name regex")
    })
}

fn company_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)\b(?:i work (?:at|for)|jag (?:jobbar|arbetar) (?:på|för))",
            r"\s+([\p{L}\p{N}&'.-]+(?:\s+[\p{L}\p{N}&'.-]+){0,2})",
        ))
        .expect("valid company regex")
    })
}

/// Infers visitor identity from user turns; later mentions override earlier ones.
pub fn extract(history: &[ConversationTurn]) -> SessionMetadata {
    let mut metadata = SessionMetadata::default();
    let mut any_user_turn = false;
    let mut business = false;

    for turn in history.iter().filter(|turn| turn.role == Role::User) {
        any_user_turn = true;
        let content = turn.content.as_str();

        if let Some(email) = email_pattern().find_iter(content).last() {
            metadata.email = Some(email.as_str().to_ascii_lowercase());
        }
        if let Some(captures) = name_pattern().captures_iter(content).last() {
            metadata.name = captures.get(1).map(|name| name.as_str().to_string());
        }
        if let Some(captures) = company_pattern().captures_iter(content).last() {
            metadata.company = captures.get(1).and_then(|company| clean_company(company.as_str()));
        }
        business |= mentions_business(&normalize(content));
    }

    if any_user_turn {
        metadata.segment = Some(if business { Segment::B2b } else { Segment::B2c });
    }
    metadata
}

fn clean_company(raw: &str) -> Option<String> {
    let words: Vec<&str> = raw
        .split_whitespace()
        .take_while(|word| !STOP_WORDS.contains(&word.to_lowercase().as_str()))
        .collect();
    let company = words.join(" ");
    let company = company.trim_end_matches(['.', ',', '!', '?', '\'']).to_string();
    (!company.is_empty()).then_some(company)
}

/// Loads previous-visit context and persists each turn. Failures never reach the visitor.
pub struct SessionRecorder {
    sessions: Arc<dyn SessionRepository>,
    clock: Arc<dyn Clock>,
}

impl SessionRecorder {
    pub fn new(sessions: Arc<dyn SessionRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { sessions, clock }
    }

    /// The requested id when it is free or owned by `bot_id`, otherwise a fresh one.
    pub async fn resolve(
        &self,
        bot_id: &BotId,
        requested: Option<&str>,
        correlation_id: &str,
    ) -> SessionId {
        let Some(requested) = requested.map(str::trim).filter(|id| !id.is_empty()) else {
            return SessionId::generate();
        };
        let requested = SessionId(requested.to_string());
        match self.sessions.find(&requested).await {
            Ok(Some(stored)) if &stored.bot_id != bot_id => {
                warn!(
                    event_name = "session.foreign_id",
                    correlation_id = %correlation_id,
                    bot_id = %bot_id,
                    session_id = %requested.0,
                    "session id belongs to another bot, assigning a fresh one"
                );
                SessionId::generate()
            }
            _ => requested,
        }
    }

    /// A note about the bot's latest other named visitor, only on a session's first turn.
    pub async fn recall(
        &self,
        bot_id: &BotId,
        session_id: &SessionId,
        history: &[ConversationTurn],
        correlation_id: &str,
    ) -> Option<String> {
        if !is_first_turn(history) {
            return None;
        }
        let since = self.clock.now() - Duration::days(RECALL_WINDOW_DAYS);
        let previous = match self.sessions.latest_for_bot(bot_id, session_id, since).await {
            Ok(previous) => previous?,
            Err(error) => {
                warn!(
                    event_name = "session.recall_failed",
                    correlation_id = %correlation_id,
                    bot_id = %bot_id,
                    error = %error,
                    "previous session lookup failed"
                );
                return None;
            }
        };

        let name = previous.metadata.name.as_deref()?;
        let note = match last_user_message(&previous.messages) {
            Some(turn) => format!(
                "This may be {name} returning. Last time they asked: \"{}\". Greet them by name \
                 only if it fits naturally.",
                pii::mask(turn.content.trim())
            ),
            None => format!(
                "This may be {name} returning. Greet them by name only if it fits naturally."
            ),
        };
        Some(note)
    }

    /// Upserts history plus reply with metadata merged over what was stored.
    pub async fn record(
        &self,
        bot_id: &BotId,
        session_id: &SessionId,
        history: &[ConversationTurn],
        reply: &str,
        inferred: &SessionMetadata,
        correlation_id: &str,
    ) {
        let now = self.clock.now();
        let existing = match self.sessions.find(session_id).await {
            Ok(existing) => existing.filter(|stored| &stored.bot_id == bot_id),
            Err(error) => {
                warn!(
                    event_name = "session.load_failed",
                    correlation_id = %correlation_id,
                    session_id = %session_id.0,
                    error = %error,
                    "stored session could not be loaded, metadata starts fresh"
                );
                None
            }
        };

        let metadata = existing
            .as_ref()
            .map(|stored| stored.metadata.merged_with(inferred))
            .unwrap_or_else(|| inferred.clone());
        let mut messages = history.to_vec();
        messages.push(ConversationTurn { timestamp: now, ..ConversationTurn::assistant(reply) });

        let session = Session {
            id: session_id.clone(),
            bot_id: bot_id.clone(),
            messages,
            metadata,
            created_at: existing.as_ref().map_or(now, |stored| stored.created_at),
            updated_at: now,
        };

        if let Err(error) = self.sessions.upsert(session).await {
            warn!(
                event_name = "session.upsert_failed",
                correlation_id = %correlation_id,
                session_id = %session_id.0,
                error = %error,
                "session could not be saved"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use parley_core::clock::ManualClock;
    use parley_core::domain::bot::BotId;
    use parley_core::domain::conversation::ConversationTurn;
    use parley_core::domain::session::{Segment, Session, SessionId, SessionMetadata};
    use parley_db::repositories::{InMemorySessionRepository, SessionRepository};

    use super::{extract, SessionRecorder};

    #[test]
    fn extracts_identity_in_english_and_swedish() {
        let english = extract(&[
            ConversationTurn::user("Hi, my name is Erik and I work at Acme Logistics AB."),
            ConversationTurn::assistant("Hello Erik!"),
            ConversationTurn::user("Send the invoice to erik@Acme.se please"),
        ]);
        assert_eq!(english.name.as_deref(), Some("Erik"));
        assert_eq!(english.company.as_deref(), Some("Acme Logistics AB"));
        assert_eq!(english.email.as_deref(), Some("erik@acme.se"));
        assert_eq!(english.segment, Some(Segment::B2b));

        let swedish =
            extract(&[ConversationTurn::user("Hej! Jag heter Åsa och jag jobbar på Fika")]);
        assert_eq!(swedish.name.as_deref(), Some("Åsa"));
        assert_eq!(swedish.company.as_deref(), Some("Fika"));
        assert_eq!(swedish.segment, Some(Segment::B2c));
    }

    #[test]
    fn assistant_turns_are_ignored() {
        let metadata = extract(&[ConversationTurn::assistant("My name is Parley, the assistant")]);
        assert_eq!(metadata, SessionMetadata::default());
    }

    fn stored_session(id: &str, name: Option<&str>, updated_at: chrono::DateTime<Utc>) -> Session {
        Session {
            id: SessionId(id.to_string()),
            bot_id: BotId("bot-1".to_string()),
            messages: vec![
                ConversationTurn::user("Do you deliver to Malmö?"),
                ConversationTurn::assistant("Yes we do."),
            ],
            metadata: SessionMetadata {
                name: name.map(str::to_string),
                ..SessionMetadata::default()
            },
            created_at: updated_at,
            updated_at,
        }
    }

    #[tokio::test]
    async fn recall_names_the_previous_visitor_on_first_turn_only() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).single().expect("valid date");
        let sessions = Arc::new(InMemorySessionRepository::default());
        sessions
            .upsert(stored_session("s-prev", Some("Erik"), now - Duration::days(3)))
            .await
            .expect("seed");
        let recorder = SessionRecorder::new(sessions, Arc::new(ManualClock::new(now)));
        let bot_id = BotId("bot-1".to_string());
        let current = SessionId("s-now".to_string());

        let note = recorder
            .recall(&bot_id, &current, &[ConversationTurn::user("hello again")], "req-1")
            .await
            .expect("note for first turn");
        assert!(note.contains("Erik"));
        assert!(note.contains("Do you deliver to Malmö?"));

        let later_turn = [
            ConversationTurn::user("hello again"),
            ConversationTurn::assistant("Hi!"),
            ConversationTurn::user("one more thing"),
        ];
        assert!(recorder.recall(&bot_id, &current, &later_turn, "req-2").await.is_none());
    }

    #[tokio::test]
    async fn recall_ignores_stale_or_anonymous_sessions() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).single().expect("valid date");
        let sessions = Arc::new(InMemorySessionRepository::default());
        sessions
            .upsert(stored_session("s-old", Some("Erik"), now - Duration::days(31)))
            .await
            .expect("seed");
        sessions
            .upsert(stored_session("s-anon", None, now - Duration::days(1)))
            .await
            .expect("seed");
        let recorder = SessionRecorder::new(sessions, Arc::new(ManualClock::new(now)));

        let note = recorder
            .recall(
                &BotId("bot-1".to_string()),
                &SessionId("s-now".to_string()),
                &[ConversationTurn::user("hello")],
                "req-1",
            )
            .await;
        assert!(note.is_none());
    }

    #[tokio::test]
    async fn record_appends_reply_and_keeps_stored_metadata() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).single().expect("valid date");
        let sessions = Arc::new(InMemorySessionRepository::default());
        let mut stored = stored_session("s-1", Some("Erik"), now - Duration::minutes(5));
        stored.metadata.email = Some("erik@example.com".to_string());
        sessions.upsert(stored.clone()).await.expect("seed");
        let recorder = SessionRecorder::new(sessions.clone(), Arc::new(ManualClock::new(now)));

        let mut history = stored.messages.clone();
        history.push(ConversationTurn::user("I work at Volvo"));
        let inferred = extract(&history);
        recorder
            .record(&stored.bot_id, &stored.id, &history, "Great, noted!", &inferred, "req-1")
            .await;

        let saved = sessions.find(&stored.id).await.expect("find").expect("saved");
        assert_eq!(saved.messages.len(), 4);
        assert_eq!(saved.messages[3].content, "Great, noted!");
        assert_eq!(saved.metadata.name.as_deref(), Some("Erik"));
        assert_eq!(saved.metadata.email.as_deref(), Some("erik@example.com"));
        assert_eq!(saved.metadata.company.as_deref(), Some("Volvo"));
        assert_eq!(saved.created_at, stored.created_at);
        assert_eq!(saved.updated_at, now);
    }

    #[tokio::test]
    async fn recall_masks_contact_details_from_the_previous_visit() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).single().expect("valid date");
        let sessions = Arc::new(InMemorySessionRepository::default());
        let mut previous = stored_session("s-prev", Some("Erik"), now - Duration::days(2));
        previous.messages =
            vec![ConversationTurn::user("Call me on +46 70 123 45 67 or erik@a.se")];
        sessions.upsert(previous).await.expect("seed");
        let recorder = SessionRecorder::new(sessions, Arc::new(ManualClock::new(now)));

        let note = recorder
            .recall(
                &BotId("bot-1".to_string()),
                &SessionId("s-now".to_string()),
                &[ConversationTurn::user("hi")],
                "req-1",
            )
            .await
            .expect("note");

        assert!(note.contains("[phone]"));
        assert!(note.contains("[email]"));
        assert!(!note.contains("erik@a.se"));
    }

    #[tokio::test]
    async fn session_ids_owned_by_another_bot_are_replaced() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).single().expect("valid date");
        let sessions = Arc::new(InMemorySessionRepository::default());
        let mut foreign = stored_session("s-1", Some("Erik"), now - Duration::minutes(5));
        foreign.bot_id = BotId("tenant-a".to_string());
        foreign.metadata.email = Some("erik@a.se".to_string());
        sessions.upsert(foreign.clone()).await.expect("seed");
        let recorder = SessionRecorder::new(sessions.clone(), Arc::new(ManualClock::new(now)));
        let tenant_b = BotId("tenant-b".to_string());

        let resolved = recorder.resolve(&tenant_b, Some("s-1"), "req-1").await;
        assert_ne!(resolved, foreign.id);
        assert_eq!(recorder.resolve(&foreign.bot_id, Some(" s-1 "), "req-2").await, foreign.id);
        assert_eq!(recorder.resolve(&tenant_b, Some("s-free"), "req-3").await.0, "s-free");

        let history = [ConversationTurn::user("hello")];
        recorder
            .record(&tenant_b, &resolved, &history, "Hi!", &extract(&history), "req-4")
            .await;

        let saved = sessions.find(&resolved).await.expect("find").expect("saved");
        assert_eq!(saved.bot_id, tenant_b);
        assert_eq!(saved.metadata.email, None);
        let untouched = sessions.find(&foreign.id).await.expect("find").expect("kept");
        assert_eq!(untouched, foreign);
    }
}
