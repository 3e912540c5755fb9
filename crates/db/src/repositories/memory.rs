use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use parley_core::domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
use parley_core::domain::bot::{BotConfig, BotId};
use parley_core::domain::knowledge::{KnowledgeChunk, QaEntry, QaEntryId};
use parley_core::domain::session::{Session, SessionId};
use parley_core::domain::usage::{UsageFilter, UsageRecord};

use super::{
    ApprovalRepository, BotRepository, KnowledgeRepository, QaRepository, RepositoryError,
    SessionRepository, UsageRepository,
};

#[derive(Default)]
pub struct InMemoryBotRepository {
    bots: RwLock<HashMap<String, BotConfig>>,
}

#[async_trait::async_trait]
impl BotRepository for InMemoryBotRepository {
    async fn get(&self, id: &BotId) -> Result<Option<BotConfig>, RepositoryError> {
        let bots = self.bots.read().await;
        Ok(bots.get(&id.0).cloned())
    }

    async fn save(&self, bot: BotConfig) -> Result<(), RepositoryError> {
        let mut bots = self.bots.write().await;
        bots.insert(bot.id.0.clone(), bot);
        Ok(())
    }
}

/// Entries keep insertion order so that listing is deterministic.
#[derive(Default)]
pub struct InMemoryQaRepository {
    entries: RwLock<Vec<QaEntry>>,
}

impl InMemoryQaRepository {
    pub async fn hit_count(&self, id: &QaEntryId) -> Option<u64> {
        let entries = self.entries.read().await;
        entries.iter().find(|entry| &entry.id == id).map(|entry| entry.hit_count)
    }
}

#[async_trait::async_trait]
impl QaRepository for InMemoryQaRepository {
    async fn list_by_bot(&self, bot_id: &BotId) -> Result<Vec<QaEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().filter(|entry| &entry.bot_id == bot_id).cloned().collect())
    }

    async fn increment_hit(&self, id: &QaEntryId) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|entry| &entry.id == id)
            .ok_or_else(|| RepositoryError::NotFound(format!("qa entry `{}`", id.0)))?;
        entry.hit_count = entry.hit_count.saturating_add(1);
        Ok(())
    }

    async fn save(&self, entry: QaEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|existing| existing.id == entry.id) {
            Some(existing) => {
                let hit_count = existing.hit_count.max(entry.hit_count);
                *existing = QaEntry { hit_count, ..entry };
            }
            None => entries.push(entry),
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryKnowledgeRepository {
    chunks: RwLock<Vec<KnowledgeChunk>>,
}

#[async_trait::async_trait]
impl KnowledgeRepository for InMemoryKnowledgeRepository {
    async fn list_by_bot(&self, bot_id: &BotId) -> Result<Vec<KnowledgeChunk>, RepositoryError> {
        let chunks = self.chunks.read().await;
        Ok(chunks.iter().filter(|chunk| &chunk.bot_id == bot_id).cloned().collect())
    }

    async fn save(&self, chunk: KnowledgeChunk) -> Result<(), RepositoryError> {
        let mut chunks = self.chunks.write().await;
        chunks.retain(|existing| existing.id != chunk.id);
        chunks.push(chunk);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, Session>>,
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&id.0).cloned())
    }

    async fn upsert(&self, session: Session) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let created_at = match sessions.get(&session.id.0) {
            Some(existing) if existing.bot_id != session.bot_id => {
                return Err(RepositoryError::Conflict(format!(
                    "session `{}` belongs to another bot",
                    session.id.0
                )));
            }
            Some(existing) => existing.created_at,
            None => session.created_at,
        };
        sessions.insert(session.id.0.clone(), Session { created_at, ..session });
        Ok(())
    }

    async fn latest_for_bot(
        &self,
        bot_id: &BotId,
        exclude: &SessionId,
        since: DateTime<Utc>,
    ) -> Result<Option<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .filter(|session| {
                &session.bot_id == bot_id && &session.id != exclude && session.updated_at >= since
            })
            .max_by_key(|session| session.updated_at)
            .cloned())
    }
}

#[derive(Default)]
pub struct InMemoryUsageRepository {
    records: RwLock<Vec<UsageRecord>>,
}

#[async_trait::async_trait]
impl UsageRepository for InMemoryUsageRepository {
    async fn create(&self, record: UsageRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        records.push(record);
        Ok(())
    }

    async fn count(&self, filter: &UsageFilter) -> Result<u64, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|record| filter.matches(record)).count() as u64)
    }

    async fn sum_tokens(&self, filter: &UsageFilter) -> Result<u64, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|record| filter.matches(record)).map(|record| record.tokens).sum())
    }
}

#[derive(Default)]
pub struct InMemoryApprovalRepository {
    approvals: RwLock<Vec<ApprovalRequest>>,
}

impl InMemoryApprovalRepository {
    pub async fn all(&self) -> Vec<ApprovalRequest> {
        self.approvals.read().await.clone()
    }
}

#[async_trait::async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn create(&self, request: ApprovalRequest) -> Result<(), RepositoryError> {
        let mut approvals = self.approvals.write().await;
        approvals.push(request);
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let approvals = self.approvals.read().await;
        Ok(approvals.iter().find(|approval| &approval.id == id).cloned())
    }

    async fn list_pending(&self, bot_id: &BotId) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let approvals = self.approvals.read().await;
        Ok(approvals
            .iter()
            .filter(|approval| {
                &approval.bot_id == bot_id && approval.status == ApprovalStatus::Pending
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use parley_core::domain::approval::ApprovalRequest;
    use parley_core::domain::bot::{BotConfig, BotId, BotType};
    use parley_core::domain::conversation::ConversationTurn;
    use parley_core::domain::knowledge::{QaEntry, QaEntryId};
    use parley_core::domain::session::{Session, SessionId, SessionMetadata};
    use parley_core::domain::usage::{UsageFilter, UsageKind, UsageRecord};

    use crate::repositories::{
        ApprovalRepository, BotRepository, InMemoryApprovalRepository, InMemoryBotRepository,
        InMemoryQaRepository, InMemorySessionRepository, InMemoryUsageRepository, QaRepository,
        RepositoryError, SessionRepository, UsageRepository,
    };

    fn qa(id: &str, hits: u64) -> QaEntry {
        QaEntry {
            id: QaEntryId(id.to_string()),
            bot_id: BotId("bot-1".to_string()),
            question: "What are your opening hours?".to_string(),
            answer: "We are open 9-17.".to_string(),
            confidence: 0.9,
            verified: true,
            hit_count: hits,
            source_type: "manual".to_string(),
        }
    }

    fn session(id: &str, bot: &str, updated_minutes_ago: i64) -> Session {
        let updated_at = Utc::now() - Duration::minutes(updated_minutes_ago);
        Session {
            id: SessionId(id.to_string()),
            bot_id: BotId(bot.to_string()),
            messages: vec![ConversationTurn::user("hello")],
            metadata: SessionMetadata::default(),
            created_at: updated_at,
            updated_at,
        }
    }

    #[tokio::test]
    async fn in_memory_bot_repo_round_trip() {
        let repo = InMemoryBotRepository::default();
        let bot = BotConfig::new("bot-1", "Helper", BotType::Knowledge);

        repo.save(bot.clone()).await.expect("save bot");
        let found = repo.get(&bot.id).await.expect("get bot");

        assert_eq!(found, Some(bot));
    }

    #[tokio::test]
    async fn hit_count_increments_by_exactly_one_and_save_never_lowers_it() {
        let repo = InMemoryQaRepository::default();
        repo.save(qa("qa-1", 4)).await.expect("save");

        repo.increment_hit(&QaEntryId("qa-1".to_string())).await.expect("increment");
        assert_eq!(repo.hit_count(&QaEntryId("qa-1".to_string())).await, Some(5));

        repo.save(qa("qa-1", 0)).await.expect("resave with stale counter");
        assert_eq!(repo.hit_count(&QaEntryId("qa-1".to_string())).await, Some(5));
    }

    #[tokio::test]
    async fn increment_unknown_entry_is_not_found() {
        let repo = InMemoryQaRepository::default();
        let result = repo.increment_hit(&QaEntryId("missing".to_string())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn latest_for_bot_excludes_current_and_stale_sessions() {
        let repo = InMemorySessionRepository::default();
        repo.upsert(session("s-old", "bot-1", 60 * 24 * 40)).await.expect("save old");
        repo.upsert(session("s-recent", "bot-1", 30)).await.expect("save recent");
        repo.upsert(session("s-current", "bot-1", 0)).await.expect("save current");
        repo.upsert(session("s-other-bot", "bot-2", 1)).await.expect("save other");

        let found = repo
            .latest_for_bot(
                &BotId("bot-1".to_string()),
                &SessionId("s-current".to_string()),
                Utc::now() - Duration::days(30),
            )
            .await
            .expect("lookup");

        assert_eq!(found.map(|session| session.id.0), Some("s-recent".to_string()));
    }

    #[tokio::test]
    async fn session_upsert_from_another_bot_is_a_conflict() {
        let repo = InMemorySessionRepository::default();
        repo.upsert(session("s-1", "bot-1", 5)).await.expect("save");

        let result = repo.upsert(session("s-1", "bot-2", 0)).await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));

        let kept = repo.find(&SessionId("s-1".to_string())).await.expect("find");
        assert_eq!(kept.map(|session| session.bot_id.0), Some("bot-1".to_string()));
    }

    #[tokio::test]
    async fn usage_filters_by_kind_and_window() {
        let repo = InMemoryUsageRepository::default();
        let bot_id = BotId("bot-1".to_string());
        let now = Utc::now();

        for (kind, tokens, age_hours) in [
            (UsageKind::Message, 100, 1),
            (UsageKind::Message, 50, 30),
            (UsageKind::Embedding, 10, 2),
        ] {
            repo.create(UsageRecord {
                bot_id: bot_id.clone(),
                kind,
                tokens,
                created_at: now - Duration::hours(age_hours),
            })
            .await
            .expect("create usage");
        }

        let since = now - Duration::hours(24);
        let messages =
            UsageFilter { bot_id: bot_id.clone(), kind: Some(UsageKind::Message), since };
        let everything = UsageFilter { bot_id, kind: None, since };

        assert_eq!(repo.count(&messages).await.expect("count"), 1);
        assert_eq!(repo.sum_tokens(&everything).await.expect("sum"), 110);
    }

    #[tokio::test]
    async fn approvals_are_created_pending() {
        let repo = InMemoryApprovalRepository::default();
        let bot_id = BotId("bot-1".to_string());
        let request = ApprovalRequest::pending(
            bot_id.clone(),
            "CREATE_TICKET",
            json!({"action": "CREATE_TICKET"}),
            json!([]),
            Utc::now(),
        );

        repo.create(request.clone()).await.expect("create");

        let pending = repo.list_pending(&bot_id).await.expect("list");
        assert_eq!(pending, vec![request.clone()]);
        assert_eq!(repo.find_by_id(&request.id).await.expect("find"), Some(request));
    }
}
