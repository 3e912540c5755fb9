use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use parley_core::clock::Clock;
use parley_core::domain::bot::BotId;

use crate::text::{normalize, truncate_chars};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub bot_id: BotId,
    pub message: String,
}

impl CacheKey {
    pub fn new(bot_id: &BotId, message: &str, key_chars: usize) -> Self {
        let normalized = normalize(message);
        Self { bot_id: bot_id.clone(), message: truncate_chars(&normalized, key_chars).to_string() }
    }
}

#[async_trait]
pub trait ReplyCacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<String>;
    async fn put(
        &self,
        key: CacheKey,
        reply: String,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    );
}

#[derive(Debug, Default)]
pub struct InMemoryReplyCacheStore {
    entries: Mutex<HashMap<CacheKey, (String, DateTime<Utc>)>>,
}

#[async_trait]
impl ReplyCacheStore for InMemoryReplyCacheStore {
    async fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((reply, expires_at)) if now < *expires_at => Some(reply.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn put(
        &self,
        key: CacheKey,
        reply: String,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let mut entries = self.entries.lock().await;
        entries.retain(|_, (_, entry_expires_at)| now < *entry_expires_at);
        entries.insert(key, (reply, expires_at));
    }
}

/// Short-lived replies keyed by bot and normalized question.
pub struct ResponseCache {
    store: Arc<dyn ReplyCacheStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    key_chars: usize,
}

impl ResponseCache {
    pub fn new(
        store: Arc<dyn ReplyCacheStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        key_chars: usize,
    ) -> Self {
        Self { store, clock, ttl, key_chars }
    }

    pub fn key(&self, bot_id: &BotId, message: &str) -> CacheKey {
        CacheKey::new(bot_id, message, self.key_chars)
    }

    pub async fn lookup(&self, key: &CacheKey) -> Option<String> {
        self.store.get(key, self.clock.now()).await
    }

    pub async fn store(&self, key: CacheKey, reply: &str) {
        let now = self.clock.now();
        self.store.put(key, reply.to_string(), now + self.ttl, now).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use parley_core::clock::ManualClock;
    use parley_core::domain::bot::BotId;

    use super::{CacheKey, InMemoryReplyCacheStore, ResponseCache};

    #[test]
    fn keys_ignore_case_and_punctuation_and_cap_length() {
        let bot_id = BotId("bot-1".to_string());
        assert_eq!(
            CacheKey::new(&bot_id, "Do you ship to Norway?", 200),
            CacheKey::new(&bot_id, "do you ship to norway", 200)
        );
        let long = "a".repeat(500);
        assert_eq!(CacheKey::new(&bot_id, &long, 200).message.len(), 200);
    }

    #[tokio::test]
    async fn entries_expire_exactly_at_ttl() {
        let start = Utc.with_ymd_and_hms(2026, 4, 2, 10, 0, 0).single().expect("valid date");
        let clock = Arc::new(ManualClock::new(start));
        let cache = ResponseCache::new(
            Arc::new(InMemoryReplyCacheStore::default()),
            clock.clone(),
            Duration::seconds(30),
            200,
        );
        let key = cache.key(&BotId("bot-1".to_string()), "Opening hours?");

        cache.store(key.clone(), "We open at 9.").await;
        clock.advance(Duration::milliseconds(29_999));
        assert_eq!(cache.lookup(&key).await.as_deref(), Some("We open at 9."));

        clock.set(start + Duration::seconds(30));
        assert!(cache.lookup(&key).await.is_none());
    }

    #[tokio::test]
    async fn bots_do_not_share_entries() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = ResponseCache::new(
            Arc::new(InMemoryReplyCacheStore::default()),
            clock,
            Duration::seconds(30),
            200,
        );

        cache.store(cache.key(&BotId("bot-1".to_string()), "hi"), "Hello from one").await;
        assert!(cache.lookup(&cache.key(&BotId("bot-2".to_string()), "hi")).await.is_none());
    }
}
