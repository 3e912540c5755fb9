//! Request windows per client IP and daily caps per bot.
//!
//! Window counters are process-local. Running several server instances gives each
//! its own window, so the effective limit scales with the instance count.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use parley_core::clock::Clock;
use parley_core::config::QuotaConfig;
use parley_core::domain::bot::{BotConfig, BotId};
use parley_core::domain::usage::{UsageFilter, UsageKind, UsageRecord};
use parley_db::repositories::UsageRepository;

use crate::errors::TurnError;

pub const DAILY_CAP_MESSAGE: &str = "This assistant has reached its daily limit. Please try \
     again tomorrow, or contact the company directly.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaSettings {
    pub daily_message_cap: u64,
    pub daily_token_cap: u64,
    pub requests_per_window: u32,
    pub window: Duration,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            daily_message_cap: 50,
            daily_token_cap: 200_000,
            requests_per_window: 20,
            window: Duration::seconds(60),
        }
    }
}

impl From<&QuotaConfig> for QuotaSettings {
    fn from(config: &QuotaConfig) -> Self {
        Self {
            daily_message_cap: config.daily_message_cap,
            daily_token_cap: config.daily_token_cap,
            requests_per_window: config.ip_requests_per_window,
            window: Duration::seconds(i64::try_from(config.ip_window_secs).unwrap_or(i64::MAX)),
        }
    }
}

/// Counts hits in fixed windows that start at the first hit.
#[async_trait]
pub trait RateCounterStore: Send + Sync {
    /// Records one hit and returns the number of hits in the current window, this one included.
    async fn hit(&self, key: &str, now: DateTime<Utc>, window: Duration) -> u32;
}

/// Expired windows are dropped on every hit, so idle keys do not accumulate.
#[derive(Debug, Default)]
pub struct InMemoryRateCounterStore {
    windows: Mutex<HashMap<String, (DateTime<Utc>, u32)>>,
}

impl InMemoryRateCounterStore {
    pub async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.len()
    }
}

#[async_trait]
impl RateCounterStore for InMemoryRateCounterStore {
    async fn hit(&self, key: &str, now: DateTime<Utc>, window: Duration) -> u32 {
        let mut windows = self.windows.lock().await;
        windows.retain(|_, (start, _)| now - *start <= window);
        let entry = windows.entry(key.to_string()).or_insert((now, 0));
        if now - entry.0 > window {
            *entry = (now, 0);
        }
        entry.1 = entry.1.saturating_add(1);
        entry.1
    }
}

pub struct QuotaGuard {
    counters: Arc<dyn RateCounterStore>,
    usage: Arc<dyn UsageRepository>,
    clock: Arc<dyn Clock>,
    settings: QuotaSettings,
}

impl QuotaGuard {
    pub fn new(
        counters: Arc<dyn RateCounterStore>,
        usage: Arc<dyn UsageRepository>,
        clock: Arc<dyn Clock>,
        settings: QuotaSettings,
    ) -> Self {
        Self { counters, usage, clock, settings }
    }

    pub async fn check_ip(&self, ip: &str, bot_id: &BotId) -> Result<(), TurnError> {
        let key = format!("{ip}|{}", bot_id.0);
        let hits = self.counters.hit(&key, self.clock.now(), self.settings.window).await;
        if hits > self.settings.requests_per_window {
            return Err(TurnError::RateLimited { ip: ip.to_string(), bot_id: bot_id.0.clone() });
        }
        Ok(())
    }

    /// The advisory reply when a daily cap is exhausted. Lookup failures never block a turn.
    pub async fn daily_cap_reply(&self, bot: &BotConfig, correlation_id: &str) -> Option<String> {
        if !bot.plan.has_daily_caps() {
            return None;
        }
        let since = self.clock.now() - Duration::hours(24);
        let messages =
            UsageFilter { bot_id: bot.id.clone(), kind: Some(UsageKind::Message), since };
        let all_kinds = UsageFilter { kind: None, ..messages.clone() };

        let exhausted = match (
            self.usage.count(&messages).await,
            self.usage.sum_tokens(&all_kinds).await,
        ) {
            (Ok(count), Ok(tokens)) => {
                count >= self.settings.daily_message_cap || tokens >= self.settings.daily_token_cap
            }
            (Err(error), _) | (_, Err(error)) => {
                warn!(
                    event_name = "quota.usage_lookup_failed",
                    correlation_id = %correlation_id,
                    bot_id = %bot.id,
                    error = %error,
                    "daily usage lookup failed, allowing the turn"
                );
                false
            }
        };

        if exhausted {
            info!(
                event_name = "quota.daily_cap_reached",
                correlation_id = %correlation_id,
                bot_id = %bot.id,
                "daily cap reached, returning advisory reply"
            );
            return Some(DAILY_CAP_MESSAGE.to_string());
        }
        None
    }

    pub async fn record(&self, bot_id: &BotId, kind: UsageKind, tokens: u64, correlation_id: &str) {
        let record =
            UsageRecord { bot_id: bot_id.clone(), kind, tokens, created_at: self.clock.now() };
        if let Err(error) = self.usage.create(record).await {
            warn!(
                event_name = "quota.usage_record_failed",
                correlation_id = %correlation_id,
                bot_id = %bot_id,
                kind = kind.as_str(),
                error = %error,
                "usage record could not be written"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use parley_core::clock::ManualClock;
    use parley_core::domain::bot::{BotConfig, BotId, BotType, Plan};
    use parley_core::domain::usage::UsageKind;
    use parley_db::repositories::InMemoryUsageRepository;

    use super::{
        InMemoryRateCounterStore, QuotaGuard, QuotaSettings, RateCounterStore, DAILY_CAP_MESSAGE,
    };
    use crate::errors::TurnError;

    fn guard(clock: Arc<ManualClock>) -> QuotaGuard {
        QuotaGuard::new(
            Arc::new(InMemoryRateCounterStore::default()),
            Arc::new(InMemoryUsageRepository::default()),
            clock,
            QuotaSettings::default(),
        )
    }

    fn start() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, 10, 0, 0).single().expect("valid date")
    }

    #[tokio::test]
    async fn expired_windows_are_evicted_on_the_next_hit() {
        let store = InMemoryRateCounterStore::default();
        let window = Duration::seconds(60);

        for index in 0..1_000 {
            store.hit(&format!("198.51.100.{index}|bot-1"), start(), window).await;
        }
        assert_eq!(store.tracked_keys().await, 1_000);

        let later = start() + Duration::hours(24);
        assert_eq!(store.hit("203.0.113.9|bot-1", later, window).await, 1);
        assert_eq!(store.tracked_keys().await, 1);
    }

    #[tokio::test]
    async fn twenty_first_request_in_window_is_limited_until_window_passes() {
        let clock = Arc::new(ManualClock::new(start()));
        let guard = guard(clock.clone());
        let bot_id = BotId("bot-1".to_string());

        for _ in 0..20 {
            guard.check_ip("10.0.0.1", &bot_id).await.expect("within limit");
        }
        clock.advance(Duration::seconds(59));
        assert!(matches!(
            guard.check_ip("10.0.0.1", &bot_id).await,
            Err(TurnError::RateLimited { .. })
        ));
        guard.check_ip("10.0.0.2", &bot_id).await.expect("other ip has its own window");

        clock.set(start() + Duration::seconds(61));
        guard.check_ip("10.0.0.1", &bot_id).await.expect("window reset");
    }

    #[tokio::test]
    async fn window_resets_only_when_strictly_exceeded() {
        let clock = Arc::new(ManualClock::new(start()));
        let guard = QuotaGuard::new(
            Arc::new(InMemoryRateCounterStore::default()),
            Arc::new(InMemoryUsageRepository::default()),
            clock.clone(),
            QuotaSettings { requests_per_window: 1, ..QuotaSettings::default() },
        );
        let bot_id = BotId("bot-1".to_string());

        guard.check_ip("10.0.0.1", &bot_id).await.expect("first");
        clock.advance(Duration::seconds(60));
        assert!(guard.check_ip("10.0.0.1", &bot_id).await.is_err());
        clock.advance(Duration::seconds(1));
        guard.check_ip("10.0.0.1", &bot_id).await.expect("past the window");
    }

    #[tokio::test]
    async fn fiftieth_message_exhausts_non_premium_bots() {
        let clock = Arc::new(ManualClock::new(start()));
        let guard = guard(clock.clone());
        let mut bot = BotConfig::new("bot-1", "Helper", BotType::Knowledge);

        for _ in 0..49 {
            guard.record(&bot.id, UsageKind::Message, 10, "req").await;
        }
        assert!(guard.daily_cap_reply(&bot, "req").await.is_none());

        guard.record(&bot.id, UsageKind::Message, 10, "req").await;
        assert_eq!(guard.daily_cap_reply(&bot, "req").await.as_deref(), Some(DAILY_CAP_MESSAGE));

        bot.plan = Plan::Premium;
        assert!(guard.daily_cap_reply(&bot, "req").await.is_none());

        clock.advance(Duration::hours(25));
        bot.plan = Plan::Free;
        assert!(guard.daily_cap_reply(&bot, "req").await.is_none());
    }

    #[tokio::test]
    async fn token_cap_counts_every_usage_kind() {
        let clock = Arc::new(ManualClock::new(start()));
        let guard = guard(clock);
        let bot = BotConfig::new("bot-1", "Helper", BotType::Knowledge);

        guard.record(&bot.id, UsageKind::Message, 150_000, "req").await;
        guard.record(&bot.id, UsageKind::Embedding, 50_000, "req").await;
        assert!(guard.daily_cap_reply(&bot, "req").await.is_some());
    }
}
