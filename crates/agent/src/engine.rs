use std::sync::Arc;

use chrono::{Duration, Timelike};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use parley_core::clock::Clock;
use parley_core::config::AppConfig;
use parley_core::domain::bot::BotId;
use parley_core::domain::conversation::{last_user_message, ConversationTurn};
use parley_core::domain::usage::UsageKind;
use parley_db::repositories::{
    ApprovalRepository, BotRepository, KnowledgeRepository, QaRepository, SessionRepository,
    UsageRepository,
};

use crate::cache::{ReplyCacheStore, ResponseCache};
use crate::connectors::{CommerceConnector, HomepageLinkFetcher, SitemapFetcher};
use crate::dispatch::{ActionDispatcher, DispatchRequest, SideEffectQueue};
use crate::errors::TurnError;
use crate::experiment;
use crate::forced_reply::ForcedReplyResolver;
use crate::intent;
use crate::llm::{ChatMessage, EmbeddingService, GenerationClient};
use crate::pii;
use crate::profile::{self, SessionRecorder};
use crate::prompt::{PromptComposer, PromptContext};
use crate::quota::{QuotaGuard, QuotaSettings, RateCounterStore};
use crate::retrieval::RetrievalCoordinator;

const MARKER_ONLY_REPLY: &str = "Thanks! I've passed this on to the team.";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub bot_id: String,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub reply: String,
    pub session_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    pub quota: QuotaSettings,
    pub cache_ttl: Duration,
    pub cache_key_chars: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            quota: QuotaSettings::default(),
            cache_ttl: Duration::seconds(30),
            cache_key_chars: 200,
        }
    }
}

impl From<&AppConfig> for EngineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            quota: QuotaSettings::from(&config.quota),
            cache_ttl: Duration::seconds(i64::try_from(config.cache.ttl_secs).unwrap_or(i64::MAX)),
            cache_key_chars: config.cache.key_chars,
        }
    }
}

/// Every collaborator the engine talks to.
pub struct EngineParts {
    pub bots: Arc<dyn BotRepository>,
    pub qa: Arc<dyn QaRepository>,
    pub knowledge: Arc<dyn KnowledgeRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub usage: Arc<dyn UsageRepository>,
    pub approvals: Arc<dyn ApprovalRepository>,
    pub generation: Arc<dyn GenerationClient>,
    pub embeddings: Arc<dyn EmbeddingService>,
    pub commerce: Arc<dyn CommerceConnector>,
    pub sitemap: Arc<dyn SitemapFetcher>,
    pub homepage: Arc<dyn HomepageLinkFetcher>,
    pub queue: Arc<dyn SideEffectQueue>,
    pub rate_counters: Arc<dyn RateCounterStore>,
    pub reply_cache: Arc<dyn ReplyCacheStore>,
    pub clock: Arc<dyn Clock>,
}

pub struct AnswerEngine {
    bots: Arc<dyn BotRepository>,
    generation: Arc<dyn GenerationClient>,
    clock: Arc<dyn Clock>,
    quota: QuotaGuard,
    cache: ResponseCache,
    retrieval: RetrievalCoordinator,
    forced: ForcedReplyResolver,
    composer: PromptComposer,
    dispatcher: ActionDispatcher,
    recorder: SessionRecorder,
}

impl AnswerEngine {
    pub fn new(parts: EngineParts, settings: EngineSettings) -> Self {
        Self {
            quota: QuotaGuard::new(
                parts.rate_counters,
                parts.usage,
                parts.clock.clone(),
                settings.quota,
            ),
            cache: ResponseCache::new(
                parts.reply_cache,
                parts.clock.clone(),
                settings.cache_ttl,
                settings.cache_key_chars,
            ),
            retrieval: RetrievalCoordinator::new(parts.qa, parts.knowledge, parts.embeddings),
            forced: ForcedReplyResolver::new(parts.commerce, parts.sitemap, parts.homepage),
            composer: PromptComposer::new(),
            dispatcher: ActionDispatcher::new(parts.approvals, parts.queue, parts.clock.clone()),
            recorder: SessionRecorder::new(parts.sessions, parts.clock.clone()),
            bots: parts.bots,
            generation: parts.generation,
            clock: parts.clock,
        }
    }

    /// Runs one chat turn. Only the IP window, the bot lookup and generation can fail it.
    pub async fn answer(
        &self,
        request: ChatRequest,
        client_ip: &str,
        correlation_id: &str,
    ) -> Result<ChatReply, TurnError> {
        let ChatRequest { bot_id, history, session_id, locale, tone } = request;
        let bot_id = BotId(bot_id);

        if let Err(error) = self.quota.check_ip(client_ip, &bot_id).await {
            warn!(
                event_name = "turn.rate_limited",
                correlation_id = %correlation_id,
                bot_id = %bot_id,
                client_ip = %client_ip,
                "request window exceeded"
            );
            return Err(error);
        }

        let bot = self
            .bots
            .get(&bot_id)
            .await
            .map_err(|error| TurnError::Persistence(error.to_string()))?
            .ok_or_else(|| TurnError::BotNotFound(bot_id.0.clone()))?;

        let session_id =
            self.recorder.resolve(&bot.id, session_id.as_deref(), correlation_id).await;
        let message =
            last_user_message(&history).map(|turn| turn.content.clone()).unwrap_or_default();

        let cache_key = self.cache.key(&bot.id, &message);
        if let Some(reply) = self.cache.lookup(&cache_key).await {
            info!(
                event_name = "turn.cache_hit",
                correlation_id = %correlation_id,
                bot_id = %bot.id,
                session_id = %session_id.0,
                "served cached reply"
            );
            return Ok(ChatReply { reply, session_id: session_id.0 });
        }

        if let Some(reply) = self.quota.daily_cap_reply(&bot, correlation_id).await {
            return Ok(ChatReply { reply, session_id: session_id.0 });
        }

        let (effective_bot, variant) = experiment::apply(&bot, &session_id);
        let personalization =
            self.recorder.recall(&bot.id, &session_id, &history, correlation_id).await;
        let retrieved = self.retrieval.retrieve(&bot.id, &message, correlation_id).await;
        if retrieved.embedding_tokens > 0 {
            self.quota
                .record(&bot.id, UsageKind::Embedding, retrieved.embedding_tokens, correlation_id)
                .await;
        }

        let forced = self.forced.resolve(&effective_bot, &message, correlation_id).await;
        let (reply, tokens, forced_reply) = match forced {
            Some(reply) => (reply, 0, true),
            None => {
                let masked_history = pii::mask_history(&history);
                let system = self.composer.compose(
                    &effective_bot,
                    &PromptContext {
                        tone_override: tone.as_deref(),
                        locale: locale.as_deref(),
                        history: &masked_history,
                        blocks: &retrieved.blocks,
                        personalization: personalization.as_deref(),
                        hour: self.clock.now().hour(),
                    },
                );
                let mut messages = vec![ChatMessage::system(system)];
                messages.extend(masked_history.iter().map(ChatMessage::from_turn));

                let completion = self.generation.complete(&messages).await.map_err(|error| {
                    warn!(
                        event_name = "turn.generation_failed",
                        correlation_id = %correlation_id,
                        bot_id = %bot.id,
                        error = %error,
                        "generation failed"
                    );
                    TurnError::Upstream(error.to_string())
                })?;
                (completion.text, completion.usage.total, false)
            }
        };

        let inferred = profile::extract(&history);
        let reply = match (!forced_reply).then(|| intent::parse(&reply)).flatten() {
            Some(parsed) => {
                let outcome = self
                    .dispatcher
                    .dispatch(DispatchRequest {
                        bot: &effective_bot,
                        intent: &parsed.intent,
                        history: &history,
                        profile: &inferred,
                        correlation_id,
                    })
                    .await;
                info!(
                    event_name = "turn.intent_dispatched",
                    correlation_id = %correlation_id,
                    bot_id = %bot.id,
                    action = %parsed.intent.action,
                    outcome = ?outcome,
                    "action marker handled"
                );
                let visible = intent::strip_marker(&reply, &parsed.span);
                if visible.is_empty() {
                    MARKER_ONLY_REPLY.to_string()
                } else {
                    visible
                }
            }
            None => reply,
        };

        self.recorder
            .record(&bot.id, &session_id, &history, &reply, &inferred, correlation_id)
            .await;
        self.quota.record(&bot.id, UsageKind::Message, tokens, correlation_id).await;
        self.cache.store(cache_key, &reply).await;

        info!(
            event_name = "turn.completed",
            correlation_id = %correlation_id,
            bot_id = %bot.id,
            session_id = %session_id.0,
            forced_reply,
            qa_match = retrieved.qa_match.as_ref().map(|qa_match| qa_match.entry_id.0.as_str()),
            grounding_blocks = retrieved.blocks.len(),
            variant = variant.map(|variant| variant.as_str()),
            tokens,
            "turn completed"
        );

        Ok(ChatReply { reply, session_id: session_id.0 })
    }
}
