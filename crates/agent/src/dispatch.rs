//! Side-effects triggered by parsed intents.
//!
//! Routing is decided synchronously during the turn; the resulting job is handed
//! to a `SideEffectQueue`. Each job gets at most one attempt and its outcome
//! never reaches the visitor. Bots that require approval never produce jobs; an
//! `ApprovalRequest` is stored instead.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use parley_core::clock::Clock;
use parley_core::domain::approval::{ApprovalId, ApprovalRequest};
use parley_core::domain::bot::{BotConfig, BotType};
use parley_core::domain::conversation::{last_user_message, ConversationTurn, Role};
use parley_core::domain::intent::{ActionSystem, Intent};
use parley_core::domain::session::SessionMetadata;
use parley_db::repositories::ApprovalRepository;

use crate::connectors::{CommerceConnector, CrmConnector, TicketingConnector, WebhookConnector};
use crate::pii;
use crate::text::truncate_chars;

const SUBJECT_CHARS: usize = 80;
const CONTEXT_TURNS: usize = 10;

#[derive(Clone, Debug, PartialEq)]
pub enum SideEffect {
    CreateTicket { subject: String, description: String },
    UpsertContact { email: String },
    ListProducts,
    PostWebhook { url: String, payload: Value },
}

impl SideEffect {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateTicket { .. } => "create_ticket",
            Self::UpsertContact { .. } => "upsert_contact",
            Self::ListProducts => "list_products",
            Self::PostWebhook { .. } => "post_webhook",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SideEffectJob {
    pub bot: BotConfig,
    pub effect: SideEffect,
    pub correlation_id: String,
}

/// At most one attempt per job; failures are logged and dropped.
pub trait SideEffectQueue: Send + Sync {
    fn enqueue(&self, job: SideEffectJob);
}

#[derive(Clone)]
pub struct SideEffectExecutor {
    ticketing: Arc<dyn TicketingConnector>,
    crm: Arc<dyn CrmConnector>,
    commerce: Arc<dyn CommerceConnector>,
    webhook: Arc<dyn WebhookConnector>,
}

impl SideEffectExecutor {
    pub fn new(
        ticketing: Arc<dyn TicketingConnector>,
        crm: Arc<dyn CrmConnector>,
        commerce: Arc<dyn CommerceConnector>,
        webhook: Arc<dyn WebhookConnector>,
    ) -> Self {
        Self { ticketing, crm, commerce, webhook }
    }

    pub async fn execute(&self, job: SideEffectJob) {
        let SideEffectJob { bot, effect, correlation_id } = job;
        let kind = effect.kind();
        let result = match effect {
            SideEffect::CreateTicket { subject, description } => {
                self.ticketing.create(&bot, &subject, &description).await
            }
            SideEffect::UpsertContact { email } => self.crm.upsert_contact(&bot, &email).await,
            SideEffect::ListProducts => self.commerce.list_products(&bot).await.map(|products| {
                info!(
                    event_name = "dispatch.catalog_listed",
                    correlation_id = %correlation_id,
                    bot_id = %bot.id,
                    product_count = products.map_or(0, |products| products.len()),
                    "catalog lookup complete"
                );
            }),
            SideEffect::PostWebhook { url, payload } => self.webhook.post(&url, &payload).await,
        };

        match result {
            Ok(()) => info!(
                event_name = "dispatch.side_effect_completed",
                correlation_id = %correlation_id,
                bot_id = %bot.id,
                kind,
                "side-effect completed"
            ),
            Err(error) => warn!(
                event_name = "dispatch.side_effect_failed",
                correlation_id = %correlation_id,
                bot_id = %bot.id,
                kind,
                error = %error,
                "side-effect failed and was dropped"
            ),
        }
    }
}

/// Runs each job on its own tokio task. Never awaited by the turn.
pub struct SpawnedQueue {
    executor: Arc<SideEffectExecutor>,
}

impl SpawnedQueue {
    pub fn new(executor: Arc<SideEffectExecutor>) -> Self {
        Self { executor }
    }
}

impl SideEffectQueue for SpawnedQueue {
    fn enqueue(&self, job: SideEffectJob) {
        let executor = self.executor.clone();
        tokio::spawn(async move {
            executor.execute(job).await;
        });
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DispatchOutcome {
    Enqueued(&'static str),
    AwaitingApproval(ApprovalId),
    Skipped(&'static str),
}

pub struct DispatchRequest<'a> {
    pub bot: &'a BotConfig,
    pub intent: &'a Intent,
    pub history: &'a [ConversationTurn],
    pub profile: &'a SessionMetadata,
    pub correlation_id: &'a str,
}

pub struct ActionDispatcher {
    approvals: Arc<dyn ApprovalRepository>,
    queue: Arc<dyn SideEffectQueue>,
    clock: Arc<dyn Clock>,
}

impl ActionDispatcher {
    pub fn new(
        approvals: Arc<dyn ApprovalRepository>,
        queue: Arc<dyn SideEffectQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { approvals, queue, clock }
    }

    pub async fn dispatch(&self, request: DispatchRequest<'_>) -> DispatchOutcome {
        let DispatchRequest { bot, intent, history, profile, correlation_id } = request;

        if !bot.bot_type.triggers_actions() {
            return self.skip(bot, intent, correlation_id, "bot_type_without_actions");
        }
        let summary_only = intent.system.is_none();
        if summary_only && !matches!(bot.bot_type, BotType::Lead | BotType::Support) {
            return self.skip(bot, intent, correlation_id, "unmapped_action");
        }

        if bot.require_approval {
            return self.hold_for_approval(bot, intent, history, correlation_id).await;
        }

        let effect = match route(bot, intent, history, profile) {
            Ok(effect) => effect,
            Err(reason) => return self.skip(bot, intent, correlation_id, reason),
        };
        let kind = effect.kind();
        self.queue.enqueue(SideEffectJob {
            bot: bot.clone(),
            effect,
            correlation_id: correlation_id.to_string(),
        });
        info!(
            event_name = "dispatch.enqueued",
            correlation_id = %correlation_id,
            bot_id = %bot.id,
            action = %intent.action,
            kind,
            "side-effect enqueued"
        );
        DispatchOutcome::Enqueued(kind)
    }

    async fn hold_for_approval(
        &self,
        bot: &BotConfig,
        intent: &Intent,
        history: &[ConversationTurn],
        correlation_id: &str,
    ) -> DispatchOutcome {
        let payload =
            serde_json::to_value(intent).unwrap_or_else(|_| json!({"action": intent.action}));
        let request = ApprovalRequest::pending(
            bot.id.clone(),
            intent.action.clone(),
            payload,
            masked_context(history),
            self.clock.now(),
        );
        let id = request.id.clone();

        match self.approvals.create(request).await {
            Ok(()) => {
                info!(
                    event_name = "dispatch.approval_requested",
                    correlation_id = %correlation_id,
                    bot_id = %bot.id,
                    approval_id = %id.0,
                    action = %intent.action,
                    "side-effect held for approval"
                );
                DispatchOutcome::AwaitingApproval(id)
            }
            Err(error) => {
                warn!(
                    event_name = "dispatch.approval_create_failed",
                    correlation_id = %correlation_id,
                    bot_id = %bot.id,
                    error = %error,
                    "approval request could not be stored"
                );
                DispatchOutcome::Skipped("approval_store_failed")
            }
        }
    }

    fn skip(
        &self,
        bot: &BotConfig,
        intent: &Intent,
        correlation_id: &str,
        reason: &'static str,
    ) -> DispatchOutcome {
        warn!(
            event_name = "dispatch.skipped",
            correlation_id = %correlation_id,
            bot_id = %bot.id,
            action = %intent.action,
            reason,
            "side-effect skipped"
        );
        DispatchOutcome::Skipped(reason)
    }
}

fn route(
    bot: &BotConfig,
    intent: &Intent,
    history: &[ConversationTurn],
    profile: &SessionMetadata,
) -> Result<SideEffect, &'static str> {
    let integrations = &bot.integrations;
    match intent.system {
        Some(ActionSystem::Ticketing) => {
            integrations.ticketing.as_ref().ok_or("ticketing_not_configured")?;
            let last_message =
                last_user_message(history).map(|turn| turn.content.as_str()).unwrap_or_default();
            let subject = intent
                .data_str("subject")
                .map(str::to_string)
                .unwrap_or_else(|| truncate_chars(last_message.trim(), SUBJECT_CHARS).to_string());
            let description = intent
                .data_str("description")
                .map(str::to_string)
                .unwrap_or_else(|| transcript(history));
            Ok(SideEffect::CreateTicket { subject, description })
        }
        Some(ActionSystem::Crm) => {
            integrations.crm.as_ref().ok_or("crm_not_configured")?;
            let email = intent
                .data_str("email")
                .or(profile.email.as_deref())
                .ok_or("no_contact_email")?;
            Ok(SideEffect::UpsertContact { email: email.to_string() })
        }
        Some(ActionSystem::Catalog) => {
            integrations.commerce.as_ref().ok_or("commerce_not_configured")?;
            Ok(SideEffect::ListProducts)
        }
        Some(ActionSystem::Invoicing) | Some(ActionSystem::Webhook) => {
            let webhook = integrations.webhook.as_ref().ok_or("webhook_not_configured")?;
            Ok(SideEffect::PostWebhook {
                url: webhook.endpoint.clone(),
                payload: json!({
                    "botId": bot.id.0,
                    "action": intent.action,
                    "system": intent.system.map(|system| system.as_str()),
                    "data": intent.data,
                }),
            })
        }
        None => {
            let webhook = integrations.webhook.as_ref().ok_or("webhook_not_configured")?;
            Ok(SideEffect::PostWebhook {
                url: webhook.endpoint.clone(),
                payload: json!({
                    "botId": bot.id.0,
                    "action": intent.action,
                    "botType": bot.bot_type.as_str(),
                    "profile": profile,
                    "transcript": masked_context(history),
                }),
            })
        }
    }
}

fn masked_context(history: &[ConversationTurn]) -> Value {
    let start = history.len().saturating_sub(CONTEXT_TURNS);
    let turns: Vec<Value> = pii::mask_history(&history[start..])
        .into_iter()
        .map(|turn| json!({"role": turn.role, "content": turn.content}))
        .collect();
    Value::Array(turns)
}

fn transcript(history: &[ConversationTurn]) -> String {
    let start = history.len().saturating_sub(CONTEXT_TURNS);
    pii::mask_history(&history[start..])
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                Role::User => "visitor",
                Role::Assistant => "assistant",
            };
            format!("{speaker}: {}", turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
