//! Scripted collaborators for exercising the pipeline without network or disk.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use parley_core::clock::ManualClock;
use parley_core::domain::bot::{BotConfig, BotId, BotType};
use parley_core::domain::knowledge::{ChunkId, KnowledgeChunk, QaEntry, QaEntryId};
use parley_core::domain::usage::{UsageFilter, UsageKind, UsageRecord};
use parley_db::repositories::{
    BotRepository, InMemoryApprovalRepository, InMemoryBotRepository, InMemoryKnowledgeRepository,
    InMemoryQaRepository, InMemorySessionRepository, InMemoryUsageRepository, QaRepository,
    RepositoryError, UsageRepository,
};

use crate::cache::InMemoryReplyCacheStore;
use crate::connectors::{
    CommerceConnector, CrmConnector, HomepageLinkFetcher, Product, SitemapFetcher,
    TicketingConnector, WebhookConnector,
};
use crate::dispatch::{SideEffectJob, SideEffectQueue};
use crate::engine::{AnswerEngine, EngineParts, EngineSettings};
use crate::llm::{
    ChatMessage, Completion, Embedding, EmbeddingService, GenerationClient, TokenUsage,
};
use crate::quota::InMemoryRateCounterStore;

pub const BOT_ID: &str = "bot-1";

pub fn qa_entry(
    id: &str,
    question: &str,
    answer: &str,
    confidence: f32,
    verified: bool,
) -> QaEntry {
    QaEntry {
        id: QaEntryId(id.to_string()),
        bot_id: BotId(BOT_ID.to_string()),
        question: question.to_string(),
        answer: answer.to_string(),
        confidence,
        verified,
        hit_count: 0,
        source_type: "manual".to_string(),
    }
}

pub fn chunk(title: &str, embedding: Vec<f32>) -> KnowledgeChunk {
    KnowledgeChunk {
        id: ChunkId(title.to_string()),
        bot_id: BotId(BOT_ID.to_string()),
        source_url: format!("https://example.com/{}", title.to_lowercase()),
        title: title.to_string(),
        content: format!("{title} details."),
        embedding,
    }
}

pub struct FailingQaRepository;

#[async_trait]
impl QaRepository for FailingQaRepository {
    async fn list_by_bot(&self, _bot_id: &BotId) -> Result<Vec<QaEntry>, RepositoryError> {
        Err(RepositoryError::Decode("qa store unavailable".to_string()))
    }

    async fn increment_hit(&self, id: &QaEntryId) -> Result<(), RepositoryError> {
        Err(RepositoryError::NotFound(id.0.clone()))
    }

    async fn save(&self, _entry: QaEntry) -> Result<(), RepositoryError> {
        Err(RepositoryError::Decode("qa store unavailable".to_string()))
    }
}

pub struct ScriptedEmbeddings {
    vector: Option<Vec<f32>>,
    tokens: u64,
    calls: AtomicUsize,
}

impl ScriptedEmbeddings {
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector: Some(vector), tokens: 0, calls: AtomicUsize::new(0) }
    }

    pub fn failing() -> Self {
        Self { vector: None, tokens: 0, calls: AtomicUsize::new(0) }
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingService for ScriptedEmbeddings {
    async fn embed(&self, _text: &str) -> Result<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let vector = self.vector.clone().ok_or_else(|| anyhow!("embedding service down"))?;
        Ok(Embedding { vector, tokens: self.tokens })
    }
}

#[derive(Default)]
pub struct ScriptedGeneration {
    reply: Mutex<Option<(String, u64)>>,
    calls: AtomicUsize,
    last_messages: Mutex<Vec<ChatMessage>>,
}

impl ScriptedGeneration {
    pub fn reply_with(&self, text: &str, total_tokens: u64) {
        if let Ok(mut reply) = self.reply.lock() {
            *reply = Some((text.to_string(), total_tokens));
        }
    }

    pub fn fail(&self) {
        if let Ok(mut reply) = self.reply.lock() {
            *reply = None;
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_messages(&self) -> Vec<ChatMessage> {
        self.last_messages.lock().map(|messages| messages.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl GenerationClient for ScriptedGeneration {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_messages.lock() {
            *last = messages.to_vec();
        }
        let scripted = self.reply.lock().ok().and_then(|reply| reply.clone());
        let (text, total) = scripted.ok_or_else(|| anyhow!("model endpoint unavailable"))?;
        let usage = TokenUsage { prompt: total / 2, completion: total - total / 2, total };
        Ok(Completion { text, usage })
    }
}

pub struct ScriptedCommerce {
    count: Mutex<Option<u64>>,
    products: Mutex<usize>,
    failing: bool,
    calls: Arc<AtomicUsize>,
}

impl ScriptedCommerce {
    pub fn with_count(count: u64) -> Self {
        Self {
            count: Mutex::new(Some(count)),
            products: Mutex::new(0),
            failing: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self { failing: true, ..Self::with_count(0) }
    }

    pub fn with_products(self, products: usize) -> Self {
        if let Ok(mut stored) = self.products.lock() {
            *stored = products;
        }
        self
    }

    pub fn set_count(&self, count: u64) {
        if let Ok(mut stored) = self.count.lock() {
            *stored = Some(count);
        }
    }

    pub fn calls_handle(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl CommerceConnector for ScriptedCommerce {
    async fn product_count(&self, _bot: &BotConfig) -> Result<Option<u64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(anyhow!("commerce api returned 503"));
        }
        Ok(self.count.lock().ok().and_then(|count| *count))
    }

    async fn list_products(&self, _bot: &BotConfig) -> Result<Option<Vec<Product>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(anyhow!("commerce api returned 503"));
        }
        let count = self.products.lock().map(|products| *products).unwrap_or_default();
        Ok(Some(
            (0..count)
                .map(|index| Product { name: format!("Product {index}"), url: None, price: None })
                .collect(),
        ))
    }
}

pub struct ScriptedLinks {
    links: Option<Vec<String>>,
}

impl ScriptedLinks {
    pub fn new(links: Vec<&str>) -> Self {
        Self { links: Some(links.into_iter().map(str::to_string).collect()) }
    }

    pub fn failing() -> Self {
        Self { links: None }
    }

    fn result(&self) -> Result<Vec<String>> {
        self.links.clone().ok_or_else(|| anyhow!("fetch failed"))
    }
}

#[async_trait]
impl SitemapFetcher for ScriptedLinks {
    async fn fetch(&self, _url: &str) -> Result<Vec<String>> {
        self.result()
    }
}

#[async_trait]
impl HomepageLinkFetcher for ScriptedLinks {
    async fn fetch(&self, _url: &str) -> Result<Vec<String>> {
        self.result()
    }
}

#[derive(Default)]
pub struct RecordingQueue {
    jobs: Mutex<Vec<SideEffectJob>>,
}

impl RecordingQueue {
    pub fn jobs(&self) -> Vec<SideEffectJob> {
        self.jobs.lock().map(|jobs| jobs.clone()).unwrap_or_default()
    }
}

impl SideEffectQueue for RecordingQueue {
    fn enqueue(&self, job: SideEffectJob) {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.push(job);
        }
    }
}

/// Records every connector call as `<system>.<operation>:<detail>`.
#[derive(Default)]
pub struct RecordingConnectors {
    failing: bool,
    calls: Mutex<Vec<String>>,
}

impl RecordingConnectors {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self { failing: true, ..Self::default() })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn record(&self, call: String) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        if self.failing {
            Err(anyhow!("connector unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TicketingConnector for RecordingConnectors {
    async fn create(&self, _bot: &BotConfig, subject: &str, _description: &str) -> Result<()> {
        self.record(format!("ticketing.create:{subject}"))
    }
}

#[async_trait]
impl CrmConnector for RecordingConnectors {
    async fn upsert_contact(&self, _bot: &BotConfig, email: &str) -> Result<()> {
        self.record(format!("crm.upsert_contact:{email}"))
    }
}

#[async_trait]
impl CommerceConnector for RecordingConnectors {
    async fn product_count(&self, _bot: &BotConfig) -> Result<Option<u64>> {
        self.record("commerce.product_count:".to_string()).map(|()| None)
    }

    async fn list_products(&self, _bot: &BotConfig) -> Result<Option<Vec<Product>>> {
        self.record("commerce.list_products:".to_string()).map(|()| Some(Vec::new()))
    }
}

#[async_trait]
impl WebhookConnector for RecordingConnectors {
    async fn post(&self, url: &str, _payload: &Value) -> Result<()> {
        self.record(format!("webhook.post:{url}"))
    }
}

pub fn fixed_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).single().unwrap_or_else(Utc::now)
}

/// In-memory wiring of every engine collaborator. Engines built from one harness share state.
pub struct EngineHarness {
    pub bots: Arc<InMemoryBotRepository>,
    pub qa: Arc<InMemoryQaRepository>,
    pub knowledge: Arc<InMemoryKnowledgeRepository>,
    pub sessions: Arc<InMemorySessionRepository>,
    pub usage: Arc<InMemoryUsageRepository>,
    pub approvals: Arc<InMemoryApprovalRepository>,
    pub generation: Arc<ScriptedGeneration>,
    pub embeddings: Arc<ScriptedEmbeddings>,
    pub commerce: Arc<ScriptedCommerce>,
    pub sitemap: Arc<ScriptedLinks>,
    pub homepage: Arc<ScriptedLinks>,
    pub queue: Arc<RecordingQueue>,
    pub rate_counters: Arc<InMemoryRateCounterStore>,
    pub reply_cache: Arc<InMemoryReplyCacheStore>,
    pub clock: Arc<ManualClock>,
    pub settings: EngineSettings,
}

impl Default for EngineHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineHarness {
    pub fn new() -> Self {
        Self {
            bots: Arc::new(InMemoryBotRepository::default()),
            qa: Arc::new(InMemoryQaRepository::default()),
            knowledge: Arc::new(InMemoryKnowledgeRepository::default()),
            sessions: Arc::new(InMemorySessionRepository::default()),
            usage: Arc::new(InMemoryUsageRepository::default()),
            approvals: Arc::new(InMemoryApprovalRepository::default()),
            generation: Arc::new(ScriptedGeneration::default()),
            embeddings: Arc::new(ScriptedEmbeddings::new(vec![1.0, 0.0])),
            commerce: Arc::new(ScriptedCommerce::with_count(0)),
            sitemap: Arc::new(ScriptedLinks::failing()),
            homepage: Arc::new(ScriptedLinks::failing()),
            queue: Arc::new(RecordingQueue::default()),
            rate_counters: Arc::new(InMemoryRateCounterStore::default()),
            reply_cache: Arc::new(InMemoryReplyCacheStore::default()),
            clock: Arc::new(ManualClock::new(fixed_start())),
            settings: EngineSettings::default(),
        }
    }

    pub fn engine(&self) -> AnswerEngine {
        AnswerEngine::new(
            EngineParts {
                bots: self.bots.clone(),
                qa: self.qa.clone(),
                knowledge: self.knowledge.clone(),
                sessions: self.sessions.clone(),
                usage: self.usage.clone(),
                approvals: self.approvals.clone(),
                generation: self.generation.clone(),
                embeddings: self.embeddings.clone(),
                commerce: self.commerce.clone(),
                sitemap: self.sitemap.clone(),
                homepage: self.homepage.clone(),
                queue: self.queue.clone(),
                rate_counters: self.rate_counters.clone(),
                reply_cache: self.reply_cache.clone(),
                clock: self.clock.clone(),
            },
            self.settings,
        )
    }

    /// Stores `bot-1` with the given type and returns it.
    pub async fn add_bot(&self, bot_type: BotType) -> BotConfig {
        let bot = BotConfig::new(BOT_ID, "Nova", bot_type);
        self.save_bot(bot.clone()).await;
        bot
    }

    pub async fn save_bot(&self, bot: BotConfig) {
        if let Err(error) = self.bots.save(bot).await {
            panic!("saving bot fixture failed: {error}");
        }
    }

    pub async fn bot(&self) -> BotConfig {
        match self.bots.get(&BotId(BOT_ID.to_string())).await {
            Ok(Some(bot)) => bot,
            other => panic!("bot fixture missing: {other:?}"),
        }
    }

    pub async fn seed_usage(&self, kind: UsageKind, records: usize, tokens: u64) {
        for _ in 0..records {
            let record = UsageRecord {
                bot_id: BotId(BOT_ID.to_string()),
                kind,
                tokens,
                created_at: parley_core::clock::Clock::now(self.clock.as_ref()),
            };
            if let Err(error) = self.usage.create(record).await {
                panic!("seeding usage failed: {error}");
            }
        }
    }

    pub async fn usage_total(&self, kind: UsageKind) -> u64 {
        let filter = UsageFilter {
            bot_id: BotId(BOT_ID.to_string()),
            kind: Some(kind),
            since: DateTime::<Utc>::MIN_UTC,
        };
        self.usage.sum_tokens(&filter).await.unwrap_or_default()
    }
}
