use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::trace::TraceLayer;
use thiserror::Error;
use tracing::info;

use parley_agent::dispatch::{SideEffectExecutor, SpawnedQueue};
use parley_agent::cache::InMemoryReplyCacheStore;
use parley_agent::quota::InMemoryRateCounterStore;
use parley_agent::{AnswerEngine, EngineParts, EngineSettings};
use parley_core::clock::SystemClock;
use parley_core::config::{AppConfig, ConfigError, LoadOptions};
use parley_db::repositories::{
    SqlApprovalRepository, SqlBotRepository, SqlKnowledgeRepository, SqlQaRepository,
    SqlSessionRepository, SqlUsageRepository,
};
use parley_db::{connect_with_settings, migrations, DbPool};

use crate::connectors::{HttpConnectors, HttpPageFetcher};
use crate::llm::OpenAiCompatibleClient;
use crate::{chat, health};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<AnswerEngine>,
}

impl Application {
    pub fn router(&self) -> Router {
        chat::router(self.engine.clone(), self.config.server.trust_forwarded_for)
            .merge(health::router(self.db_pool.clone(), &self.config.llm))
            .layer(TraceLayer::new_for_http())
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("http client construction failed: {0}")]
    HttpClient(#[source] reqwest::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let engine = build_engine(&config, &db_pool)?;
    info!(
        event_name = "system.bootstrap.engine_ready",
        correlation_id = "bootstrap",
        llm_provider = ?config.llm.provider,
        llm_model = %config.llm.model,
        "answer engine assembled"
    );

    Ok(Application { config, db_pool, engine: Arc::new(engine) })
}

fn build_engine(config: &AppConfig, db_pool: &DbPool) -> Result<AnswerEngine, BootstrapError> {
    let llm = Arc::new(
        OpenAiCompatibleClient::from_config(&config.llm).map_err(BootstrapError::HttpClient)?,
    );
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.llm.timeout_secs.max(1)))
        .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(BootstrapError::HttpClient)?;
    let connectors = Arc::new(HttpConnectors::new(http.clone()));
    let pages = Arc::new(HttpPageFetcher::new(http));

    let executor = Arc::new(SideEffectExecutor::new(
        connectors.clone(),
        connectors.clone(),
        connectors.clone(),
        connectors.clone(),
    ));

    Ok(AnswerEngine::new(
        EngineParts {
            bots: Arc::new(SqlBotRepository::new(db_pool.clone())),
            qa: Arc::new(SqlQaRepository::new(db_pool.clone())),
            knowledge: Arc::new(SqlKnowledgeRepository::new(db_pool.clone())),
            sessions: Arc::new(SqlSessionRepository::new(db_pool.clone())),
            usage: Arc::new(SqlUsageRepository::new(db_pool.clone())),
            approvals: Arc::new(SqlApprovalRepository::new(db_pool.clone())),
            generation: llm.clone(),
            embeddings: llm,
            commerce: connectors,
            sitemap: pages.clone(),
            homepage: pages,
            queue: Arc::new(SpawnedQueue::new(executor)),
            rate_counters: Arc::new(InMemoryRateCounterStore::default()),
            reply_cache: Arc::new(InMemoryReplyCacheStore::default()),
            clock: Arc::new(SystemClock),
        },
        EngineSettings::from(config),
    ))
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    use parley_core::config::{ConfigOverrides, LlmProvider, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_when_openai_key_is_missing() {
        let mut options = overrides("sqlite::memory:");
        options.overrides.llm_provider = Some(LlmProvider::OpenAi);
        options.overrides.llm_api_key = Some("   ".to_string());

        let result = bootstrap(options).await;

        let message = result.err().expect("bootstrap should fail").to_string();
        assert!(message.contains("llm.api_key"));
    }

    #[tokio::test]
    async fn bootstrap_migrates_schema_and_serves_health() {
        let app = bootstrap(overrides("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed with the default provider");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('bot', 'qa_entry', 'knowledge_chunk', \
             'chat_session', 'usage_record', 'approval_request')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema lookup");
        assert_eq!(table_count, 6);

        let response = app
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("health response");
        assert_eq!(response.status(), StatusCode::OK);

        app.db_pool.close().await;
    }
}
