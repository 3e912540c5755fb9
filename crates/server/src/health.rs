use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use parley_core::config::LlmConfig;
use parley_db::DbPool;
use serde::Serialize;
use tracing::warn;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    llm: HealthCheck,
}

impl HealthState {
    pub fn new(db_pool: DbPool, llm: &LlmConfig) -> Self {
        Self { db_pool, llm: llm_check(llm) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub tenants: HealthCheck,
    pub llm: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, llm: &LlmConfig) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState::new(db_pool, llm))
}

/// Ready only when the pool answers and the bot registry is migrated and readable.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let tenants = if database.status == "ready" {
        tenant_check(&state.db_pool).await
    } else {
        HealthCheck { status: "degraded", detail: "skipped: database unreachable".to_string() }
    };
    let ready = database.status == "ready" && tenants.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "parley-server answering chat turns".to_string(),
        },
        database,
        tenants,
        llm: state.llm.clone(),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            warn!(event_name = "system.health.degraded", error = %error, "database check failed");
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

async fn tenant_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM bot").fetch_one(pool).await {
        Ok(bots) => HealthCheck { status: "ready", detail: format!("{bots} bots registered") },
        Err(error) => {
            warn!(
                event_name = "system.health.degraded",
                error = %error,
                "bot registry is not readable"
            );
            HealthCheck { status: "degraded", detail: format!("bot registry unavailable: {error}") }
        }
    }
}

// Static summary; the backend is not called so health stays cheap and free of token spend.
fn llm_check(llm: &LlmConfig) -> HealthCheck {
    HealthCheck {
        status: "ready",
        detail: format!(
            "{:?} model `{}` at {}",
            llm.provider,
            llm.model,
            llm.effective_base_url()
        ),
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        extract::State,
        http::{Request, StatusCode},
        Json,
    };
    use secrecy::SecretString;
    use serde_json::Value;
    use tower::ServiceExt;

    use parley_core::config::{AppConfig, LlmConfig, LlmProvider};
    use parley_db::{connect_with_settings, migrations, DbPool};

    use crate::health::{health, router, HealthState};

    async fn migrated_pool() -> DbPool {
        let pool =
            connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn llm() -> LlmConfig {
        AppConfig::default().llm
    }

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let pool = migrated_pool().await;
        sqlx::query(
            "INSERT INTO bot (id, name, bot_type, plan, config_json, created_at, updated_at) \
             VALUES ('bot-1', 'Shop', 'knowledge', 'free', '{}', '2026-01-01T00:00:00Z', \
             '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("insert bot");

        let (status, Json(payload)) = health(State(HealthState::new(pool.clone(), &llm()))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.tenants.detail, "1 bots registered");
        assert_eq!(payload.service.status, "ready");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let pool = migrated_pool().await;
        pool.close().await;

        let (status, Json(payload)) = health(State(HealthState::new(pool, &llm()))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.tenants.status, "degraded");
        assert_eq!(payload.service.status, "ready");
    }

    #[tokio::test]
    async fn unmigrated_database_is_degraded() {
        let pool =
            connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");

        let (status, Json(payload)) = health(State(HealthState::new(pool.clone(), &llm()))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.tenants.status, "degraded");
        assert!(payload.tenants.detail.starts_with("bot registry unavailable"));

        pool.close().await;
    }

    #[tokio::test]
    async fn health_route_reports_llm_backend_without_the_key() {
        let pool = migrated_pool().await;
        let llm = LlmConfig {
            provider: LlmProvider::OpenAi,
            api_key: Some(SecretString::from("sk-health-secret".to_string())),
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            timeout_secs: 30,
        };

        let response = router(pool.clone(), &llm)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("health response");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let body: Value = serde_json::from_slice(&bytes).expect("json body");
        assert_eq!(body["llm"]["detail"], "OpenAi model `gpt-4o-mini` at https://api.openai.com");
        assert_eq!(body["tenants"]["detail"], "0 bots registered");
        assert!(!String::from_utf8_lossy(&bytes).contains("sk-health-secret"));

        pool.close().await;
    }
}
