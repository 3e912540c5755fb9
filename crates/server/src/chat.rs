use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    body::to_bytes,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use parley_agent::{AnswerEngine, ChatRequest};
use parley_core::errors::{ApplicationError, InterfaceError};

const MAX_BODY_BYTES: usize = 256 * 1024;

#[derive(Clone)]
pub struct ChatState {
    pub engine: Arc<AnswerEngine>,
    pub trust_forwarded_for: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: &'static str,
    pub correlation_id: String,
}

pub fn router(engine: Arc<AnswerEngine>, trust_forwarded_for: bool) -> Router {
    Router::new()
        .route("/api/v1/chat", post(chat))
        .with_state(ChatState { engine, trust_forwarded_for })
}

/// Socket peer, or the first `X-Forwarded-For` entry when the proxy in front is trusted.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trust_forwarded_for: bool) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .filter(|_| trust_forwarded_for)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    forwarded
        .or_else(|| peer.map(|ip| ip.to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn chat(State(state): State<ChatState>, request: Request) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    let (parts, body) = request.into_parts();
    let peer =
        parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|ConnectInfo(addr)| addr.ip());
    let client_ip = client_ip(&parts.headers, peer, state.trust_forwarded_for);

    let payload = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => {
            serde_json::from_slice::<ChatRequest>(&bytes).map_err(|error| error.to_string())
        }
        Err(error) => Err(error.to_string()),
    };
    let payload = match payload {
        Ok(payload) if !payload.bot_id.trim().is_empty() => payload,
        Ok(_) => return bad_request("botId is required", correlation_id),
        Err(message) => return bad_request(&message, correlation_id),
    };

    match state.engine.answer(payload, &client_ip, &correlation_id).await {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(turn_error) => {
            let interface = ApplicationError::from(turn_error).into_interface(correlation_id);
            if interface.status_code() >= 500 {
                error!(
                    event_name = "http.chat.failed",
                    correlation_id = %interface.correlation_id(),
                    error = %interface,
                    "chat turn failed"
                );
            }
            error_response(interface)
        }
    }
}

fn bad_request(message: &str, correlation_id: String) -> Response {
    warn!(
        event_name = "http.chat.bad_request",
        correlation_id = %correlation_id,
        reason = %message,
        "rejected malformed chat request"
    );
    error_response(InterfaceError::BadRequest { message: message.to_string(), correlation_id })
}

fn error_response(interface: InterfaceError) -> Response {
    let status =
        StatusCode::from_u16(interface.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorBody {
        error: interface.user_message(),
        correlation_id: interface.correlation_id().to_string(),
    };
    (status, Json(body)).into_response()
}
