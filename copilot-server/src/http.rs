//! Copilot HTTP API
//!
//! Axum server for the chat front-end. Each endpoint has a thin axum handler
//! that delegates to an inner function returning `(StatusCode, Value)`, so the
//! logic is testable without going through axum dispatch.
//!
//! Endpoints:
//! - GET  /health          : store health
//! - GET  /version         : server version info
//! - POST /api/chat        : one conversational turn
//! - POST /api/chat/stream : the same turn delivered as Server-Sent Events
//! - POST /api/reset       : clear a thread's memory and pending operation
//! - GET  /api/stats       : record counts per table

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use copilot_core::protocol::{CopilotRequest, CopilotResponse};
use copilot_core::CopilotConfig;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::context::AppContext;

/// Words per streamed content chunk.
const STREAM_CHUNK_WORDS: usize = 3;

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<AppContext>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/stream", post(chat_stream_handler))
        .route("/api/reset", post(reset_handler))
        .route("/api/stats", get(stats_handler))
        .with_state(state)
}

/// Serve until the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<AppContext>,
    config: &CopilotConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Copilot HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ChatRequest {
    pub message: Option<String>,
    pub thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub thread_id: Option<String>,
}

fn error_body(msg: impl Into<String>) -> serde_json::Value {
    serde_json::json!({
        "error": msg.into(),
        "status": "error",
    })
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

pub async fn health_inner(ctx: &AppContext) -> (StatusCode, serde_json::Value) {
    let response = crate::router::handle_request(CopilotRequest::Health, ctx).await;
    match response_to_http(response) {
        Ok(mut data) => {
            if let Some(obj) = data.as_object_mut() {
                obj.insert("version".to_string(), serde_json::json!(env!("CARGO_PKG_VERSION")));
            }
            (StatusCode::OK, data)
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e,
            }),
        ),
    }
}

/// Version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "copilot/1",
    })
}

/// Run one turn. A missing thread id is generated so the client can continue the thread.
pub async fn chat_inner(ctx: &AppContext, req: ChatRequest) -> (StatusCode, serde_json::Value) {
    let message = match req.message {
        Some(m) if !m.trim().is_empty() => m,
        _ => return (StatusCode::BAD_REQUEST, error_body("message field is required")),
    };
    let thread_id = req
        .thread_id
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let start = Instant::now();
    let request = CopilotRequest::Chat {
        thread_id: Some(thread_id.clone()),
        message,
    };
    let response = crate::router::handle_request(request, ctx).await;
    let took_ms = start.elapsed().as_millis() as u64;

    match response_to_http(response) {
        Ok(mut data) => {
            if let Some(obj) = data.as_object_mut() {
                obj.insert("status".to_string(), serde_json::json!("success"));
                obj.insert("took_ms".to_string(), serde_json::json!(took_ms));
            }
            (StatusCode::OK, data)
        }
        Err(e) => {
            let mut body = error_body(e);
            body["thread_id"] = serde_json::json!(thread_id);
            (StatusCode::SERVICE_UNAVAILABLE, body)
        }
    }
}

pub async fn reset_inner(ctx: &AppContext, req: ResetRequest) -> (StatusCode, serde_json::Value) {
    let thread_id = match req.thread_id {
        Some(t) if !t.trim().is_empty() => t,
        _ => return (StatusCode::BAD_REQUEST, error_body("thread_id field is required")),
    };
    let response = crate::router::handle_request(CopilotRequest::Reset { thread_id }, ctx).await;
    match response_to_http(response) {
        Ok(data) => (StatusCode::OK, data),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, error_body(e)),
    }
}

pub async fn stats_inner(ctx: &AppContext) -> (StatusCode, serde_json::Value) {
    let response = crate::router::handle_request(CopilotRequest::Stats, ctx).await;
    match response_to_http(response) {
        Ok(data) => (StatusCode::OK, data),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, error_body(e)),
    }
}

/// SSE payloads for a finished turn: the thread id, the reply in chunks of a
/// few words, then `[DONE]`. A failed turn sends an error payload instead of content.
pub fn stream_payloads(status: StatusCode, body: &serde_json::Value) -> Vec<String> {
    let mut payloads = vec![serde_json::json!({ "thread_id": body["thread_id"] }).to_string()];

    if status.is_success() {
        let text = body["response"].as_str().unwrap_or_default();
        let words: Vec<&str> = text.split_whitespace().collect();
        for chunk in words.chunks(STREAM_CHUNK_WORDS) {
            let mut content = chunk.join(" ");
            content.push(' ');
            payloads.push(serde_json::json!({ "content": content }).to_string());
        }
        payloads.push(
            serde_json::json!({ "awaiting_confirmation": body["awaiting_confirmation"] }).to_string(),
        );
    } else {
        payloads.push(serde_json::json!({ "error": body["error"] }).to_string());
    }

    payloads.push("[DONE]".to_string());
    payloads
}

// ============================================================================
// Axum handlers (thin wrappers)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<AppContext>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn chat_handler(
    State(state): State<Arc<AppContext>>,
    Json(req): Json<ChatRequest>,
) -> impl IntoResponse {
    let (status, body) = chat_inner(&state, req).await;
    (status, Json(body))
}

pub async fn chat_stream_handler(
    State(state): State<Arc<AppContext>>,
    Json(req): Json<ChatRequest>,
) -> Response {
    let (status, body) = chat_inner(&state, req).await;
    if status == StatusCode::BAD_REQUEST {
        return (status, Json(body)).into_response();
    }

    let events = stream_payloads(status, &body)
        .into_iter()
        .map(|payload| Ok::<_, Infallible>(Event::default().data(payload)));
    Sse::new(futures::stream::iter(events)).into_response()
}

pub async fn reset_handler(
    State(state): State<Arc<AppContext>>,
    Json(req): Json<ResetRequest>,
) -> impl IntoResponse {
    let (status, body) = reset_inner(&state, req).await;
    (status, Json(body))
}

pub async fn stats_handler(State(state): State<Arc<AppContext>>) -> impl IntoResponse {
    let (status, body) = stats_inner(&state).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

/// Convert a dispatcher response into an HTTP body value, or an error string.
pub fn response_to_http(response: CopilotResponse) -> std::result::Result<serde_json::Value, String> {
    if response.is_ok() {
        Ok(response.data.unwrap_or(serde_json::json!({})))
    } else {
        Err(response.error.unwrap_or_else(|| "unknown error".to_string()))
    }
}
