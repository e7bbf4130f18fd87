//! Axum HTTP surface: the SSE chat endpoint plus tool listing and health.

use crate::encoder;
use crate::orchestrator::{ChatRequest, Orchestrator};
use crate::registry::ToolRegistry;
use answerpipe_core::StreamEvent;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::cors::CorsLayer;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<ToolRegistry>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tools", get(list_tools))
        .route("/api/chat", get(chat))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn list_tools(State(state): State<AppState>) -> Json<serde_json::Value> {
    let tools: Vec<serde_json::Value> = state
        .registry
        .schemas(None)
        .into_iter()
        .map(|s| serde_json::json!({"name": s.name, "description": s.description}))
        .collect();
    Json(serde_json::json!({ "tools": tools }))
}

#[derive(Debug, Deserialize)]
struct ChatParams {
    message: Option<String>,
    request_id: Option<String>,
    /// Comma-separated tool names; absent means every registered tool.
    tools: Option<String>,
}

/// One request, one orchestrator task, one SSE stream. The client dropping
/// the stream drops the cancellation guard, which stops the task's tool and
/// model work promptly.
async fn chat(
    State(state): State<AppState>,
    Query(params): Query<ChatParams>,
) -> axum::response::Response {
    let message = params.message.unwrap_or_default().trim().to_string();
    if message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "message must not be empty"})),
        )
            .into_response();
    }
    let request_id = params
        .request_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(generated_request_id);
    let enabled_tools = params.tools.map(|t| {
        t.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
    });

    let (tx, rx) = mpsc::channel::<StreamEvent>(EVENT_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    let orchestrator = state.orchestrator.clone();
    let request = ChatRequest {
        message,
        request_id,
        enabled_tools,
    };
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            orchestrator.run(request, tx, cancel).await;
        }
    });

    Sse::new(event_stream(rx, cancel.drop_guard()))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn event_stream(
    rx: mpsc::Receiver<StreamEvent>,
    guard: DropGuard,
) -> impl Stream<Item = Result<axum::response::sse::Event, Infallible>> {
    futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let event = rx.recv().await?;
        Some((Ok(encoder::encode(&event)), (rx, guard)))
    })
}

fn generated_request_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("req-{nanos}")
}
