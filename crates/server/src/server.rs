//! HTTP surface: health check and the streaming chat endpoint.
//!
//! Each chat request walks a small state machine: validate, stream one
//! framed event per turn delta, then close with exactly one terminal
//! `done` or `error` frame. The client always sees a terminal frame.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::StreamExt;
use runtime::{AgentSession, ConversationTurn, TurnEvent};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Shared state for the relay server.
#[derive(Clone, Default)]
pub struct AppState {
    /// Present once startup initialization has completed.
    pub session: Option<Arc<AgentSession>>,
}

/// Body of `POST /chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Absent and `null` are treated the same as empty.
    #[serde(default)]
    pub message: Option<String>,
    /// Prior turns, oldest first.
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    agent_ready: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// One framed stream event, as serialized into `data:` payloads.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StreamFrame {
    Delta { content: String },
    Done,
    Error { error: String },
}

impl From<TurnEvent> for StreamFrame {
    fn from(event: TurnEvent) -> Self {
        match event {
            TurnEvent::Delta(content) => Self::Delta { content },
            TurnEvent::Done => Self::Done,
            TurnEvent::Error(error) => Self::Error { error },
        }
    }
}

/// Build the relay router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        agent_ready: state.session.is_some(),
    })
}

async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    let message = request.message.unwrap_or_default();
    if message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "message is required".to_string(),
            }),
        )
            .into_response();
    }

    let Some(session) = state.session else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "Agent not ready".to_string(),
            }),
        )
            .into_response();
    };

    let request_id = Uuid::new_v4();
    info!(%request_id, history = request.history.len(), "chat request");

    let frames = session
        .run(message, request.history)
        .map(|event| Ok::<_, Infallible>(frame(event)));

    // Proxy buffering defeats incremental delivery; X-Accel-Buffering turns
    // it off for nginx-style front ends.
    (
        [
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (
                HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            ),
        ],
        Sse::new(frames),
    )
        .into_response()
}

fn frame(event: TurnEvent) -> Event {
    let frame = StreamFrame::from(event);
    let payload = serde_json::to_string(&frame)
        .unwrap_or_else(|_| r#"{"type":"error","error":"serialization failed"}"#.to_string());
    Event::default().data(payload)
}
