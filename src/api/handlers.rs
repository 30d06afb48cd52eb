//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{ErrorResponse, ReadyEvent};
use super::AppState;
use crate::router::{Command, CommandReply};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Commands from callers without an event target
        .route("/api/commands", post(post_command))
        // Commands from a frontend that owns an event target
        .route("/api/targets/:target/commands", post(post_target_command))
        // Event stream for one target
        .route("/api/targets/:target/events", get(stream_target))
        .route("/version", get(get_version))
        .with_state(state)
}

async fn post_command(
    State(state): State<AppState>,
    command: Result<Json<Command>, JsonRejection>,
) -> Result<Json<CommandReply>, AppError> {
    let Json(command) = command?;
    Ok(Json(state.router.handle(command, None).await))
}

async fn post_target_command(
    State(state): State<AppState>,
    Path(target): Path<String>,
    command: Result<Json<Command>, JsonRejection>,
) -> Result<Json<CommandReply>, AppError> {
    let Json(command) = command?;
    Ok(Json(state.router.handle(command, Some(&target)).await))
}

async fn stream_target(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> impl IntoResponse {
    let receiver = state.targets.subscribe(&target);
    tracing::info!(
        target_id = %target,
        connected = state.targets.connected(),
        "Frontend event stream opened"
    );
    sse_stream(ReadyEvent::new(target), receiver)
}

async fn get_version() -> &'static str {
    concat!("pagemate ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

enum AppError {
    BadRequest(String),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
