// HTTP and WebSocket APIs

mod proxies;
mod source_events;
pub mod websocket;

use crate::event::EventBus;
use crate::registry::ProxyRegistry;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

pub use websocket::ws_handler;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ProxyRegistry>,
    /// Inbound push channel the source-events route publishes to
    pub bus: EventBus,
}

/// Create the API router with every route
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(proxies::routes())
        .merge(source_events::routes())
        .route("/api/ws", get(ws_handler))
        .with_state(Arc::new(state))
}

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application errors
#[derive(Debug)]
pub(crate) enum AppError {
    ValidationError(String),
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}
