use super::{AppError, AppState};
use crate::registry::{ProxyView, RequestError, RequestOutcome};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// PUT body
#[derive(Deserialize)]
struct SetValueRequest {
    value: Value,
}

pub(super) fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/proxies", get(list_proxies))
        .route("/api/proxies/:id", get(get_proxy).put(set_proxy))
}

/// GET /api/proxies
async fn list_proxies(State(state): State<Arc<AppState>>) -> Json<Vec<ProxyView>> {
    Json(state.registry.list())
}

/// GET /api/proxies/:id
async fn get_proxy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ProxyView>, AppError> {
    state
        .registry
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("unknown proxy '{}'", id)))
}

/// PUT /api/proxies/:id - Request a desired value.
///
/// Answers 202 as soon as the value is scheduled; the external write happens
/// later on the proxy's own cadence.
async fn set_proxy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<RequestOutcome>), AppError> {
    let request: SetValueRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    let outcome = state
        .registry
        .request(&id, &request.value)
        .map_err(|e| match e {
            RequestError::UnknownProxy(_) => AppError::NotFound(e.to_string()),
            RequestError::InvalidValue { .. } => AppError::ValidationError(e.to_string()),
        })?;

    info!(
        proxy_id = %id,
        value = %request.value,
        scheduled = outcome.scheduled,
        "Proxy value requested"
    );

    Ok((StatusCode::ACCEPTED, Json(outcome)))
}
