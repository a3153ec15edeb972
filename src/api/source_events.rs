use super::{AppError, AppState};
use crate::event::SourceStateChanged;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// A single notification or a batch
#[derive(Deserialize)]
#[serde(untagged)]
enum SourceEventsBody {
    Batch(Vec<SourceStateChanged>),
    Single(SourceStateChanged),
}

#[derive(Serialize)]
struct AcceptedResponse {
    accepted: usize,
}

pub(super) fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/source-events", post(ingest_source_events))
}

/// POST /api/source-events - Push channel for external state changes
async fn ingest_source_events(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    let body: SourceEventsBody = serde_json::from_slice(&body)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;
    let events = match body {
        SourceEventsBody::Batch(events) => events,
        SourceEventsBody::Single(event) => vec![event],
    };

    if events.is_empty() {
        return Err(AppError::ValidationError(
            "Batch must contain at least one event".to_string(),
        ));
    }
    if let Some(event) = events.iter().find(|e| e.source.trim().is_empty()) {
        return Err(AppError::ValidationError(format!(
            "event source must not be empty (new_state: {:?})",
            event.new_state
        )));
    }

    let accepted = events.len();
    for event in events {
        debug!(source = %event.source, new_state = ?event.new_state, "Source state pushed");
        state.bus.publish(event);
    }

    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { accepted })))
}
