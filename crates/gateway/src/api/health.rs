//! Liveness probe with a semaphore occupancy snapshot.

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;

use crate::state::AppState;

/// `GET /v1/health`
pub async fn health(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "liveSessions": state.sessions.len(),
        "admission": state.admission.occupancy(Utc::now()),
        "webhookBacklog": state.webhook_queue.pending_len(),
    }))
    .into_response()
}
