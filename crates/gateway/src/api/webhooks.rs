//! DLQ administration for the webhook mirror.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use uuid::Uuid;

use crate::state::AppState;

/// `GET /v1/webhooks/dlq` — list dead-lettered jobs.
pub async fn list_dlq(State(state): State<AppState>) -> Response {
    let jobs = state.webhook_queue.dlq_list();
    Json(serde_json::json!({
        "count": jobs.len(),
        "jobs": jobs,
    }))
    .into_response()
}

/// `POST /v1/webhooks/dlq/{id}/retry` — schedule a fresh attempt.
pub async fn retry_dlq_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Response {
    if state.webhook_queue.dlq_retry(&job_id) {
        Json(serde_json::json!({ "scheduled": true, "jobId": job_id })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "job not found in DLQ" })),
        )
            .into_response()
    }
}

/// `DELETE /v1/webhooks/dlq` — purge everything.
pub async fn purge_dlq(State(state): State<AppState>) -> Response {
    let purged = state.webhook_queue.dlq_purge();
    Json(serde_json::json!({ "purged": purged })).into_response()
}
