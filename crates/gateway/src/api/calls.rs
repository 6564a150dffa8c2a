//! Timeline read API.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    /// Return events with id strictly greater than this.
    #[serde(default)]
    pub from: u64,
    /// Page size; clamped to the server-side bound.
    #[serde(default)]
    pub count: Option<usize>,
}

/// `GET /v1/calls/{id}/timeline`
///
/// Events in ascending id order, bounded by the configured COUNT.
pub async fn get_timeline(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    Query(query): Query<TimelineQuery>,
) -> Response {
    if !state.timeline.has_call(&call_id) {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "call not found" })),
        )
            .into_response();
    }

    let max = state.config.server.timeline_read_max;
    let count = query.count.unwrap_or(max).min(max);
    let events = state.timeline.range(&call_id, query.from, count);

    let timeline: Vec<serde_json::Value> = events
        .iter()
        .map(|e| {
            serde_json::json!({
                "eventId": e.event_id,
                "kind": e.kind.as_str(),
                "payload": e.payload,
                "timestamp": e.timestamp.to_rfc3339(),
            })
        })
        .collect();

    Json(serde_json::json!({
        "callId": call_id,
        "timeline": timeline,
    }))
    .into_response()
}
