pub mod calls;
pub mod health;
pub mod realtime;
pub mod webhooks;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Build the full API router.
///
/// `/realtime/voice` and `/v1/health` do their own (or no) auth; the
/// REST surface sits behind the bearer-token middleware.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/v1/health", get(health::health))
        .route("/realtime/voice", get(realtime::realtime_ws));

    let protected = Router::new()
        .route("/v1/calls/:id/timeline", get(calls::get_timeline))
        .route(
            "/v1/webhooks/dlq",
            get(webhooks::list_dlq).delete(webhooks::purge_dlq),
        )
        .route("/v1/webhooks/dlq/:id/retry", post(webhooks::retry_dlq_job))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_token,
        ));

    public.merge(protected)
}

/// Constant-time token comparison via SHA-256 digest.
/// Hashing normalizes lengths so ct_eq always compares 32 bytes.
pub(crate) fn token_matches(expected_hash: &[u8], provided: &str) -> bool {
    let provided_hash = Sha256::digest(provided.as_bytes());
    provided_hash.as_slice().ct_eq(expected_hash).into()
}

/// Bearer-token middleware for the REST surface. No configured token
/// means dev mode: everything passes.
async fn require_api_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected_hash) = &state.api_token_hash else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if !token_matches(expected_hash, provided) {
        return (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "error": "invalid or missing API token" })),
        )
            .into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_digest_comparison() {
        let hash = Sha256::digest(b"secret-token").to_vec();
        assert!(token_matches(&hash, "secret-token"));
        assert!(!token_matches(&hash, "wrong"));
        assert!(!token_matches(&hash, ""));
    }
}
