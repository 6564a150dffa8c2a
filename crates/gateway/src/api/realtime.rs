//! The realtime voice WebSocket endpoint.
//!
//! Flow:
//! 1. Client upgrades `GET /realtime/voice?callId=…&agentId=…` carrying
//!    a bearer credential as a query parameter or WS subprotocol value
//! 2. The handler authenticates, validates the rate, reserves the call
//!    id, and acquires admission (global then campaign)
//! 3. On accept the server sends `{"t":"connected","callId":…}` and the
//!    session supervisor takes over
//! 4. Binary frames carry seq-stamped PCM; JSON text frames carry
//!    control messages enforced against the protocol schema

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use invorto_domain::audio::SampleRate;
use invorto_protocol::{decode_frame, ClientMessage, CloseCode, ServerMessage};

use crate::admission::AdmissionGate;
use crate::session::{run_session, SessionParams};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query params
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct RealtimeQuery {
    #[serde(rename = "callId")]
    pub call_id: String,
    #[serde(rename = "agentId")]
    pub agent_id: String,
    #[serde(default)]
    pub campaign: Option<String>,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub rate: Option<u32>,
    /// Bearer credential as a query parameter (SIP-bridge clients).
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, rename = "access_token")]
    pub access_token: Option<String>,
}

/// Extract the bearer credential from the subprotocol header. Clients
/// offer `bearer, <token>`; the token is whichever value isn't the
/// literal `bearer`.
fn subprotocol_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("sec-websocket-protocol")?.to_str().ok()?;
    raw.split(',')
        .map(str::trim)
        .find(|p| !p.eq_ignore_ascii_case("bearer") && !p.is_empty())
        .map(str::to_owned)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /realtime/voice — upgrade to WebSocket.
pub async fn realtime_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<RealtimeQuery>,
    headers: HeaderMap,
) -> Response {
    // ── Auth: query param or subprotocol, both accepted ────────────
    if let Some(expected_hash) = &state.api_token_hash {
        let provided = query
            .access_token
            .clone()
            .or_else(|| query.token.clone())
            .or_else(|| subprotocol_token(&headers))
            .unwrap_or_default();
        if !super::token_matches(expected_hash, &provided) {
            return (StatusCode::UNAUTHORIZED, CloseCode::Unauthorized.as_str()).into_response();
        }
    }

    // ── Validate negotiated audio parameters ───────────────────────
    let Some(rate) = SampleRate::from_hz(query.rate.unwrap_or(16_000)) else {
        return (StatusCode::BAD_REQUEST, "unsupported sample rate").into_response();
    };
    if query.call_id.is_empty() || query.agent_id.is_empty() {
        return (StatusCode::BAD_REQUEST, "callId and agentId are required").into_response();
    }

    let params = SessionParams {
        call_id: query.call_id.clone(),
        agent_id: query.agent_id.clone(),
        campaign_id: query.campaign.clone(),
        rate,
        binary_payloads: false,
    };

    ws.protocols(["bearer"])
        .on_upgrade(move |socket| handle_socket(socket, state, params))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn close_with(mut socket: WebSocket, code: CloseCode) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: code.code(),
            reason: code.as_str().into(),
        })))
        .await;
}

async fn handle_socket(socket: WebSocket, state: AppState, params: SessionParams) {
    let call_id = params.call_id.clone();

    // ── Call id must be unique across live sessions ────────────────
    let cancel = CancellationToken::new();
    if !state.sessions.try_register(&call_id, cancel.clone()) {
        tracing::warn!(call_id = %call_id, "duplicate callId rejected");
        close_with(socket, CloseCode::BadRequest).await;
        return;
    }

    // ── Admission: global before campaign ──────────────────────────
    // A rejected session closes with `rate_limited` and writes NO
    // session events.
    let guard = match AdmissionGate::admit(&state.admission, params.campaign_id.as_deref(), Utc::now()) {
        Ok(guard) => guard,
        Err(e) => {
            tracing::info!(call_id = %call_id, error = %e, "admission rejected");
            state.sessions.remove(&call_id);
            close_with(socket, CloseCode::RateLimited).await;
            return;
        }
    };

    let (mut ws_sink, mut ws_stream) = socket.split();

    // ── Channels between socket halves and the supervisor ──────────
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(64);
    let (control_tx, control_rx) = mpsc::channel::<ClientMessage>(32);
    let (raw_tx, raw_rx) = mpsc::channel(64);
    let paused = Arc::new(AtomicBool::new(false));

    // Writer task: the socket's single writer.
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize outbound message");
                    continue;
                }
            };
            if ws_sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = ws_sink.send(Message::Close(None)).await;
    });

    // ── Handshake ──────────────────────────────────────────────────
    if outbound_tx
        .send(ServerMessage::Connected {
            call_id: call_id.clone(),
        })
        .await
        .is_err()
    {
        state.sessions.remove(&call_id);
        drop(guard);
        return;
    }

    tracing::info!(
        call_id = %call_id,
        agent_id = %params.agent_id,
        campaign = params.campaign_id.as_deref().unwrap_or("-"),
        rate = params.rate.as_hz(),
        "session connected"
    );

    // ── Supervisor ─────────────────────────────────────────────────
    let supervisor = tokio::spawn(run_session(
        state.clone(),
        params,
        guard,
        cancel.clone(),
        outbound_tx.clone(),
        control_rx,
        raw_rx,
        paused.clone(),
    ));

    // ── Reader loop: enforce the message schema at the boundary ────
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Binary(bytes) => {
                if paused.load(Ordering::Acquire) {
                    continue;
                }
                match decode_frame(&bytes) {
                    Ok(frame) => {
                        if raw_tx.send(frame).await.is_err() {
                            break; // supervisor is closing
                        }
                    }
                    Err(e) => {
                        // One corrupt frame is survivable; report and
                        // keep the call up.
                        let _ = outbound_tx
                            .send(ServerMessage::Error {
                                kind: "bad_request".into(),
                                message: e.to_string(),
                            })
                            .await;
                    }
                }
            }
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Ping { timestamp }) => {
                    let _ = outbound_tx.send(ServerMessage::Pong { timestamp }).await;
                }
                Ok(control) => {
                    if control_tx.send(control).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    // Malformed control is a protocol violation: close.
                    tracing::warn!(call_id = %call_id, error = %e, "malformed control message");
                    let _ = outbound_tx
                        .send(ServerMessage::Error {
                            kind: "bad_request".into(),
                            message: format!("malformed control message: {e}"),
                        })
                        .await;
                    break;
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {
                // WS-level keepalive is handled by axum.
            }
        }
    }

    // Reader done: closing the channels tells the supervisor the
    // client went away, and it unwinds everything else.
    drop(control_tx);
    drop(raw_tx);
    let _ = supervisor.await;
    drop(outbound_tx);
    let _ = writer.await;
    tracing::debug!(call_id = %call_id, "socket handler finished");
}
