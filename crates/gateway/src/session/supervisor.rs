//! Session supervisor: one instance per accepted realtime socket.
//!
//! Owns the session lifecycle (`Connecting → Ready → Listening ↔
//! Speaking → Closing → Closed`), spawns the ingress pipeline, the ASR
//! pump, and one agent-runtime task per turn, and funnels every
//! significant transition into the per-call timeline. All children
//! share one cancellation token; on any exit path resources are
//! released in reverse order of acquisition and the admission slots are
//! returned exactly once via the guard's drop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use invorto_adapters::SynthesisOptions;
use invorto_domain::audio::{AudioFrame, SampleRate};
use invorto_domain::event::EventKind;
use invorto_domain::tool::Message;
use invorto_protocol::{ClientMessage, ServerMessage};

use crate::admission::AdmissionGuard;
use crate::state::AppState;

use super::audio::{run_ingress, IngressArgs};
use super::egress::{speak_text, EgressSinks};
use super::runtime::{run_turn, TurnContext};
use super::{SessionEvent, SessionState, TurnOutcome};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parameters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionParams {
    pub call_id: String,
    pub agent_id: String,
    pub campaign_id: Option<String>,
    pub rate: SampleRate,
    /// Client prefers byte-array `tts.chunk` payloads.
    pub binary_payloads: bool,
}

/// How long Closing waits for children before giving up on them.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drive one session to completion. The caller (the WS handler) owns
/// the socket halves; this function owns everything else.
#[allow(clippy::too_many_arguments)]
pub async fn run_session(
    state: AppState,
    params: SessionParams,
    guard: AdmissionGuard,
    cancel: CancellationToken,
    outbound: mpsc::Sender<ServerMessage>,
    mut control_rx: mpsc::Receiver<ClientMessage>,
    raw_audio_rx: mpsc::Receiver<AudioFrame>,
    paused: Arc<AtomicBool>,
) {
    let call_id = params.call_id.clone();
    let session_cfg = state.config.session.clone();

    // ── Timeline writer: the single appender for this call ──────────
    let (tl_tx, mut tl_rx) = mpsc::channel::<(EventKind, serde_json::Value)>(256);
    let timeline_store = state.timeline.clone();
    let tl_call_id = call_id.clone();
    let timeline_task = tokio::spawn(async move {
        while let Some((kind, payload)) = tl_rx.recv().await {
            timeline_store.append(&tl_call_id, kind, payload);
        }
    });

    let mut sinks = EgressSinks {
        outbound: outbound.clone(),
        timeline: tl_tx.clone(),
        binary_payloads: params.binary_payloads,
    };

    // ── ASR stream ──────────────────────────────────────────────────
    let asr = match state.recognizer.start(params.rate).await {
        Ok(asr) => asr,
        Err(e) => {
            tracing::error!(call_id = %call_id, error = %e, "asr unavailable at session start");
            let _ = tl_tx
                .send((
                    EventKind::Error,
                    serde_json::json!({ "kind": e.kind(), "message": e.to_string() }),
                ))
                .await;
            let _ = outbound
                .send(ServerMessage::Error {
                    kind: e.kind().into(),
                    message: "speech recognizer unavailable".into(),
                })
                .await;
            drop(sinks); // releases its timeline sender clone
            finish_timeline(tl_tx, timeline_task, "failed", "adapter_unavailable").await;
            drop(guard);
            state.sessions.remove(&call_id);
            return;
        }
    };

    // ── Pipelines ───────────────────────────────────────────────────
    let (events_tx, mut events_rx) = mpsc::channel::<SessionEvent>(64);
    let (words_tx, words_rx) = mpsc::channel::<usize>(16);

    let ingress_task = tokio::spawn(run_ingress(IngressArgs {
        cfg: session_cfg.clone(),
        rate: params.rate,
        raw_rx: raw_audio_rx,
        asr_frames: asr.frames,
        events: events_tx.clone(),
        words_rx,
        cancel: cancel.clone(),
    }));

    let asr_pump_task = {
        let events = events_tx.clone();
        let mut hypotheses = asr.hypotheses;
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    hyp = hypotheses.recv() => match hyp {
                        Some(Ok(hyp)) if hyp.is_final => {
                            if events.send(SessionEvent::Final(hyp)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(hyp)) => {
                            if events.send(SessionEvent::Interim(hyp)).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            let _ = events.send(SessionEvent::AsrFailed(e)).await;
                            break;
                        }
                        None => break,
                    },
                }
            }
        })
    };

    let refresh_task = guard.spawn_refresh(cancel.clone());

    // ── Session opened ──────────────────────────────────────────────
    let _ = tl_tx
        .send((
            EventKind::SessionConnected,
            serde_json::json!({
                "agentId": params.agent_id,
                "campaignId": params.campaign_id,
                "rate": params.rate.as_hz(),
            }),
        ))
        .await;
    let _ = tl_tx
        .send((
            EventKind::CallStatusChanged,
            serde_json::json!({ "status": "in_progress" }),
        ))
        .await;

    // ── Supervisor state ────────────────────────────────────────────
    let mut session_state = SessionState::Ready;
    let mut user_turn_active = false;
    let mut history: Vec<Message> = Vec::new();
    let mut queued_finals: VecDeque<invorto_domain::transcript::TranscriptHypothesis> =
        VecDeque::new();
    let mut turn_cancel: Option<CancellationToken> = None;
    let mut turn_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut consecutive_failures = 0u32;
    let mut heartbeat_seq = 0u64;

    let mut synth_opts = SynthesisOptions {
        voice: state.config.adapters.tts.voice.clone(),
        locale: state.config.adapters.tts.locale.clone(),
        encoding: state.config.adapters.tts.encoding,
    };
    let mut temperature: Option<f32> = Some(state.config.adapters.llm.temperature);
    let system_prompt = format!(
        "You are agent {} on a live phone call. Reply in short, natural \
         spoken sentences without markdown. Use the available tools when \
         the caller asks for information or bookings.",
        params.agent_id
    );

    let inactivity = Duration::from_secs(session_cfg.limits.inactivity_timeout_secs.max(1));
    let mut deadline = Instant::now() + inactivity;
    let mut heartbeat =
        tokio::time::interval(Duration::from_secs(session_cfg.limits.heartbeat_secs.max(1)));
    heartbeat.tick().await; // the first tick fires immediately

    let close_reason: &str;

    // ── Main loop ───────────────────────────────────────────────────
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                close_reason = "shutdown";
                break;
            }

            _ = heartbeat.tick() => {
                heartbeat_seq += 1;
                if outbound.send(ServerMessage::Heartbeat { seq: heartbeat_seq }).await.is_err() {
                    close_reason = "disconnect";
                    break;
                }
            }

            _ = tokio::time::sleep_until(deadline) => {
                // Timeouts are suspended while the assistant speaks.
                if session_state == SessionState::Speaking {
                    deadline = Instant::now() + inactivity;
                    continue;
                }
                tracing::info!(call_id = %call_id, "session inactivity timeout");
                let _ = tl_tx
                    .send((
                        EventKind::Error,
                        serde_json::json!({ "kind": "session_timeout", "message": "inactivity timeout" }),
                    ))
                    .await;
                let _ = outbound
                    .send(ServerMessage::Error {
                        kind: "session_timeout".into(),
                        message: "closing after inactivity".into(),
                    })
                    .await;
                close_reason = "session_timeout";
                break;
            }

            msg = control_rx.recv() => {
                let Some(msg) = msg else {
                    close_reason = "disconnect";
                    break;
                };
                deadline = Instant::now() + inactivity;
                match msg {
                    ClientMessage::Start { binary, .. } => {
                        sinks.binary_payloads = binary;
                        if session_state == SessionState::Ready {
                            session_state = SessionState::Listening;
                        }
                    }
                    ClientMessage::Pause => paused.store(true, Ordering::Release),
                    ClientMessage::Resume => paused.store(false, Ordering::Release),
                    ClientMessage::End => {
                        close_reason = "client_end";
                        break;
                    }
                    ClientMessage::Dtmf { digits } => {
                        let _ = tl_tx
                            .send((EventKind::DtmfReceive, serde_json::json!({ "digits": digits })))
                            .await;
                    }
                    ClientMessage::Transfer { target } => {
                        let _ = tl_tx
                            .send((
                                EventKind::CallStatusChanged,
                                serde_json::json!({ "status": "transfer_requested", "target": target }),
                            ))
                            .await;
                    }
                    ClientMessage::Config { voice, language, temperature: temp } => {
                        if let Some(voice) = voice {
                            synth_opts.voice = voice;
                        }
                        if let Some(language) = language {
                            synth_opts.locale = language;
                        }
                        if temp.is_some() {
                            temperature = temp;
                        }
                    }
                    ClientMessage::ToolResult { call_id: tool_call_id, result } => {
                        // Human-assisted tool results are recorded; the
                        // conversation folds them in on the next turn.
                        let _ = tl_tx
                            .send((
                                EventKind::ToolResult,
                                serde_json::json!({
                                    "callId": tool_call_id,
                                    "content": result,
                                    "source": "client",
                                }),
                            ))
                            .await;
                    }
                    ClientMessage::Ping { .. } => {
                        // Answered inline by the socket reader.
                    }
                }
            }

            event = events_rx.recv() => {
                let Some(event) = event else {
                    close_reason = "pipelines_stopped";
                    break;
                };
                match event {
                    SessionEvent::TurnStarted => {
                        user_turn_active = true;
                        deadline = Instant::now() + inactivity;
                        match session_state {
                            SessionState::Speaking => {
                                // Barge-in: kill the reply mid-stream.
                                tracing::debug!(call_id = %call_id, "barge-in detected");
                                let _ = tl_tx
                                    .send((EventKind::BargeIn, serde_json::json!({})))
                                    .await;
                                if let Some(token) = &turn_cancel {
                                    token.cancel();
                                }
                                session_state = SessionState::Listening;
                            }
                            SessionState::Ready => session_state = SessionState::Listening,
                            _ => {}
                        }
                    }
                    SessionEvent::TurnEnded(_) => {
                        user_turn_active = false;
                    }
                    SessionEvent::Vad { confidence, rms_db, speaking } => {
                        let _ = tl_tx
                            .send((
                                EventKind::VadUpdate,
                                serde_json::json!({
                                    "confidence": confidence,
                                    "rmsDb": rms_db,
                                    "speaking": speaking,
                                }),
                            ))
                            .await;
                    }
                    SessionEvent::Interim(hyp) => {
                        if session_state == SessionState::Ready {
                            session_state = SessionState::Listening;
                        }
                        let _ = outbound
                            .send(ServerMessage::SttPartial {
                                text: hyp.text.clone(),
                                confidence: hyp.confidence,
                            })
                            .await;
                        let _ = tl_tx
                            .send((
                                EventKind::SttPartial,
                                serde_json::json!({ "text": hyp.text, "confidence": hyp.confidence }),
                            ))
                            .await;
                    }
                    SessionEvent::Final(hyp) => {
                        deadline = Instant::now() + inactivity;
                        if session_state == SessionState::Ready {
                            session_state = SessionState::Listening;
                        }
                        let _ = words_tx.send(hyp.word_count()).await;
                        let _ = outbound
                            .send(ServerMessage::SttFinal {
                                text: hyp.text.clone(),
                                confidence: hyp.confidence,
                                low_confidence: hyp.low_confidence,
                            })
                            .await;
                        let _ = tl_tx
                            .send((
                                EventKind::SttFinal,
                                serde_json::json!({
                                    "text": hyp.text,
                                    "confidence": hyp.confidence,
                                    "lowConfidence": hyp.low_confidence,
                                }),
                            ))
                            .await;

                        if turn_task.is_some() {
                            // The agent is busy: queue, never drop.
                            queued_finals.push_back(hyp);
                            if queued_finals.len() > session_cfg.limits.final_queue_bound {
                                let _ = tl_tx
                                    .send((
                                        EventKind::Congestion,
                                        serde_json::json!({ "queuedFinals": queued_finals.len() }),
                                    ))
                                    .await;
                            }
                        } else {
                            let (token, task) = spawn_turn(
                                &state, &sinks, &events_tx, &session_cfg, &synth_opts,
                                &system_prompt, temperature, &cancel,
                                std::mem::take(&mut history), hyp,
                            );
                            turn_cancel = Some(token);
                            turn_task = Some(task);
                        }
                    }
                    SessionEvent::AsrFailed(e) => {
                        tracing::error!(call_id = %call_id, error = %e, "asr failed past retries");
                        let _ = tl_tx
                            .send((
                                EventKind::Error,
                                serde_json::json!({ "kind": e.kind(), "message": e.to_string() }),
                            ))
                            .await;
                        let _ = outbound
                            .send(ServerMessage::Error {
                                kind: e.kind().into(),
                                message: "speech recognition lost".into(),
                            })
                            .await;
                        if let Some(token) = &turn_cancel {
                            token.cancel();
                        }
                        // One last apology before closing.
                        let _ = speak_text(
                            &session_cfg.agent.fallback_utterance,
                            &state.synthesizer,
                            &state.tts_cache,
                            &synth_opts,
                            &sinks,
                            &cancel,
                        )
                        .await;
                        close_reason = "asr_failed";
                        break;
                    }
                    SessionEvent::AssistantSpeaking => {
                        if !user_turn_active
                            && matches!(session_state, SessionState::Listening | SessionState::Ready)
                        {
                            session_state = SessionState::Speaking;
                        }
                    }
                    SessionEvent::TurnFinished(outcome) => {
                        let TurnOutcome { history: returned, interrupted, failed, usage } = outcome;
                        history = returned;
                        turn_cancel = None;
                        turn_task = None;
                        if session_state == SessionState::Speaking {
                            session_state = SessionState::Listening;
                        }
                        if failed {
                            consecutive_failures += 1;
                            if consecutive_failures
                                >= session_cfg.agent.max_consecutive_failed_turns
                            {
                                close_reason = "turn_failures";
                                break;
                            }
                        } else if !interrupted {
                            consecutive_failures = 0;
                        }
                        tracing::debug!(
                            call_id = %call_id,
                            interrupted,
                            failed,
                            total_tokens = usage.total_tokens,
                            "turn finished"
                        );
                        deadline = Instant::now() + inactivity;

                        if let Some(next) = queued_finals.pop_front() {
                            let (token, task) = spawn_turn(
                                &state, &sinks, &events_tx, &session_cfg, &synth_opts,
                                &system_prompt, temperature, &cancel,
                                std::mem::take(&mut history), next,
                            );
                            turn_cancel = Some(token);
                            turn_task = Some(task);
                        }
                    }
                }
            }
        }
    }

    // ── Closing ─────────────────────────────────────────────────────
    tracing::info!(call_id = %call_id, reason = close_reason, "session closing");
    cancel.cancel();

    // Children first (LIFO): the running turn, then the pipelines.
    if let Some(task) = turn_task.take() {
        let _ = tokio::time::timeout(CLOSE_GRACE, task).await;
    }
    let _ = tokio::time::timeout(CLOSE_GRACE, async {
        let _ = asr_pump_task.await;
        let _ = ingress_task.await;
        let _ = refresh_task.await;
    })
    .await;

    let status = match close_reason {
        "turn_failures" | "asr_failed" | "pipelines_stopped" => "failed",
        _ => "completed",
    };
    drop(sinks); // the writer exits once every sender clone is gone
    finish_timeline(tl_tx, timeline_task, status, close_reason).await;

    // Admission slots: campaign then global, exactly once.
    drop(guard);
    state.sessions.remove(&call_id);
    tracing::info!(call_id = %call_id, "session closed");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Emit the final status + `session.closed` pair and wait for the
/// timeline writer to flush — nothing is appended after this.
async fn finish_timeline(
    tl_tx: mpsc::Sender<(EventKind, serde_json::Value)>,
    timeline_task: tokio::task::JoinHandle<()>,
    status: &str,
    reason: &str,
) {
    let _ = tl_tx
        .send((
            EventKind::CallStatusChanged,
            serde_json::json!({ "status": status }),
        ))
        .await;
    let _ = tl_tx
        .send((EventKind::SessionClosed, serde_json::json!({ "reason": reason })))
        .await;
    drop(tl_tx);
    let _ = timeline_task.await;
}

#[allow(clippy::too_many_arguments)]
fn spawn_turn(
    state: &AppState,
    sinks: &EgressSinks,
    events_tx: &mpsc::Sender<SessionEvent>,
    session_cfg: &invorto_domain::config::SessionConfig,
    synth_opts: &SynthesisOptions,
    system_prompt: &str,
    temperature: Option<f32>,
    session_cancel: &CancellationToken,
    history: Vec<Message>,
    hyp: invorto_domain::transcript::TranscriptHypothesis,
) -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let ctx = TurnContext {
        llm: state.llm.clone(),
        synthesizer: state.synthesizer.clone(),
        tts_cache: state.tts_cache.clone(),
        executor: state.tools.clone(),
        sinks: sinks.clone(),
        events: events_tx.clone(),
        agent_cfg: session_cfg.agent.clone(),
        synth_opts: synth_opts.clone(),
        system_prompt: system_prompt.to_string(),
        temperature,
    };
    let token = session_cancel.child_token();
    let task = tokio::spawn(run_turn(ctx, history, hyp, token.clone()));
    (token, task)
}
