//! Agent runtime — one task per turn.
//!
//! On each final transcript the supervisor spawns [`run_turn`]: it
//! assembles the prompt, streams the completion, forwards coherent text
//! chunks to TTS as they arrive, dispatches tool calls through the
//! executor, and reports a [`TurnOutcome`] back through the event
//! channel. Cancellation (barge-in or session teardown) is checked at
//! every suspension point; a cancelled turn keeps its partial assistant
//! text in history marked as interrupted.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use invorto_adapters::tts::UtteranceCache;
use invorto_adapters::{
    CompletionRequest, LanguageModel, SpeechSynthesizer, SynthesisOptions, TtsCommand,
};
use invorto_domain::config::AgentConfig;
use invorto_domain::error::Error;
use invorto_domain::event::EventKind;
use invorto_domain::stream::{LlmEvent, Usage};
use invorto_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall};
use invorto_domain::transcript::TranscriptHypothesis;
use invorto_protocol::ServerMessage;
use invorto_tools::ToolExecutor;

use super::chunker::TtsChunker;
use super::egress::{pump_utterance, speak_text, EgressSinks};
use super::history::assemble_prompt;
use super::{SessionEvent, TurnOutcome};

/// Hard bound on LLM↔tool round trips within one turn.
const MAX_TOOL_LOOPS: usize = 8;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnContext — everything one turn needs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct TurnContext {
    pub llm: Arc<dyn LanguageModel>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub tts_cache: Arc<UtteranceCache>,
    pub executor: Arc<ToolExecutor>,
    pub sinks: EgressSinks,
    pub events: mpsc::Sender<SessionEvent>,
    pub agent_cfg: AgentConfig,
    pub synth_opts: SynthesisOptions,
    pub system_prompt: String,
    pub temperature: Option<f32>,
}

/// Open synthesis stream for the in-progress reply.
struct ActiveTts {
    input: mpsc::Sender<TtsCommand>,
    pump: tokio::task::JoinHandle<invorto_domain::error::Result<Option<Vec<u8>>>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execute one agent turn for a final transcript. Always sends exactly
/// one [`SessionEvent::TurnFinished`] before returning.
pub async fn run_turn(
    ctx: TurnContext,
    mut history: Vec<Message>,
    final_hyp: TranscriptHypothesis,
    cancel: CancellationToken,
) {
    let outcome = run_turn_inner(&ctx, &mut history, &final_hyp, &cancel).await;
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(error = %e, "turn failed");
            let _ = ctx
                .sinks
                .timeline
                .send((
                    EventKind::Error,
                    serde_json::json!({ "kind": e.kind(), "message": e.to_string() }),
                ))
                .await;
            let _ = ctx
                .sinks
                .outbound
                .send(ServerMessage::Error {
                    kind: e.kind().into(),
                    message: e.to_string(),
                })
                .await;

            // Graceful degradation: apologize out loud, keep the
            // session open (the supervisor closes after two in a row).
            if !cancel.is_cancelled() {
                let _ = speak_text(
                    &ctx.agent_cfg.fallback_utterance,
                    &ctx.synthesizer,
                    &ctx.tts_cache,
                    &ctx.synth_opts,
                    &ctx.sinks,
                    &cancel,
                )
                .await;
            }
            TurnOutcome {
                history,
                interrupted: cancel.is_cancelled(),
                failed: true,
                usage: Usage::default(),
            }
        }
    };

    let _ = ctx.events.send(SessionEvent::TurnFinished(outcome)).await;
}

async fn run_turn_inner(
    ctx: &TurnContext,
    history: &mut Vec<Message>,
    final_hyp: &TranscriptHypothesis,
    cancel: &CancellationToken,
) -> invorto_domain::error::Result<TurnOutcome> {
    let tool_defs = ctx
        .executor
        .registry()
        .definitions(ctx.executor.tools_config());

    let mut messages = assemble_prompt(
        &ctx.system_prompt,
        &tool_defs,
        history,
        &final_hyp.text,
        &ctx.agent_cfg,
    );
    history.push(Message::user(&final_hyp.text));

    let mut total_usage = Usage::default();
    let mut calls_this_turn = 0usize;
    let mut sent_first_delta = false;

    for loop_idx in 0..MAX_TOOL_LOOPS {
        if cancel.is_cancelled() {
            return Ok(interrupted_outcome(history, String::new(), total_usage));
        }
        tracing::debug!(loop_idx, "turn loop iteration");

        let req = CompletionRequest {
            messages: messages.clone(),
            tools: tool_defs.clone(),
            temperature: ctx.temperature,
            max_tokens: None,
            model: None,
        };

        // ── Open the stream, retrying transient failures ──────────
        let mut stream = open_stream_with_retries(ctx, &req, cancel).await?;

        // ── Consume the stream ────────────────────────────────────
        let mut text_buf = String::new();
        let mut chunker = TtsChunker::new(ctx.agent_cfg.chunk_max_chars);
        let mut tts: Option<ActiveTts> = None;
        let mut pending_calls: Vec<ToolCall> = Vec::new();
        let mut was_cancelled = false;
        let mut stream_error: Option<Error> = None;

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    was_cancelled = true;
                    break;
                }
                event = stream.next() => event,
            };
            let Some(event) = event else { break };

            match event {
                Ok(LlmEvent::Token { text }) => {
                    if !sent_first_delta {
                        sent_first_delta = true;
                        let _ = ctx.events.send(SessionEvent::AssistantSpeaking).await;
                    }
                    text_buf.push_str(&text);
                    let _ = ctx
                        .sinks
                        .outbound
                        .send(ServerMessage::LlmDelta { text: text.clone() })
                        .await;
                    let _ = ctx
                        .sinks
                        .timeline
                        .send((EventKind::LlmDelta, serde_json::json!({ "text": text })))
                        .await;

                    for chunk in chunker.push(&text) {
                        forward_chunk(ctx, &mut tts, cancel, chunk).await?;
                    }
                }
                Ok(LlmEvent::ToolCallStarted { .. }) | Ok(LlmEvent::ToolCallDelta { .. }) => {}
                Ok(LlmEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                }) => {
                    pending_calls.push(ToolCall {
                        call_id,
                        tool_name,
                        arguments,
                    });
                }
                Ok(LlmEvent::Done { usage, .. }) => {
                    if let Some(usage) = usage {
                        total_usage.accumulate(&usage);
                    }
                    break;
                }
                Ok(LlmEvent::Error { message }) => {
                    stream_error = Some(Error::AdapterUnavailable {
                        adapter: "llm".into(),
                        message,
                    });
                    break;
                }
                Err(e) => {
                    stream_error = Some(e);
                    break;
                }
            }
        }

        // ── Cancellation (barge-in) ───────────────────────────────
        if was_cancelled {
            if let Some(active) = tts.take() {
                drop(active.input);
                // The pump watches the same token and emits tts.cancelled.
                let _ = active.pump.await;
            }
            return Ok(interrupted_outcome(history, text_buf, total_usage));
        }

        // Mid-stream errors abandon the partial reply and retry whole.
        if let Some(e) = stream_error {
            if let Some(active) = tts.take() {
                drop(active.input);
                let _ = active.pump.await;
            }
            return Err(e);
        }

        // ── Tool dispatch ─────────────────────────────────────────
        if !pending_calls.is_empty() {
            // Any spoken preamble stays audible; flush it out.
            if let Some(chunk) = chunker.flush() {
                forward_chunk(ctx, &mut tts, cancel, chunk).await?;
            }
            if let Some(active) = tts.take() {
                let _ = active.input.send(TtsCommand::Flush).await;
                drop(active.input);
                let _ = active.pump.await;
            }

            let assistant_msg = assistant_with_tool_calls(&text_buf, &pending_calls);
            messages.push(assistant_msg.clone());
            history.push(assistant_msg);

            for call in &pending_calls {
                if cancel.is_cancelled() {
                    // Non-idempotent tools get no retry; late results
                    // are discarded with the turn.
                    return Ok(interrupted_outcome(history, text_buf, total_usage));
                }

                let _ = ctx
                    .sinks
                    .outbound
                    .send(ServerMessage::ToolCall {
                        call_id: call.call_id.clone(),
                        tool_name: call.tool_name.clone(),
                        arguments: call.arguments.clone(),
                    })
                    .await;
                let _ = ctx
                    .sinks
                    .timeline
                    .send((
                        EventKind::ToolCall,
                        serde_json::json!({
                            "callId": call.call_id,
                            "toolName": call.tool_name,
                            "arguments": call.arguments,
                        }),
                    ))
                    .await;

                let outcome = ctx.executor.dispatch(call, calls_this_turn).await;
                calls_this_turn += 1;

                let _ = ctx
                    .sinks
                    .timeline
                    .send((
                        EventKind::ToolResult,
                        serde_json::json!({
                            "callId": outcome.call_id,
                            "toolName": outcome.tool_name,
                            "content": outcome.content,
                            "isError": outcome.is_error,
                        }),
                    ))
                    .await;

                let result_msg = Message::tool_result(&outcome.call_id, &outcome.content);
                messages.push(result_msg.clone());
                history.push(result_msg);
            }
            continue;
        }

        // ── Final answer ──────────────────────────────────────────
        let _ = ctx
            .sinks
            .outbound
            .send(ServerMessage::LlmFinal {
                text: text_buf.clone(),
            })
            .await;
        let _ = ctx
            .sinks
            .timeline
            .send((EventKind::LlmFinal, serde_json::json!({ "text": text_buf })))
            .await;

        if let Some(chunk) = chunker.flush() {
            forward_chunk(ctx, &mut tts, cancel, chunk).await?;
        }
        if let Some(active) = tts.take() {
            let _ = active.input.send(TtsCommand::Flush).await;
            drop(active.input);
            // Wait for the utterance to drain before reporting the
            // turn done — the reply isn't over until the audio is.
            match active.pump.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "tts drain failed"),
                Err(e) => tracing::warn!(error = %e, "tts pump panicked"),
            }
        }

        if cancel.is_cancelled() {
            return Ok(interrupted_outcome(history, text_buf, total_usage));
        }

        history.push(Message::assistant(&text_buf));
        return Ok(TurnOutcome {
            history: std::mem::take(history),
            interrupted: false,
            failed: false,
            usage: total_usage,
        });
    }

    Err(Error::Internal(format!(
        "tool loop limit reached ({MAX_TOOL_LOOPS} iterations)"
    )))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Open the completion stream, retrying transient failures with the
/// configured bound. Fatal adapter errors propagate immediately.
async fn open_stream_with_retries(
    ctx: &TurnContext,
    req: &CompletionRequest,
    cancel: &CancellationToken,
) -> invorto_domain::error::Result<
    invorto_domain::stream::BoxStream<'static, invorto_domain::error::Result<LlmEvent>>,
> {
    let mut attempt = 0u32;
    loop {
        match ctx.llm.complete_stream(req).await {
            Ok(stream) => return Ok(stream),
            Err(e) if e.is_transient() && attempt < ctx.agent_cfg.max_llm_retries => {
                attempt += 1;
                let delay = std::time::Duration::from_millis(250 * 2u64.pow(attempt.min(6)));
                tracing::warn!(attempt, error = %e, "llm transient failure, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(e),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Lazily open the synthesis stream and forward one text chunk.
async fn forward_chunk(
    ctx: &TurnContext,
    tts: &mut Option<ActiveTts>,
    cancel: &CancellationToken,
    chunk: String,
) -> invorto_domain::error::Result<()> {
    if tts.is_none() {
        let session = ctx.synthesizer.start(&ctx.synth_opts).await?;
        let pump = tokio::spawn(pump_utterance(
            session.audio,
            session.cancel.clone(),
            ctx.sinks.clone(),
            cancel.clone(),
        ));
        *tts = Some(ActiveTts {
            input: session.input,
            pump,
        });
    }
    if let Some(active) = tts.as_ref() {
        let _ = active.input.send(TtsCommand::Text(chunk)).await;
    }
    Ok(())
}

fn assistant_with_tool_calls(text: &str, calls: &[ToolCall]) -> Message {
    let mut parts: Vec<ContentPart> = Vec::new();
    if !text.is_empty() {
        parts.push(ContentPart::Text { text: text.into() });
    }
    for call in calls {
        parts.push(ContentPart::ToolUse {
            id: call.call_id.clone(),
            name: call.tool_name.clone(),
            input: call.arguments.clone(),
        });
    }
    Message {
        role: Role::Assistant,
        content: MessageContent::Parts(parts),
        interrupted: false,
    }
}

fn interrupted_outcome(
    history: &mut Vec<Message>,
    partial_text: String,
    usage: Usage,
) -> TurnOutcome {
    if !partial_text.is_empty() {
        let mut msg = Message::assistant(partial_text);
        msg.interrupted = true;
        history.push(msg);
    }
    TurnOutcome {
        history: std::mem::take(history),
        interrupted: true,
        failed: false,
        usage,
    }
}
