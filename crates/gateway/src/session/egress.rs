//! TTS egress: pumping synthesized audio to the client socket.
//!
//! The pump pulls one chunk at a time from the adapter (whose audio
//! channel has capacity 1) and pushes it onto the bounded outbound
//! channel the egress writer drains — so pressure from a slow socket
//! propagates all the way into the synthesizer. Cancellation aborts
//! between chunks and emits `tts.cancelled`; a fully drained utterance
//! ends with `tts.done`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use invorto_adapters::tts::UtteranceCache;
use invorto_adapters::{SpeechSynthesizer, SynthesisOptions, TtsAudioChunk, TtsCommand, TtsSession};
use invorto_domain::error::Result;
use invorto_domain::event::EventKind;
use invorto_protocol::{ServerMessage, TtsPayload};

/// Shared sinks the egress paths write into.
#[derive(Clone)]
pub struct EgressSinks {
    pub outbound: mpsc::Sender<ServerMessage>,
    pub timeline: mpsc::Sender<(EventKind, serde_json::Value)>,
    /// Client declared byte-array payloads at `start` time.
    pub binary_payloads: bool,
}

impl EgressSinks {
    async fn send_chunk(&self, chunk: &TtsAudioChunk) -> std::result::Result<(), ()> {
        let payload = TtsPayload::from_bytes(&chunk.audio, self.binary_payloads);
        self.outbound
            .send(ServerMessage::TtsChunk {
                payload,
                encoding: chunk.encoding,
                boundary: chunk.boundary.clone(),
            })
            .await
            .map_err(drop)?;
        // Timeline records chunk metadata, never audio bytes.
        self.timeline
            .send((
                EventKind::TtsChunk,
                serde_json::json!({
                    "bytes": chunk.audio.len(),
                    "boundary": chunk.boundary,
                }),
            ))
            .await
            .map_err(drop)
    }

    async fn send_done(&self) {
        let _ = self.outbound.send(ServerMessage::TtsDone).await;
        let _ = self
            .timeline
            .send((EventKind::TtsDone, serde_json::json!({})))
            .await;
    }

    async fn send_cancelled(&self) {
        let _ = self.outbound.send(ServerMessage::TtsCancelled).await;
        let _ = self
            .timeline
            .send((EventKind::TtsCancelled, serde_json::json!({})))
            .await;
    }
}

/// Pump one utterance's audio to the client.
///
/// Returns the full audio when the utterance drained completely, or
/// `None` when it was cancelled mid-flight. Either way the client saw
/// a terminating `tts.done` or `tts.cancelled`.
pub async fn pump_utterance(
    mut audio: mpsc::Receiver<Result<TtsAudioChunk>>,
    adapter_cancel: CancellationToken,
    sinks: EgressSinks,
    cancel: CancellationToken,
) -> Result<Option<Vec<u8>>> {
    let mut collected: Vec<u8> = Vec::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                adapter_cancel.cancel();
                sinks.send_cancelled().await;
                return Ok(None);
            }
            chunk = audio.recv() => match chunk {
                Some(Ok(chunk)) => {
                    collected.extend_from_slice(&chunk.audio);
                    if sinks.send_chunk(&chunk).await.is_err() {
                        // Outbound writer is gone; stop synthesis too.
                        adapter_cancel.cancel();
                        return Ok(None);
                    }
                }
                Some(Err(e)) => {
                    adapter_cancel.cancel();
                    sinks.send_cancelled().await;
                    return Err(e);
                }
                None => {
                    sinks.send_done().await;
                    return Ok(Some(collected));
                }
            }
        }
    }
}

/// Speak a fully-known text (fallback or canned phrase): serve from the
/// utterance cache when possible, otherwise synthesize and backfill the
/// cache on a complete drain.
pub async fn speak_text(
    text: &str,
    synthesizer: &Arc<dyn SpeechSynthesizer>,
    cache: &UtteranceCache,
    opts: &SynthesisOptions,
    sinks: &EgressSinks,
    cancel: &CancellationToken,
) -> Result<bool> {
    if let Some(audio) = cache.lookup(text, opts) {
        let chunk = TtsAudioChunk {
            audio: audio.as_ref().clone(),
            encoding: opts.encoding,
            boundary: Some("sentence".into()),
        };
        if sinks.send_chunk(&chunk).await.is_err() {
            return Ok(false);
        }
        sinks.send_done().await;
        return Ok(true);
    }

    let session = synthesizer.start(opts).await?;
    let TtsSession {
        input,
        audio,
        cancel: adapter_cancel,
    } = session;

    let _ = input.send(TtsCommand::Text(text.to_string())).await;
    let _ = input.send(TtsCommand::Flush).await;
    drop(input);

    match pump_utterance(audio, adapter_cancel, sinks.clone(), cancel.clone()).await? {
        Some(full_audio) => {
            cache.store(text, opts, full_audio);
            Ok(true)
        }
        None => Ok(false),
    }
}
