//! Streaming ASR adapter over an outbound WebSocket.
//!
//! Protocol: one JSON config message on open, then binary PCM frames
//! out and JSON hypothesis messages back:
//!
//! ```json
//! {"type":"partial","text":"hello th","confidence":0.41,"start":0,"end":8000}
//! {"type":"final","text":"hello there","confidence":0.93,"start":0,"end":16000}
//! ```
//!
//! The socket lives in its own task so frames can flow in while
//! hypotheses flow out. Transient failures reconnect with jittered
//! backoff; the most recent frames are held in a replay cache and
//! re-streamed after reconnect so the partial turn survives.

use std::collections::VecDeque;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use invorto_domain::audio::{AudioFrame, SampleRate};
use invorto_domain::config::AsrConfig;
use invorto_domain::error::{Error, Result};
use invorto_domain::transcript::TranscriptHypothesis;

use crate::backoff::Backoff;
use crate::traits::{AsrSession, SpeechRecognizer};
use crate::util::from_ws;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME_CHANNEL: usize = 64;
const HYPOTHESIS_CHANNEL: usize = 32;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Replay cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bounded ring of the most recent frames, re-streamed on reconnect.
pub(crate) struct ReplayCache {
    frames: VecDeque<AudioFrame>,
    cap: usize,
}

impl ReplayCache {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub(crate) fn push(&mut self, frame: AudioFrame) {
        if self.frames.len() == self.cap {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &AudioFrame> {
        self.frames.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.frames.len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct WireHypothesis {
    #[serde(rename = "type")]
    kind: String,
    text: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    start: u64,
    #[serde(default)]
    end: u64,
}

pub(crate) fn parse_hypothesis(text: &str, confidence_floor: f32) -> Option<TranscriptHypothesis> {
    let wire: WireHypothesis = match serde_json::from_str(text) {
        Ok(w) => w,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring unparseable ASR message");
            return None;
        }
    };
    let is_final = wire.kind == "final";
    let mut hyp = TranscriptHypothesis {
        text: wire.text,
        confidence: wire.confidence,
        is_final,
        low_confidence: false,
        start_sample: wire.start,
        end_sample: wire.end,
    };
    // Finals below the floor are reported, never dropped.
    if is_final && wire.confidence < confidence_floor {
        hyp.low_confidence = true;
    }
    Some(hyp)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AsrWsClient {
    cfg: AsrConfig,
}

impl AsrWsClient {
    pub fn new(cfg: AsrConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait::async_trait]
impl SpeechRecognizer for AsrWsClient {
    async fn start(&self, rate: SampleRate) -> Result<AsrSession> {
        // Connect eagerly so startup failures surface at session
        // admission instead of mid-turn.
        let ws = connect(&self.cfg, rate).await?;

        let (frames_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL);
        let (hyps_tx, hyps_rx) = mpsc::channel(HYPOTHESIS_CHANNEL);
        let cfg = self.cfg.clone();
        tokio::spawn(async move {
            run_socket(cfg, rate, ws, frames_rx, hyps_tx).await;
        });

        Ok(AsrSession {
            frames: frames_tx,
            hypotheses: hyps_rx,
        })
    }
}

/// Open the socket and send the stream configuration.
async fn connect(cfg: &AsrConfig, rate: SampleRate) -> Result<Socket> {
    let (mut ws, _) = connect_async(&cfg.url).await.map_err(|e| from_ws("asr", e))?;
    let config = serde_json::json!({
        "language": cfg.language,
        "rate": rate.as_hz(),
    });
    ws.send(WsMessage::Text(config.to_string()))
        .await
        .map_err(|e| from_ws("asr", e))?;
    Ok(ws)
}

/// Reconnect with backoff and re-stream the replay cache.
async fn reconnect(
    cfg: &AsrConfig,
    rate: SampleRate,
    backoff: &Backoff,
    replay: &ReplayCache,
) -> Result<Socket> {
    let mut attempt = 0u32;
    loop {
        if backoff.should_give_up(attempt) {
            return Err(Error::AdapterUnavailable {
                adapter: "asr".into(),
                message: format!("reconnect gave up after {attempt} attempts"),
            });
        }
        tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
        match connect(cfg, rate).await {
            Ok(mut ws) => {
                // Preserve the partial turn: re-stream the cached tail.
                for frame in replay.iter() {
                    ws.send(WsMessage::Binary(frame.payload.clone()))
                        .await
                        .map_err(|e| from_ws("asr", e))?;
                }
                tracing::info!(replayed = replay.len(), "asr reconnected");
                return Ok(ws);
            }
            Err(e) => {
                attempt += 1;
                tracing::warn!(attempt, error = %e, "asr reconnect failed");
            }
        }
    }
}

/// Socket task: frames in, hypotheses out, reconnect in between.
async fn run_socket(
    cfg: AsrConfig,
    rate: SampleRate,
    mut ws: Socket,
    mut frames_rx: mpsc::Receiver<AudioFrame>,
    hyps_tx: mpsc::Sender<Result<TranscriptHypothesis>>,
) {
    let backoff = Backoff::from_config(&cfg.retry);
    let mut replay = ReplayCache::new(cfg.replay_frames);
    // Once the frame channel closes we stop writing and only drain
    // remaining hypotheses until the peer closes.
    let mut draining = false;

    loop {
        if draining {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Some(hyp) = parse_hypothesis(&text, cfg.confidence_floor) {
                        if hyps_tx.send(Ok(hyp)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            }
            continue;
        }

        tokio::select! {
            maybe_frame = frames_rx.recv() => match maybe_frame {
                Some(frame) => {
                    replay.push(frame.clone());
                    if let Err(e) = ws.send(WsMessage::Binary(frame.payload.clone())).await {
                        tracing::warn!(error = %e, "asr send failed, reconnecting");
                        match reconnect(&cfg, rate, &backoff, &replay).await {
                            Ok(new_ws) => ws = new_ws,
                            Err(e) => {
                                let _ = hyps_tx.send(Err(e)).await;
                                break;
                            }
                        }
                    }
                }
                None => {
                    let _ = ws.send(WsMessage::Close(None)).await;
                    draining = true;
                }
            },
            msg = ws.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Some(hyp) = parse_hypothesis(&text, cfg.confidence_floor) {
                        // Bounded send: backpressure instead of drop.
                        if hyps_tx.send(Ok(hyp)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    tracing::warn!("asr stream closed by peer, reconnecting");
                    match reconnect(&cfg, rate, &backoff, &replay).await {
                        Ok(new_ws) => ws = new_ws,
                        Err(e) => {
                            let _ = hyps_tx.send(Err(e)).await;
                            break;
                        }
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "asr read failed, reconnecting");
                    match reconnect(&cfg, rate, &backoff, &replay).await {
                        Ok(new_ws) => ws = new_ws,
                        Err(e) => {
                            let _ = hyps_tx.send(Err(e)).await;
                            break;
                        }
                    }
                }
            },
        }
    }
    tracing::debug!("asr socket task finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_cache_is_bounded() {
        let mut cache = ReplayCache::new(3);
        for i in 0..10u64 {
            cache.push(AudioFrame::new(i, i * 320, vec![0, 0]));
        }
        assert_eq!(cache.len(), 3);
        let seqs: Vec<u64> = cache.iter().map(|f| f.seq).collect();
        assert_eq!(seqs, vec![7, 8, 9]);
    }

    #[test]
    fn final_hypothesis_parses() {
        let hyp = parse_hypothesis(
            r#"{"type":"final","text":"hello there","confidence":0.93,"start":0,"end":16000}"#,
            0.5,
        )
        .unwrap();
        assert!(hyp.is_final);
        assert!(!hyp.low_confidence);
        assert_eq!(hyp.text, "hello there");
        assert_eq!(hyp.end_sample, 16_000);
    }

    #[test]
    fn low_confidence_final_is_marked_not_dropped() {
        let hyp = parse_hypothesis(
            r#"{"type":"final","text":"um maybe","confidence":0.2,"start":0,"end":8000}"#,
            0.5,
        )
        .unwrap();
        assert!(hyp.is_final);
        assert!(hyp.low_confidence);
    }

    #[test]
    fn interim_below_floor_is_not_marked() {
        let hyp = parse_hypothesis(
            r#"{"type":"partial","text":"um","confidence":0.1,"start":0,"end":4000}"#,
            0.5,
        )
        .unwrap();
        assert!(!hyp.is_final);
        assert!(!hyp.low_confidence);
    }

    #[test]
    fn garbage_messages_are_ignored() {
        assert!(parse_hypothesis("not json", 0.5).is_none());
    }
}
