//! Streaming TTS adapter over an outbound WebSocket, plus the
//! content-addressed utterance cache for short canned phrases.
//!
//! Protocol: one JSON config message on open, then JSON text chunks out
//! and binary audio chunks back. Boundary markers arrive as JSON and
//! attach to the next audio chunk; `{"done":true}` ends the utterance.
//!
//! The socket lives in its own task. The audio channel has capacity 1,
//! so the adapter will not read further ahead of the egress writer than
//! a single chunk — cancellation during the first milliseconds of an
//! utterance discards at most that one chunk.

use std::num::NonZeroUsize;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use invorto_domain::audio::AudioEncoding;
use invorto_domain::config::{TtsCacheConfig, TtsConfig};
use invorto_domain::error::{Error, Result};

use crate::traits::{SpeechSynthesizer, SynthesisOptions, TtsAudioChunk, TtsCommand, TtsSession};
use crate::util::from_ws;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const INPUT_CHANNEL: usize = 32;
/// One chunk ahead of the egress writer, no more.
const AUDIO_CHANNEL: usize = 1;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Utterance cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// LRU cache of fully-synthesized short utterances, keyed by
/// `(text, voice, locale, encoding)` and bounded by total bytes.
///
/// Only utterances from the configured literal list are cached — the
/// long tail of one-off sentences would thrash the budget for no hit
/// rate.
pub struct UtteranceCache {
    inner: Mutex<CacheInner>,
    max_bytes: usize,
    literals: Vec<String>,
}

struct CacheInner {
    entries: LruCache<String, Arc<Vec<u8>>>,
    bytes: usize,
}

impl UtteranceCache {
    pub fn new(cfg: &TtsCacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(NonZeroUsize::new(256).expect("nonzero")),
                bytes: 0,
            }),
            max_bytes: cfg.max_bytes,
            literals: cfg.literals.clone(),
        }
    }

    fn key(text: &str, opts: &SynthesisOptions) -> String {
        format!("{}|{}|{:?}|{text}", opts.voice, opts.locale, opts.encoding)
    }

    fn cacheable(&self, text: &str) -> bool {
        self.literals.iter().any(|l| l == text)
    }

    /// Look up a fully-synthesized utterance.
    pub fn lookup(&self, text: &str, opts: &SynthesisOptions) -> Option<Arc<Vec<u8>>> {
        if !self.cacheable(text) {
            return None;
        }
        self.inner.lock().entries.get(&Self::key(text, opts)).cloned()
    }

    /// Store a synthesized utterance, evicting LRU entries while over
    /// the byte budget.
    pub fn store(&self, text: &str, opts: &SynthesisOptions, audio: Vec<u8>) {
        if !self.cacheable(text) || audio.len() > self.max_bytes {
            return;
        }
        let mut inner = self.inner.lock();
        let key = Self::key(text, opts);
        if let Some(old) = inner.entries.pop(&key) {
            inner.bytes -= old.len();
        }
        inner.bytes += audio.len();
        inner.entries.put(key, Arc::new(audio));
        while inner.bytes > self.max_bytes {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => inner.bytes -= evicted.len(),
                None => break,
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct WireControl {
    #[serde(default)]
    boundary: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TtsWsClient {
    cfg: TtsConfig,
}

impl TtsWsClient {
    pub fn new(cfg: TtsConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for TtsWsClient {
    async fn start(&self, opts: &SynthesisOptions) -> Result<TtsSession> {
        let (mut ws, _) = connect_async(&self.cfg.url)
            .await
            .map_err(|e| from_ws("tts", e))?;
        let config = serde_json::json!({
            "voice": opts.voice,
            "locale": opts.locale,
            "encoding": opts.encoding,
        });
        ws.send(WsMessage::Text(config.to_string()))
            .await
            .map_err(|e| from_ws("tts", e))?;

        let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL);
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_CHANNEL);
        let cancel = CancellationToken::new();

        let encoding = opts.encoding;
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            run_socket(ws, encoding, input_rx, audio_tx, task_cancel).await;
        });

        Ok(TtsSession {
            input: input_tx,
            audio: audio_rx,
            cancel,
        })
    }
}

/// Socket task: commands in, audio out, cancel aborts.
async fn run_socket(
    mut ws: Socket,
    encoding: AudioEncoding,
    mut input_rx: mpsc::Receiver<TtsCommand>,
    audio_tx: mpsc::Sender<Result<TtsAudioChunk>>,
    cancel: CancellationToken,
) {
    let mut pending_boundary: Option<String> = None;
    let mut input_closed = false;

    loop {
        // Once the command side closed, only read the wire (a naked
        // `recv` on a closed channel would spin).
        let msg = if input_closed {
            tokio::select! {
                _ = cancel.cancelled() => {
                    abort_stream(&mut ws).await;
                    break;
                }
                msg = ws.next() => msg,
            }
        } else {
            tokio::select! {
                _ = cancel.cancelled() => {
                    abort_stream(&mut ws).await;
                    break;
                }
                cmd = input_rx.recv() => {
                    match cmd {
                        Some(TtsCommand::Text(text)) => {
                            let payload = serde_json::json!({ "text": text }).to_string();
                            if ws.send(WsMessage::Text(payload)).await.is_err() {
                                report_lost(&audio_tx).await;
                                break;
                            }
                        }
                        Some(TtsCommand::Flush) => {
                            let payload = serde_json::json!({ "flush": true }).to_string();
                            if ws.send(WsMessage::Text(payload)).await.is_err() {
                                report_lost(&audio_tx).await;
                                break;
                            }
                        }
                        None => input_closed = true,
                    }
                    continue;
                }
                msg = ws.next() => msg,
            }
        };

        match msg {
            Some(Ok(WsMessage::Binary(audio))) => {
                let chunk = TtsAudioChunk {
                    audio,
                    encoding,
                    boundary: pending_boundary.take(),
                };
                // Capacity-1 send: pauses wire reads until the egress
                // writer took the previous chunk.
                tokio::select! {
                    _ = cancel.cancelled() => {
                        abort_stream(&mut ws).await;
                        break;
                    }
                    sent = audio_tx.send(Ok(chunk)) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<WireControl>(&text) {
                Ok(ctl) if ctl.done => break,
                Ok(ctl) => {
                    if let Some(err) = ctl.error {
                        let _ = audio_tx
                            .send(Err(Error::AdapterUnavailable {
                                adapter: "tts".into(),
                                message: err,
                            }))
                            .await;
                        break;
                    }
                    if ctl.boundary.is_some() {
                        pending_boundary = ctl.boundary;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "ignoring unparseable TTS message");
                }
            },
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                let _ = audio_tx.send(Err(from_ws("tts", e))).await;
                break;
            }
        }
    }
    // Dropping audio_tx closes the stream — the consumer reads that as
    // the utterance being fully drained (or cancelled).
    tracing::debug!("tts socket task finished");
}

async fn abort_stream(ws: &mut Socket) {
    let _ = ws
        .send(WsMessage::Text(serde_json::json!({ "cancel": true }).to_string()))
        .await;
    let _ = ws.send(WsMessage::Close(None)).await;
}

async fn report_lost(audio_tx: &mpsc::Sender<Result<TtsAudioChunk>>) {
    let _ = audio_tx
        .send(Err(Error::AdapterUnavailable {
            adapter: "tts".into(),
            message: "synthesis socket lost".into(),
        }))
        .await;
}
