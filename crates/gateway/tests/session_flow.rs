//! End-to-end session scenarios driven against in-memory fake adapters:
//! the full supervisor + ingress pipeline + agent runtime + timeline
//! stack, without sockets or external providers.

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use invorto_adapters::tts::UtteranceCache;
use invorto_adapters::{
    AsrSession, CompletionRequest, LanguageModel, SpeechRecognizer, SpeechSynthesizer,
    SynthesisOptions, TtsAudioChunk, TtsCommand, TtsSession,
};
use invorto_domain::audio::{AudioFrame, SampleRate};
use invorto_domain::config::{Config, TtsCacheConfig};
use invorto_domain::error::Result;
use invorto_domain::event::EventKind;
use invorto_domain::stream::{BoxStream, LlmEvent, Usage};
use invorto_domain::transcript::TranscriptHypothesis;
use invorto_gateway::admission::AdmissionGate;
use invorto_gateway::session::{run_session, SessionParams};
use invorto_gateway::state::{AppState, SessionIndex};
use invorto_protocol::{ClientMessage, ServerMessage};
use invorto_timeline::{TimelineStore, WebhookQueue};
use invorto_tools::builtin::CalendarTool;
use invorto_tools::{ToolExecutor, ToolRegistry};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fake adapters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Emits a scripted hypothesis batch after every `frames_per_batch`
/// non-silent frames received.
struct FakeRecognizer {
    frames_per_batch: usize,
    batches: Mutex<VecDeque<Vec<TranscriptHypothesis>>>,
}

impl FakeRecognizer {
    fn new(frames_per_batch: usize, batches: Vec<Vec<TranscriptHypothesis>>) -> Self {
        Self {
            frames_per_batch,
            batches: Mutex::new(batches.into()),
        }
    }
}

#[async_trait::async_trait]
impl SpeechRecognizer for FakeRecognizer {
    async fn start(&self, _rate: SampleRate) -> Result<AsrSession> {
        let (frames_tx, mut frames_rx) = mpsc::channel::<AudioFrame>(64);
        let (hyps_tx, hyps_rx) = mpsc::channel(32);
        let per_batch = self.frames_per_batch;
        let batches = Arc::new(Mutex::new(self.batches.lock().clone()));

        tokio::spawn(async move {
            let mut voiced = 0usize;
            while let Some(frame) = frames_rx.recv().await {
                if frame.samples().iter().any(|&s| s != 0) {
                    voiced += 1;
                    if voiced % per_batch == 0 {
                        let batch = batches.lock().pop_front();
                        if let Some(batch) = batch {
                            for hyp in batch {
                                if hyps_tx.send(Ok(hyp)).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        });

        Ok(AsrSession {
            frames: frames_tx,
            hypotheses: hyps_rx,
        })
    }
}

/// Pops one event script per completion call.
struct FakeLlm {
    scripts: Mutex<VecDeque<Vec<LlmEvent>>>,
    /// Delay between events (0 = instant).
    event_delay: Duration,
}

impl FakeLlm {
    fn new(scripts: Vec<Vec<LlmEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            event_delay: Duration::ZERO,
        }
    }

    fn slow(scripts: Vec<Vec<LlmEvent>>, event_delay: Duration) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            event_delay,
        }
    }
}

fn done() -> LlmEvent {
    LlmEvent::Done {
        usage: Some(Usage {
            prompt_tokens: 20,
            completion_tokens: 10,
            total_tokens: 30,
        }),
        finish_reason: Some("stop".into()),
    }
}

fn token(text: &str) -> LlmEvent {
    LlmEvent::Token { text: text.into() }
}

#[async_trait::async_trait]
impl LanguageModel for FakeLlm {
    async fn complete_stream(
        &self,
        _req: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<LlmEvent>>> {
        let events = self.scripts.lock().pop_front().unwrap_or_else(|| {
            vec![token("Okay."), done()]
        });
        let delay = self.event_delay;
        let stream = async_stream::stream! {
            for event in events {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(event);
            }
        };
        Ok(Box::pin(stream))
    }

    fn model_id(&self) -> &str {
        "fake-llm"
    }
}

/// One audio chunk per text command; drains on flush.
struct FakeSynthesizer;

#[async_trait::async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn start(&self, opts: &SynthesisOptions) -> Result<TtsSession> {
        let (input_tx, mut input_rx) = mpsc::channel::<TtsCommand>(32);
        let (audio_tx, audio_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let encoding = opts.encoding;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    cmd = input_rx.recv() => match cmd {
                        Some(TtsCommand::Text(text)) => {
                            let chunk = TtsAudioChunk {
                                audio: vec![0x55; text.len().max(1)],
                                encoding,
                                boundary: Some("sentence".into()),
                            };
                            tokio::select! {
                                _ = task_cancel.cancelled() => break,
                                sent = audio_tx.send(Ok(chunk)) => {
                                    if sent.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                        Some(TtsCommand::Flush) | None => break,
                    },
                }
            }
        });

        Ok(TtsSession {
            input: input_tx,
            audio: audio_rx,
            cancel,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn test_config() -> Config {
    let mut config = Config::default();
    // Keep timers far away from test timing.
    config.session.limits.inactivity_timeout_secs = 60;
    config.session.limits.heartbeat_secs = 60;
    config
}

fn build_state(
    config: Config,
    recognizer: Arc<dyn SpeechRecognizer>,
    llm: Arc<dyn LanguageModel>,
) -> AppState {
    let config = Arc::new(config);
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CalendarTool::default()));
    AppState {
        admission: Arc::new(AdmissionGate::new(config.admission.clone())),
        sessions: Arc::new(SessionIndex::new()),
        recognizer,
        synthesizer: Arc::new(FakeSynthesizer),
        llm,
        tts_cache: Arc::new(UtteranceCache::new(&TtsCacheConfig::default())),
        timeline: Arc::new(TimelineStore::new(10_000)),
        webhook_queue: Arc::new(WebhookQueue::new(&config.webhooks)),
        tools: Arc::new(ToolExecutor::new(
            Arc::new(registry),
            config.tools.clone(),
        )),
        api_token_hash: None,
        shutdown: CancellationToken::new(),
        config,
    }
}

struct Driver {
    state: AppState,
    control_tx: mpsc::Sender<ClientMessage>,
    raw_tx: mpsc::Sender<AudioFrame>,
    outbound_rx: mpsc::Receiver<ServerMessage>,
    supervisor: tokio::task::JoinHandle<()>,
    next_seq: u64,
}

impl Driver {
    fn start(state: AppState, call_id: &str) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let (control_tx, control_rx) = mpsc::channel(32);
        let (raw_tx, raw_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        assert!(state.sessions.try_register(call_id, cancel.clone()));
        let guard = AdmissionGate::admit(&state.admission, None, Utc::now()).unwrap();

        let params = SessionParams {
            call_id: call_id.into(),
            agent_id: "a1".into(),
            campaign_id: None,
            rate: SampleRate::Hz16000,
            binary_payloads: false,
        };
        let supervisor = tokio::spawn(run_session(
            state.clone(),
            params,
            guard,
            cancel,
            outbound_tx,
            control_rx,
            raw_rx,
            Arc::new(AtomicBool::new(false)),
        ));

        Self {
            state,
            control_tx,
            raw_tx,
            outbound_rx,
            supervisor,
            next_seq: 0,
        }
    }

    /// Feed `n` 20 ms frames; loud frames carry a low-frequency square
    /// wave, silent frames are zeros.
    async fn send_frames(&mut self, n: usize, loud: bool) {
        for _ in 0..n {
            let samples: Vec<i16> = (0..320)
                .map(|i| {
                    if !loud {
                        0
                    } else if (i / 16) % 2 == 0 {
                        12_000
                    } else {
                        -12_000
                    }
                })
                .collect();
            let mut payload = Vec::with_capacity(640);
            for s in &samples {
                payload.extend_from_slice(&s.to_le_bytes());
            }
            let frame = AudioFrame::new(self.next_seq, self.next_seq * 320, payload);
            self.next_seq += 1;
            self.raw_tx
                .send(frame)
                .await
                .expect("ingress should accept frames");
        }
    }

    /// Collect outbound messages until the predicate matches one (that
    /// message included), or panic on timeout.
    async fn collect_until(
        &mut self,
        what: &str,
        timeout: Duration,
        pred: impl Fn(&ServerMessage) -> bool,
    ) -> Vec<ServerMessage> {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let msg = tokio::time::timeout_at(deadline, self.outbound_rx.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {what}; saw {seen:?}"))
                .unwrap_or_else(|| panic!("outbound closed waiting for {what}; saw {seen:?}"));
            let hit = pred(&msg);
            seen.push(msg);
            if hit {
                return seen;
            }
        }
    }

    async fn end(mut self) -> Vec<invorto_domain::event::TimelineEvent> {
        let _ = self.control_tx.send(ClientMessage::End).await;
        let _ = tokio::time::timeout(Duration::from_secs(5), self.supervisor).await;
        // Drain whatever the writer still had.
        while self.outbound_rx.try_recv().is_ok() {}
        self.state.timeline.range("c1", 0, 10_000)
    }
}

fn kind_positions(events: &[invorto_domain::event::TimelineEvent], kind: EventKind) -> Vec<usize> {
    events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.kind == kind)
        .map(|(i, _)| i)
        .collect()
}

fn hello_batch() -> Vec<Vec<TranscriptHypothesis>> {
    vec![vec![
        TranscriptHypothesis::interim("hello", 0.4, 0, 3_200),
        TranscriptHypothesis::final_("hello there", 0.93, 0, 16_000),
    ]]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn happy_path_orders_events_end_to_end() {
    let recognizer = Arc::new(FakeRecognizer::new(10, hello_batch()));
    let llm = Arc::new(FakeLlm::new(vec![vec![
        token("Hi! "),
        token("How can I help you today?"),
        done(),
    ]]));
    let state = build_state(test_config(), recognizer, llm);
    let mut driver = Driver::start(state.clone(), "c1");

    // One second of speech at 16 kHz.
    driver.send_frames(50, true).await;

    let messages = driver
        .collect_until("tts.done", Duration::from_secs(5), |m| {
            matches!(m, ServerMessage::TtsDone)
        })
        .await;

    // WS messages arrive in contract order.
    let pos = |pred: &dyn Fn(&ServerMessage) -> bool| messages.iter().position(|m| pred(m));
    let partial = pos(&|m| matches!(m, ServerMessage::SttPartial { .. })).expect("stt.partial");
    let final_ = messages
        .iter()
        .position(|m| matches!(m, ServerMessage::SttFinal { text, .. } if text.eq_ignore_ascii_case("hello there")))
        .expect("stt.final with matching text");
    let delta = pos(&|m| matches!(m, ServerMessage::LlmDelta { .. })).expect("llm.delta");
    let llm_final = pos(&|m| matches!(m, ServerMessage::LlmFinal { .. })).expect("llm.final");
    let chunk = pos(&|m| matches!(m, ServerMessage::TtsChunk { .. })).expect("tts.chunk");
    assert!(partial < final_ && final_ < delta && delta < llm_final);
    assert!(chunk > delta);

    let timeline = driver.end().await;

    // Timeline mirrors the same partial order.
    let connected = kind_positions(&timeline, EventKind::SessionConnected);
    let stt_final = kind_positions(&timeline, EventKind::SttFinal);
    let llm_deltas = kind_positions(&timeline, EventKind::LlmDelta);
    let llm_finals = kind_positions(&timeline, EventKind::LlmFinal);
    let tts_chunks = kind_positions(&timeline, EventKind::TtsChunk);
    let tts_done = kind_positions(&timeline, EventKind::TtsDone);
    let closed = kind_positions(&timeline, EventKind::SessionClosed);

    assert_eq!(connected.len(), 1);
    assert_eq!(stt_final.len(), 1);
    assert!(!llm_deltas.is_empty());
    assert_eq!(llm_finals.len(), 1);
    assert!(!tts_chunks.is_empty());
    assert_eq!(tts_done.len(), 1);

    // stt.final precedes every llm.delta of its turn; tts.done follows
    // the last tts.chunk.
    assert!(stt_final[0] < llm_deltas[0]);
    assert!(tts_chunks.last().unwrap() < &tts_done[0]);

    // session.closed is the final event and ids strictly increase.
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0], timeline.len() - 1);
    for pair in timeline.windows(2) {
        assert!(pair[0].event_id < pair[1].event_id);
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}

#[tokio::test]
async fn barge_in_cancels_tts_and_yields_new_turn() {
    let recognizer = Arc::new(FakeRecognizer::new(10, vec![
        vec![TranscriptHypothesis::final_("tell me a long story", 0.9, 0, 16_000)],
        vec![TranscriptHypothesis::final_("actually stop", 0.9, 20_000, 30_000)],
    ]));
    // Slow first reply: sentence-terminated tokens so TTS gets chunks
    // early; the second reply is instant.
    let mut first: Vec<LlmEvent> = Vec::new();
    for _ in 0..40 {
        first.push(token("Once upon a time. "));
    }
    first.push(done());
    let second = vec![token("Sure, stopping."), done()];
    let llm = Arc::new(FakeLlm::slow(vec![first, second], Duration::from_millis(40)));

    let state = build_state(test_config(), recognizer, llm);
    let mut driver = Driver::start(state.clone(), "c1");

    // First utterance, then silence to close the user turn.
    driver.send_frames(10, true).await;
    driver.send_frames(45, false).await;

    // Wait until the assistant is audibly speaking.
    driver
        .collect_until("first tts.chunk", Duration::from_secs(5), |m| {
            matches!(m, ServerMessage::TtsChunk { .. })
        })
        .await;

    // The caller barges in.
    driver.send_frames(10, true).await;

    let messages = driver
        .collect_until("tts.cancelled", Duration::from_secs(5), |m| {
            matches!(m, ServerMessage::TtsCancelled)
        })
        .await;
    assert!(
        !messages.iter().any(|m| matches!(m, ServerMessage::TtsDone)),
        "interrupted utterance must not report tts.done"
    );

    // The new turn completes with the second reply.
    driver
        .collect_until("second llm.final", Duration::from_secs(5), |m| {
            matches!(m, ServerMessage::LlmFinal { text } if text == "Sure, stopping.")
        })
        .await;

    let timeline = driver.end().await;
    let barge = kind_positions(&timeline, EventKind::BargeIn);
    let cancelled = kind_positions(&timeline, EventKind::TtsCancelled);
    assert_eq!(barge.len(), 1, "exactly one barge_in event");
    assert!(!cancelled.is_empty());
    assert!(barge[0] < cancelled[0]);

    // No tts.chunk lands between the cancellation and the next turn's
    // first llm.delta.
    let deltas = kind_positions(&timeline, EventKind::LlmDelta);
    let next_turn_delta = deltas
        .iter()
        .copied()
        .find(|&i| i > cancelled[0])
        .expect("second turn streams deltas");
    let stray_chunk = kind_positions(&timeline, EventKind::TtsChunk)
        .into_iter()
        .find(|&i| i > cancelled[0] && i < next_turn_delta);
    assert!(stray_chunk.is_none(), "no tts.chunk after cancellation");
}

#[tokio::test]
async fn admission_rejection_writes_no_session_events() {
    let mut config = test_config();
    config.admission.global_max_concurrency = 2;
    let state = build_state(
        config,
        Arc::new(FakeRecognizer::new(10, vec![])),
        Arc::new(FakeLlm::new(vec![])),
    );

    let now = Utc::now();
    let _s1 = AdmissionGate::admit(&state.admission, None, now).unwrap();
    let _s2 = AdmissionGate::admit(&state.admission, None, now).unwrap();
    let err = AdmissionGate::admit(&state.admission, None, now).unwrap_err();
    assert_eq!(err.kind(), "admission_rejected");

    // The rejected call never reaches the supervisor, so its timeline
    // stays empty.
    assert!(!state.timeline.has_call("c3"));
}

#[tokio::test]
async fn tool_call_precedes_result_and_final() {
    let recognizer = Arc::new(FakeRecognizer::new(
        10,
        vec![vec![TranscriptHypothesis::final_(
            "book me tomorrow at 3pm",
            0.91,
            0,
            16_000,
        )]],
    ));
    let llm = Arc::new(FakeLlm::new(vec![
        vec![
            LlmEvent::ToolCallFinished {
                call_id: "tc_1".into(),
                tool_name: "calendar.book".into(),
                arguments: serde_json::json!({
                    "action": "book",
                    "dateTime": "tomorrow 3pm",
                    "name": "caller",
                }),
            },
            done(),
        ],
        vec![token("You're booked for tomorrow at 3pm."), done()],
    ]));
    let state = build_state(test_config(), recognizer, llm);
    let mut driver = Driver::start(state.clone(), "c1");

    driver.send_frames(20, true).await;
    driver
        .collect_until("tts.done", Duration::from_secs(5), |m| {
            matches!(m, ServerMessage::TtsDone)
        })
        .await;

    let timeline = driver.end().await;
    let tool_calls = kind_positions(&timeline, EventKind::ToolCall);
    let tool_results = kind_positions(&timeline, EventKind::ToolResult);
    let llm_finals = kind_positions(&timeline, EventKind::LlmFinal);

    assert_eq!(tool_calls.len(), 1);
    assert_eq!(tool_results.len(), 1);
    assert_eq!(llm_finals.len(), 1);
    assert!(tool_calls[0] < tool_results[0]);
    assert!(tool_results[0] < llm_finals[0]);

    // The booking really landed in the tool's slot store.
    let result_event = &timeline[tool_results[0]];
    assert_eq!(result_event.payload["isError"], false);
    assert!(result_event.payload["content"]
        .as_str()
        .unwrap()
        .contains("\"booked\":true"));
}

#[tokio::test]
async fn dtmf_and_transfer_are_recorded() {
    let state = build_state(
        test_config(),
        Arc::new(FakeRecognizer::new(10, vec![])),
        Arc::new(FakeLlm::new(vec![])),
    );
    let mut driver = Driver::start(state.clone(), "c1");

    driver
        .control_tx
        .send(ClientMessage::Dtmf { digits: "1#".into() })
        .await
        .unwrap();
    driver
        .control_tx
        .send(ClientMessage::Transfer {
            target: "sip:human@support".into(),
        })
        .await
        .unwrap();

    // Give the supervisor a beat to process.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let timeline = driver.end().await;

    let dtmf = kind_positions(&timeline, EventKind::DtmfReceive);
    assert_eq!(dtmf.len(), 1);
    assert_eq!(timeline[dtmf[0]].payload["digits"], "1#");

    let status_changes = kind_positions(&timeline, EventKind::CallStatusChanged);
    assert!(status_changes
        .iter()
        .any(|&i| timeline[i].payload["status"] == "transfer_requested"));
}
