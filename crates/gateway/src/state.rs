use std::sync::Arc;

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use invorto_adapters::tts::UtteranceCache;
use invorto_adapters::{LanguageModel, SpeechRecognizer, SpeechSynthesizer};
use invorto_domain::config::Config;
use invorto_timeline::{TimelineStore, WebhookQueue};
use invorto_tools::ToolExecutor;

use crate::admission::AdmissionGate;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Live session index
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tracks live sessions by call id. A call id is unique across live
/// sessions; a second connect with the same id is rejected upstream.
#[derive(Default)]
pub struct SessionIndex {
    sessions: Mutex<HashMap<String, CancellationToken>>,
}

impl SessionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a call id. Returns false if a live session already owns
    /// it.
    pub fn try_register(&self, call_id: &str, cancel: CancellationToken) -> bool {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(call_id) {
            return false;
        }
        sessions.insert(call_id.to_string(), cancel);
        true
    }

    pub fn remove(&self, call_id: &str) {
        self.sessions.lock().remove(call_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Cancel every live session (graceful shutdown).
    pub fn cancel_all(&self) {
        for (call_id, token) in self.sessions.lock().iter() {
            tracing::info!(call_id = %call_id, "cancelling session for shutdown");
            token.cancel();
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AppState
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core** — config, admission gate, live-session index
/// - **Adapters** — ASR / LLM / TTS factories injected at boot
/// - **Timeline** — event store, webhook queue
/// - **Tools** — executor with the registered tool set
/// - **Security** — API token hash (None = dev mode)
#[derive(Clone)]
pub struct AppState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub admission: Arc<AdmissionGate>,
    pub sessions: Arc<SessionIndex>,

    // ── Adapters ──────────────────────────────────────────────────────
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub llm: Arc<dyn LanguageModel>,
    pub tts_cache: Arc<UtteranceCache>,

    // ── Timeline ──────────────────────────────────────────────────────
    pub timeline: Arc<TimelineStore>,
    pub webhook_queue: Arc<WebhookQueue>,

    // ── Tools ─────────────────────────────────────────────────────────
    pub tools: Arc<ToolExecutor>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the realtime bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,

    /// Process-wide shutdown signal.
    pub shutdown: CancellationToken,
}
