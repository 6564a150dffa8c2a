use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session & turn taking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-session behavior: endpointing, VAD, turn taking, jitter buffer,
/// and the conversation window fed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub endpointing: EndpointingConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub jitter: JitterConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub limits: SessionLimits,
}

/// End-of-speech / start-of-speech decision thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointingConfig {
    /// Contiguous silence required to close a turn (with enough words).
    #[serde(default = "d_silence_ms")]
    pub silence_ms: u64,
    /// Minimum committed words (from ASR finals) to close on `silence_ms`.
    #[serde(default = "d_min_words")]
    pub min_words: usize,
    /// Hard silence cap that closes the turn regardless of word count.
    #[serde(default = "d_hard_cap_ms")]
    pub hard_cap_ms: u64,
    /// Consecutive speech-confident frames that open a turn.
    #[serde(default = "d_speech_on_frames")]
    pub speech_on_frames: u32,
}

impl Default for EndpointingConfig {
    fn default() -> Self {
        Self {
            silence_ms: d_silence_ms(),
            min_words: d_min_words(),
            hard_cap_ms: d_hard_cap_ms(),
            speech_on_frames: d_speech_on_frames(),
        }
    }
}

/// Energy meter / VAD tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// dB above the adaptive noise floor to switch speech ON.
    #[serde(default = "d_speech_on_db")]
    pub speech_on_db: f32,
    /// dB above the floor to keep speech ON (hysteresis; lower than on).
    #[serde(default = "d_speech_off_db")]
    pub speech_off_db: f32,
    /// EWMA coefficient for the noise floor update on silent frames.
    #[serde(default = "d_floor_alpha")]
    pub noise_floor_alpha: f32,
    /// Minimum voice-band / total-energy ratio for speech.
    #[serde(default = "d_band_ratio")]
    pub voice_band_ratio_min: f32,
    /// Minimum interval between emitted `vad.update` events.
    #[serde(default = "d_vad_throttle_ms")]
    pub update_throttle_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_on_db: d_speech_on_db(),
            speech_off_db: d_speech_off_db(),
            noise_floor_alpha: d_floor_alpha(),
            voice_band_ratio_min: d_band_ratio(),
            update_throttle_ms: d_vad_throttle_ms(),
        }
    }
}

/// Jitter buffer policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JitterConfig {
    /// Adaptive target delay floor.
    #[serde(default = "d_jitter_min_ms")]
    pub min_delay_ms: u64,
    /// Adaptive target delay ceiling.
    #[serde(default = "d_jitter_max_ms")]
    pub max_delay_ms: u64,
    /// Reordering window in frames; later frames are dropped and counted.
    #[serde(default = "d_reorder_window")]
    pub reorder_window: u64,
    /// Maximum consecutive concealment frames before forcing silence.
    #[serde(default = "d_max_conceal")]
    pub max_concealment_frames: u32,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: d_jitter_min_ms(),
            max_delay_ms: d_jitter_max_ms(),
            reorder_window: d_reorder_window(),
            max_concealment_frames: d_max_conceal(),
        }
    }
}

/// Agent runtime knobs: prompt window, chunking, retries, timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Token budget for the assembled prompt (history is pruned to fit).
    #[serde(default = "d_max_context_tokens")]
    pub max_context_tokens: usize,
    /// Most recent exchanges always preserved by pruning.
    #[serde(default = "d_keep_exchanges")]
    pub keep_recent_exchanges: usize,
    /// Flush a TTS chunk at this many buffered characters even without
    /// a sentence terminator.
    #[serde(default = "d_chunk_max_chars")]
    pub chunk_max_chars: usize,
    /// Bounded mid-turn retries for transient LLM failures.
    #[serde(default = "d_llm_retries")]
    pub max_llm_retries: u32,
    /// Spoken when retries exhaust mid-turn.
    #[serde(default = "d_fallback")]
    pub fallback_utterance: String,
    /// Consecutive failed turns before the session is closed.
    #[serde(default = "d_failed_turns")]
    pub max_consecutive_failed_turns: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: d_max_context_tokens(),
            keep_recent_exchanges: d_keep_exchanges(),
            chunk_max_chars: d_chunk_max_chars(),
            max_llm_retries: d_llm_retries(),
            fallback_utterance: d_fallback(),
            max_consecutive_failed_turns: d_failed_turns(),
        }
    }
}

/// Whole-session limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLimits {
    /// Inactivity timeout; suspended while the assistant is speaking.
    #[serde(default = "d_inactivity_secs")]
    pub inactivity_timeout_secs: u64,
    /// Interval for server heartbeat messages on the realtime socket.
    #[serde(default = "d_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Bound on queued ASR finals before a `congestion` event is emitted.
    #[serde(default = "d_final_queue")]
    pub final_queue_bound: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: d_inactivity_secs(),
            heartbeat_secs: d_heartbeat_secs(),
            final_queue_bound: d_final_queue(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_silence_ms() -> u64 {
    800
}
fn d_min_words() -> usize {
    1
}
fn d_hard_cap_ms() -> u64 {
    3_000
}
fn d_speech_on_frames() -> u32 {
    3
}
fn d_speech_on_db() -> f32 {
    9.0
}
fn d_speech_off_db() -> f32 {
    6.0
}
fn d_floor_alpha() -> f32 {
    0.05
}
fn d_band_ratio() -> f32 {
    0.4
}
fn d_vad_throttle_ms() -> u64 {
    250
}
fn d_jitter_min_ms() -> u64 {
    20
}
fn d_jitter_max_ms() -> u64 {
    80
}
fn d_reorder_window() -> u64 {
    10
}
fn d_max_conceal() -> u32 {
    3
}
fn d_max_context_tokens() -> usize {
    6_000
}
fn d_keep_exchanges() -> usize {
    4
}
fn d_chunk_max_chars() -> usize {
    80
}
fn d_llm_retries() -> u32 {
    2
}
fn d_fallback() -> String {
    "I'm sorry, we're having trouble on our end. Could you say that again?".into()
}
fn d_failed_turns() -> u32 {
    2
}
fn d_inactivity_secs() -> u64 {
    60
}
fn d_heartbeat_secs() -> u64 {
    15
}
fn d_final_queue() -> usize {
    8
}
