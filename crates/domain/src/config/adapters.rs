use serde::{Deserialize, Serialize};

use crate::audio::AudioEncoding;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// External adapters (ASR / LLM / TTS)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdaptersConfig {
    #[serde(default)]
    pub asr: AsrConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tts: TtsConfig,
}

/// Streaming speech recognizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrConfig {
    /// WebSocket endpoint of the recognizer.
    #[serde(default = "d_asr_url")]
    pub url: String,
    #[serde(default = "d_language")]
    pub language: String,
    /// Finals below this confidence are marked `low_confidence`.
    #[serde(default = "d_confidence_floor")]
    pub confidence_floor: f32,
    /// Frames held for re-streaming after a reconnect.
    #[serde(default = "d_replay_frames")]
    pub replay_frames: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            url: d_asr_url(),
            language: d_language(),
            confidence_floor: d_confidence_floor(),
            replay_frames: d_replay_frames(),
            retry: RetryConfig::default(),
        }
    }
}

/// Streaming chat completion endpoint (OpenAI-compatible wire format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_llm_base_url")]
    pub base_url: String,
    #[serde(default = "d_llm_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "d_llm_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "d_llm_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_llm_base_url(),
            model: d_llm_model(),
            api_key_env: d_llm_key_env(),
            temperature: d_temperature(),
            max_tokens: d_max_tokens(),
            request_timeout_secs: d_llm_timeout_secs(),
        }
    }
}

/// Streaming speech synthesizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// WebSocket endpoint of the synthesizer.
    #[serde(default = "d_tts_url")]
    pub url: String,
    #[serde(default = "d_voice")]
    pub voice: String,
    #[serde(default = "d_locale")]
    pub locale: String,
    #[serde(default)]
    pub encoding: AudioEncoding,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: TtsCacheConfig,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            url: d_tts_url(),
            voice: d_voice(),
            locale: d_locale(),
            encoding: AudioEncoding::Pcm16,
            retry: RetryConfig::default(),
            cache: TtsCacheConfig::default(),
        }
    }
}

/// In-memory cache for short, frequently-used utterances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsCacheConfig {
    /// Total byte budget across cached utterances (LRU evicted).
    #[serde(default = "d_cache_bytes")]
    pub max_bytes: usize,
    /// Literal utterances eligible for caching.
    #[serde(default)]
    pub literals: Vec<String>,
}

impl Default for TtsCacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: d_cache_bytes(),
            literals: Vec::new(),
        }
    }
}

/// Jittered exponential backoff bounds for adapter reconnects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "d_retry_base_ms")]
    pub base_ms: u64,
    #[serde(default = "d_retry_cap_ms")]
    pub cap_ms: u64,
    /// Jitter as a percentage of the computed delay (±).
    #[serde(default = "d_retry_jitter_pct")]
    pub jitter_pct: u32,
    #[serde(default = "d_retry_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_ms: d_retry_base_ms(),
            cap_ms: d_retry_cap_ms(),
            jitter_pct: d_retry_jitter_pct(),
            max_attempts: d_retry_attempts(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_asr_url() -> String {
    "ws://127.0.0.1:9010/asr".into()
}
fn d_language() -> String {
    "en".into()
}
fn d_confidence_floor() -> f32 {
    0.5
}
fn d_replay_frames() -> usize {
    25
}
fn d_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_llm_model() -> String {
    "gpt-4o-mini".into()
}
fn d_llm_key_env() -> String {
    "INVORTO_LLM_API_KEY".into()
}
fn d_temperature() -> f32 {
    0.7
}
fn d_max_tokens() -> u32 {
    512
}
fn d_llm_timeout_secs() -> u64 {
    30
}
fn d_tts_url() -> String {
    "ws://127.0.0.1:9020/tts".into()
}
fn d_voice() -> String {
    "alloy".into()
}
fn d_locale() -> String {
    "en-US".into()
}
fn d_cache_bytes() -> usize {
    4 * 1024 * 1024
}
fn d_retry_base_ms() -> u64 {
    250
}
fn d_retry_cap_ms() -> u64 {
    5_000
}
fn d_retry_jitter_pct() -> u32 {
    20
}
fn d_retry_attempts() -> u32 {
    5
}
