//! Streaming adapters for the external ASR / LLM / TTS providers.
//!
//! The session core talks to narrow capability traits ([`LanguageModel`],
//! [`SpeechRecognizer`], [`SpeechSynthesizer`]); the implementations here
//! translate them onto the providers' wire protocols — SSE for the chat
//! completion stream, WebSockets for speech in both directions — with
//! jittered reconnect backoff and (for ASR) a replay cache that preserves
//! the partial turn across reconnects.

pub mod asr;
pub mod backoff;
pub mod llm;
pub mod sse;
pub mod traits;
pub mod tts;
mod util;

pub use backoff::Backoff;
pub use tts::UtteranceCache;
pub use traits::{
    AsrSession, CompletionRequest, LanguageModel, SpeechRecognizer, SpeechSynthesizer,
    SynthesisOptions, TtsAudioChunk, TtsCommand, TtsSession,
};
