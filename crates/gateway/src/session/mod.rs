//! Per-call session machinery: supervisor, audio ingress, agent
//! runtime, and TTS egress.

pub mod audio;
pub mod chunker;
pub mod egress;
pub mod history;
pub mod runtime;
pub mod supervisor;

use serde::Serialize;

use invorto_domain::stream::Usage;
use invorto_domain::tool::Message;
use invorto_domain::transcript::TranscriptHypothesis;
use invorto_media::EndReason;

pub use supervisor::{run_session, SessionParams};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Ready,
    Listening,
    Speaking,
    Closing,
    Closed,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline → supervisor events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the pipeline tasks report back to the supervisor loop.
/// The supervisor is the only consumer; ordering within one producer
/// task is preserved by the channel.
#[derive(Debug)]
pub enum SessionEvent {
    /// Endpointing opened a user turn (start-of-speech).
    TurnStarted,
    /// Endpointing closed the user turn.
    TurnEnded(EndReason),
    /// Throttled VAD reading.
    Vad {
        confidence: f32,
        rms_db: f32,
        speaking: bool,
    },
    /// Interim transcript.
    Interim(TranscriptHypothesis),
    /// Final transcript — drives the agent runtime.
    Final(TranscriptHypothesis),
    /// The ASR adapter gave up reconnecting.
    AsrFailed(invorto_domain::Error),
    /// The agent produced its first delta for the current reply.
    AssistantSpeaking,
    /// The turn task finished (normally, interrupted, or failed).
    TurnFinished(TurnOutcome),
}

/// Result of one agent turn.
#[derive(Debug)]
pub struct TurnOutcome {
    /// Full conversation history after the turn (the supervisor takes
    /// ownership back).
    pub history: Vec<Message>,
    /// The turn was cut short by barge-in or session cancellation.
    pub interrupted: bool,
    /// The turn failed after exhausting retries.
    pub failed: bool,
    pub usage: Usage,
}
