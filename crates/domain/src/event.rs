//! Timeline events — the append-only per-call record of everything that
//! happened during a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a timeline event. Serialized names are part of the wire
/// contract (timeline reads and webhook deliveries) and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "session.connected")]
    SessionConnected,
    #[serde(rename = "session.closed")]
    SessionClosed,
    #[serde(rename = "stt.partial")]
    SttPartial,
    #[serde(rename = "stt.final")]
    SttFinal,
    #[serde(rename = "llm.delta")]
    LlmDelta,
    #[serde(rename = "llm.final")]
    LlmFinal,
    #[serde(rename = "tts.chunk")]
    TtsChunk,
    #[serde(rename = "tts.done")]
    TtsDone,
    #[serde(rename = "tts.cancelled")]
    TtsCancelled,
    #[serde(rename = "tool.call")]
    ToolCall,
    #[serde(rename = "tool.result")]
    ToolResult,
    #[serde(rename = "dtmf.receive")]
    DtmfReceive,
    #[serde(rename = "barge_in")]
    BargeIn,
    #[serde(rename = "vad.update")]
    VadUpdate,
    #[serde(rename = "congestion")]
    Congestion,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "call.status_changed")]
    CallStatusChanged,
}

impl EventKind {
    /// The wire name, as used in webhook headers and timeline reads.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::SessionConnected => "session.connected",
            EventKind::SessionClosed => "session.closed",
            EventKind::SttPartial => "stt.partial",
            EventKind::SttFinal => "stt.final",
            EventKind::LlmDelta => "llm.delta",
            EventKind::LlmFinal => "llm.final",
            EventKind::TtsChunk => "tts.chunk",
            EventKind::TtsDone => "tts.done",
            EventKind::TtsCancelled => "tts.cancelled",
            EventKind::ToolCall => "tool.call",
            EventKind::ToolResult => "tool.result",
            EventKind::DtmfReceive => "dtmf.receive",
            EventKind::BargeIn => "barge_in",
            EventKind::VadUpdate => "vad.update",
            EventKind::Congestion => "congestion",
            EventKind::Error => "error",
            EventKind::CallStatusChanged => "call.status_changed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only timeline record.
///
/// `event_id` is strictly increasing within a call; `timestamp` is
/// server-assigned at append and non-decreasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub event_id: u64,
    pub call_id: String,
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}
