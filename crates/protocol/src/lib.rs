//! Realtime voice protocol: the authoritative WebSocket message schema.
//!
//! Clients connect to `/realtime/voice`, stream binary PCM frames, and
//! exchange JSON control messages tagged with `"t"`. This crate is the
//! single place the wire shapes are defined; the gateway enforces them at
//! the ingress boundary and every downstream component consumes typed
//! variants.

pub mod frame;
mod payload;

pub use frame::{decode_frame, encode_frame, FRAME_HEADER_LEN};
pub use payload::TtsPayload;

use serde::{Deserialize, Serialize};

use invorto_domain::audio::AudioEncoding;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client → server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// JSON control messages from the client. Binary WS frames carry PCM
/// audio and never appear here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum ClientMessage {
    /// Begin the conversation and declare client capabilities.
    #[serde(rename = "start")]
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        codec: Option<AudioEncoding>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rate: Option<u32>,
        /// When true the client prefers `tts.chunk` payloads as byte
        /// arrays instead of base64 strings.
        #[serde(default)]
        binary: bool,
    },

    /// Stop consuming inbound audio without tearing the session down.
    #[serde(rename = "pause")]
    Pause,

    /// Resume after a `pause`.
    #[serde(rename = "resume")]
    Resume,

    /// End the call cleanly.
    #[serde(rename = "end")]
    End,

    /// DTMF digits pressed by the caller.
    #[serde(rename = "dtmf.send")]
    Dtmf { digits: String },

    /// Request a transfer to another destination.
    #[serde(rename = "transfer")]
    Transfer { target: String },

    /// Mid-call configuration update.
    #[serde(rename = "config")]
    Config {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        voice: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temperature: Option<f32>,
    },

    /// Result of a human-assisted tool call.
    #[serde(rename = "tool.result")]
    ToolResult {
        #[serde(rename = "callId")]
        call_id: String,
        result: serde_json::Value,
    },

    /// Client heartbeat.
    #[serde(rename = "ping")]
    Ping {
        #[serde(default)]
        timestamp: i64,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server → client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum ServerMessage {
    /// Handshake: the session is accepted and admitted.
    #[serde(rename = "connected")]
    Connected {
        #[serde(rename = "callId")]
        call_id: String,
    },

    /// Interim transcript.
    #[serde(rename = "stt.partial")]
    SttPartial { text: String, confidence: f32 },

    /// Final transcript for the current turn.
    #[serde(rename = "stt.final")]
    SttFinal {
        text: String,
        confidence: f32,
        #[serde(default, rename = "lowConfidence", skip_serializing_if = "std::ops::Not::not")]
        low_confidence: bool,
    },

    /// Incremental assistant text.
    #[serde(rename = "llm.delta")]
    LlmDelta { text: String },

    /// Full assistant reply for the turn.
    #[serde(rename = "llm.final")]
    LlmFinal { text: String },

    /// One synthesized audio chunk.
    #[serde(rename = "tts.chunk")]
    TtsChunk {
        payload: TtsPayload,
        encoding: AudioEncoding,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        boundary: Option<String>,
    },

    /// The utterance finished draining.
    #[serde(rename = "tts.done")]
    TtsDone,

    /// Synthesis was cancelled (barge-in or error).
    #[serde(rename = "tts.cancelled")]
    TtsCancelled,

    /// The agent is invoking a tool (surfaced for human-assisted tools).
    #[serde(rename = "tool.call")]
    ToolCall {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// An error the client should surface or act on.
    #[serde(rename = "error")]
    Error { kind: String, message: String },

    /// Heartbeat response.
    #[serde(rename = "pong")]
    Pong { timestamp: i64 },

    /// Periodic server heartbeat.
    #[serde(rename = "heartbeat")]
    Heartbeat { seq: u64 },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Close codes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Application close codes sent in the WS close frame reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    RateLimited,
    Unauthorized,
    BadRequest,
    InternalError,
}

impl CloseCode {
    /// Machine-readable reason string carried in the close frame.
    pub fn as_str(self) -> &'static str {
        match self {
            CloseCode::RateLimited => "rate_limited",
            CloseCode::Unauthorized => "unauthorized",
            CloseCode::BadRequest => "bad_request",
            CloseCode::InternalError => "internal_error",
        }
    }

    /// Application WS close code (4xxx range).
    pub fn code(self) -> u16 {
        match self {
            CloseCode::RateLimited => 4029,
            CloseCode::Unauthorized => 4001,
            CloseCode::BadRequest => 4000,
            CloseCode::InternalError => 4500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_handshake_wire_shape() {
        let msg = ServerMessage::Connected { call_id: "c1".into() };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"t":"connected","callId":"c1"}"#);
    }

    #[test]
    fn client_control_messages_parse() {
        let start: ClientMessage =
            serde_json::from_str(r#"{"t":"start","codec":"pcm16","rate":16000,"binary":true}"#)
                .unwrap();
        match start {
            ClientMessage::Start { rate, binary, .. } => {
                assert_eq!(rate, Some(16_000));
                assert!(binary);
            }
            other => panic!("unexpected message: {other:?}"),
        }

        let dtmf: ClientMessage =
            serde_json::from_str(r#"{"t":"dtmf.send","digits":"1#"}"#).unwrap();
        assert!(matches!(dtmf, ClientMessage::Dtmf { ref digits } if digits == "1#"));

        let end: ClientMessage = serde_json::from_str(r#"{"t":"end"}"#).unwrap();
        assert!(matches!(end, ClientMessage::End));
    }

    #[test]
    fn tool_result_uses_camel_case_call_id() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"t":"tool.result","callId":"tc_1","result":{"ok":true}}"#)
                .unwrap();
        match msg {
            ClientMessage::ToolResult { call_id, result } => {
                assert_eq!(call_id, "tc_1");
                assert_eq!(result["ok"], true);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn stt_final_omits_low_confidence_when_unset() {
        let msg = ServerMessage::SttFinal {
            text: "hello there".into(),
            confidence: 0.94,
            low_confidence: false,
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert!(v.get("lowConfidence").is_none());
        assert_eq!(v["t"], "stt.final");
    }

    #[test]
    fn close_codes() {
        assert_eq!(CloseCode::RateLimited.as_str(), "rate_limited");
        assert_eq!(CloseCode::Unauthorized.code(), 4001);
    }
}
