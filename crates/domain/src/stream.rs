use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, the currency of every streaming adapter.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Incremental output of a streaming completion.
///
/// Text deltas feed the TTS chunker while tool-call fragments are
/// assembled for the executor; `Done` closes the turn's LLM leg.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlmEvent {
    /// One text token chunk of the assistant reply.
    Token { text: String },

    /// The model opened a tool call.
    ToolCallStarted { call_id: String, tool_name: String },

    /// A fragment of the tool call's argument JSON.
    ToolCallDelta { call_id: String, delta: String },

    /// The tool call is fully assembled.
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// The completion finished; usage may ride along.
    Done {
        usage: Option<Usage>,
        finish_reason: Option<String>,
    },

    /// The provider reported a mid-stream failure.
    Error { message: String },
}

impl LlmEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LlmEvent::Done { .. } | LlmEvent::Error { .. })
    }
}

/// Token accounting for one or more completions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Fold another completion's usage into a running turn total.
    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(LlmEvent::Done {
            usage: None,
            finish_reason: None
        }
        .is_terminal());
        assert!(LlmEvent::Error {
            message: "boom".into()
        }
        .is_terminal());
        assert!(!LlmEvent::Token { text: "hi".into() }.is_terminal());
    }

    #[test]
    fn usage_accumulates_across_tool_loops() {
        let mut total = Usage::default();
        total.accumulate(&Usage {
            prompt_tokens: 100,
            completion_tokens: 20,
            total_tokens: 120,
        });
        total.accumulate(&Usage {
            prompt_tokens: 140,
            completion_tokens: 35,
            total_tokens: 175,
        });
        assert_eq!(total.prompt_tokens, 240);
        assert_eq!(total.completion_tokens, 55);
        assert_eq!(total.total_tokens, 295);
    }
}
