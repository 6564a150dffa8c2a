use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use invorto_domain::audio::{AudioEncoding, AudioFrame, SampleRate};
use invorto_domain::error::Result;
use invorto_domain::stream::{BoxStream, LlmEvent};
use invorto_domain::tool::{Message, ToolDefinition};
use invorto_domain::transcript::TranscriptHypothesis;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic streaming completion request.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Sampling temperature. `None` uses the adapter default.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` uses the adapter default.
    pub max_tokens: Option<u32>,
    /// Model identifier override. `None` uses the adapter default.
    pub model: Option<String>,
}

/// Streaming text-in/text-out completion with optional tool calling.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    /// Open a streaming completion; events arrive as the model produces
    /// them.
    async fn complete_stream(
        &self,
        req: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<LlmEvent>>>;

    /// Default model identifier used when the request carries none.
    fn model_id(&self) -> &str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ASR
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One live recognition stream: ordered PCM frames in, hypotheses out.
///
/// Both channels are bounded. `frames.send(..).await` backpressures the
/// caller when the adapter falls behind — frames are never dropped
/// here; drop policy belongs to the jitter buffer alone. Closing
/// `frames` ends the stream; `hypotheses` closes once the recognizer
/// finished.
pub struct AsrSession {
    pub frames: mpsc::Sender<AudioFrame>,
    pub hypotheses: mpsc::Receiver<Result<TranscriptHypothesis>>,
}

/// Streaming speech recognizer factory.
#[async_trait::async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn start(&self, rate: SampleRate) -> Result<AsrSession>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fixed voice configuration for one synthesis stream.
#[derive(Debug, Clone)]
pub struct SynthesisOptions {
    pub voice: String,
    pub locale: String,
    pub encoding: AudioEncoding,
}

/// One synthesized audio chunk with an optional boundary marker.
#[derive(Debug, Clone)]
pub struct TtsAudioChunk {
    pub audio: Vec<u8>,
    pub encoding: AudioEncoding,
    /// `"word"` or `"sentence"` when the provider marks boundaries.
    pub boundary: Option<String>,
}

/// Commands on a synthesis stream.
#[derive(Debug, Clone)]
pub enum TtsCommand {
    /// One coherent text chunk to synthesize.
    Text(String),
    /// End of the utterance; remaining audio drains afterwards.
    Flush,
}

/// One live synthesis stream: text chunks in, audio chunks out.
///
/// `audio` is deliberately tiny (capacity 1): the egress writer must
/// pull each chunk before the adapter reads the next one off the wire,
/// so no more than one chunk is ever buffered ahead of the socket.
/// The channel closing means the utterance fully drained. Triggering
/// `cancel` aborts synthesis immediately (barge-in).
pub struct TtsSession {
    pub input: mpsc::Sender<TtsCommand>,
    pub audio: mpsc::Receiver<Result<TtsAudioChunk>>,
    pub cancel: CancellationToken,
}

/// Streaming speech synthesizer factory.
#[async_trait::async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn start(&self, opts: &SynthesisOptions) -> Result<TtsSession>;
}
