/// Shared error type used across all Invorto crates.
///
/// Variants map 1:1 onto the platform error taxonomy; [`Error::kind`]
/// returns the stable machine-readable kind string carried in `error`
/// timeline events and WS close frames.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("admission rejected ({scope}): {reason}")]
    AdmissionRejected { scope: String, reason: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("adapter {adapter} unavailable: {message}")]
    AdapterUnavailable { adapter: String, message: String },

    #[error("adapter {adapter} fatal: {message}")]
    AdapterFatal { adapter: String, message: String },

    #[error("tool {tool}: invalid arguments: {message}")]
    ToolInvalidArguments { tool: String, message: String },

    #[error("tool {tool}: timed out after {timeout_ms}ms")]
    ToolTimeout { tool: String, timeout_ms: u64 },

    #[error("tool {tool}: {message}")]
    ToolExecutionError { tool: String, message: String },

    #[error("backpressure overflow on {0}")]
    BackpressureOverflow(String),

    #[error("session timed out")]
    SessionTimeout,

    #[error("config: {0}")]
    Config(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable kind string for events and close frames.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "bad_request",
            Error::Http(_) => "adapter_unavailable",
            Error::AdmissionRejected { .. } => "admission_rejected",
            Error::Unauthorized(_) => "unauthorized",
            Error::BadRequest(_) => "bad_request",
            Error::AdapterUnavailable { .. } => "adapter_unavailable",
            Error::AdapterFatal { .. } => "adapter_fatal",
            Error::ToolInvalidArguments { .. } => "tool_invalid_arguments",
            Error::ToolTimeout { .. } => "tool_timeout",
            Error::ToolExecutionError { .. } => "tool_execution_error",
            Error::BackpressureOverflow(_) => "backpressure_overflow",
            Error::SessionTimeout => "session_timeout",
            Error::Config(_) => "config",
            Error::Internal(_) => "internal",
        }
    }

    /// Whether the error is worth retrying with backoff (mid-turn recovery).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::AdapterUnavailable { .. } | Error::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
