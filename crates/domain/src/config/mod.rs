mod adapters;
mod admission;
mod server;
mod session;
mod tools;
mod webhooks;

pub use adapters::*;
pub use admission::*;
pub use server::*;
pub use session::*;
pub use tools::*;
pub use webhooks::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub adapters: AdaptersConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub webhooks: WebhooksConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How bad a reported config issue is. Errors abort startup; warnings
/// are logged and tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// One finding from [`Config::validate`].
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            ConfigSeverity::Error => write!(f, "error at {}: {}", self.field, self.message),
            ConfigSeverity::Warning => write!(f, "warning at {}: {}", self.field, self.message),
        }
    }
}

impl Config {
    /// Check the whole tree for inconsistencies an operator could
    /// plausibly write. Empty result means the config is usable.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut errors = Vec::new();

        let mut error = |field: &str, message: String| {
            errors.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message,
            });
        };

        // Server basics.
        if self.server.port == 0 {
            error("server.port", "port must be greater than 0".into());
        }
        if self.server.host.is_empty() {
            error("server.host", "host must not be empty".into());
        }
        if self.server.timeline_read_max == 0 {
            error(
                "server.timeline_read_max",
                "timeline read bound must be greater than 0".into(),
            );
        }

        // Admission: every limit and interval must be positive.
        if self.admission.global_max_concurrency == 0 {
            error(
                "admission.global_max_concurrency",
                "global concurrency must be greater than 0".into(),
            );
        }
        if self.admission.campaign_max_concurrency == 0 {
            error(
                "admission.campaign_max_concurrency",
                "campaign concurrency must be greater than 0".into(),
            );
        }
        if self.admission.slot_ttl_secs == 0 {
            error("admission.slot_ttl_secs", "slot TTL must be greater than 0".into());
        }
        if self.admission.refresh_divisor == 0 {
            error(
                "admission.refresh_divisor",
                "refresh divisor must be greater than 0".into(),
            );
        }

        // Jitter buffer: delay bounds must be ordered.
        if self.session.jitter.min_delay_ms > self.session.jitter.max_delay_ms {
            error(
                "session.jitter.min_delay_ms",
                format!(
                    "min delay {}ms exceeds max delay {}ms",
                    self.session.jitter.min_delay_ms, self.session.jitter.max_delay_ms
                ),
            );
        }

        // Endpointing: the hard cap must not undercut the silence window.
        if self.session.endpointing.hard_cap_ms < self.session.endpointing.silence_ms {
            error(
                "session.endpointing.hard_cap_ms",
                format!(
                    "hard cap {}ms is below silence_ms {}ms",
                    self.session.endpointing.hard_cap_ms, self.session.endpointing.silence_ms
                ),
            );
        }

        // VAD hysteresis: off threshold must sit below on threshold.
        if self.session.vad.speech_off_db >= self.session.vad.speech_on_db {
            error(
                "session.vad.speech_off_db",
                format!(
                    "speech_off_db {} must be below speech_on_db {}",
                    self.session.vad.speech_off_db, self.session.vad.speech_on_db
                ),
            );
        }

        // Agent chunking.
        if self.session.agent.chunk_max_chars == 0 {
            error(
                "session.agent.chunk_max_chars",
                "chunk size must be greater than 0".into(),
            );
        }

        // Tools.
        if self.tools.default_timeout_secs == 0 {
            error(
                "tools.default_timeout_secs",
                "tool timeout must be greater than 0".into(),
            );
        }
        if self.tools.per_turn_cap == 0 {
            error("tools.per_turn_cap", "per-turn cap must be greater than 0".into());
        }

        // Webhooks.
        if self.webhooks.max_attempts == 0 {
            error(
                "webhooks.max_attempts",
                "max attempts must be greater than 0".into(),
            );
        }
        if self.webhooks.workers == 0 {
            error("webhooks.workers", "worker count must be greater than 0".into());
        }
        for (i, ep) in self.webhooks.endpoints.iter().enumerate() {
            if !ep.url.starts_with("http://") && !ep.url.starts_with("https://") {
                error(
                    &format!("webhooks.endpoints[{i}].url"),
                    format!("url must start with http:// or https:// (got \"{}\")", ep.url),
                );
            }
            if ep.secret_env.is_empty() {
                error(
                    &format!("webhooks.endpoints[{i}].secret_env"),
                    "secret_env must not be empty".into(),
                );
            }
            if ep.tenant_id.is_empty() {
                error(
                    &format!("webhooks.endpoints[{i}].tenant_id"),
                    "tenant_id must not be empty".into(),
                );
            }
        }

        // Adapter endpoints.
        if !self.adapters.asr.url.starts_with("ws://") && !self.adapters.asr.url.starts_with("wss://")
        {
            error(
                "adapters.asr.url",
                format!("url must start with ws:// or wss:// (got \"{}\")", self.adapters.asr.url),
            );
        }
        if !self.adapters.tts.url.starts_with("ws://") && !self.adapters.tts.url.starts_with("wss://")
        {
            error(
                "adapters.tts.url",
                format!("url must start with ws:// or wss:// (got \"{}\")", self.adapters.tts.url),
            );
        }
        if !self.adapters.llm.base_url.starts_with("http://")
            && !self.adapters.llm.base_url.starts_with("https://")
        {
            error(
                "adapters.llm.base_url",
                format!(
                    "base_url must start with http:// or https:// (got \"{}\")",
                    self.adapters.llm.base_url
                ),
            );
        }

        // CORS: warn if wildcard is used.
        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)".into(),
            });
        }

        // Warn when no webhook endpoints are configured (mirror disabled).
        if self.webhooks.endpoints.is_empty() {
            errors.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "webhooks.endpoints".into(),
                message: "no webhook endpoints configured — timeline mirroring disabled".into(),
            });
        }

        errors
    }
}
