use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Webhook mirror
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outbound webhook delivery: per-tenant endpoints, retry policy, DLQ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhooksConfig {
    /// Subscribed endpoints. Empty disables the mirror.
    #[serde(default)]
    pub endpoints: Vec<WebhookEndpoint>,
    /// Delivery attempts before a job lands in the DLQ.
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "d_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "d_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "d_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Delivery worker count.
    #[serde(default = "d_workers")]
    pub workers: usize,
    /// Per-request delivery timeout.
    #[serde(default = "d_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Bound on retained DLQ entries (oldest evicted).
    #[serde(default = "d_dlq_max")]
    pub dlq_max: usize,
}

impl Default for WebhooksConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            max_attempts: d_max_attempts(),
            backoff_base_ms: d_backoff_base_ms(),
            backoff_factor: d_backoff_factor(),
            backoff_cap_ms: d_backoff_cap_ms(),
            workers: d_workers(),
            request_timeout_secs: d_request_timeout_secs(),
            dlq_max: d_dlq_max(),
        }
    }
}

/// One tenant-subscribed webhook URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub url: String,
    /// Tenant this endpoint belongs to.
    pub tenant_id: String,
    /// Environment variable holding the tenant's signing secret.
    pub secret_env: String,
    /// Event kinds mirrored to this endpoint. Empty = all kinds.
    #[serde(default)]
    pub kinds: Vec<String>,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_attempts() -> u32 {
    3
}
fn d_backoff_base_ms() -> u64 {
    1_000
}
fn d_backoff_factor() -> f64 {
    2.0
}
fn d_backoff_cap_ms() -> u64 {
    300_000
}
fn d_workers() -> usize {
    4
}
fn d_request_timeout_secs() -> u64 {
    10
}
fn d_dlq_max() -> usize {
    1_000
}
