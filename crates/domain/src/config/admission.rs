use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admission control
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Concurrency semaphores gating new sessions.
///
/// Slots carry a TTL so a crashed supervisor's reservations return to
/// the pool within one TTL period. Live sessions re-arm their slots at
/// `ttl / refresh_divisor`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Maximum concurrent sessions process-wide.
    #[serde(default = "d_global_max")]
    pub global_max_concurrency: u32,
    /// Maximum concurrent sessions per campaign.
    #[serde(default = "d_campaign_max")]
    pub campaign_max_concurrency: u32,
    /// Slot time-to-live.
    #[serde(default = "d_ttl_secs")]
    pub slot_ttl_secs: u64,
    /// Refresh cadence as a divisor of the TTL (refresh at ttl/divisor).
    #[serde(default = "d_refresh_divisor")]
    pub refresh_divisor: u64,
    /// How often the reclamation sweep runs.
    #[serde(default = "d_sweep_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            global_max_concurrency: d_global_max(),
            campaign_max_concurrency: d_campaign_max(),
            slot_ttl_secs: d_ttl_secs(),
            refresh_divisor: d_refresh_divisor(),
            sweep_interval_secs: d_sweep_secs(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_global_max() -> u32 {
    100
}
fn d_campaign_max() -> u32 {
    10
}
fn d_ttl_secs() -> u64 {
    30
}
fn d_refresh_divisor() -> u64 {
    3
}
fn d_sweep_secs() -> u64 {
    5
}
