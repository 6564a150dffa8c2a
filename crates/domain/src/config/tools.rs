use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Per-call timeout unless the tool overrides it.
    #[serde(default = "d_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Maximum tool calls the executor honors in one turn.
    #[serde(default = "d_per_turn_cap")]
    pub per_turn_cap: usize,
    /// Tool names exposed to the agent. Empty = every registered tool.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Hosts `http.request` may reach. Empty denies the tool entirely.
    #[serde(default)]
    pub http_allowed_hosts: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: d_timeout_secs(),
            per_turn_cap: d_per_turn_cap(),
            allow: Vec::new(),
            http_allowed_hosts: Vec::new(),
        }
    }
}

impl ToolsConfig {
    /// Whether the allow-list permits a tool name.
    pub fn allows(&self, name: &str) -> bool {
        self.allow.is_empty() || self.allow.iter().any(|a| a == name)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_timeout_secs() -> u64 {
    10
}
fn d_per_turn_cap() -> usize {
    4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_list_permits_everything() {
        let cfg = ToolsConfig::default();
        assert!(cfg.allows("calendar.book"));
        assert!(cfg.allows("anything"));
    }

    #[test]
    fn allow_list_filters() {
        let cfg = ToolsConfig {
            allow: vec!["document.query".into()],
            ..ToolsConfig::default()
        };
        assert!(cfg.allows("document.query"));
        assert!(!cfg.allows("calendar.book"));
    }
}
