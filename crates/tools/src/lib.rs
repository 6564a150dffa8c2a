//! Tool registry and executor.
//!
//! Tools are named handlers with a JSON-schema argument spec and an
//! idempotency flag. The executor validates arguments against the
//! schema, enforces per-call timeouts and the per-turn cap, and returns
//! structured results to the agent runtime — a failed tool is a result,
//! never a crashed turn.

pub mod builtin;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use invorto_domain::config::ToolsConfig;
use invorto_domain::tool::{ToolCall, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A registered tool.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// Definition exposed to the LLM (also the validation schema).
    fn definition(&self) -> ToolDefinition;

    /// Execute with already-validated arguments.
    async fn invoke(&self, arguments: Value) -> std::result::Result<Value, String>;

    /// Per-tool timeout override; `None` uses the configured default.
    fn timeout_override(&self) -> Option<Duration> {
        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Structured result handed back to the agent runtime.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub call_id: String,
    pub tool_name: String,
    /// JSON-serialized result (or error object) for the conversation.
    pub content: String,
    pub is_error: bool,
    /// Machine-readable error kind when `is_error` is set.
    pub error_kind: Option<&'static str>,
}

impl ToolOutcome {
    fn ok(call: &ToolCall, value: &Value) -> Self {
        Self {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            content: value.to_string(),
            is_error: false,
            error_kind: None,
        }
    }

    fn error(call: &ToolCall, kind: &'static str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            content: serde_json::json!({ "error": kind, "message": message }).to_string(),
            is_error: true,
            error_kind: Some(kind),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.definition().name;
        self.handlers.insert(name, handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Definitions exposed to the LLM, filtered by the allow-list.
    pub fn definitions(&self, cfg: &ToolsConfig) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .handlers
            .values()
            .map(|h| h.definition())
            .filter(|d| cfg.allows(&d.name))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    cfg: ToolsConfig,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, cfg: ToolsConfig) -> Self {
        Self { registry, cfg }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tools_config(&self) -> &ToolsConfig {
        &self.cfg
    }

    /// Whether a tool may be retried after cancellation.
    pub fn is_idempotent(&self, tool_name: &str) -> bool {
        self.registry
            .get(tool_name)
            .map(|h| h.definition().idempotent)
            .unwrap_or(false)
    }

    /// Dispatch one tool call. `calls_this_turn` is how many calls the
    /// current turn has already executed (the per-turn cap bounds
    /// latency).
    pub async fn dispatch(&self, call: &ToolCall, calls_this_turn: usize) -> ToolOutcome {
        if calls_this_turn >= self.cfg.per_turn_cap {
            return ToolOutcome::error(
                call,
                "per_turn_cap",
                format!("tool call cap reached ({} per turn)", self.cfg.per_turn_cap),
            );
        }

        if !self.cfg.allows(&call.tool_name) {
            return ToolOutcome::error(call, "not_allowed", "tool is not in the session allow-list");
        }

        let Some(handler) = self.registry.get(&call.tool_name) else {
            return ToolOutcome::error(call, "unknown_tool", "tool is not registered");
        };

        let definition = handler.definition();
        if let Err(message) = validate_arguments(&definition.parameters, &call.arguments) {
            return ToolOutcome::error(call, "invalid_arguments", message);
        }

        let timeout = handler
            .timeout_override()
            .unwrap_or(Duration::from_secs(self.cfg.default_timeout_secs));

        let started = std::time::Instant::now();
        match tokio::time::timeout(timeout, handler.invoke(call.arguments.clone())).await {
            Ok(Ok(value)) => {
                tracing::debug!(
                    tool = %call.tool_name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "tool call completed"
                );
                ToolOutcome::ok(call, &value)
            }
            Ok(Err(message)) => {
                tracing::warn!(tool = %call.tool_name, error = %message, "tool call failed");
                ToolOutcome::error(call, "execution_error", message)
            }
            Err(_) => {
                tracing::warn!(
                    tool = %call.tool_name,
                    timeout_ms = timeout.as_millis() as u64,
                    "tool call timed out"
                );
                ToolOutcome::error(
                    call,
                    "timeout",
                    format!("timed out after {}ms", timeout.as_millis()),
                )
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schema validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate arguments against a tool's parameter schema.
///
/// Covers the subset of JSON Schema the tool definitions use: an object
/// with typed `properties` and a `required` list.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> std::result::Result<(), String> {
    let Some(args) = arguments.as_object() else {
        return Err("arguments must be a JSON object".into());
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for req in required {
            let Some(name) = req.as_str() else { continue };
            if !args.contains_key(name) {
                return Err(format!("missing required argument \"{name}\""));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
        for (name, value) in args {
            let Some(prop) = props.get(name) else {
                return Err(format!("unexpected argument \"{name}\""));
            };
            let Some(expected) = prop.get("type").and_then(|t| t.as_str()) else {
                continue;
            };
            let matches = match expected {
                "string" => value.is_string(),
                "number" => value.is_number(),
                "integer" => value.is_i64() || value.is_u64(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !matches {
                return Err(format!("argument \"{name}\" must be of type {expected}"));
            }
        }
    }

    Ok(())
}
