//! OpenAI-compatible streaming chat adapter.
//!
//! Works with any endpoint following the OpenAI chat completions
//! contract. The session core only ever streams — a voice turn starts
//! speaking on the first delta — so there is no non-streaming path.

use serde_json::Value;

use invorto_domain::config::LlmConfig;
use invorto_domain::error::{Error, Result};
use invorto_domain::stream::{BoxStream, LlmEvent, Usage};
use invorto_domain::tool::{ContentPart, Message, MessageContent, Role, ToolDefinition};

use crate::sse::sse_response_stream;
use crate::traits::{CompletionRequest, LanguageModel};
use crate::util::from_reqwest;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatLlm {
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiCompatLlm {
    /// Build the adapter from config; the API key is read once from the
    /// configured environment variable.
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(env = %cfg.api_key_env, "LLM API key env unset — requests go out unauthenticated");
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| from_reqwest("llm", e))?;

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            api_key,
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            client,
        })
    }

    fn build_body(&self, req: &CompletionRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

        let mut body = serde_json::json!({
            "model": req.model.clone().unwrap_or_else(|| self.model.clone()),
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
            "temperature": req.temperature.unwrap_or(self.temperature),
            "max_tokens": req.max_tokens.unwrap_or(self.max_tokens),
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => tool_result_to_openai(msg),
        Role::Assistant => assistant_to_openai(msg),
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content.extract_all_text(),
        }),
    }
}

fn assistant_to_openai(msg: &Message) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => text_parts.push(t.clone()),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => text_parts.push(text.clone()),
                    ContentPart::ToolUse { id, name, input } => {
                        tool_calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            }
                        }));
                    }
                    ContentPart::ToolResult { .. } => {}
                }
            }
        }
    }

    if text_parts.is_empty() {
        obj["content"] = Value::Null;
    } else {
        obj["content"] = Value::String(text_parts.join("\n"));
    }
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_openai(msg: &Message) -> Value {
    if let MessageContent::Parts(parts) = &msg.content {
        for part in parts {
            if let ContentPart::ToolResult {
                tool_use_id,
                content,
                ..
            } = part
            {
                return serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                });
            }
        }
    }
    serde_json::json!({
        "role": "tool",
        "tool_call_id": "",
        "content": msg.content.extract_all_text(),
    })
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_openai_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

/// Per-stream assembly state: maps the provider's tool-call array index
/// onto our call id so argument deltas attach to the right call.
#[derive(Default)]
struct StreamState {
    call_ids: std::collections::HashMap<u64, String>,
    call_names: std::collections::HashMap<u64, String>,
    call_args: std::collections::HashMap<u64, String>,
}

impl StreamState {
    /// Flush assembled tool calls into `ToolCallFinished` events.
    fn finish_calls(&mut self) -> Vec<Result<LlmEvent>> {
        let mut events = Vec::new();
        let mut indices: Vec<u64> = self.call_ids.keys().copied().collect();
        indices.sort_unstable();
        for idx in indices {
            let call_id = self.call_ids.remove(&idx).unwrap_or_else(|| idx.to_string());
            let tool_name = self.call_names.remove(&idx).unwrap_or_default();
            let args_str = self.call_args.remove(&idx).unwrap_or_default();
            let arguments: Value = if args_str.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&args_str).unwrap_or_else(|e| {
                    tracing::warn!(call_id = %call_id, error = %e, "tool call arguments are not valid JSON; defaulting to empty object");
                    Value::Object(Default::default())
                })
            };
            events.push(Ok(LlmEvent::ToolCallFinished {
                call_id,
                tool_name,
                arguments,
            }));
        }
        events
    }

    fn parse(&mut self, data: &str) -> Vec<Result<LlmEvent>> {
        if data.trim() == "[DONE]" {
            let mut events = self.finish_calls();
            events.push(Ok(LlmEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            }));
            return events;
        }

        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Json(e))],
        };

        let choice = v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first());

        // Usage-only chunk (stream_options.include_usage).
        let Some(choice) = choice else {
            if let Some(usage) = v.get("usage").and_then(parse_openai_usage) {
                return vec![Ok(LlmEvent::Done {
                    usage: Some(usage),
                    finish_reason: None,
                })];
            }
            return Vec::new();
        };

        let delta = choice.get("delta").unwrap_or(&Value::Null);
        let mut events = Vec::new();

        // Tool call deltas.
        if let Some(tc_arr) = delta.get("tool_calls").and_then(|t| t.as_array()) {
            for tc in tc_arr {
                let idx = tc.get("index").and_then(|i| i.as_u64()).unwrap_or(0);

                if let Some(id) = tc.get("id").and_then(|i| i.as_str()) {
                    let name = tc
                        .get("function")
                        .and_then(|f| f.get("name"))
                        .and_then(|n| n.as_str())
                        .unwrap_or("");
                    self.call_ids.insert(idx, id.to_string());
                    self.call_names.insert(idx, name.to_string());
                    events.push(Ok(LlmEvent::ToolCallStarted {
                        call_id: id.to_string(),
                        tool_name: name.to_string(),
                    }));
                }

                if let Some(args) = tc
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(|a| a.as_str())
                {
                    if !args.is_empty() {
                        self.call_args.entry(idx).or_default().push_str(args);
                        let call_id = self
                            .call_ids
                            .get(&idx)
                            .cloned()
                            .unwrap_or_else(|| idx.to_string());
                        events.push(Ok(LlmEvent::ToolCallDelta {
                            call_id,
                            delta: args.to_string(),
                        }));
                    }
                }
            }
        }

        // Text content delta.
        if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
            if !text.is_empty() {
                events.push(Ok(LlmEvent::Token {
                    text: text.to_string(),
                }));
            }
        }

        // Finish reason closes the turn (tool calls flush first).
        if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            events.extend(self.finish_calls());
            let usage = v.get("usage").and_then(parse_openai_usage);
            events.push(Ok(LlmEvent::Done {
                usage,
                finish_reason: Some(fr.to_string()),
            }));
        }

        events
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LanguageModel for OpenAiCompatLlm {
    async fn complete_stream(
        &self,
        req: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<LlmEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(req);

        tracing::debug!(url = %url, model = %self.model, "llm stream request");

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.send().await.map_err(|e| from_reqwest("llm", e))?;
        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.unwrap_or_default();
            // 4xx means the request itself is bad (auth, schema) and a
            // retry cannot fix it; 5xx/429 are transient.
            if status.is_client_error() && status.as_u16() != 429 {
                return Err(Error::AdapterFatal {
                    adapter: "llm".into(),
                    message: format!("HTTP {} - {}", status.as_u16(), err_text),
                });
            }
            return Err(Error::AdapterUnavailable {
                adapter: "llm".into(),
                message: format!("HTTP {} - {}", status.as_u16(), err_text),
            });
        }

        let mut state = StreamState::default();
        Ok(sse_response_stream(resp, move |data| state.parse(data)))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_delta_parses() {
        let mut state = StreamState::default();
        let events =
            state.parse(r#"{"choices":[{"delta":{"content":"Hel"},"index":0}]}"#);
        assert_eq!(events.len(), 1);
        assert!(
            matches!(events[0], Ok(LlmEvent::Token { ref text }) if text == "Hel")
        );
    }

    #[test]
    fn tool_call_assembles_across_deltas() {
        let mut state = StreamState::default();
        let started = state.parse(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"tc_1","function":{"name":"calendar.check_availability","arguments":""}}]}}]}"#,
        );
        assert!(matches!(
            started[0],
            Ok(LlmEvent::ToolCallStarted { ref tool_name, .. })
                if tool_name == "calendar.check_availability"
        ));

        state.parse(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"dateTime\":"}}]}}]}"#,
        );
        state.parse(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"tomorrow 3pm\"}"}}]}}]}"#,
        );

        let finished = state.parse(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#);
        let tool_finished = finished
            .iter()
            .find_map(|e| match e {
                Ok(LlmEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                }) => Some((call_id.clone(), tool_name.clone(), arguments.clone())),
                _ => None,
            })
            .expect("expected assembled tool call");
        assert_eq!(tool_finished.0, "tc_1");
        assert_eq!(tool_finished.1, "calendar.check_availability");
        assert_eq!(tool_finished.2["dateTime"], "tomorrow 3pm");
        assert!(matches!(finished.last(), Some(Ok(LlmEvent::Done { .. }))));
    }

    #[test]
    fn usage_only_chunk_yields_done() {
        let mut state = StreamState::default();
        let events = state.parse(
            r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
        );
        match &events[0] {
            Ok(LlmEvent::Done { usage: Some(u), .. }) => {
                assert_eq!(u.total_tokens, 15);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn done_sentinel_flushes_pending_calls() {
        let mut state = StreamState::default();
        state.parse(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"tc_9","function":{"name":"document.query","arguments":"{}"}}]}}]}"#,
        );
        let events = state.parse("[DONE]");
        assert!(events
            .iter()
            .any(|e| matches!(e, Ok(LlmEvent::ToolCallFinished { call_id, .. }) if call_id == "tc_9")));
        assert!(matches!(events.last(), Some(Ok(LlmEvent::Done { .. }))));
    }

    #[test]
    fn request_body_includes_tools() {
        let cfg = LlmConfig::default();
        let adapter = OpenAiCompatLlm {
            base_url: cfg.base_url.clone(),
            model: cfg.model.clone(),
            api_key: None,
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            client: reqwest::Client::new(),
        };
        let req = CompletionRequest {
            messages: vec![Message::system("You are a voice agent."), Message::user("hi")],
            tools: vec![ToolDefinition {
                name: "document.query".into(),
                description: "Search documents".into(),
                parameters: serde_json::json!({"type":"object"}),
                idempotent: true,
            }],
            temperature: None,
            max_tokens: None,
            model: None,
        };
        let body = adapter.build_body(&req);
        assert_eq!(body["stream"], true);
        assert_eq!(body["tools"][0]["function"]["name"], "document.query");
        assert_eq!(body["messages"][0]["role"], "system");
    }
}
