//! Built-in tools: document query, calendar check/book, and a guarded
//! HTTP request tool for custom integrations.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use invorto_domain::config::ToolsConfig;
use invorto_domain::tool::ToolDefinition;

use crate::{ToolHandler, ToolRegistry};

/// Register the full built-in set.
pub fn register_builtins(registry: &mut ToolRegistry, cfg: &ToolsConfig) {
    registry.register(Arc::new(DocumentQueryTool::default()));
    registry.register(Arc::new(CalendarTool::default()));
    registry.register(Arc::new(HttpRequestTool::new(cfg.http_allowed_hosts.clone())));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// document.query
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub body: String,
}

/// Keyword search over an in-memory document corpus.
#[derive(Default)]
pub struct DocumentQueryTool {
    corpus: Vec<Document>,
}

impl DocumentQueryTool {
    pub fn with_corpus(corpus: Vec<Document>) -> Self {
        Self { corpus }
    }

    fn score(doc: &Document, terms: &[String]) -> usize {
        let haystack = format!("{} {}", doc.title, doc.body).to_lowercase();
        terms
            .iter()
            .map(|t| haystack.matches(t.as_str()).count())
            .sum()
    }
}

#[async_trait::async_trait]
impl ToolHandler for DocumentQueryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "document.query".into(),
            description: "Search the knowledge base for passages relevant to a query.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "limit": { "type": "integer", "description": "Max results (default 3)" }
                },
                "required": ["query"]
            }),
            idempotent: true,
        }
    }

    async fn invoke(&self, arguments: Value) -> Result<Value, String> {
        let query = arguments
            .get("query")
            .and_then(|q| q.as_str())
            .unwrap_or("")
            .to_lowercase();
        let limit = arguments
            .get("limit")
            .and_then(|l| l.as_u64())
            .unwrap_or(3) as usize;

        let terms: Vec<String> = query.split_whitespace().map(str::to_owned).collect();
        let mut scored: Vec<(usize, &Document)> = self
            .corpus
            .iter()
            .map(|d| (Self::score(d, &terms), d))
            .filter(|(s, _)| *s > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let results: Vec<Value> = scored
            .into_iter()
            .take(limit)
            .map(|(score, d)| {
                serde_json::json!({
                    "id": d.id,
                    "title": d.title,
                    "snippet": d.body.chars().take(200).collect::<String>(),
                    "score": score,
                })
            })
            .collect();

        Ok(serde_json::json!({ "results": results }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// calendar.check_availability / calendar.book
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory slot store shared by the check and book operations.
///
/// One handler serves both actions; the `action` argument selects.
/// Booking mutates state, so the tool is declared non-idempotent.
pub struct CalendarTool {
    slots: Mutex<BTreeMap<String, Option<String>>>,
}

impl Default for CalendarTool {
    fn default() -> Self {
        let mut slots = BTreeMap::new();
        for slot in [
            "tomorrow 10am",
            "tomorrow 11am",
            "tomorrow 3pm",
            "tomorrow 4pm",
        ] {
            slots.insert(slot.to_string(), None);
        }
        Self {
            slots: Mutex::new(slots),
        }
    }
}

#[async_trait::async_trait]
impl ToolHandler for CalendarTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "calendar.book".into(),
            description: "Check availability or book a calendar slot. Use action \"check\" to list open slots, \"book\" to reserve one.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": ["check", "book"], "description": "check or book" },
                    "dateTime": { "type": "string", "description": "Requested slot, e.g. \"tomorrow 3pm\"" },
                    "name": { "type": "string", "description": "Name to book under (book only)" }
                },
                "required": ["action", "dateTime"]
            }),
            idempotent: false,
        }
    }

    async fn invoke(&self, arguments: Value) -> Result<Value, String> {
        let action = arguments.get("action").and_then(|a| a.as_str()).unwrap_or("check");
        let date_time = arguments
            .get("dateTime")
            .and_then(|d| d.as_str())
            .unwrap_or("")
            .to_string();

        let mut slots = self.slots.lock();
        match action {
            "check" => {
                let open: Vec<&String> = slots
                    .iter()
                    .filter(|(_, booked)| booked.is_none())
                    .map(|(slot, _)| slot)
                    .collect();
                Ok(serde_json::json!({
                    "requested": date_time,
                    "available": open,
                }))
            }
            "book" => {
                let name = arguments
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or("caller")
                    .to_string();
                match slots.get_mut(&date_time) {
                    Some(booked @ None) => {
                        *booked = Some(name.clone());
                        Ok(serde_json::json!({
                            "booked": true,
                            "slot": date_time,
                            "name": name,
                        }))
                    }
                    Some(Some(_)) => Ok(serde_json::json!({
                        "booked": false,
                        "reason": "slot already taken",
                        "slot": date_time,
                    })),
                    None => Ok(serde_json::json!({
                        "booked": false,
                        "reason": "no such slot",
                        "slot": date_time,
                    })),
                }
            }
            other => Err(format!("unknown action \"{other}\"")),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// http.request
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Guarded outbound HTTP for custom tools. Hosts must be allow-listed;
/// with no allow-list the tool refuses every call.
pub struct HttpRequestTool {
    client: reqwest::Client,
    allowed_hosts: Vec<String>,
}

impl HttpRequestTool {
    pub fn new(allowed_hosts: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            allowed_hosts,
        }
    }

    fn host_allowed(&self, url: &str) -> bool {
        let Some(host) = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .and_then(|rest| rest.split(['/', '?', '#']).next())
            .map(|h| h.split(':').next().unwrap_or(h))
        else {
            return false;
        };
        self.allowed_hosts.iter().any(|a| a == host)
    }
}

#[async_trait::async_trait]
impl ToolHandler for HttpRequestTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "http.request".into(),
            description: "Make an HTTP request to an allow-listed host.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "Target URL" },
                    "method": { "type": "string", "enum": ["GET", "POST"], "description": "HTTP method (default GET)" },
                    "body": { "type": "object", "description": "JSON body for POST" }
                },
                "required": ["url"]
            }),
            idempotent: false,
        }
    }

    async fn invoke(&self, arguments: Value) -> Result<Value, String> {
        let url = arguments.get("url").and_then(|u| u.as_str()).unwrap_or("");
        if !self.host_allowed(url) {
            return Err(format!("host not allow-listed for \"{url}\""));
        }
        let method = arguments
            .get("method")
            .and_then(|m| m.as_str())
            .unwrap_or("GET");

        let builder = match method {
            "GET" => self.client.get(url),
            "POST" => {
                let body = arguments.get("body").cloned().unwrap_or(Value::Null);
                self.client.post(url).json(&body)
            }
            other => return Err(format!("unsupported method \"{other}\"")),
        };

        let resp = builder.send().await.map_err(|e| e.to_string())?;
        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(|e| e.to_string())?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(serde_json::json!({ "status": status, "body": body }))
    }
}
