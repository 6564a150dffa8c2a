//! Event → webhook-job fan-out.
//!
//! The mirror subscribes to the timeline store's broadcast feed. For
//! each configured tenant endpoint whose kind filter matches, it
//! redacts the payload, serializes the delivery body, signs it with the
//! tenant secret, and enqueues a job for the worker pool.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use invorto_domain::config::WebhooksConfig;
use invorto_domain::event::TimelineEvent;

use crate::queue::{WebhookJob, WebhookQueue};
use crate::redact::Redactor;
use crate::signing;
use crate::store::TimelineStore;

struct MirrorEndpoint {
    url: String,
    tenant_id: String,
    secret: String,
    kinds: Vec<String>,
}

pub struct WebhookMirror {
    queue: Arc<WebhookQueue>,
    endpoints: Vec<MirrorEndpoint>,
    redactor: Redactor,
}

impl WebhookMirror {
    /// Build from config; tenant secrets are resolved from their env
    /// vars once at startup. Endpoints with a missing secret are
    /// skipped with a warning rather than silently signing with "".
    pub fn from_config(cfg: &WebhooksConfig, queue: Arc<WebhookQueue>) -> Self {
        let endpoints = cfg
            .endpoints
            .iter()
            .filter_map(|ep| match std::env::var(&ep.secret_env) {
                Ok(secret) if !secret.is_empty() => Some(MirrorEndpoint {
                    url: ep.url.clone(),
                    tenant_id: ep.tenant_id.clone(),
                    secret,
                    kinds: ep.kinds.clone(),
                }),
                _ => {
                    tracing::warn!(
                        url = %ep.url,
                        env = %ep.secret_env,
                        "webhook endpoint skipped: signing secret env unset"
                    );
                    None
                }
            })
            .collect();
        Self {
            queue,
            endpoints,
            redactor: Redactor::new(),
        }
    }

    #[cfg(test)]
    fn with_endpoint(queue: Arc<WebhookQueue>, url: &str, secret: &str, kinds: &[&str]) -> Self {
        Self {
            queue,
            endpoints: vec![MirrorEndpoint {
                url: url.into(),
                tenant_id: "t1".into(),
                secret: secret.into(),
                kinds: kinds.iter().map(|k| k.to_string()).collect(),
            }],
            redactor: Redactor::new(),
        }
    }

    /// Mirror one event to every matching endpoint.
    pub fn mirror(&self, event: &TimelineEvent) {
        if self.endpoints.is_empty() {
            return;
        }
        let kind = event.kind.as_str();

        for ep in &self.endpoints {
            if !ep.kinds.is_empty() && !ep.kinds.iter().any(|k| k == kind) {
                continue;
            }

            let body = serde_json::json!({
                "eventId": event.event_id,
                "callId": event.call_id,
                "tenantId": ep.tenant_id,
                "kind": kind,
                "payload": self.redactor.redact_json(&event.payload),
                "timestamp": event.timestamp.to_rfc3339(),
            })
            .to_string();

            let signature = signing::sign(&ep.secret, event.timestamp.timestamp(), &body);
            self.queue.enqueue(WebhookJob::new(
                ep.url.clone(),
                kind.to_string(),
                body,
                signature,
            ));
        }
    }

    /// Spawn the pump task consuming the store's broadcast feed until
    /// cancellation.
    pub fn spawn_pump(
        self: Arc<Self>,
        store: &TimelineStore,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let mut rx = store.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    recv = rx.recv() => match recv {
                        Ok(event) => self.mirror(&event),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "webhook mirror lagged behind timeline feed");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            tracing::debug!("webhook mirror pump stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use invorto_domain::event::EventKind;

    fn event(kind: EventKind, payload: serde_json::Value) -> TimelineEvent {
        TimelineEvent {
            event_id: 7,
            call_id: "c1".into(),
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn matching_kind_enqueues_signed_job() {
        let queue = Arc::new(WebhookQueue::new(&WebhooksConfig::default()));
        let mirror = WebhookMirror::with_endpoint(
            queue.clone(),
            "https://hooks.example.com/voice",
            "secret",
            &["stt.final"],
        );

        mirror.mirror(&event(
            EventKind::SttFinal,
            serde_json::json!({ "text": "hello there" }),
        ));

        let job = queue.claim_due(Utc::now()).expect("job enqueued");
        assert_eq!(job.event_kind, "stt.final");
        assert!(signing::verify("secret", &job.signature, &job.body));
        let body: serde_json::Value = serde_json::from_str(&job.body).unwrap();
        assert_eq!(body["callId"], "c1");
        assert_eq!(body["eventId"], 7);
    }

    #[test]
    fn kind_filter_skips_unsubscribed_events() {
        let queue = Arc::new(WebhookQueue::new(&WebhooksConfig::default()));
        let mirror = WebhookMirror::with_endpoint(
            queue.clone(),
            "https://hooks.example.com/voice",
            "secret",
            &["stt.final"],
        );
        mirror.mirror(&event(EventKind::LlmDelta, serde_json::json!({})));
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn empty_kind_filter_mirrors_everything() {
        let queue = Arc::new(WebhookQueue::new(&WebhooksConfig::default()));
        let mirror = WebhookMirror::with_endpoint(
            queue.clone(),
            "https://hooks.example.com/voice",
            "secret",
            &[],
        );
        mirror.mirror(&event(EventKind::BargeIn, serde_json::json!({})));
        mirror.mirror(&event(EventKind::TtsDone, serde_json::json!({})));
        assert_eq!(queue.pending_len(), 2);
    }

    #[test]
    fn payload_is_redacted_before_signing() {
        let queue = Arc::new(WebhookQueue::new(&WebhooksConfig::default()));
        let mirror = WebhookMirror::with_endpoint(
            queue.clone(),
            "https://hooks.example.com/voice",
            "secret",
            &[],
        );
        mirror.mirror(&event(
            EventKind::SttFinal,
            serde_json::json!({ "text": "my email is bob@example.com" }),
        ));

        let job = queue.claim_due(Utc::now()).unwrap();
        assert!(!job.body.contains("bob@example.com"));
        assert!(job.body.contains("[email]"));
        // The signature covers the redacted body.
        assert!(signing::verify("secret", &job.signature, &job.body));
    }
}
