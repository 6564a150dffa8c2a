//! Per-call append-only event log.
//!
//! Appends are single-writer per call (the session's timeline task);
//! readers use bounded range reads and never mutate. Every append also
//! fans out on a broadcast channel for the webhook mirror.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;

use invorto_domain::event::{EventKind, TimelineEvent};

struct CallLog {
    next_id: u64,
    last_timestamp: DateTime<Utc>,
    events: Vec<TimelineEvent>,
}

pub struct TimelineStore {
    calls: RwLock<HashMap<String, CallLog>>,
    event_tx: broadcast::Sender<TimelineEvent>,
    /// Hard bound on retained events per call (oldest are never
    /// evicted — the session is closed instead when it overflows).
    per_call_max: usize,
}

impl TimelineStore {
    pub fn new(per_call_max: usize) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            calls: RwLock::new(HashMap::new()),
            event_tx,
            per_call_max,
        }
    }

    /// Append one event. Assigns the next strictly-increasing id for
    /// the call and a server timestamp that never goes backwards.
    pub fn append(
        &self,
        call_id: &str,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> TimelineEvent {
        let mut calls = self.calls.write();
        let log = calls.entry(call_id.to_string()).or_insert_with(|| CallLog {
            next_id: 1,
            last_timestamp: DateTime::<Utc>::MIN_UTC,
            events: Vec::new(),
        });

        let timestamp = Utc::now().max(log.last_timestamp);
        let event = TimelineEvent {
            event_id: log.next_id,
            call_id: call_id.to_string(),
            kind,
            payload,
            timestamp,
        };

        log.next_id += 1;
        log.last_timestamp = timestamp;
        if log.events.len() < self.per_call_max {
            log.events.push(event.clone());
        } else {
            tracing::warn!(call_id, "per-call timeline bound reached; event not retained");
        }
        drop(calls);

        // No receivers is fine — the mirror may be disabled.
        let _ = self.event_tx.send(event.clone());
        event
    }

    /// Range read: events with `event_id > from`, ascending, at most
    /// `count`.
    pub fn range(&self, call_id: &str, from: u64, count: usize) -> Vec<TimelineEvent> {
        let calls = self.calls.read();
        let Some(log) = calls.get(call_id) else {
            return Vec::new();
        };
        log.events
            .iter()
            .filter(|e| e.event_id > from)
            .take(count)
            .cloned()
            .collect()
    }

    /// Whether any events exist for a call.
    pub fn has_call(&self, call_id: &str) -> bool {
        self.calls.read().contains_key(call_id)
    }

    /// Subscribe to the live event feed (used by the webhook mirror).
    pub fn subscribe(&self) -> broadcast::Receiver<TimelineEvent> {
        self.event_tx.subscribe()
    }

    /// Drop a call's log once its retention window lapses.
    pub fn forget(&self, call_id: &str) {
        self.calls.write().remove(call_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TimelineStore {
        TimelineStore::new(10_000)
    }

    #[test]
    fn ids_strictly_increase_per_call() {
        let s = store();
        let a = s.append("c1", EventKind::SessionConnected, serde_json::json!({}));
        let b = s.append("c1", EventKind::SttPartial, serde_json::json!({"text":"he"}));
        let c = s.append("c1", EventKind::SttFinal, serde_json::json!({"text":"hello"}));
        assert_eq!((a.event_id, b.event_id, c.event_id), (1, 2, 3));

        // Independent counter per call.
        let other = s.append("c2", EventKind::SessionConnected, serde_json::json!({}));
        assert_eq!(other.event_id, 1);
    }

    #[test]
    fn timestamps_never_decrease() {
        let s = store();
        let mut last = DateTime::<Utc>::MIN_UTC;
        for _ in 0..100 {
            let e = s.append("c1", EventKind::LlmDelta, serde_json::json!({}));
            assert!(e.timestamp >= last);
            last = e.timestamp;
        }
    }

    #[test]
    fn range_read_returns_prefix_in_order() {
        let s = store();
        for i in 0..10 {
            s.append("c1", EventKind::LlmDelta, serde_json::json!({ "i": i }));
        }
        let first3 = s.range("c1", 0, 3);
        let ids: Vec<u64> = first3.iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let rest = s.range("c1", 3, 100);
        assert_eq!(rest.len(), 7);
        assert_eq!(rest[0].event_id, 4);

        assert!(s.range("missing", 0, 10).is_empty());
    }

    #[tokio::test]
    async fn appends_fan_out_to_subscribers() {
        let s = store();
        let mut rx = s.subscribe();
        s.append("c1", EventKind::BargeIn, serde_json::json!({}));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::BargeIn);
        assert_eq!(event.call_id, "c1");
    }

    #[test]
    fn forget_drops_the_log() {
        let s = store();
        s.append("c1", EventKind::SessionConnected, serde_json::json!({}));
        assert!(s.has_call("c1"));
        s.forget("c1");
        assert!(!s.has_call("c1"));
    }
}
