//! Webhook delivery queue with retry scheduling and a DLQ.
//!
//! Multi-producer (every session's mirror), multi-consumer (the worker
//! pool). Consumers coordinate only through the atomic claim of the
//! next due job; a claimed job is owned by exactly one worker until it
//! either lands, is rescheduled, or is dead-lettered.

use std::collections::VecDeque;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use invorto_domain::config::WebhooksConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Job model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct WebhookJob {
    pub job_id: Uuid,
    pub url: String,
    /// Event kind, sent as `x-invorto-event`.
    pub event_kind: String,
    /// Serialized (already-redacted) body.
    pub body: String,
    /// Stable signature header — identical across retries.
    pub signature: String,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl WebhookJob {
    pub fn new(url: String, event_kind: String, body: String, signature: String) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            url,
            event_kind,
            body,
            signature,
            attempts: 0,
            next_attempt_at: Utc::now(),
            last_error: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Queue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Retry policy knobs lifted from config at construction.
struct RetryPolicy {
    max_attempts: u32,
    base_ms: u64,
    factor: f64,
    cap_ms: u64,
}

pub struct WebhookQueue {
    pending: Mutex<VecDeque<WebhookJob>>,
    dlq: Mutex<VecDeque<WebhookJob>>,
    policy: RetryPolicy,
    dlq_max: usize,
}

impl WebhookQueue {
    pub fn new(cfg: &WebhooksConfig) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            dlq: Mutex::new(VecDeque::new()),
            policy: RetryPolicy {
                max_attempts: cfg.max_attempts,
                base_ms: cfg.backoff_base_ms,
                factor: cfg.backoff_factor,
                cap_ms: cfg.backoff_cap_ms,
            },
            dlq_max: cfg.dlq_max,
        }
    }

    pub fn enqueue(&self, job: WebhookJob) {
        self.pending.lock().push_back(job);
    }

    /// Atomically claim the next job whose `next_attempt_at` has
    /// passed. The caller owns the job until it reports back.
    pub fn claim_due(&self, now: DateTime<Utc>) -> Option<WebhookJob> {
        let mut pending = self.pending.lock();
        let idx = pending.iter().position(|j| j.next_attempt_at <= now)?;
        pending.remove(idx)
    }

    /// Time until the earliest pending job is due (for worker parking).
    pub fn next_due_in(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        let pending = self.pending.lock();
        pending
            .iter()
            .map(|j| (j.next_attempt_at - now).max(ChronoDuration::zero()))
            .min()
            .and_then(|d| d.to_std().ok())
    }

    /// Record a delivery failure: reschedule with exponential backoff,
    /// or dead-letter once attempts exhaust.
    pub fn report_failure(&self, mut job: WebhookJob, error: String, now: DateTime<Utc>) {
        job.attempts += 1;
        job.last_error = Some(error);

        if job.attempts >= self.policy.max_attempts {
            tracing::warn!(
                job_id = %job.job_id,
                attempts = job.attempts,
                url = %job.url,
                "webhook job exhausted retries, moving to DLQ"
            );
            let mut dlq = self.dlq.lock();
            dlq.push_back(job);
            while dlq.len() > self.dlq_max {
                dlq.pop_front();
            }
            return;
        }

        let delay_ms = (self.policy.base_ms as f64
            * self.policy.factor.powi(job.attempts.saturating_sub(1) as i32))
        .min(self.policy.cap_ms as f64) as i64;
        job.next_attempt_at = now + ChronoDuration::milliseconds(delay_ms);
        self.pending.lock().push_back(job);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    // ── DLQ operations ──────────────────────────────────────────────

    pub fn dlq_list(&self) -> Vec<WebhookJob> {
        self.dlq.lock().iter().cloned().collect()
    }

    /// Schedule a fresh attempt for one dead-lettered job.
    pub fn dlq_retry(&self, job_id: &Uuid) -> bool {
        let mut dlq = self.dlq.lock();
        let Some(idx) = dlq.iter().position(|j| j.job_id == *job_id) else {
            return false;
        };
        let mut job = dlq.remove(idx).expect("index just found");
        drop(dlq);
        job.next_attempt_at = Utc::now();
        self.pending.lock().push_back(job);
        true
    }

    /// Drop every dead-lettered job; returns how many were purged.
    pub fn dlq_purge(&self) -> usize {
        let mut dlq = self.dlq.lock();
        let purged = dlq.len();
        dlq.clear();
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> WebhookQueue {
        WebhookQueue::new(&WebhooksConfig::default())
    }

    fn job() -> WebhookJob {
        WebhookJob::new(
            "https://hooks.example.com/voice".into(),
            "stt.final".into(),
            r#"{"text":"hello"}"#.into(),
            "t=1,v1=00".into(),
        )
    }

    #[test]
    fn claim_respects_due_time() {
        let q = queue();
        let now = Utc::now();
        let mut j = job();
        j.next_attempt_at = now + ChronoDuration::seconds(30);
        q.enqueue(j);

        assert!(q.claim_due(now).is_none());
        assert!(q.claim_due(now + ChronoDuration::seconds(31)).is_some());
    }

    #[test]
    fn claim_removes_the_job() {
        let q = queue();
        q.enqueue(job());
        let now = Utc::now();
        assert!(q.claim_due(now).is_some());
        assert!(q.claim_due(now).is_none());
        assert_eq!(q.pending_len(), 0);
    }

    #[test]
    fn backoff_schedule_doubles_up_to_cap() {
        let q = queue();
        let now = Utc::now();

        let j = job();
        q.report_failure(j, "HTTP 500".into(), now);
        let first = q.claim_due(now + ChronoDuration::seconds(2)).unwrap();
        // attempt 1 → 1 s backoff.
        assert_eq!(first.attempts, 1);
        assert!(first.next_attempt_at >= now + ChronoDuration::milliseconds(900));

        q.report_failure(first, "HTTP 500".into(), now);
        let second = q.claim_due(now + ChronoDuration::seconds(3)).unwrap();
        // attempt 2 → 2 s backoff.
        assert_eq!(second.attempts, 2);
        assert!(second.next_attempt_at >= now + ChronoDuration::milliseconds(1_900));
    }

    #[test]
    fn three_failures_land_in_dlq_with_attempts_recorded() {
        let q = queue();
        let now = Utc::now();
        let mut j = job();
        let id = j.job_id;

        for _ in 0..2 {
            q.report_failure(j, "HTTP 500".into(), now);
            j = q.claim_due(now + ChronoDuration::minutes(10)).unwrap();
        }
        // Third consecutive failure exhausts the default policy.
        q.report_failure(j, "HTTP 500".into(), now);

        assert_eq!(q.pending_len(), 0);
        let dlq = q.dlq_list();
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].job_id, id);
        assert_eq!(dlq[0].attempts, 3);
        assert_eq!(dlq[0].last_error.as_deref(), Some("HTTP 500"));
    }

    #[test]
    fn dlq_retry_schedules_fresh_attempt() {
        let q = queue();
        let now = Utc::now();
        let mut j = job();
        let id = j.job_id;
        for _ in 0..2 {
            q.report_failure(j, "HTTP 500".into(), now);
            j = q.claim_due(now + ChronoDuration::minutes(10)).unwrap();
        }
        q.report_failure(j, "HTTP 500".into(), now);
        assert_eq!(q.dlq_list().len(), 1);

        assert!(q.dlq_retry(&id));
        assert!(q.dlq_list().is_empty());
        let retried = q.claim_due(Utc::now()).expect("job due immediately");
        assert_eq!(retried.job_id, id);

        // Unknown id is a no-op.
        assert!(!q.dlq_retry(&Uuid::new_v4()));
    }

    #[test]
    fn dlq_purge_clears_everything() {
        let q = queue();
        let now = Utc::now();
        for _ in 0..3 {
            let mut j = job();
            j.attempts = 2;
            q.report_failure(j, "HTTP 503".into(), now);
        }
        assert_eq!(q.dlq_list().len(), 3);
        assert_eq!(q.dlq_purge(), 3);
        assert!(q.dlq_list().is_empty());
    }

    #[test]
    fn signature_survives_retries_unchanged() {
        let q = queue();
        let now = Utc::now();
        let j = job();
        let original_signature = j.signature.clone();

        q.report_failure(j, "HTTP 500".into(), now);
        let retried = q.claim_due(now + ChronoDuration::minutes(1)).unwrap();
        assert_eq!(retried.signature, original_signature);
    }
}
