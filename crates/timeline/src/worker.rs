//! Webhook delivery worker pool.
//!
//! N workers pull jobs from the shared queue (atomic claim), POST them
//! with the standard headers, and report failures back for retry
//! scheduling. Workers park briefly when the queue is empty and shut
//! down cooperatively on cancellation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use invorto_domain::config::WebhooksConfig;

use crate::queue::{WebhookJob, WebhookQueue};

/// Idle poll interval when no job is due.
const IDLE_POLL: Duration = Duration::from_millis(100);

pub struct DeliveryWorkerPool {
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl DeliveryWorkerPool {
    /// Spawn the configured number of delivery workers.
    pub fn spawn(
        queue: Arc<WebhookQueue>,
        cfg: &WebhooksConfig,
        cancel: CancellationToken,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .unwrap_or_default();

        let handles = (0..cfg.workers)
            .map(|worker_id| {
                let queue = queue.clone();
                let client = client.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, queue, client, cancel).await;
                })
            })
            .collect();
        Self { handles }
    }

    /// Wait for every worker to observe cancellation and exit.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<WebhookQueue>,
    client: reqwest::Client,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match queue.claim_due(Utc::now()) {
            Some(job) => deliver(&queue, &client, job).await,
            None => {
                let park = queue.next_due_in(Utc::now()).unwrap_or(IDLE_POLL).min(IDLE_POLL);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(park.max(Duration::from_millis(10))) => {}
                }
            }
        }
    }
    tracing::debug!(worker_id, "webhook worker stopped");
}

/// One delivery attempt. Success is any 2xx; everything else is
/// reported back for retry scheduling.
async fn deliver(queue: &WebhookQueue, client: &reqwest::Client, job: WebhookJob) {
    let result = client
        .post(&job.url)
        .header("content-type", "application/json")
        .header("x-invorto-signature", &job.signature)
        .header("x-invorto-event", &job.event_kind)
        .body(job.body.clone())
        .send()
        .await;

    match result {
        Ok(resp) if resp.status().is_success() => {
            tracing::debug!(
                job_id = %job.job_id,
                status = resp.status().as_u16(),
                attempts = job.attempts + 1,
                "webhook delivered"
            );
        }
        Ok(resp) => {
            let status = resp.status().as_u16();
            queue.report_failure(job, format!("HTTP {status}"), Utc::now());
        }
        Err(e) => {
            queue.report_failure(job, e.to_string(), Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_shuts_down_on_cancel() {
        let cfg = WebhooksConfig::default();
        let queue = Arc::new(WebhookQueue::new(&cfg));
        let cancel = CancellationToken::new();
        let pool = DeliveryWorkerPool::spawn(queue, &cfg, cancel.clone());

        cancel.cancel();
        // join() hangs forever if a worker misses the cancel signal.
        tokio::time::timeout(Duration::from_secs(2), pool.join())
            .await
            .expect("workers should stop promptly");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_rescheduled() {
        let cfg = WebhooksConfig {
            request_timeout_secs: 1,
            workers: 1,
            ..WebhooksConfig::default()
        };
        let queue = Arc::new(WebhookQueue::new(&cfg));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();

        // A port from the TEST-NET-ish reserved space nothing listens on.
        let job = WebhookJob::new(
            "http://127.0.0.1:1/hook".into(),
            "stt.final".into(),
            "{}".into(),
            "t=1,v1=00".into(),
        );
        deliver(&queue, &client, job).await;

        // Failure recorded: the job is pending again with attempts = 1.
        let retried = queue
            .claim_due(Utc::now() + chrono::Duration::minutes(1))
            .expect("job rescheduled");
        assert_eq!(retried.attempts, 1);
        assert!(retried.last_error.is_some());
    }
}
