//! Timeline publisher and webhook mirror.
//!
//! The [`TimelineStore`] keeps an append-only per-call event log with
//! strictly increasing ids and server-assigned timestamps. The
//! [`WebhookMirror`] copies selected events to tenant-subscribed HTTP
//! endpoints: payloads are PII-redacted, signed with the tenant secret,
//! and enqueued as retryable jobs that a worker pool delivers. Jobs that
//! exhaust their retries land in an operator-accessible DLQ.

pub mod mirror;
pub mod queue;
pub mod redact;
pub mod signing;
pub mod store;
pub mod worker;

pub use mirror::WebhookMirror;
pub use queue::{WebhookJob, WebhookQueue};
pub use redact::Redactor;
pub use store::TimelineStore;
