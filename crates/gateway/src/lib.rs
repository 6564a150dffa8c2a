//! Invorto gateway: the realtime voice session core.
//!
//! One process hosts the `/realtime/voice` WebSocket endpoint, the
//! per-call session supervisors, the admission semaphores, the timeline
//! store with its webhook mirror, and the small REST surface for
//! timeline reads and DLQ administration.

pub mod admission;
pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod session;
pub mod state;
