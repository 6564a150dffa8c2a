//! Audio ingress pipeline: jitter buffer, energy meter / VAD, and
//! endpointing. Everything here is pure computation over
//! [`invorto_domain::audio::AudioFrame`]s — no I/O, no clocks — so the
//! session supervisor can drive it at the sample rate and tests can
//! drive it deterministically.

pub mod endpoint;
pub mod energy;
pub mod jitter;

pub use endpoint::{EndReason, Endpointer, TurnSignal};
pub use energy::{EnergyMeter, VadFrame};
pub use jitter::{JitterBuffer, JitterStats};
