//! Shared domain types for the Invorto realtime voice core.
//!
//! Everything the pipeline crates exchange lives here: audio frames,
//! transcript hypotheses, timeline events, tool/conversation types, the
//! provider-agnostic LLM stream events, the error taxonomy, and the
//! operator-facing configuration tree.

pub mod audio;
pub mod config;
pub mod error;
pub mod event;
pub mod stream;
pub mod tool;
pub mod transcript;

pub use error::{Error, Result};
