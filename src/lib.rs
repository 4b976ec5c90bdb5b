//! Hookforge - event-driven automation engine for an AI coding-assistant console
//!
//! The engine registers automation rules ("hooks") keyed by event kind,
//! evaluates trigger conditions, interpolates command templates, supervises
//! subprocess execution with timeout escalation, and persists an auditable
//! execution history. Multi-step "workflows" reuse the same pipeline.

pub mod cli;
pub mod engine;
pub mod error;
pub mod store;

pub use error::{HookforgeError, Result};
