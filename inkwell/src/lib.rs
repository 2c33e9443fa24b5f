//! Inkwell - story writing runtime
//!
//! Resilient AI generation with canned fallbacks, debounced auto-save driven
//! by an actor, and a local draft store with per-record sync status.

pub mod actors;
pub mod app_state;
pub mod config;
pub mod drafts;
pub mod generation;
pub mod resilience;
pub mod runtime_env;
