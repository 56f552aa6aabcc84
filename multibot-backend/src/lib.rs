//! Multi-bot identity isolation for a shared chat runtime.
//!
//! Several bot identities share one host runtime; each keeps its own persona
//! (preset, model, chat mode) and its own conversations and memories.

pub mod config;
pub mod db;
pub mod host;
pub mod identity;
pub mod isolation;
pub mod memory;
pub mod models;
pub mod presets;
pub mod runtime;
pub mod store;

pub use runtime::{IsolationRuntime, IsolationRuntimeBuilder};
