//! Per-identity conversation isolation.
//!
//! A before hook binds each message to the isolated record of its bot
//! identity (creating it on first contact) and stashes the declared persona;
//! an after hook re-checks whatever the host ended up binding and repairs it.

mod context;
mod error;
mod hooks;
pub mod keys;
mod reconcile;
mod resolver;


pub use context::{IsolationStash, MessageContext, MessageScope};
pub use error::IsolationError;
pub use hooks::IsolationHooks;
pub use reconcile::{Reconciler, correct_record};
pub use resolver::{ConversationResolver, select_candidate};
