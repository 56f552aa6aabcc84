//! Interfaces the host chat runtime exposes to this backend.
//!
//! The host owns the message pipeline. We attach a before/after pair around
//! its conversation-resolution step, subscribe to a handful of lifecycle
//! notifications, and hand character personas to its persona subsystem.

pub mod pipeline;

use async_trait::async_trait;

use crate::isolation::{IsolationError, MessageContext};

pub use pipeline::{HostResolutionStep, LocalPipeline, StepOutcome};

/// Name of the host step the isolation hooks wrap
pub const RESOLVE_CONVERSATION_STEP: &str = "resolve_conversation";

/// What a hook tells the host to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum HookOutcome {
    /// Not ours; let host defaults apply
    PassThrough,
    /// Fully handled; the host must not run its chat pipeline for this message
    Stop,
    /// Conversation bound; carry on
    Continue,
}

/// Fire-and-forget notifications from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    PersonaReady,
    MemoryLayerInit,
    IdentitySetUpdated,
    ConfigUpdated,
}

/// Handle returned by [`HostPipeline::attach`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttachmentId(pub u64);

#[async_trait]
pub trait ResolutionHook: Send + Sync {
    /// Runs before the host resolves the message's conversation
    async fn before(&self, ctx: &mut MessageContext) -> Result<HookOutcome, IsolationError>;

    /// Runs after the host resolved (and possibly rebound) the conversation
    async fn after(&self, ctx: &mut MessageContext) -> Result<HookOutcome, IsolationError>;
}

pub trait HostPipeline: Send + Sync {
    fn attach(&self, step: &str, hook: std::sync::Arc<dyn ResolutionHook>) -> AttachmentId;

    /// Returns false if the attachment was already gone
    fn detach(&self, id: AttachmentId) -> bool;
}

/// The host's character/persona subsystem, used for presets from the
/// character source. Those messages never reach the regular chat pipeline.
#[async_trait]
pub trait PersonaSubsystem: Send + Sync {
    async fn configure_scope(
        &self,
        scope_key: &str,
        preset: &str,
        model: &str,
    ) -> Result<(), String>;
}
