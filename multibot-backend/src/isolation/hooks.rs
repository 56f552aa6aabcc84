use async_trait::async_trait;
use std::sync::Arc;

use super::context::MessageContext;
use super::error::IsolationError;
use super::reconcile::Reconciler;
use super::resolver::ConversationResolver;
use crate::host::{HookOutcome, ResolutionHook};

/// The resolver and reconciler as one before/after attachment
pub struct IsolationHooks {
    resolver: Arc<ConversationResolver>,
    reconciler: Reconciler,
}

impl IsolationHooks {
    pub fn new(resolver: Arc<ConversationResolver>) -> Self {
        Self {
            reconciler: Reconciler::new(Arc::clone(&resolver)),
            resolver,
        }
    }
}

#[async_trait]
impl ResolutionHook for IsolationHooks {
    async fn before(&self, ctx: &mut MessageContext) -> Result<HookOutcome, IsolationError> {
        self.resolver.before_resolve(ctx).await
    }

    async fn after(&self, ctx: &mut MessageContext) -> Result<HookOutcome, IsolationError> {
        self.reconciler.after_resolve(ctx).await
    }
}
