//! In-process implementation of the host pipeline attachment points.
//!
//! Embedding hosts that do not bring their own pipeline can run messages
//! through [`LocalPipeline::run_step`]: before-hooks, then the host's own
//! resolution step, then after-hooks, in attachment order.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{AttachmentId, HookOutcome, HostPipeline, ResolutionHook};
use crate::isolation::{IsolationError, MessageContext};

/// The host's own resolution logic for a step; may rebind the conversation
#[async_trait]
pub trait HostResolutionStep: Send + Sync {
    async fn resolve(&self, ctx: &mut MessageContext);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A hook stopped the message; downstream processing must not run
    Stopped,
    Completed,
}

struct Attachment {
    step: String,
    hook: Arc<dyn ResolutionHook>,
}

#[derive(Default)]
pub struct LocalPipeline {
    attachments: DashMap<AttachmentId, Attachment>,
    next_id: AtomicU64,
}

impl LocalPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    fn hooks_for(&self, step: &str) -> Vec<Arc<dyn ResolutionHook>> {
        let mut hooks: Vec<(AttachmentId, Arc<dyn ResolutionHook>)> = self
            .attachments
            .iter()
            .filter(|entry| entry.value().step == step)
            .map(|entry| (*entry.key(), Arc::clone(&entry.value().hook)))
            .collect();
        hooks.sort_by_key(|(id, _)| *id);
        hooks.into_iter().map(|(_, hook)| hook).collect()
    }

    /// Run one message through `step`. The hook list is captured up front so
    /// a detach mid-message does not change what this message sees.
    pub async fn run_step(
        &self,
        step: &str,
        ctx: &mut MessageContext,
        host_step: &dyn HostResolutionStep,
    ) -> Result<StepOutcome, IsolationError> {
        let hooks = self.hooks_for(step);

        for hook in &hooks {
            if hook.before(ctx).await? == HookOutcome::Stop {
                return Ok(StepOutcome::Stopped);
            }
        }

        host_step.resolve(ctx).await;

        for hook in &hooks {
            if hook.after(ctx).await? == HookOutcome::Stop {
                return Ok(StepOutcome::Stopped);
            }
        }

        Ok(StepOutcome::Completed)
    }
}

impl HostPipeline for LocalPipeline {
    fn attach(&self, step: &str, hook: Arc<dyn ResolutionHook>) -> AttachmentId {
        let id = AttachmentId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.attachments.insert(
            id,
            Attachment {
                step: step.to_string(),
                hook,
            },
        );
        log::debug!("Attached hook {:?} around '{}'", id, step);
        id
    }

    fn detach(&self, id: AttachmentId) -> bool {
        self.attachments.remove(&id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::MessageScope;
    use parking_lot::Mutex;

    struct TracingHook {
        name: &'static str,
        before: HookOutcome,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ResolutionHook for TracingHook {
        async fn before(&self, _ctx: &mut MessageContext) -> Result<HookOutcome, IsolationError> {
            self.log.lock().push(format!("{}:before", self.name));
            Ok(self.before)
        }

        async fn after(&self, _ctx: &mut MessageContext) -> Result<HookOutcome, IsolationError> {
            self.log.lock().push(format!("{}:after", self.name));
            Ok(HookOutcome::Continue)
        }
    }

    struct TracingStep {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl HostResolutionStep for TracingStep {
        async fn resolve(&self, _ctx: &mut MessageContext) {
            self.log.lock().push("host".to_string());
        }
    }

    fn ctx() -> MessageContext {
        MessageContext::new("disc", "42", "u1", MessageScope::Direct)
    }

    #[tokio::test]
    async fn test_ordering_before_host_after() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = LocalPipeline::new();
        pipeline.attach(
            "resolve_conversation",
            Arc::new(TracingHook { name: "a", before: HookOutcome::Continue, log: log.clone() }),
        );
        pipeline.attach(
            "other_step",
            Arc::new(TracingHook { name: "x", before: HookOutcome::Continue, log: log.clone() }),
        );

        let step = TracingStep { log: log.clone() };
        let outcome = pipeline
            .run_step("resolve_conversation", &mut ctx(), &step)
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Completed);
        assert_eq!(*log.lock(), vec!["a:before", "host", "a:after"]);
    }

    #[tokio::test]
    async fn test_stop_skips_host_step() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = LocalPipeline::new();
        pipeline.attach(
            "resolve_conversation",
            Arc::new(TracingHook { name: "a", before: HookOutcome::Stop, log: log.clone() }),
        );

        let step = TracingStep { log: log.clone() };
        let outcome = pipeline
            .run_step("resolve_conversation", &mut ctx(), &step)
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Stopped);
        assert_eq!(*log.lock(), vec!["a:before"]);
    }

    #[tokio::test]
    async fn test_detach_removes_hook() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = LocalPipeline::new();
        let id = pipeline.attach(
            "resolve_conversation",
            Arc::new(TracingHook { name: "a", before: HookOutcome::Continue, log: log.clone() }),
        );
        assert!(pipeline.detach(id));
        assert!(!pipeline.detach(id));
        assert_eq!(pipeline.attachment_count(), 0);

        let step = TracingStep { log: log.clone() };
        pipeline
            .run_step("resolve_conversation", &mut ctx(), &step)
            .await
            .unwrap();
        assert_eq!(*log.lock(), vec!["host"]);
    }
}
