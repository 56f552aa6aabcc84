//! Wires the registry, catalog, resolver and refresh worker together and
//! attaches them to a host.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::config::IsolationConfig;
use crate::host::{
    AttachmentId, HostEvent, HostPipeline, PersonaSubsystem, RESOLVE_CONVERSATION_STEP,
};
use crate::identity::{IdentityRegistry, IdentitySource};
use crate::isolation::{ConversationResolver, IsolationHooks};
use crate::memory::{MemoryLayer, MemoryNamespaceInjector};
use crate::models::{AdminSnapshot, Identity, IdentitySnapshot, UpdateIdentityRequest};
use crate::presets::{
    CatalogRefreshJob, PresetCatalog, PresetPublisher, PresetSource, RefreshScheduler,
    RefreshSummary, RefreshTrigger,
};
use crate::store::ConversationStore;

impl From<HostEvent> for RefreshTrigger {
    fn from(event: HostEvent) -> Self {
        match event {
            HostEvent::PersonaReady => RefreshTrigger::PersonaReady,
            HostEvent::MemoryLayerInit => RefreshTrigger::MemoryLayerInit,
            HostEvent::IdentitySetUpdated => RefreshTrigger::IdentitySetUpdated,
            HostEvent::ConfigUpdated => RefreshTrigger::ConfigUpdated,
        }
    }
}

pub struct IsolationRuntimeBuilder {
    isolation: IsolationConfig,
    store: Arc<dyn ConversationStore>,
    identities: Vec<Identity>,
    identity_source: Option<Arc<dyn IdentitySource>>,
    sources: Vec<Arc<dyn PresetSource>>,
    publisher: Option<Arc<dyn PresetPublisher>>,
    persona: Option<Arc<dyn PersonaSubsystem>>,
}

impl IsolationRuntimeBuilder {
    pub fn identities(mut self, identities: Vec<Identity>) -> Self {
        self.identities = identities;
        self
    }

    /// Where identities are re-read from on config / identity-set changes
    pub fn identity_source(mut self, source: Arc<dyn IdentitySource>) -> Self {
        self.identity_source = Some(source);
        self
    }

    pub fn preset_source(mut self, source: Arc<dyn PresetSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn PresetPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn persona(mut self, persona: Arc<dyn PersonaSubsystem>) -> Self {
        self.persona = Some(persona);
        self
    }

    pub fn build(self) -> IsolationRuntime {
        let registry = Arc::new(IdentityRegistry::new(self.identities));
        let catalog = Arc::new(PresetCatalog::new(self.publisher));
        for source in self.sources {
            catalog.register_source(source);
        }

        let resolver = Arc::new(ConversationResolver::new(
            registry.clone(),
            self.store,
            self.persona,
            self.isolation.enabled,
        ));
        let memory = MemoryNamespaceInjector::new(
            registry.clone(),
            self.isolation.enabled && self.isolation.memory_isolation,
        );
        let job = Arc::new(CatalogRefreshJob::new(
            registry.clone(),
            catalog.clone(),
            self.identity_source,
        ));

        IsolationRuntime {
            isolation: self.isolation,
            registry,
            catalog,
            resolver,
            memory,
            job,
            scheduler: Mutex::new(None),
            attachments: Mutex::new(Vec::new()),
        }
    }
}

pub struct IsolationRuntime {
    isolation: IsolationConfig,
    registry: Arc<IdentityRegistry>,
    catalog: Arc<PresetCatalog>,
    resolver: Arc<ConversationResolver>,
    memory: MemoryNamespaceInjector,
    job: Arc<CatalogRefreshJob>,
    scheduler: Mutex<Option<RefreshScheduler>>,
    attachments: Mutex<Vec<(Arc<dyn HostPipeline>, AttachmentId)>>,
}

impl IsolationRuntime {
    pub fn builder(
        isolation: IsolationConfig,
        store: Arc<dyn ConversationStore>,
    ) -> IsolationRuntimeBuilder {
        IsolationRuntimeBuilder {
            isolation,
            store,
            identities: Vec::new(),
            identity_source: None,
            sources: Vec::new(),
            publisher: None,
            persona: None,
        }
    }

    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<PresetCatalog> {
        &self.catalog
    }

    /// Attach the isolation hooks around the host's resolution step and start
    /// the refresh worker. Must run inside a tokio runtime.
    pub fn start(&self, pipeline: Arc<dyn HostPipeline>) {
        let hooks = Arc::new(IsolationHooks::new(self.resolver.clone()));
        let id = pipeline.attach(RESOLVE_CONVERSATION_STEP, hooks);
        self.attachments.lock().push((pipeline, id));

        let mut scheduler = self.scheduler.lock();
        if scheduler.is_none() {
            let debounce = Duration::from_millis(self.isolation.refresh_debounce_ms);
            *scheduler = Some(RefreshScheduler::spawn(self.job.clone(), debounce));
        }
        log::info!(
            "[ISOLATION] Attached to '{}' (isolation: {}, memory isolation: {})",
            RESOLVE_CONVERSATION_STEP,
            self.isolation.enabled,
            self.isolation.memory_isolation
        );
    }

    /// Host notification; schedules a debounced refresh
    pub fn notify(&self, event: HostEvent) {
        self.request(event.into());
    }

    fn request(&self, trigger: RefreshTrigger) {
        match self.scheduler.lock().as_ref() {
            Some(scheduler) => scheduler.request(trigger),
            None => log::debug!("[REFRESH] Not started, ignoring {} trigger", trigger),
        }
    }

    /// Memory subsystem initialized a context layer
    pub fn on_memory_layer_init(&self, layer: &mut MemoryLayer) -> bool {
        let rewritten = self.memory.on_layer_init(layer);
        self.request(RefreshTrigger::MemoryLayerInit);
        rewritten
    }

    /// Refresh the preset catalog right away, bypassing the debounce
    pub async fn refresh_now(&self) -> RefreshSummary {
        self.catalog.refresh().await
    }

    pub fn snapshot(&self) -> AdminSnapshot {
        let identities = self
            .registry
            .list_all()
            .into_iter()
            .map(|identity| IdentitySnapshot {
                status: self.registry.get_status(&identity.id),
                identity,
            })
            .collect();

        AdminSnapshot {
            isolation_enabled: self.isolation.enabled,
            identities,
            presets: self.catalog.list().to_vec(),
            presets_refreshed_at: self.catalog.last_refreshed_at().map(|t| t.to_rfc3339()),
        }
    }

    /// Kept in memory only; the next identity reload from configuration wins
    pub fn update_identity(&self, request: &UpdateIdentityRequest) -> Option<Identity> {
        self.registry.update_persona(request)
    }

    /// Snapshot as pretty JSON, for debug dumps
    pub fn status_report(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.snapshot())
    }

    /// Detach all hooks and stop the refresh worker. Messages already inside
    /// the pipeline finish normally.
    pub async fn shutdown(&self) {
        let attachments: Vec<(Arc<dyn HostPipeline>, AttachmentId)> =
            self.attachments.lock().drain(..).collect();
        for (pipeline, id) in attachments {
            if !pipeline.detach(id) {
                log::debug!("[ISOLATION] Hook {:?} was already detached", id);
            }
        }

        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown().await;
        }
        log::info!("[ISOLATION] Shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::host::{HostResolutionStep, LocalPipeline, StepOutcome};
    use crate::identity::StaticIdentities;
    use crate::isolation::{MessageContext, MessageScope};
    use crate::models::{ChatMode, PresetSourceKind};
    use crate::presets::DirectoryPresetSource;
    use crate::store::SqliteConversationStore;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct PassiveHost;

    #[derive(Default)]
    struct CountingPublisher {
        published: parking_lot::Mutex<Vec<usize>>,
    }

    impl PresetPublisher for CountingPublisher {
        fn publish(&self, presets: &[crate::models::PresetDescriptor]) {
            self.published.lock().push(presets.len());
        }
    }

    #[async_trait]
    impl HostResolutionStep for PassiveHost {
        async fn resolve(&self, _ctx: &mut MessageContext) {}
    }

    fn isolation_config() -> IsolationConfig {
        IsolationConfig {
            enabled: true,
            memory_isolation: true,
            refresh_debounce_ms: 20,
        }
    }

    fn store() -> Arc<dyn ConversationStore> {
        let db = Database::new(":memory:").expect("in-memory db");
        Arc::new(SqliteConversationStore::new(Arc::new(db)))
    }

    #[tokio::test]
    async fn test_end_to_end_message_and_snapshot() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("helper.yml"), "prompt").unwrap();
        let publisher = Arc::new(CountingPublisher::default());

        let runtime = IsolationRuntime::builder(isolation_config(), store())
            .publisher(publisher.clone())
            .identities(vec![Identity::new("disc:42", "chatluna:helper", "vendorA/modelX")])
            .preset_source(Arc::new(DirectoryPresetSource::new(
                PresetSourceKind::Chatluna,
                dir.path(),
            )))
            .build();
        let pipeline = Arc::new(LocalPipeline::new());
        runtime.start(pipeline.clone());

        let summary = runtime.refresh_now().await;
        assert!(summary.applied);
        assert!(runtime.catalog().contains("chatluna:helper"));
        assert_eq!(*publisher.published.lock(), vec![1]);

        let mut ctx = MessageContext::new("disc", "42", "u1", MessageScope::Direct);
        let outcome = pipeline
            .run_step(RESOLVE_CONVERSATION_STEP, &mut ctx, &PassiveHost)
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Completed);

        let snapshot = runtime.snapshot();
        assert!(snapshot.isolation_enabled);
        assert_eq!(snapshot.presets.len(), 1);
        assert!(snapshot.presets_refreshed_at.is_some());
        let status = snapshot.identities[0].status.clone().unwrap();
        assert_eq!(status.conversation_record_id, ctx.bound_record_id());

        let report = runtime.status_report().unwrap();
        assert!(report.contains("disc:42"));
        assert!(report.contains("chatluna:helper"));

        runtime.shutdown().await;
        assert_eq!(pipeline.attachment_count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_isolation_leaves_messages_alone() {
        let mut config = isolation_config();
        config.enabled = false;
        let runtime = IsolationRuntime::builder(config, store())
            .identities(vec![Identity::new("disc:42", "chatluna:helper", "vendorA/modelX")])
            .build();
        let pipeline = Arc::new(LocalPipeline::new());
        runtime.start(pipeline.clone());

        let mut ctx = MessageContext::new("disc", "42", "u1", MessageScope::Direct);
        pipeline
            .run_step(RESOLVE_CONVERSATION_STEP, &mut ctx, &PassiveHost)
            .await
            .unwrap();
        assert!(ctx.conversation.is_none());

        let mut layer = MemoryLayer {
            platform: "disc".to_string(),
            self_id: "42".to_string(),
            user_id: Some("u1".to_string()),
            group_id: None,
        };
        assert!(!runtime.on_memory_layer_init(&mut layer));
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_config_event_reloads_identities() {
        let source = Arc::new(StaticIdentities(vec![
            Identity::new("disc:42", "", "vendorA/modelX").with_chat_mode(ChatMode::Agent),
        ]));
        let runtime = IsolationRuntime::builder(isolation_config(), store())
            .identity_source(source)
            .build();
        runtime.start(Arc::new(LocalPipeline::new()));
        assert!(runtime.registry().get_config("disc:42").is_none());

        runtime.notify(HostEvent::ConfigUpdated);
        tokio::time::sleep(Duration::from_millis(300)).await;

        let identity = runtime.registry().get_config("disc:42").unwrap();
        assert_eq!(identity.chat_mode, ChatMode::Agent);
        assert!(runtime.catalog().last_refreshed_at().is_some());
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_identity_in_memory() {
        let runtime = IsolationRuntime::builder(isolation_config(), store())
            .identities(vec![Identity::new("disc:42", "chatluna:helper", "vendorA/modelX")])
            .build();

        let updated = runtime
            .update_identity(&UpdateIdentityRequest {
                identity_id: "disc:42".to_string(),
                model: Some(" vendorC/modelZ ".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(updated.model, "vendorC/modelZ");
        assert_eq!(updated.preset, "chatluna:helper");

        let missing = UpdateIdentityRequest {
            identity_id: "tg:1".to_string(),
            ..Default::default()
        };
        assert!(runtime.update_identity(&missing).is_none());
    }
}
