//! Debounced, single-flight refresh worker.
//!
//! Host notifications (persona system ready, config changed, identity set
//! changed, memory layer init) are funnelled into one channel. The worker
//! waits for a quiet period, runs one refresh for the whole batch, and any
//! trigger that arrives while a refresh is running is folded into the next
//! batch instead of starting a parallel run.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use super::catalog::PresetCatalog;
use crate::identity::{IdentityRegistry, IdentitySource};

/// Upper bound on how long a steady stream of triggers can postpone a refresh,
/// as a multiple of the debounce window
const MAX_WAIT_FACTOR: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum RefreshTrigger {
    PersonaReady,
    MemoryLayerInit,
    IdentitySetUpdated,
    ConfigUpdated,
    Manual,
}

impl RefreshTrigger {
    /// Whether this trigger means identity declarations may have changed
    pub fn reloads_identities(&self) -> bool {
        matches!(self, RefreshTrigger::IdentitySetUpdated | RefreshTrigger::ConfigUpdated)
    }
}

#[async_trait]
pub trait RefreshJob: Send + Sync {
    async fn run(&self, triggers: &[RefreshTrigger]);
}

/// Reloads identity declarations when needed, then refreshes the preset catalog
pub struct CatalogRefreshJob {
    registry: Arc<IdentityRegistry>,
    catalog: Arc<PresetCatalog>,
    identity_source: Option<Arc<dyn IdentitySource>>,
}

impl CatalogRefreshJob {
    pub fn new(
        registry: Arc<IdentityRegistry>,
        catalog: Arc<PresetCatalog>,
        identity_source: Option<Arc<dyn IdentitySource>>,
    ) -> Self {
        Self {
            registry,
            catalog,
            identity_source,
        }
    }
}

#[async_trait]
impl RefreshJob for CatalogRefreshJob {
    async fn run(&self, triggers: &[RefreshTrigger]) {
        if triggers.iter().any(RefreshTrigger::reloads_identities) {
            if let Some(source) = &self.identity_source {
                match source.load_identities() {
                    Ok(identities) => self.registry.replace_identities(identities),
                    Err(e) => {
                        log::warn!("[REFRESH] Keeping previous identities, reload failed: {}", e)
                    }
                }
            }
        }
        self.catalog.refresh().await;
    }
}

pub struct RefreshScheduler {
    tx: mpsc::UnboundedSender<RefreshTrigger>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    /// Spawn the worker on the current tokio runtime
    pub fn spawn(job: Arc<dyn RefreshJob>, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Self::run(job, debounce, rx, cancel.clone()));
        Self {
            tx,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Ask for a refresh; returns immediately
    pub fn request(&self, trigger: RefreshTrigger) {
        if self.tx.send(trigger).is_err() {
            log::debug!("[REFRESH] Worker stopped, dropping {} trigger", trigger);
        }
    }

    /// Stop the worker. A refresh already running is allowed to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("[REFRESH] Worker ended abnormally: {}", e);
            }
        }
    }

    async fn run(
        job: Arc<dyn RefreshJob>,
        debounce: Duration,
        mut rx: mpsc::UnboundedReceiver<RefreshTrigger>,
        cancel: CancellationToken,
    ) {
        log::info!("[REFRESH] Worker started (debounce: {}ms)", debounce.as_millis());
        loop {
            let first = tokio::select! {
                _ = cancel.cancelled() => break,
                trigger = rx.recv() => match trigger {
                    Some(trigger) => trigger,
                    None => break,
                },
            };

            let mut batch = vec![first];
            let deadline = Instant::now() + debounce * MAX_WAIT_FACTOR;
            let mut quiet_until = Instant::now() + debounce;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        log::info!(
                            "[REFRESH] Worker stopped with {} pending triggers",
                            batch.len()
                        );
                        return;
                    }
                    _ = sleep_until(quiet_until.min(deadline)) => break,
                    trigger = rx.recv() => match trigger {
                        Some(trigger) => {
                            batch.push(trigger);
                            quiet_until = Instant::now() + debounce;
                        }
                        None => break,
                    },
                }
            }

            let mut triggers: Vec<RefreshTrigger> = Vec::with_capacity(batch.len());
            for trigger in batch {
                if !triggers.contains(&trigger) {
                    triggers.push(trigger);
                }
            }
            log::debug!("[REFRESH] Running refresh for {:?}", triggers);
            job.run(&triggers).await;
        }
        log::info!("[REFRESH] Worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentities;
    use crate::models::Identity;

    #[derive(Default)]
    struct CountingJob {
        runs: Mutex<Vec<Vec<RefreshTrigger>>>,
    }

    #[async_trait]
    impl RefreshJob for CountingJob {
        async fn run(&self, triggers: &[RefreshTrigger]) {
            self.runs.lock().push(triggers.to_vec());
        }
    }

    #[tokio::test]
    async fn test_burst_of_triggers_runs_once() {
        let job = Arc::new(CountingJob::default());
        let scheduler = RefreshScheduler::spawn(job.clone(), Duration::from_millis(40));

        scheduler.request(RefreshTrigger::PersonaReady);
        scheduler.request(RefreshTrigger::ConfigUpdated);
        scheduler.request(RefreshTrigger::ConfigUpdated);
        scheduler.request(RefreshTrigger::IdentitySetUpdated);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let runs = job.runs.lock().clone();
        assert_eq!(runs.len(), 1);
        assert_eq!(
            runs[0],
            vec![
                RefreshTrigger::PersonaReady,
                RefreshTrigger::ConfigUpdated,
                RefreshTrigger::IdentitySetUpdated
            ]
        );

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drops_later_requests() {
        let job = Arc::new(CountingJob::default());
        let scheduler = RefreshScheduler::spawn(job.clone(), Duration::from_millis(10));
        scheduler.shutdown().await;

        scheduler.request(RefreshTrigger::Manual);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(job.runs.lock().is_empty());
    }

    #[tokio::test]
    async fn test_catalog_job_reloads_identities_on_config_change() {
        let registry = Arc::new(IdentityRegistry::new(vec![]));
        let catalog = Arc::new(PresetCatalog::new(None));
        let source: Arc<dyn IdentitySource> =
            Arc::new(StaticIdentities(vec![Identity::new("disc:42", "", "vendorA/modelX")]));
        let job = CatalogRefreshJob::new(registry.clone(), catalog.clone(), Some(source));

        job.run(&[RefreshTrigger::PersonaReady]).await;
        assert!(registry.get_config("disc:42").is_none());
        assert!(catalog.last_refreshed_at().is_some());

        job.run(&[RefreshTrigger::ConfigUpdated]).await;
        assert!(registry.get_config("disc:42").is_some());
    }
}
