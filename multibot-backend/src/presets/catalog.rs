use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::naming::namespaced;
use super::sources::{PresetSource, SourceError};
use crate::models::{PresetDescriptor, PresetSourceKind};

/// Receives the full preset list after every applied refresh (e.g. the
/// configuration UI's preset dropdown)
pub trait PresetPublisher: Send + Sync {
    fn publish(&self, presets: &[PresetDescriptor]);
}

/// Outcome of one `refresh()` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSummary {
    pub presets: usize,
    pub failed_sources: Vec<PresetSourceKind>,
    /// False when a newer refresh had already published before this one finished
    pub applied: bool,
}

#[derive(Default)]
struct CatalogState {
    generation: u64,
    presets: Arc<Vec<PresetDescriptor>>,
    refreshed_at: Option<DateTime<Utc>>,
}

pub struct PresetCatalog {
    sources: RwLock<Vec<Arc<dyn PresetSource>>>,
    publisher: Option<Arc<dyn PresetPublisher>>,
    state: RwLock<CatalogState>,
    next_generation: AtomicU64,
}

impl PresetCatalog {
    pub fn new(publisher: Option<Arc<dyn PresetPublisher>>) -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
            publisher,
            state: RwLock::new(CatalogState::default()),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn register_source(&self, source: Arc<dyn PresetSource>) {
        log::info!("[PRESETS] Registered {} preset source", source.kind());
        self.sources.write().push(source);
    }

    /// Current list; a cheap shared snapshot
    pub fn list(&self) -> Arc<Vec<PresetDescriptor>> {
        Arc::clone(&self.state.read().presets)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.read().presets.iter().any(|p| p.name == name)
    }

    pub fn last_refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().refreshed_at
    }

    /// Query every source and replace the whole list. Each call takes a
    /// generation ticket; a result is only applied if no later-started refresh
    /// has been applied already, so overlapping refreshes never mix.
    pub async fn refresh(&self) -> RefreshSummary {
        let ticket = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let sources: Vec<Arc<dyn PresetSource>> = self.sources.read().clone();

        let results = join_all(sources.iter().map(|source| async move {
            (source.kind(), source.list_preset_names().await)
        }))
        .await;

        let mut presets = Vec::new();
        let mut seen = HashSet::new();
        let mut failed_sources = Vec::new();

        for (kind, result) in results {
            match result {
                Ok(names) => {
                    for raw in names {
                        let raw = raw.trim();
                        if raw.is_empty() {
                            continue;
                        }
                        let name = namespaced(kind, raw);
                        if seen.insert(name.clone()) {
                            presets.push(PresetDescriptor {
                                name,
                                label: format!("{} ({})", raw, kind.label()),
                                source: kind,
                            });
                        }
                    }
                }
                Err(SourceError::NotReady(reason)) => {
                    log::debug!("[PRESETS] {} source not ready: {}", kind, reason);
                    failed_sources.push(kind);
                }
                Err(err) => {
                    log::warn!("[PRESETS] {} source failed: {}", kind, err);
                    failed_sources.push(kind);
                }
            }
        }

        let count = presets.len();
        let mut state = self.state.write();
        if ticket <= state.generation {
            log::debug!(
                "[PRESETS] Discarding refresh #{} (#{} already applied)",
                ticket,
                state.generation
            );
            return RefreshSummary {
                presets: count,
                failed_sources,
                applied: false,
            };
        }

        state.generation = ticket;
        state.presets = Arc::new(presets);
        state.refreshed_at = Some(Utc::now());
        if let Some(publisher) = &self.publisher {
            publisher.publish(&state.presets);
        }
        drop(state);

        log::info!(
            "[PRESETS] Catalog refreshed: {} presets from {} sources ({} failed)",
            count,
            sources.len(),
            failed_sources.len()
        );

        RefreshSummary {
            presets: count,
            failed_sources,
            applied: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;

    struct FakeSource {
        kind: PresetSourceKind,
        names: Vec<&'static str>,
        failing: AtomicBool,
    }

    impl FakeSource {
        fn new(kind: PresetSourceKind, names: Vec<&'static str>, failing: bool) -> Arc<Self> {
            Arc::new(Self {
                kind,
                names,
                failing: AtomicBool::new(failing),
            })
        }
    }

    #[async_trait]
    impl PresetSource for FakeSource {
        fn kind(&self) -> PresetSourceKind {
            self.kind
        }

        async fn list_preset_names(&self) -> Result<Vec<String>, SourceError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(SourceError::NotReady("booting".to_string()));
            }
            Ok(self.names.iter().map(|s| s.to_string()).collect())
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<Vec<String>>>,
    }

    impl PresetPublisher for RecordingPublisher {
        fn publish(&self, presets: &[PresetDescriptor]) {
            self.published
                .lock()
                .push(presets.iter().map(|p| p.name.clone()).collect());
        }
    }

    fn names(catalog: &PresetCatalog) -> Vec<String> {
        catalog.list().iter().map(|p| p.name.clone()).collect()
    }

    #[tokio::test]
    async fn test_failing_source_contributes_nothing_then_full_replace() {
        let publisher = Arc::new(RecordingPublisher::default());
        let catalog = PresetCatalog::new(Some(publisher.clone() as Arc<dyn PresetPublisher>));
        let chatluna = FakeSource::new(PresetSourceKind::Chatluna, vec!["helper", "coder"], false);
        let character = FakeSource::new(PresetSourceKind::Character, vec!["alice"], true);
        catalog.register_source(chatluna.clone());
        catalog.register_source(character.clone());

        let summary = catalog.refresh().await;
        assert!(summary.applied);
        assert_eq!(summary.failed_sources, vec![PresetSourceKind::Character]);
        assert_eq!(names(&catalog), vec!["chatluna:helper", "chatluna:coder"]);

        character.failing.store(false, Ordering::SeqCst);
        let summary = catalog.refresh().await;
        assert!(summary.failed_sources.is_empty());
        assert_eq!(
            names(&catalog),
            vec!["chatluna:helper", "chatluna:coder", "character:alice"]
        );

        let published = publisher.published.lock();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].len(), 3);
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let catalog = PresetCatalog::new(None);
        let source = FakeSource::new(PresetSourceKind::Chatluna, vec!["a", "a", " "], false);
        catalog.register_source(source);
        catalog.refresh().await;
        let first = names(&catalog);
        catalog.refresh().await;
        assert_eq!(first, names(&catalog));
        assert_eq!(first, vec!["chatluna:a"]);
        assert!(catalog.contains("chatluna:a"));
        assert!(catalog.last_refreshed_at().is_some());
    }

    /// Blocks its first call until released, so an older refresh finishes last
    struct GatedSource {
        calls: AtomicU64,
        gate: Notify,
    }

    #[async_trait]
    impl PresetSource for GatedSource {
        fn kind(&self) -> PresetSourceKind {
            PresetSourceKind::Chatluna
        }

        async fn list_preset_names(&self) -> Result<Vec<String>, SourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                self.gate.notified().await;
                return Ok(vec!["stale".to_string()]);
            }
            Ok(vec!["fresh".to_string()])
        }
    }

    #[tokio::test]
    async fn test_older_refresh_does_not_overwrite_newer() {
        let catalog = Arc::new(PresetCatalog::new(None));
        let source = Arc::new(GatedSource {
            calls: AtomicU64::new(0),
            gate: Notify::new(),
        });
        catalog.register_source(source.clone());

        let slow = {
            let catalog = catalog.clone();
            tokio::spawn(async move { catalog.refresh().await })
        };
        while source.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let fast = catalog.refresh().await;
        assert!(fast.applied);
        source.gate.notify_one();
        let slow = slow.await.unwrap();
        assert!(!slow.applied);
        assert_eq!(names(&catalog), vec!["chatluna:fresh"]);
    }
}
