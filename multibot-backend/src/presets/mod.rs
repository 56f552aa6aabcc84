//! Preset catalog: aggregates persona presets from several sources into one
//! namespaced list and keeps it fresh through a debounced refresh worker.

pub mod catalog;
pub mod naming;
pub mod refresh;
pub mod sources;

pub use catalog::{PresetCatalog, PresetPublisher, RefreshSummary};
pub use naming::{ResolvedPreset, namespaced, resolve_name};
pub use refresh::{CatalogRefreshJob, RefreshJob, RefreshScheduler, RefreshTrigger};
pub use sources::{DirectoryPresetSource, PresetSource, SourceError};
