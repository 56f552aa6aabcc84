//! Preset sources queried by the catalog on every refresh.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::models::PresetSourceKind;

/// File extensions recognised as preset definitions
const PRESET_EXTENSIONS: &[&str] = &["yml", "yaml", "txt", "md"];

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The backing subsystem has not finished starting; try again next refresh
    #[error("not ready: {0}")]
    NotReady(String),
    /// Bad path or permissions; stays broken until configuration changes
    #[error("misconfigured: {0}")]
    Misconfigured(String),
    #[error("{0}")]
    Failed(String),
}

#[async_trait]
pub trait PresetSource: Send + Sync {
    fn kind(&self) -> PresetSourceKind;

    /// Raw (un-namespaced) preset names currently offered
    async fn list_preset_names(&self) -> Result<Vec<String>, SourceError>;
}

/// Presets stored as one file per preset in a directory; the file stem is the name
pub struct DirectoryPresetSource {
    kind: PresetSourceKind,
    dir: PathBuf,
}

impl DirectoryPresetSource {
    pub fn new(kind: PresetSourceKind, dir: impl Into<PathBuf>) -> Self {
        Self { kind, dir: dir.into() }
    }

    fn classify(&self, err: std::io::Error) -> SourceError {
        let location = self.dir.display();
        match err.kind() {
            ErrorKind::NotFound => {
                SourceError::NotReady(format!("{} does not exist yet", location))
            }
            ErrorKind::PermissionDenied => {
                SourceError::Misconfigured(format!("permission denied reading {}", location))
            }
            _ => SourceError::Failed(format!("{}: {}", location, err)),
        }
    }
}

#[async_trait]
impl PresetSource for DirectoryPresetSource {
    fn kind(&self) -> PresetSourceKind {
        self.kind
    }

    async fn list_preset_names(&self) -> Result<Vec<String>, SourceError> {
        let metadata = tokio::fs::metadata(&self.dir).await.map_err(|e| self.classify(e))?;
        if !metadata.is_dir() {
            return Err(SourceError::Misconfigured(format!(
                "{} is not a directory",
                self.dir.display()
            )));
        }

        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| self.classify(e))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| self.classify(e))? {
            let path = entry.path();
            let is_preset = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| PRESET_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false);
            if !is_preset || !path.is_file() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }

        names.sort();
        names.dedup();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_lists_preset_stems() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("helper.yml"), "prompt").unwrap();
        std::fs::write(dir.path().join("coder.YAML"), "prompt").unwrap();
        std::fs::write(dir.path().join("notes.json"), "{}").unwrap();
        std::fs::create_dir(dir.path().join("nested.yml")).unwrap();

        let source = DirectoryPresetSource::new(PresetSourceKind::Chatluna, dir.path());
        let names = source.list_preset_names().await.unwrap();
        assert_eq!(names, vec!["coder".to_string(), "helper".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_dir_is_not_ready() {
        let dir = tempdir().unwrap();
        let absent = dir.path().join("absent");
        let source = DirectoryPresetSource::new(PresetSourceKind::Character, absent);
        assert!(matches!(source.list_preset_names().await, Err(SourceError::NotReady(_))));
    }

    #[tokio::test]
    async fn test_file_path_is_misconfigured() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("presets.yml");
        std::fs::write(&file, "x").unwrap();
        let source = DirectoryPresetSource::new(PresetSourceKind::Chatluna, &file);
        assert!(matches!(source.list_preset_names().await, Err(SourceError::Misconfigured(_))));
    }
}
