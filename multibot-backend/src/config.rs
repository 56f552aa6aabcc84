use std::env;
use std::path::{Path, PathBuf};

use persona_types::Identity;
use serde::Deserialize;

/// Environment variable names - single source of truth
pub mod env_vars {
    pub const DATABASE_URL: &str = "MULTIBOT_DATABASE_URL";
    pub const CONFIG_DIR: &str = "MULTIBOT_CONFIG_DIR";
    pub const ISOLATION_ENABLED: &str = "MULTIBOT_ISOLATION_ENABLED";
    pub const MEMORY_ISOLATION: &str = "MULTIBOT_MEMORY_ISOLATION";
    pub const REFRESH_DEBOUNCE_MS: &str = "MULTIBOT_REFRESH_DEBOUNCE_MS";
    // Preset source directories
    pub const PRESET_DIR: &str = "MULTIBOT_PRESET_DIR";
    pub const CHARACTER_PRESET_DIR: &str = "MULTIBOT_CHARACTER_PRESET_DIR";
}

/// Default values
pub mod defaults {
    pub const DATABASE_URL: &str = "./.db/multibot.db";
    pub const CONFIG_DIR: &str = "config";
    pub const PRESET_DIR: &str = "presets";
    pub const CHARACTER_PRESET_DIR: &str = "characters";
    pub const REFRESH_DEBOUNCE_MS: u64 = 500;
    pub const IDENTITIES_FILE: &str = "identities.ron";
}

/// Returns the absolute path to the multibot-backend directory.
pub fn backend_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

/// Resolve a sub-directory relative to the backend directory unless the env var overrides it.
fn resolve_backend_dir(env_var: &str, default_name: &str) -> PathBuf {
    env::var(env_var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| backend_dir().join(default_name))
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| parse_flag(&v).unwrap_or(default))
        .unwrap_or(default)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },
    #[error("duplicate identity id '{0}'")]
    DuplicateIdentity(String),
    #[error("identity id '{0}' must have the form platform:selfId")]
    MalformedIdentity(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub config_dir: PathBuf,
    pub isolation: IsolationConfig,
    pub preset_dir: PathBuf,
    pub character_preset_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var(env_vars::DATABASE_URL)
                .unwrap_or_else(|_| defaults::DATABASE_URL.to_string()),
            config_dir: resolve_backend_dir(env_vars::CONFIG_DIR, defaults::CONFIG_DIR),
            isolation: IsolationConfig::from_env(),
            preset_dir: resolve_backend_dir(env_vars::PRESET_DIR, defaults::PRESET_DIR),
            character_preset_dir: resolve_backend_dir(
                env_vars::CHARACTER_PRESET_DIR,
                defaults::CHARACTER_PRESET_DIR,
            ),
        }
    }

    pub fn identities_path(&self) -> PathBuf {
        self.config_dir.join(defaults::IDENTITIES_FILE)
    }
}

/// Switches for the isolation core
#[derive(Debug, Clone)]
pub struct IsolationConfig {
    /// Master switch; when off every message passes through to host defaults
    pub enabled: bool,
    /// Prefix memory-layer user/group ids with the identity namespace
    pub memory_isolation: bool,
    /// Quiet period before a triggered catalog/registry refresh runs
    pub refresh_debounce_ms: u64,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            memory_isolation: true,
            refresh_debounce_ms: defaults::REFRESH_DEBOUNCE_MS,
        }
    }
}

impl IsolationConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env_flag(env_vars::ISOLATION_ENABLED, true),
            memory_isolation: env_flag(env_vars::MEMORY_ISOLATION, true),
            refresh_debounce_ms: env::var(env_vars::REFRESH_DEBOUNCE_MS)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults::REFRESH_DEBOUNCE_MS),
        }
    }
}

/// On-disk shape of `identities.ron`
#[derive(Debug, Default, Deserialize)]
pub struct IdentityFile {
    #[serde(default)]
    pub identities: Vec<Identity>,
}

/// Parse identity declarations from RON text, rejecting duplicates and malformed ids.
pub fn parse_identities(content: &str, origin: &str) -> Result<Vec<Identity>, ConfigError> {
    let file: IdentityFile = ron::from_str(content).map_err(|e| ConfigError::Parse {
        path: origin.to_string(),
        message: e.to_string(),
    })?;

    let mut seen = std::collections::HashSet::new();
    for identity in &file.identities {
        match identity.platform_and_self_id() {
            Some((platform, self_id)) if !platform.is_empty() && !self_id.is_empty() => {}
            _ => return Err(ConfigError::MalformedIdentity(identity.id.clone())),
        }
        if !seen.insert(identity.id.clone()) {
            return Err(ConfigError::DuplicateIdentity(identity.id.clone()));
        }
    }

    Ok(file.identities)
}

/// Load identity declarations from a RON file. A missing file yields no identities.
pub fn load_identities(path: &Path) -> Result<Vec<Identity>, ConfigError> {
    if !path.exists() {
        log::warn!("Identity file {:?} not found, no identities declared", path);
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_identities(&content, &path.display().to_string())
}
