//! Where identity declarations come from on startup and on reload.

use std::path::PathBuf;

use crate::config;
use crate::models::Identity;

pub trait IdentitySource: Send + Sync {
    fn load_identities(&self) -> Result<Vec<Identity>, String>;
}

/// Identities declared in an `identities.ron` file
pub struct RonIdentityFile {
    path: PathBuf,
}

impl RonIdentityFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IdentitySource for RonIdentityFile {
    fn load_identities(&self) -> Result<Vec<Identity>, String> {
        config::load_identities(&self.path).map_err(|e| e.to_string())
    }
}

/// A fixed identity set, for hosts that hand identities over in-process
pub struct StaticIdentities(pub Vec<Identity>);

impl IdentitySource for StaticIdentities {
    fn load_identities(&self) -> Result<Vec<Identity>, String> {
        Ok(self.0.clone())
    }
}
