//! Identity registry: declared identities plus their live status.
//!
//! Both maps are replace-on-write. Readers take a cheap `Arc` snapshot of the
//! identity table; a configuration reload swaps the whole table at once, and
//! a status update replaces one entry with a merged copy.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{Identity, IdentityStatus, UpdateIdentityRequest};

/// Partial status update merged by [`IdentityRegistry::set_status`]
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
    pub initialized: Option<bool>,
    pub conversation_record_id: Option<i64>,
    pub current_preset: Option<String>,
    pub current_model: Option<String>,
    /// `Some(None)` clears a previous error
    pub last_error: Option<Option<String>>,
}

impl StatusPatch {
    /// Isolation established on `record_id` with the given persona
    pub fn ready(record_id: Option<i64>, preset: &str, model: &str) -> Self {
        Self {
            initialized: Some(true),
            conversation_record_id: record_id,
            current_preset: Some(preset.to_string()),
            current_model: Some(model.to_string()),
            last_error: Some(None),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            last_error: Some(Some(message.into())),
            ..Default::default()
        }
    }

    fn apply(self, status: &mut IdentityStatus) {
        if let Some(initialized) = self.initialized {
            status.initialized = initialized;
        }
        if let Some(id) = self.conversation_record_id {
            status.conversation_record_id = Some(id);
        }
        if let Some(preset) = self.current_preset {
            status.current_preset = Some(preset);
        }
        if let Some(model) = self.current_model {
            status.current_model = Some(model);
        }
        if let Some(error) = self.last_error {
            status.last_error = error;
        }
    }
}

#[derive(Default)]
pub struct IdentityRegistry {
    identities: RwLock<Arc<HashMap<String, Identity>>>,
    statuses: RwLock<HashMap<String, IdentityStatus>>,
}

impl IdentityRegistry {
    pub fn new(identities: Vec<Identity>) -> Self {
        let registry = Self::default();
        registry.replace_identities(identities);
        registry
    }

    /// Namespace id for a bot account: `platform:selfId`
    pub fn identity_id(platform: &str, self_id: &str) -> String {
        format!("{}:{}", platform, self_id)
    }

    /// Swap in a freshly loaded identity set. Statuses of identities that
    /// no longer exist are dropped.
    pub fn replace_identities(&self, identities: Vec<Identity>) {
        let table: HashMap<String, Identity> = identities
            .into_iter()
            .map(|identity| (identity.id.clone(), identity))
            .collect();

        self.statuses.write().retain(|id, _| table.contains_key(id));
        let count = table.len();
        *self.identities.write() = Arc::new(table);
        log::info!("[IDENTITY] Loaded {} identities", count);
    }

    fn snapshot(&self) -> Arc<HashMap<String, Identity>> {
        Arc::clone(&self.identities.read())
    }

    pub fn get_config(&self, identity_id: &str) -> Option<Identity> {
        self.snapshot().get(identity_id).cloned()
    }

    /// The enabled identity for a bot account, if any
    pub fn enabled_identity(&self, platform: &str, self_id: &str) -> Option<Identity> {
        self.get_config(&Self::identity_id(platform, self_id))
            .filter(|identity| identity.enabled)
    }

    /// Enabled identities sorted by id
    pub fn list_enabled(&self) -> Vec<Identity> {
        let mut enabled: Vec<Identity> = self
            .snapshot()
            .values()
            .filter(|identity| identity.enabled)
            .cloned()
            .collect();
        enabled.sort_by(|a, b| a.id.cmp(&b.id));
        enabled
    }

    /// All identities sorted by id
    pub fn list_all(&self) -> Vec<Identity> {
        let mut all: Vec<Identity> = self.snapshot().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Apply the administrative "update one identity's persona" mutation.
    /// Returns the updated identity, or `None` if it is not declared.
    pub fn update_persona(&self, request: &UpdateIdentityRequest) -> Option<Identity> {
        let mut guard = self.identities.write();
        let mut table = HashMap::clone(&guard);
        let identity = table.get_mut(&request.identity_id)?;

        if let Some(preset) = &request.preset {
            identity.preset = preset.trim().to_string();
        }
        if let Some(model) = &request.model {
            identity.model = model.trim().to_string();
        }
        if let Some(chat_mode) = request.chat_mode {
            identity.chat_mode = chat_mode;
        }
        let updated = identity.clone();
        *guard = Arc::new(table);

        log::info!(
            "[IDENTITY] Updated persona for {} (preset: '{}', model: '{}', mode: {})",
            updated.id,
            updated.preset,
            updated.model,
            updated.chat_mode
        );
        Some(updated)
    }

    /// Merge `patch` into the identity's status, creating a default entry first
    pub fn set_status(&self, identity_id: &str, patch: StatusPatch) {
        let mut statuses = self.statuses.write();
        let mut status = statuses
            .get(identity_id)
            .cloned()
            .unwrap_or_else(|| IdentityStatus::new(identity_id));
        patch.apply(&mut status);
        statuses.insert(identity_id.to_string(), status);
    }

    pub fn get_status(&self, identity_id: &str) -> Option<IdentityStatus> {
        self.statuses.read().get(identity_id).cloned()
    }

    /// All statuses sorted by identity id
    pub fn statuses(&self) -> Vec<IdentityStatus> {
        let mut all: Vec<IdentityStatus> = self.statuses.read().values().cloned().collect();
        all.sort_by(|a, b| a.identity_id.cmp(&b.identity_id));
        all
    }
}
