use std::sync::Arc;

use crate::identity::IdentityRegistry;

/// The identifiers a memory context layer is keyed by, as handed to us by
/// the memory subsystem when it initializes the layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLayer {
    pub platform: String,
    pub self_id: String,
    pub user_id: Option<String>,
    pub group_id: Option<String>,
}

/// Rewrites user/group ids to `<identityId>_<id>` so each bot identity keeps
/// its own memories
pub struct MemoryNamespaceInjector {
    registry: Arc<IdentityRegistry>,
    enabled: bool,
}

impl MemoryNamespaceInjector {
    pub fn new(registry: Arc<IdentityRegistry>, enabled: bool) -> Self {
        Self { registry, enabled }
    }

    /// Returns true when any id was rewritten
    pub fn on_layer_init(&self, layer: &mut MemoryLayer) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(identity) = self.registry.enabled_identity(&layer.platform, &layer.self_id) else {
            return false;
        };

        let prefix = format!("{}_", identity.id);
        let mut rewritten = false;
        for id in [&mut layer.user_id, &mut layer.group_id].into_iter().flatten() {
            if id.is_empty() || id.starts_with(&prefix) {
                continue;
            }
            *id = format!("{}{}", prefix, id);
            rewritten = true;
        }

        if rewritten {
            log::debug!(
                "[MEMORY_NS] Namespaced layer for {} (user: {:?}, group: {:?})",
                identity.id,
                layer.user_id,
                layer.group_id
            );
        }
        rewritten
    }
}
