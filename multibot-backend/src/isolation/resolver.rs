//! Before-hook: bind each message to the isolated conversation of its bot identity.

use std::collections::HashSet;
use std::sync::Arc;

use super::context::{IsolationStash, MessageContext, MessageScope};
use super::error::IsolationError;
use super::keys;
use crate::host::{HookOutcome, PersonaSubsystem};
use crate::identity::{IdentityRegistry, StatusPatch};
use crate::models::{
    ConversationRecord, Identity, NewConversation, PresetSourceKind, Visibility,
};
use crate::presets::resolve_name;
use crate::store::{ConversationStore, StoreResult};

/// Pick the record a message should bind to among the records owned by its
/// identity that the user (or the group) already has. `owned` must be sorted
/// by record id so concurrent duplicates always converge on the oldest one.
///
/// A direct message never lands on a group's scoped template, nor on a
/// non-private record some other user created.
pub fn select_candidate<'a>(
    owned: &'a [ConversationRecord],
    user_id: &str,
    scope: &MessageScope,
    group_records: &HashSet<i64>,
) -> Option<&'a ConversationRecord> {
    match scope {
        MessageScope::Group(_) => {
            let associated: Vec<&ConversationRecord> = owned
                .iter()
                .filter(|r| group_records.contains(&r.record_id))
                .collect();
            associated
                .iter()
                .find(|r| r.visibility == Visibility::ScopedTemplate)
                .or_else(|| associated.first())
                .copied()
        }
        MessageScope::Direct => owned
            .iter()
            .find(|r| r.visibility == Visibility::Private && r.master_user_id == user_id)
            .or_else(|| owned.iter().find(|r| r.visibility == Visibility::Private))
            .or_else(|| {
                owned.iter().find(|r| {
                    r.master_user_id == user_id && r.visibility != Visibility::ScopedTemplate
                })
            }),
    }
}

fn ignore_existing<T>(result: StoreResult<T>) -> StoreResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_already_exists() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Result of the find step, plus the links the user and the group already
/// have so the caller only inserts the missing ones
#[derive(Default)]
struct Lookup {
    record: Option<ConversationRecord>,
    memberships: HashSet<i64>,
    group_records: HashSet<i64>,
}

pub struct ConversationResolver {
    registry: Arc<IdentityRegistry>,
    store: Arc<dyn ConversationStore>,
    persona: Option<Arc<dyn PersonaSubsystem>>,
    enabled: bool,
}

impl ConversationResolver {
    pub fn new(
        registry: Arc<IdentityRegistry>,
        store: Arc<dyn ConversationStore>,
        persona: Option<Arc<dyn PersonaSubsystem>>,
        enabled: bool,
    ) -> Self {
        Self {
            registry,
            store,
            persona,
            enabled,
        }
    }

    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub async fn before_resolve(
        &self,
        ctx: &mut MessageContext,
    ) -> Result<HookOutcome, IsolationError> {
        if !self.enabled {
            return Ok(HookOutcome::PassThrough);
        }
        let Some(identity) = self.registry.enabled_identity(&ctx.platform, &ctx.self_id) else {
            return Ok(HookOutcome::PassThrough);
        };
        if !identity.declares_persona() {
            log::debug!(
                "[ISOLATION] {} declares no persona, using host defaults",
                identity.id
            );
            return Ok(HookOutcome::PassThrough);
        }

        let result = self.resolve_for(&identity, ctx).await;
        if let Err(e) = &result {
            log::warn!(
                "[ISOLATION] Failed to resolve conversation for {}: {}",
                identity.id,
                e
            );
            self.registry.set_status(&identity.id, StatusPatch::error(e.to_string()));
            ctx.conversation = None;
            ctx.isolation = None;
        }
        result
    }

    async fn resolve_for(
        &self,
        identity: &Identity,
        ctx: &mut MessageContext,
    ) -> Result<HookOutcome, IsolationError> {
        let preset = resolve_name(&identity.preset);
        let declared_preset = if identity.preset.trim().is_empty() {
            String::new()
        } else {
            preset.name.clone()
        };
        let model = identity.model.trim().to_string();

        if preset.source == PresetSourceKind::Character && !declared_preset.is_empty() {
            return self.hand_to_persona(identity, ctx, &declared_preset, &model).await;
        }

        let stash = IsolationStash {
            identity_id: identity.id.clone(),
            preset: declared_preset,
            model,
            chat_mode: identity.chat_mode,
        };

        let record = match self.find_by_target(&stash.identity_id, ctx).await? {
            Some(record) => record,
            None => self.find_or_create(&stash, &ctx.user_id, &ctx.scope).await?,
        };

        log::debug!(
            "[ISOLATION] Bound {} message from {} to conversation #{}",
            stash.identity_id,
            ctx.user_id,
            record.record_id
        );
        ctx.conversation = Some(record);
        ctx.isolation = Some(stash);
        Ok(HookOutcome::Continue)
    }

    async fn hand_to_persona(
        &self,
        identity: &Identity,
        ctx: &MessageContext,
        preset: &str,
        model: &str,
    ) -> Result<HookOutcome, IsolationError> {
        let Some(persona) = &self.persona else {
            log::warn!(
                "[ISOLATION] {} uses character preset '{}' but no persona subsystem is attached",
                identity.id,
                preset
            );
            return Ok(HookOutcome::PassThrough);
        };

        let scope_key = format!("{}:{}", identity.id, ctx.scope_id());
        persona
            .configure_scope(&scope_key, preset, model)
            .await
            .map_err(IsolationError::Persona)?;

        self.registry.set_status(&identity.id, StatusPatch::ready(None, preset, model));
        log::debug!("[ISOLATION] Character persona '{}' handles {}", preset, scope_key);
        Ok(HookOutcome::Stop)
    }

    /// Owned record whose display name or id equals the user-specified target
    async fn find_by_target(
        &self,
        identity_id: &str,
        ctx: &MessageContext,
    ) -> StoreResult<Option<ConversationRecord>> {
        let Some(target) = ctx.target_conversation.as_deref().map(str::trim) else {
            return Ok(None);
        };
        if target.is_empty() {
            return Ok(None);
        }

        let owned = self.store.query_by_key_prefix(&keys::owner_prefix(identity_id)).await?;
        let found = owned
            .into_iter()
            .find(|r| r.display_name == target || r.record_id.to_string() == target);
        if found.is_none() {
            log::debug!(
                "[ISOLATION] Target '{}' is not owned by {}, resolving normally",
                target,
                identity_id
            );
        }
        Ok(found)
    }

    /// Existing isolated record for this identity and user/scope, with the
    /// links already in place
    async fn find_existing(
        &self,
        identity_id: &str,
        user_id: &str,
        scope: &MessageScope,
    ) -> StoreResult<Lookup> {
        let owned = self
            .store
            .query_by_key_prefix(&keys::owner_prefix(identity_id))
            .await?;
        if owned.is_empty() {
            return Ok(Lookup::default());
        }

        let memberships: HashSet<i64> = self
            .store
            .memberships_for_user(user_id)
            .await?
            .into_iter()
            .map(|m| m.record_id)
            .collect();

        let mut visible = memberships.clone();
        let mut group_records = HashSet::new();
        if let Some(group_id) = scope.group_id() {
            group_records = self
                .store
                .scope_associations_for(group_id)
                .await?
                .into_iter()
                .map(|a| a.record_id)
                .collect();
            visible.extend(group_records.iter().copied());
        }

        let candidates: Vec<ConversationRecord> = owned
            .into_iter()
            .filter(|r| visible.contains(&r.record_id))
            .collect();
        let record = select_candidate(&candidates, user_id, scope, &group_records).cloned();
        Ok(Lookup {
            record,
            memberships,
            group_records,
        })
    }

    /// Find the isolated record for this user/scope, creating it when absent.
    /// Also used by the after hook to repair a foreign binding.
    pub async fn find_or_create(
        &self,
        stash: &IsolationStash,
        user_id: &str,
        scope: &MessageScope,
    ) -> StoreResult<ConversationRecord> {
        let lookup = self.find_existing(&stash.identity_id, user_id, scope).await?;
        let record = match lookup.record {
            Some(record) => record,
            None => self.create(stash, user_id, scope).await?,
        };

        // Group members that found the group's record still need their own link
        if !lookup.memberships.contains(&record.record_id) {
            ignore_existing(self.store.create_membership(user_id, record.record_id).await)?;
        }
        if let Some(group_id) = scope.group_id() {
            if !lookup.group_records.contains(&record.record_id) {
                let linked = self
                    .store
                    .create_scope_association(group_id, record.record_id)
                    .await;
                ignore_existing(linked)?;
            }
        }
        Ok(record)
    }

    async fn create(
        &self,
        stash: &IsolationStash,
        user_id: &str,
        scope: &MessageScope,
    ) -> StoreResult<ConversationRecord> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let fields = self.new_record(stash, user_id, scope).await?;
            match self.store.create_record(fields).await {
                Ok(record) => {
                    log::info!(
                        "[ISOLATION] Created conversation #{} ({}) for {}",
                        record.record_id,
                        record.conversation_key,
                        stash.identity_id
                    );
                    return Ok(record);
                }
                Err(e) if e.is_already_exists() => {
                    // Someone else created first; theirs is as good as ours
                    let lookup = self.find_existing(&stash.identity_id, user_id, scope).await?;
                    if let Some(record) = lookup.record {
                        return Ok(record);
                    }
                    if attempts >= 2 {
                        return Err(e);
                    }
                    log::debug!("[ISOLATION] Record id taken, retrying with a fresh id");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn new_record(
        &self,
        stash: &IsolationStash,
        user_id: &str,
        scope: &MessageScope,
    ) -> StoreResult<NewConversation> {
        let record_id = self.store.next_record_id().await?;
        let (display_name, visibility) = match scope {
            MessageScope::Direct => (
                format!("{} / {}", stash.identity_id, user_id),
                Visibility::Private,
            ),
            MessageScope::Group(group_id) => (
                format!("{} / group {}", stash.identity_id, group_id),
                Visibility::ScopedTemplate,
            ),
        };
        Ok(NewConversation {
            record_id,
            display_name,
            conversation_key: keys::conversation_key(&stash.identity_id),
            master_user_id: user_id.to_string(),
            preset: stash.preset.clone(),
            model: stash.model.clone(),
            chat_mode: stash.chat_mode,
            visibility,
            auto_update: false,
        })
    }
}
