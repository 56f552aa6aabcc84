//! After-hook: detect and repair isolation drift left by the host's own
//! resolution step, which may rebind the message or rewrite the record.

use chrono::Utc;
use std::sync::Arc;

use super::context::{IsolationStash, MessageContext};
use super::error::IsolationError;
use super::keys;
use super::resolver::ConversationResolver;
use crate::host::HookOutcome;
use crate::identity::StatusPatch;
use crate::models::ConversationRecord;

/// Corrected copy of `record`, or `None` when it already matches the declared
/// persona. Empty declared preset/model mean "host default" and are never
/// written; the chat mode is always enforced.
pub fn correct_record(
    record: &ConversationRecord,
    stash: &IsolationStash,
) -> Option<ConversationRecord> {
    let mut corrected = record.clone();
    let mut changed = false;

    if !stash.preset.is_empty() && corrected.preset != stash.preset {
        corrected.preset = stash.preset.clone();
        changed = true;
    }
    if !stash.model.is_empty() && corrected.model != stash.model {
        corrected.model = stash.model.clone();
        changed = true;
    }
    if corrected.chat_mode != stash.chat_mode {
        corrected.chat_mode = stash.chat_mode;
        changed = true;
    }

    changed.then_some(corrected)
}

pub struct Reconciler {
    resolver: Arc<ConversationResolver>,
}

impl Reconciler {
    pub fn new(resolver: Arc<ConversationResolver>) -> Self {
        Self { resolver }
    }

    pub async fn after_resolve(
        &self,
        ctx: &mut MessageContext,
    ) -> Result<HookOutcome, IsolationError> {
        let Some(stash) = ctx.isolation.clone() else {
            return Ok(HookOutcome::PassThrough);
        };

        match self.reconcile(&stash, ctx).await {
            Ok(record) => {
                self.resolver.registry().set_status(
                    &stash.identity_id,
                    StatusPatch::ready(Some(record.record_id), &record.preset, &record.model),
                );
                ctx.conversation = Some(record);
                Ok(HookOutcome::Continue)
            }
            Err(e) => {
                log::warn!(
                    "[RECONCILE] Failed to repair conversation for {}: {}",
                    stash.identity_id,
                    e
                );
                self.resolver
                    .registry()
                    .set_status(&stash.identity_id, StatusPatch::error(e.to_string()));
                ctx.conversation = None;
                Err(e)
            }
        }
    }

    async fn reconcile(
        &self,
        stash: &IsolationStash,
        ctx: &MessageContext,
    ) -> Result<ConversationRecord, IsolationError> {
        let store = self.resolver.store();

        // Re-read: the host may have rewritten the row without telling us
        let current = match ctx.bound_record_id() {
            Some(record_id) => store.get_by_id(record_id).await?,
            None => None,
        };

        let record = match current {
            Some(record) if keys::is_owned_by(&record.conversation_key, &stash.identity_id) => {
                record
            }
            other => {
                let replacement = self
                    .resolver
                    .find_or_create(stash, &ctx.user_id, &ctx.scope)
                    .await?;
                match other {
                    Some(foreign) => log::info!(
                        "[RECONCILE] Host bound {} to foreign conversation #{}, rebound to #{}",
                        stash.identity_id,
                        foreign.record_id,
                        replacement.record_id
                    ),
                    None => log::info!(
                        "[RECONCILE] Bound conversation for {} is gone, rebound to #{}",
                        stash.identity_id,
                        replacement.record_id
                    ),
                }
                replacement
            }
        };

        let Some(mut corrected) = correct_record(&record, stash) else {
            return Ok(record);
        };
        corrected.updated_at = Utc::now();
        store.upsert(&corrected).await?;
        log::info!(
            "[RECONCILE] Corrected conversation #{} for {} (preset: '{}', model: '{}', mode: {})",
            corrected.record_id,
            stash.identity_id,
            corrected.preset,
            corrected.model,
            corrected.chat_mode
        );
        Ok(corrected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatMode, Visibility};

    fn record(preset: &str, model: &str, chat_mode: ChatMode) -> ConversationRecord {
        ConversationRecord {
            record_id: 1,
            display_name: "conv".to_string(),
            conversation_key: keys::conversation_key("disc:42"),
            master_user_id: "u1".to_string(),
            preset: preset.to_string(),
            model: model.to_string(),
            chat_mode,
            visibility: Visibility::Private,
            auto_update: false,
            updated_at: Utc::now(),
        }
    }

    fn stash(preset: &str, model: &str, chat_mode: ChatMode) -> IsolationStash {
        IsolationStash {
            identity_id: "disc:42".to_string(),
            preset: preset.to_string(),
            model: model.to_string(),
            chat_mode,
        }
    }

    #[test]
    fn test_matching_record_needs_no_correction() {
        let r = record("helper", "vendorA/modelX", ChatMode::Chat);
        assert!(correct_record(&r, &stash("helper", "vendorA/modelX", ChatMode::Chat)).is_none());
    }

    #[test]
    fn test_empty_declared_values_never_overwrite() {
        let r = record("hostpreset", "vendorB/other", ChatMode::Chat);
        let fixed = correct_record(&r, &stash("", "vendorA/modelX", ChatMode::Chat)).unwrap();
        assert_eq!(fixed.preset, "hostpreset");
        assert_eq!(fixed.model, "vendorA/modelX");

        assert!(correct_record(&r, &stash("", "", ChatMode::Chat)).is_none());
    }

    #[test]
    fn test_chat_mode_always_enforced() {
        let r = record("helper", "m", ChatMode::Chat);
        let fixed = correct_record(&r, &stash("", "", ChatMode::Agent)).unwrap();
        assert_eq!(fixed.chat_mode, ChatMode::Agent);
        assert!(correct_record(&fixed, &stash("", "", ChatMode::Agent)).is_none());
    }
}
