//! Ownership tokens stored in `conversation_key`.
//!
//! Conversation records have no identity column, so the key is the only
//! reliable ownership signal: isolated records always carry
//! `bot_<identityId>_<uuid>` and ownership is re-derived by prefix match.

use uuid::Uuid;

const KEY_PREFIX: &str = "bot_";

/// Fresh ownership key for a record created on behalf of `identity_id`
pub fn conversation_key(identity_id: &str) -> String {
    format!("{}{}", owner_prefix(identity_id), Uuid::new_v4())
}

/// Prefix shared by every record owned by `identity_id`
pub fn owner_prefix(identity_id: &str) -> String {
    format!("{}{}_", KEY_PREFIX, identity_id)
}

pub fn is_owned_by(conversation_key: &str, identity_id: &str) -> bool {
    conversation_key.starts_with(&owner_prefix(identity_id))
}
