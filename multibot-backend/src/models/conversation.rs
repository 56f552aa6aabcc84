//! Conversation records and the link rows that tie users and group scopes to them.

use chrono::{DateTime, Utc};
use persona_types::ChatMode;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Who may see and join a conversation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Visibility {
    /// One user's own conversation (direct messages)
    #[default]
    Private,
    /// Conversation created for a group scope and used as that group's template
    ScopedTemplate,
    Public,
}

impl Visibility {
    /// Parse from string, defaulting to Private if invalid
    pub fn from_str_or_default(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

/// One row of the host's shared conversation table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub record_id: i64,
    pub display_name: String,
    /// Ownership token; isolated records always carry `bot_<identityId>_<uuid>`
    pub conversation_key: String,
    pub master_user_id: String,
    pub preset: String,
    pub model: String,
    pub chat_mode: ChatMode,
    pub visibility: Visibility,
    pub auto_update: bool,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a record that has not been written yet
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub record_id: i64,
    pub display_name: String,
    pub conversation_key: String,
    pub master_user_id: String,
    pub preset: String,
    pub model: String,
    pub chat_mode: ChatMode,
    pub visibility: Visibility,
    pub auto_update: bool,
}

impl NewConversation {
    pub fn into_record(self, updated_at: DateTime<Utc>) -> ConversationRecord {
        ConversationRecord {
            record_id: self.record_id,
            display_name: self.display_name,
            conversation_key: self.conversation_key,
            master_user_id: self.master_user_id,
            preset: self.preset,
            model: self.model,
            chat_mode: self.chat_mode,
            visibility: self.visibility,
            auto_update: self.auto_update,
            updated_at,
        }
    }
}

/// A user's membership in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub user_id: String,
    pub record_id: i64,
    pub joined_at: DateTime<Utc>,
}

/// A group scope's association with a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeAssociationRecord {
    pub scope_id: String,
    pub record_id: i64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_strings() {
        assert_eq!(Visibility::ScopedTemplate.as_ref(), "scoped_template");
        assert_eq!(Visibility::from_str_or_default("public"), Visibility::Public);
        assert_eq!(Visibility::from_str_or_default("bogus"), Visibility::Private);
    }
}
