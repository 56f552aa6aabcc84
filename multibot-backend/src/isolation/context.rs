//! Per-message state shared by the host and the two isolation hooks.

use crate::models::{ChatMode, ConversationRecord};

/// Where a message came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageScope {
    Direct,
    Group(String),
}

impl MessageScope {
    pub fn group_id(&self) -> Option<&str> {
        match self {
            MessageScope::Direct => None,
            MessageScope::Group(id) => Some(id),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, MessageScope::Group(_))
    }
}

/// Declared persona captured by the before hook for the after hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationStash {
    pub identity_id: String,
    /// Source-local preset name; empty means "host default"
    pub preset: String,
    /// Empty means "host default"
    pub model: String,
    pub chat_mode: ChatMode,
}

#[derive(Debug, Clone)]
pub struct MessageContext {
    pub platform: String,
    pub self_id: String,
    pub user_id: String,
    pub scope: MessageScope,
    /// Conversation explicitly named by the user, if any
    pub target_conversation: Option<String>,
    /// Record the message is currently bound to
    pub conversation: Option<ConversationRecord>,
    pub isolation: Option<IsolationStash>,
}

impl MessageContext {
    pub fn new(
        platform: impl Into<String>,
        self_id: impl Into<String>,
        user_id: impl Into<String>,
        scope: MessageScope,
    ) -> Self {
        Self {
            platform: platform.into(),
            self_id: self_id.into(),
            user_id: user_id.into(),
            scope,
            target_conversation: None,
            conversation: None,
            isolation: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_conversation = Some(target.into());
        self
    }

    /// Group id for group messages, the sender for direct ones
    pub fn scope_id(&self) -> &str {
        self.scope.group_id().unwrap_or(&self.user_id)
    }

    pub fn bound_record_id(&self) -> Option<i64> {
        self.conversation.as_ref().map(|record| record.record_id)
    }
}
