pub mod conversation;

pub use conversation::{
    ConversationRecord, MembershipRecord, NewConversation, ScopeAssociationRecord, Visibility,
};
pub use persona_types::{
    AdminSnapshot, ChatMode, Identity, IdentitySnapshot, IdentityStatus, PresetDescriptor,
    PresetSourceKind, UpdateIdentityRequest,
};
