//! Conversation store adapter.
//!
//! A thin async CRUD surface over the host's conversation, membership and
//! scope-association tables. The isolation core only talks to storage through
//! [`ConversationStore`]; [`SqliteConversationStore`] is the shipped backend.

use async_trait::async_trait;
use std::sync::Arc;

use crate::db::Database;
use crate::models::{
    ConversationRecord, MembershipRecord, NewConversation, ScopeAssociationRecord,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A create hit a uniqueness constraint; callers treat this as idempotent
    /// success
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("database error: {0}")]
    Database(#[source] rusqlite::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if crate::db::is_unique_violation(&err) {
            StoreError::AlreadyExists(err.to_string())
        } else {
            StoreError::Database(err)
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Max existing record id plus one
    async fn next_record_id(&self) -> StoreResult<i64>;

    async fn create_record(&self, record: NewConversation) -> StoreResult<ConversationRecord>;

    async fn create_membership(
        &self,
        user_id: &str,
        record_id: i64,
    ) -> StoreResult<MembershipRecord>;

    async fn create_scope_association(
        &self,
        scope_id: &str,
        record_id: i64,
    ) -> StoreResult<ScopeAssociationRecord>;

    async fn get_by_id(&self, record_id: i64) -> StoreResult<Option<ConversationRecord>>;

    async fn query_by_key_prefix(&self, prefix: &str) -> StoreResult<Vec<ConversationRecord>>;

    async fn memberships_for_user(&self, user_id: &str) -> StoreResult<Vec<MembershipRecord>>;

    async fn scope_associations_for(
        &self,
        scope_id: &str,
    ) -> StoreResult<Vec<ScopeAssociationRecord>>;

    /// Full overwrite of an existing record (or insert when absent)
    async fn upsert(&self, record: &ConversationRecord) -> StoreResult<()>;
}

/// [`ConversationStore`] backed by the local SQLite database
pub struct SqliteConversationStore {
    db: Arc<Database>,
}

impl SqliteConversationStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn next_record_id(&self) -> StoreResult<i64> {
        Ok(self.db.next_conversation_id()?)
    }

    async fn create_record(&self, record: NewConversation) -> StoreResult<ConversationRecord> {
        Ok(self.db.insert_conversation(record)?)
    }

    async fn create_membership(
        &self,
        user_id: &str,
        record_id: i64,
    ) -> StoreResult<MembershipRecord> {
        Ok(self.db.insert_membership(user_id, record_id)?)
    }

    async fn create_scope_association(
        &self,
        scope_id: &str,
        record_id: i64,
    ) -> StoreResult<ScopeAssociationRecord> {
        Ok(self.db.insert_scope_association(scope_id, record_id)?)
    }

    async fn get_by_id(&self, record_id: i64) -> StoreResult<Option<ConversationRecord>> {
        Ok(self.db.get_conversation(record_id)?)
    }

    async fn query_by_key_prefix(&self, prefix: &str) -> StoreResult<Vec<ConversationRecord>> {
        Ok(self.db.list_conversations_by_key_prefix(prefix)?)
    }

    async fn memberships_for_user(&self, user_id: &str) -> StoreResult<Vec<MembershipRecord>> {
        Ok(self.db.list_memberships_for_user(user_id)?)
    }

    async fn scope_associations_for(
        &self,
        scope_id: &str,
    ) -> StoreResult<Vec<ScopeAssociationRecord>> {
        Ok(self.db.list_scope_associations(scope_id)?)
    }

    async fn upsert(&self, record: &ConversationRecord) -> StoreResult<()> {
        Ok(self.db.upsert_conversation(record)?)
    }
}
