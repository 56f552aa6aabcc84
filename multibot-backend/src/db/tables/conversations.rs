//! Conversation, membership and scope-association database operations

use chrono::Utc;
use rusqlite::{OptionalExtension, Result as SqliteResult, Row};

use super::super::Database;
use super::super::sqlite::parse_timestamp;
use crate::models::{
    ChatMode, ConversationRecord, MembershipRecord, NewConversation, ScopeAssociationRecord,
    Visibility,
};

const CONVERSATION_COLUMNS: &str = "id, display_name, conversation_key, master_user_id, \
     preset, model, chat_mode, visibility, auto_update, updated_at";

impl Database {
    // ============================================
    // Conversation methods
    // ============================================

    /// Highest existing conversation id plus one. Not atomic against a
    /// concurrent creator; a losing insert fails with a constraint violation.
    pub fn next_conversation_id(&self) -> SqliteResult<i64> {
        let conn = self.conn();
        conn.query_row("SELECT COALESCE(MAX(id), 0) + 1 FROM conversations", [], |row| row.get(0))
    }

    pub fn insert_conversation(&self, new: NewConversation) -> SqliteResult<ConversationRecord> {
        let conn = self.conn();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO conversations (id, display_name, conversation_key, master_user_id,
             preset, model, chat_mode, visibility, auto_update, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                new.record_id,
                &new.display_name,
                &new.conversation_key,
                &new.master_user_id,
                &new.preset,
                &new.model,
                new.chat_mode.as_str(),
                new.visibility.as_ref(),
                new.auto_update,
                now.to_rfc3339(),
            ],
        )?;

        Ok(new.into_record(now))
    }

    pub fn get_conversation(&self, id: i64) -> SqliteResult<Option<ConversationRecord>> {
        let conn = self.conn();
        let sql = format!("SELECT {} FROM conversations WHERE id = ?1", CONVERSATION_COLUMNS);
        conn.query_row(&sql, [id], Self::row_to_conversation).optional()
    }

    /// Records whose conversation key starts with `prefix`, oldest id first
    pub fn list_conversations_by_key_prefix(
        &self,
        prefix: &str,
    ) -> SqliteResult<Vec<ConversationRecord>> {
        let conn = self.conn();
        // substr comparison rather than LIKE: identity keys contain '_'
        let sql = format!(
            "SELECT {} FROM conversations
             WHERE substr(conversation_key, 1, length(?1)) = ?1
             ORDER BY id ASC",
            CONVERSATION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([prefix], Self::row_to_conversation)?;
        rows.collect()
    }

    /// Insert or fully overwrite a conversation row
    pub fn upsert_conversation(&self, record: &ConversationRecord) -> SqliteResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO conversations (id, display_name, conversation_key, master_user_id,
             preset, model, chat_mode, visibility, auto_update, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                conversation_key = excluded.conversation_key,
                master_user_id = excluded.master_user_id,
                preset = excluded.preset,
                model = excluded.model,
                chat_mode = excluded.chat_mode,
                visibility = excluded.visibility,
                auto_update = excluded.auto_update,
                updated_at = excluded.updated_at",
            rusqlite::params![
                record.record_id,
                &record.display_name,
                &record.conversation_key,
                &record.master_user_id,
                &record.preset,
                &record.model,
                record.chat_mode.as_str(),
                record.visibility.as_ref(),
                record.auto_update,
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn row_to_conversation(row: &Row<'_>) -> SqliteResult<ConversationRecord> {
        let chat_mode: String = row.get(6)?;
        let visibility: String = row.get(7)?;
        let updated_at: String = row.get(9)?;

        Ok(ConversationRecord {
            record_id: row.get(0)?,
            display_name: row.get(1)?,
            conversation_key: row.get(2)?,
            master_user_id: row.get(3)?,
            preset: row.get(4)?,
            model: row.get(5)?,
            chat_mode: ChatMode::from_str(&chat_mode).unwrap_or_default(),
            visibility: Visibility::from_str_or_default(&visibility),
            auto_update: row.get::<_, i32>(8)? != 0,
            updated_at: parse_timestamp(9, &updated_at)?,
        })
    }

    // ============================================
    // Membership methods
    // ============================================

    pub fn insert_membership(
        &self,
        user_id: &str,
        record_id: i64,
    ) -> SqliteResult<MembershipRecord> {
        let conn = self.conn();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO conversation_members (user_id, conversation_id, joined_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![user_id, record_id, now.to_rfc3339()],
        )?;
        Ok(MembershipRecord {
            user_id: user_id.to_string(),
            record_id,
            joined_at: now,
        })
    }

    pub fn list_memberships_for_user(&self, user_id: &str) -> SqliteResult<Vec<MembershipRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, conversation_id, joined_at FROM conversation_members
             WHERE user_id = ?1 ORDER BY conversation_id ASC",
        )?;
        let rows = stmt.query_map([user_id], |row| {
            let joined_at: String = row.get(2)?;
            Ok(MembershipRecord {
                user_id: row.get(0)?,
                record_id: row.get(1)?,
                joined_at: parse_timestamp(2, &joined_at)?,
            })
        })?;
        rows.collect()
    }

    // ============================================
    // Scope association methods
    // ============================================

    pub fn insert_scope_association(
        &self,
        scope_id: &str,
        record_id: i64,
    ) -> SqliteResult<ScopeAssociationRecord> {
        let conn = self.conn();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO conversation_scopes (scope_id, conversation_id, created_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![scope_id, record_id, now.to_rfc3339()],
        )?;
        Ok(ScopeAssociationRecord {
            scope_id: scope_id.to_string(),
            record_id,
            created_at: now,
        })
    }

    pub fn list_scope_associations(
        &self,
        scope_id: &str,
    ) -> SqliteResult<Vec<ScopeAssociationRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT scope_id, conversation_id, created_at FROM conversation_scopes
             WHERE scope_id = ?1 ORDER BY conversation_id ASC",
        )?;
        let rows = stmt.query_map([scope_id], |row| {
            let created_at: String = row.get(2)?;
            Ok(ScopeAssociationRecord {
                scope_id: row.get(0)?,
                record_id: row.get(1)?,
                created_at: parse_timestamp(2, &created_at)?,
            })
        })?;
        rows.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::is_unique_violation;

    fn new_conversation(id: i64, key: &str) -> NewConversation {
        NewConversation {
            record_id: id,
            display_name: format!("conv {}", id),
            conversation_key: key.to_string(),
            master_user_id: "u1".to_string(),
            preset: "helper".to_string(),
            model: "vendorA/modelX".to_string(),
            chat_mode: ChatMode::Chat,
            visibility: Visibility::Private,
            auto_update: false,
        }
    }

    #[test]
    fn test_next_id_starts_at_one() {
        let db = Database::new(":memory:").unwrap();
        assert_eq!(db.next_conversation_id().unwrap(), 1);
        db.insert_conversation(new_conversation(7, "k7")).unwrap();
        assert_eq!(db.next_conversation_id().unwrap(), 8);
    }

    #[test]
    fn test_duplicate_id_is_unique_violation() {
        let db = Database::new(":memory:").unwrap();
        db.insert_conversation(new_conversation(1, "a")).unwrap();
        let err = db.insert_conversation(new_conversation(1, "b")).unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn test_key_prefix_does_not_treat_underscore_as_wildcard() {
        let db = Database::new(":memory:").unwrap();
        db.insert_conversation(new_conversation(1, "bot_disc:42_aaa")).unwrap();
        db.insert_conversation(new_conversation(2, "botXdisc:42Xbbb")).unwrap();
        db.insert_conversation(new_conversation(3, "bot_disc:420_ccc")).unwrap();

        let found = db.list_conversations_by_key_prefix("bot_disc:42_").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].record_id, 1);
    }

    #[test]
    fn test_upsert_overwrites_fields() {
        let db = Database::new(":memory:").unwrap();
        let mut record = db.insert_conversation(new_conversation(1, "k")).unwrap();
        record.model = "vendorB/modelY".to_string();
        record.chat_mode = ChatMode::Agent;
        record.visibility = Visibility::ScopedTemplate;
        db.upsert_conversation(&record).unwrap();

        let loaded = db.get_conversation(1).unwrap().unwrap();
        assert_eq!(loaded.model, "vendorB/modelY");
        assert_eq!(loaded.chat_mode, ChatMode::Agent);
        assert_eq!(loaded.visibility, Visibility::ScopedTemplate);
    }

    #[test]
    fn test_memberships_and_scopes() {
        let db = Database::new(":memory:").unwrap();
        db.insert_membership("u1", 3).unwrap();
        db.insert_membership("u1", 1).unwrap();
        db.insert_membership("u2", 2).unwrap();
        let ids: Vec<i64> = db
            .list_memberships_for_user("u1")
            .unwrap()
            .into_iter()
            .map(|m| m.record_id)
            .collect();
        assert_eq!(ids, vec![1, 3]);

        db.insert_scope_association("g1", 3).unwrap();
        let err = db.insert_scope_association("g1", 3).unwrap_err();
        assert!(is_unique_violation(&err));
        assert_eq!(db.list_scope_associations("g1").unwrap().len(), 1);
    }

    #[test]
    fn test_get_missing_conversation() {
        let db = Database::new(":memory:").unwrap();
        assert!(db.get_conversation(99).unwrap().is_none());
    }
}
