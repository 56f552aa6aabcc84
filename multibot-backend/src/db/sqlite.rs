use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, Result as SqliteResult};
use std::path::Path;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(database_url: &str) -> SqliteResult<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(database_url).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let conn = Connection::open(database_url)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    fn init(&self) -> SqliteResult<()> {
        let conn = self.conn();

        // Conversations table (shared with the host; ids are assigned by callers)
        conn.execute(
            "CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY,
                display_name TEXT NOT NULL,
                conversation_key TEXT UNIQUE NOT NULL,
                master_user_id TEXT NOT NULL,
                preset TEXT NOT NULL DEFAULT '',
                model TEXT NOT NULL DEFAULT '',
                chat_mode TEXT NOT NULL DEFAULT 'chat',
                visibility TEXT NOT NULL DEFAULT 'private',
                auto_update INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // User memberships
        conn.execute(
            "CREATE TABLE IF NOT EXISTS conversation_members (
                user_id TEXT NOT NULL,
                conversation_id INTEGER NOT NULL,
                joined_at TEXT NOT NULL,
                PRIMARY KEY (user_id, conversation_id)
            )",
            [],
        )?;

        // Group scope associations
        conn.execute(
            "CREATE TABLE IF NOT EXISTS conversation_scopes (
                scope_id TEXT NOT NULL,
                conversation_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (scope_id, conversation_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_conversation_members_user
             ON conversation_members(user_id)",
            [],
        )?;

        Ok(())
    }
}

/// Parse an RFC 3339 column value, surfacing bad data as a conversion error
pub(crate) fn parse_timestamp(idx: usize, value: &str) -> SqliteResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// True when the error is a UNIQUE / PRIMARY KEY violation. Other constraint
/// failures (NOT NULL, CHECK, FOREIGN KEY) are real errors.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}
