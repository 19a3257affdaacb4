//! Database connection management.
//!
//! [`Database`] owns the [`rusqlite::Connection`] and guarantees the
//! schema exists before any repository touches it. Repositories share
//! the connection through an `Arc<Mutex<_>>`; WAL journalling plus
//! the 5-second busy timeout cover concurrent access from the event
//! consumers and API handlers.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use peerchat_types::{PeerchatError, Result};

/// SQLite busy timeout, matching the per-call DB deadlines.
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Idempotent schema batch, executed on every open. Any future schema
/// change must stay in `CREATE TABLE IF NOT EXISTS` / additive form.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_peer_id TEXT NOT NULL,
    recipient_peer_id TEXT NOT NULL,
    send_time TEXT NOT NULL,              -- RFC 3339
    content BLOB NOT NULL,                -- ciphertext under the data key
    is_outgoing BOOLEAN NOT NULL
);

CREATE TABLE IF NOT EXISTS relationships (
    peer_id TEXT PRIMARY KEY NOT NULL,
    status TEXT NOT NULL DEFAULT '0',
    requested_at TEXT DEFAULT NULL,
    approved_at TEXT DEFAULT NULL
);

CREATE TABLE IF NOT EXISTS group_keys (
    group_id TEXT PRIMARY KEY NOT NULL,
    group_key BLOB NOT NULL,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id TEXT NOT NULL,
    peer_id TEXT NOT NULL,
    UNIQUE(group_id, peer_id)
);

CREATE TABLE IF NOT EXISTS group_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id TEXT NOT NULL,
    sender_peer_id TEXT NOT NULL,
    content BLOB NOT NULL,                -- ciphertext under the data key
    sent_at INTEGER NOT NULL              -- unix seconds
);

CREATE TABLE IF NOT EXISTS display_names (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id TEXT NOT NULL,              -- peer_id or group_id
    entity_type TEXT NOT NULL,            -- 'friend' or 'group'
    display_name TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(entity_id, entity_type)
);

CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages (recipient_peer_id);
CREATE INDEX IF NOT EXISTS idx_relationships_peer_id ON relationships (peer_id);
CREATE INDEX IF NOT EXISTS idx_group_messages_group ON group_messages (group_id, sent_at);
CREATE INDEX IF NOT EXISTS idx_display_names_entity ON display_names (entity_id, entity_type);
"#;

/// Shared handle to the daemon database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database at `path` and applies the
    /// schema.
    ///
    /// # Errors
    ///
    /// Returns [`PeerchatError::PersistenceFailure`] if the file
    /// cannot be opened or the schema cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(path).map_err(|e| PeerchatError::PersistenceFailure {
            reason: format!("failed to open database {}: {e}", path.display()),
        })?;

        Self::configure(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database. Test use only.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| PeerchatError::PersistenceFailure {
            reason: format!("failed to open in-memory database: {e}"),
        })?;
        Self::configure(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(Self::pragma_err)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(Self::pragma_err)?;
        conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)
            .map_err(Self::pragma_err)?;

        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| PeerchatError::PersistenceFailure {
                reason: format!("failed to apply schema: {e}"),
            })?;

        tracing::debug!("database schema ready");
        Ok(())
    }

    fn pragma_err(e: rusqlite::Error) -> PeerchatError {
        PeerchatError::PersistenceFailure {
            reason: format!("failed to set pragma: {e}"),
        }
    }

    /// Locks the connection for one repository operation. Holders
    /// must not perform I/O other than the statement itself.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        // A poisoned mutex means a repository panicked mid-statement;
        // the connection itself is still valid.
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Maps a rusqlite error to the workspace error, distinguishing the
/// "no rows" case as [`PeerchatError::NotFound`].
pub(crate) fn map_sql_err(context: &str, e: rusqlite::Error) -> PeerchatError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => PeerchatError::NotFound {
            reason: context.to_string(),
        },
        other => PeerchatError::PersistenceFailure {
            reason: format!("{context}: {other}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("chat.db")).unwrap();

        let conn = db.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN
                 ('messages','relationships','group_keys','group_members','group_messages','display_names')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 6);
    }

    #[test]
    fn reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");
        drop(Database::open(&path).unwrap());
        // Second open re-runs the DDL batch without error.
        Database::open(&path).unwrap();
    }
}
