//! Per-group symmetric key persistence.
//!
//! Group keys outlive group messages: they are required to decrypt
//! history on read and are never rotated or deleted.

use chrono::{TimeZone, Utc};
use rusqlite::{params, OptionalExtension};

use peerchat_types::{GroupKey, PeerchatError, Result};

use crate::db::{map_sql_err, Database};

/// Repository for the `group_keys` table.
#[derive(Clone)]
pub struct KeyRepository {
    db: Database,
}

impl KeyRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Stores (or replaces) a group key row. A re-received invitation
    /// for a known group overwrites with identical bytes, so REPLACE
    /// keeps this idempotent.
    pub fn store(&self, key: &GroupKey) -> Result<()> {
        let conn = self.db.lock();
        conn.execute(
            "REPLACE INTO group_keys (group_id, group_key, name, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key.group_id, key.key, key.name, key.created_at.timestamp()],
        )
        .map_err(|e| map_sql_err("failed to store group key", e))?;
        Ok(())
    }

    /// Fetches the key row for a group.
    ///
    /// # Errors
    ///
    /// [`PeerchatError::NotFound`] if the group is unknown.
    pub fn get(&self, group_id: &str) -> Result<GroupKey> {
        let conn = self.db.lock();
        conn.query_row(
            "SELECT group_id, group_key, name, created_at FROM group_keys WHERE group_id = ?1",
            params![group_id],
            |row| {
                let created_at: i64 = row.get(3)?;
                Ok(GroupKey {
                    group_id: row.get(0)?,
                    key: row.get(1)?,
                    name: row.get(2)?,
                    created_at: Utc
                        .timestamp_opt(created_at, 0)
                        .single()
                        .unwrap_or_else(Utc::now),
                })
            },
        )
        .optional()
        .map_err(|e| map_sql_err("failed to get group key", e))?
        .ok_or_else(|| PeerchatError::NotFound {
            reason: format!("no key for group {group_id}"),
        })
    }

    /// Returns the stored display name of a group, if known.
    pub fn group_name(&self, group_id: &str) -> Result<Option<String>> {
        let conn = self.db.lock();
        conn.query_row(
            "SELECT name FROM group_keys WHERE group_id = ?1",
            params![group_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| map_sql_err("failed to get group name", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> KeyRepository {
        KeyRepository::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn store_and_get_round_trip() {
        let repo = repo();
        repo.store(&GroupKey {
            group_id: "g1".into(),
            key: vec![9u8; 32],
            name: "team".into(),
            created_at: Utc::now(),
        })
        .unwrap();

        let key = repo.get("g1").unwrap();
        assert_eq!(key.key, vec![9u8; 32]);
        assert_eq!(key.name, "team");
    }

    #[test]
    fn unknown_group_is_not_found() {
        assert!(repo().get("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn replace_keeps_single_row() {
        let repo = repo();
        for _ in 0..2 {
            repo.store(&GroupKey {
                group_id: "g1".into(),
                key: vec![1u8; 32],
                name: "team".into(),
                created_at: Utc::now(),
            })
            .unwrap();
        }
        assert_eq!(repo.group_name("g1").unwrap().as_deref(), Some("team"));
    }
}
