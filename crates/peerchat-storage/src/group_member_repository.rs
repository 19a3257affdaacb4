//! Group membership persistence.

use std::collections::BTreeMap;

use rusqlite::params;

use peerchat_types::{PeerchatError, Result};

use crate::db::{map_sql_err, Database};

/// Repository for the `group_members` table.
#[derive(Clone)]
pub struct GroupMemberRepository {
    db: Database,
}

impl GroupMemberRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Adds members to a group in one transaction. Idempotent per
    /// member via `INSERT OR IGNORE`.
    pub fn add_members(&self, group_id: &str, peer_ids: &[String]) -> Result<()> {
        if group_id.is_empty() {
            return Err(PeerchatError::InvalidInput {
                reason: "group id cannot be empty".into(),
            });
        }
        if peer_ids.is_empty() {
            return Ok(());
        }

        let mut conn = self.db.lock();
        let tx = conn
            .transaction()
            .map_err(|e| map_sql_err("failed to begin member transaction", e))?;

        {
            let mut stmt = tx
                .prepare("INSERT OR IGNORE INTO group_members (group_id, peer_id) VALUES (?1, ?2)")
                .map_err(|e| map_sql_err("failed to prepare member insert", e))?;

            for peer_id in peer_ids {
                if peer_id.is_empty() {
                    tracing::warn!(%group_id, "skipping empty peer id in member list");
                    continue;
                }
                stmt.execute(params![group_id, peer_id])
                    .map_err(|e| map_sql_err("failed to insert group member", e))?;
            }
        }

        tx.commit()
            .map_err(|e| map_sql_err("failed to commit member transaction", e))?;
        Ok(())
    }

    /// Returns every group ID with its member list, sorted by group.
    pub fn groups_with_members(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare("SELECT group_id, peer_id FROM group_members ORDER BY group_id")
            .map_err(|e| map_sql_err("failed to prepare member query", e))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| map_sql_err("failed to query group members", e))?;

        let mut result: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in rows {
            let (group_id, peer_id) =
                row.map_err(|e| map_sql_err("failed to scan member row", e))?;
            result.entry(group_id).or_default().push(peer_id);
        }
        Ok(result)
    }

    /// Returns the member list for one group (empty if unknown).
    pub fn members_of(&self, group_id: &str) -> Result<Vec<String>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare("SELECT peer_id FROM group_members WHERE group_id = ?1 ORDER BY peer_id")
            .map_err(|e| map_sql_err("failed to prepare member query", e))?;

        let rows = stmt
            .query_map(params![group_id], |row| row.get::<_, String>(0))
            .map_err(|e| map_sql_err("failed to query members", e))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| map_sql_err("failed to scan member row", e))
    }
}
