//! Friendship relation persistence.
//!
//! One row per peer. Status transitions are last-writer-wins on
//! `update_status`; insertion is idempotent via `store_if_absent`.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use peerchat_types::{FriendStatus, PeerchatError, Relationship, Result};

use crate::db::{map_sql_err, Database};

/// Repository for the `relationships` table.
#[derive(Clone)]
pub struct RelationshipRepository {
    db: Database,
}

impl RelationshipRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a relationship row.
    ///
    /// # Errors
    ///
    /// Fails with [`PeerchatError::PersistenceFailure`] if a row for
    /// the peer already exists (primary key conflict).
    pub fn store(&self, rel: &Relationship) -> Result<()> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO relationships (peer_id, status, requested_at, approved_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                rel.peer_id,
                rel.status.as_db_code(),
                rel.requested_at.map(|t| t.to_rfc3339()),
                rel.approved_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(|e| map_sql_err("failed to insert relationship", e))?;
        Ok(())
    }

    /// Inserts a relationship only if no row exists for the peer.
    /// Returns whether a row was inserted. This is the idempotence
    /// guard for repeated friend requests from the same peer.
    pub fn store_if_absent(&self, rel: &Relationship) -> Result<bool> {
        let conn = self.db.lock();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO relationships (peer_id, status, requested_at, approved_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    rel.peer_id,
                    rel.status.as_db_code(),
                    rel.requested_at.map(|t| t.to_rfc3339()),
                    rel.approved_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(|e| map_sql_err("failed to insert relationship", e))?;
        Ok(inserted > 0)
    }

    /// Updates a peer's status and approval timestamp.
    pub fn update_status(
        &self,
        peer_id: &str,
        status: FriendStatus,
        approved_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.db.lock();
        conn.execute(
            "UPDATE relationships SET status = ?1, approved_at = ?2 WHERE peer_id = ?3",
            params![
                status.as_db_code(),
                approved_at.map(|t| t.to_rfc3339()),
                peer_id,
            ],
        )
        .map_err(|e| map_sql_err("failed to update relationship", e))?;
        Ok(())
    }

    /// Fetches the relationship row for a peer.
    ///
    /// # Errors
    ///
    /// [`PeerchatError::NotFound`] if no row exists.
    pub fn get_by_peer_id(&self, peer_id: &str) -> Result<Relationship> {
        let conn = self.db.lock();
        conn.query_row(
            "SELECT peer_id, status, requested_at, approved_at
             FROM relationships WHERE peer_id = ?1",
            params![peer_id],
            row_to_relationship,
        )
        .optional()
        .map_err(|e| map_sql_err("failed to get relationship", e))?
        .ok_or_else(|| PeerchatError::NotFound {
            reason: format!("no relationship for peer {peer_id}"),
        })
    }

    /// Lists all rows with the given status, ordered by peer ID.
    pub fn list_by_status(&self, status: FriendStatus) -> Result<Vec<Relationship>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare(
                "SELECT peer_id, status, requested_at, approved_at
                 FROM relationships WHERE status = ?1 ORDER BY peer_id ASC",
            )
            .map_err(|e| map_sql_err("failed to prepare relationship query", e))?;

        let rows = stmt
            .query_map(params![status.as_db_code()], row_to_relationship)
            .map_err(|e| map_sql_err("failed to query relationships", e))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| map_sql_err("failed to scan relationship row", e))
    }

    /// All approved friends.
    pub fn approved(&self) -> Result<Vec<Relationship>> {
        self.list_by_status(FriendStatus::Approved)
    }

    /// Requests from other peers awaiting our decision.
    pub fn pending(&self) -> Result<Vec<Relationship>> {
        self.list_by_status(FriendStatus::Pending)
    }

    /// Requests we sent that have not been answered yet. These are
    /// the rows the response-poll loop revisits.
    pub fn sent(&self) -> Result<Vec<Relationship>> {
        self.list_by_status(FriendStatus::Sent)
    }
}

fn row_to_relationship(row: &Row<'_>) -> rusqlite::Result<Relationship> {
    let status: String = row.get(1)?;
    let requested_at: Option<String> = row.get(2)?;
    let approved_at: Option<String> = row.get(3)?;

    Ok(Relationship {
        peer_id: row.get(0)?,
        status: FriendStatus::from_db_code(&status),
        requested_at: requested_at.and_then(parse_optional_time),
        approved_at: approved_at.and_then(parse_optional_time),
    })
}

fn parse_optional_time(raw: String) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(&raw) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(e) => {
            tracing::warn!(%raw, %e, "unparseable relationship timestamp, dropping");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RelationshipRepository {
        RelationshipRepository::new(Database::open_in_memory().unwrap())
    }

    fn pending_row(peer: &str) -> Relationship {
        Relationship {
            peer_id: peer.into(),
            status: FriendStatus::Pending,
            requested_at: Some(Utc::now()),
            approved_at: None,
        }
    }

    #[test]
    fn store_and_get_round_trip() {
        let repo = repo();
        repo.store(&pending_row("peer-a")).unwrap();

        let rel = repo.get_by_peer_id("peer-a").unwrap();
        assert_eq!(rel.status, FriendStatus::Pending);
        assert!(rel.requested_at.is_some());
        assert!(rel.approved_at.is_none());
    }

    #[test]
    fn missing_row_is_not_found() {
        let err = repo().get_by_peer_id("nobody").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn store_if_absent_is_idempotent() {
        let repo = repo();
        assert!(repo.store_if_absent(&pending_row("peer-a")).unwrap());
        // A second request from the same peer does not create a
        // duplicate and does not overwrite the original row.
        let mut second = pending_row("peer-a");
        second.status = FriendStatus::Approved;
        assert!(!repo.store_if_absent(&second).unwrap());
        assert_eq!(
            repo.get_by_peer_id("peer-a").unwrap().status,
            FriendStatus::Pending
        );
    }

    #[test]
    fn update_status_sets_approval_time() {
        let repo = repo();
        repo.store(&pending_row("peer-a")).unwrap();

        let approved_at = Utc::now();
        repo.update_status("peer-a", FriendStatus::Approved, Some(approved_at))
            .unwrap();

        let rel = repo.get_by_peer_id("peer-a").unwrap();
        assert_eq!(rel.status, FriendStatus::Approved);
        let stored = rel.approved_at.unwrap();
        assert!((stored - approved_at).num_seconds().abs() < 1);
        assert!(rel.approved_at.unwrap() >= rel.requested_at.unwrap() - chrono::Duration::seconds(1));
    }

    #[test]
    fn status_lists_are_disjoint() {
        let repo = repo();
        repo.store(&pending_row("pending-peer")).unwrap();
        repo.store(&Relationship {
            peer_id: "sent-peer".into(),
            status: FriendStatus::Sent,
            requested_at: Some(Utc::now()),
            approved_at: None,
        })
        .unwrap();
        repo.store(&Relationship {
            peer_id: "friend-peer".into(),
            status: FriendStatus::Approved,
            requested_at: Some(Utc::now()),
            approved_at: Some(Utc::now()),
        })
        .unwrap();

        assert_eq!(repo.pending().unwrap().len(), 1);
        assert_eq!(repo.sent().unwrap().len(), 1);
        assert_eq!(repo.approved().unwrap().len(), 1);
        assert_eq!(repo.approved().unwrap()[0].peer_id, "friend-peer");
    }
}
