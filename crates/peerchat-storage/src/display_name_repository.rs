//! Custom display-name persistence, unique per
//! `(entity_id, entity_type)`.

use chrono::{TimeZone, Utc};
use rusqlite::{params, OptionalExtension};

use peerchat_types::{DisplayName, EntityType, PeerchatError, Result};

use crate::db::{map_sql_err, Database};

/// Repository for the `display_names` table.
#[derive(Clone)]
pub struct DisplayNameRepository {
    db: Database,
}

impl DisplayNameRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Stores a display name, replacing any existing row for the
    /// entity.
    pub fn store(&self, entity_id: &str, entity_type: EntityType, display_name: &str) -> Result<()> {
        let now = Utc::now().timestamp();
        let conn = self.db.lock();
        conn.execute(
            "INSERT OR REPLACE INTO display_names
             (entity_id, entity_type, display_name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![entity_id, entity_type.to_string(), display_name, now, now],
        )
        .map_err(|e| map_sql_err("failed to store display name", e))?;
        Ok(())
    }

    /// Fetches the display name for an entity.
    ///
    /// # Errors
    ///
    /// [`PeerchatError::NotFound`] if no row exists. The API layer
    /// turns this into the deterministic fallback, never a 404.
    pub fn get_by_entity(&self, entity_id: &str, entity_type: EntityType) -> Result<DisplayName> {
        let conn = self.db.lock();
        conn.query_row(
            "SELECT entity_id, display_name, created_at, updated_at
             FROM display_names WHERE entity_id = ?1 AND entity_type = ?2",
            params![entity_id, entity_type.to_string()],
            |row| {
                let created_at: i64 = row.get(2)?;
                let updated_at: i64 = row.get(3)?;
                Ok(DisplayName {
                    entity_id: row.get(0)?,
                    entity_type,
                    display_name: row.get(1)?,
                    created_at: Utc
                        .timestamp_opt(created_at, 0)
                        .single()
                        .unwrap_or_else(Utc::now),
                    updated_at: Utc
                        .timestamp_opt(updated_at, 0)
                        .single()
                        .unwrap_or_else(Utc::now),
                })
            },
        )
        .optional()
        .map_err(|e| map_sql_err("failed to get display name", e))?
        .ok_or_else(|| PeerchatError::NotFound {
            reason: format!("no display name for {entity_type} {entity_id}"),
        })
    }

    /// Deletes the display name for an entity.
    ///
    /// # Errors
    ///
    /// [`PeerchatError::NotFound`] if no row existed.
    pub fn delete(&self, entity_id: &str, entity_type: EntityType) -> Result<()> {
        let conn = self.db.lock();
        let deleted = conn
            .execute(
                "DELETE FROM display_names WHERE entity_id = ?1 AND entity_type = ?2",
                params![entity_id, entity_type.to_string()],
            )
            .map_err(|e| map_sql_err("failed to delete display name", e))?;

        if deleted == 0 {
            return Err(PeerchatError::NotFound {
                reason: format!("no display name for {entity_type} {entity_id}"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> DisplayNameRepository {
        DisplayNameRepository::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn store_get_delete_round_trip() {
        let repo = repo();
        repo.store("peer-a", EntityType::Friend, "Alice").unwrap();

        let row = repo.get_by_entity("peer-a", EntityType::Friend).unwrap();
        assert_eq!(row.display_name, "Alice");

        repo.delete("peer-a", EntityType::Friend).unwrap();
        assert!(repo
            .get_by_entity("peer-a", EntityType::Friend)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn store_overwrites_existing_name() {
        let repo = repo();
        repo.store("peer-a", EntityType::Friend, "Alice").unwrap();
        repo.store("peer-a", EntityType::Friend, "Alicia").unwrap();
        assert_eq!(
            repo.get_by_entity("peer-a", EntityType::Friend)
                .unwrap()
                .display_name,
            "Alicia"
        );
    }

    #[test]
    fn entity_types_do_not_collide() {
        let repo = repo();
        repo.store("same-id", EntityType::Friend, "friend name").unwrap();
        repo.store("same-id", EntityType::Group, "group name").unwrap();

        assert_eq!(
            repo.get_by_entity("same-id", EntityType::Friend).unwrap().display_name,
            "friend name"
        );
        assert_eq!(
            repo.get_by_entity("same-id", EntityType::Group).unwrap().display_name,
            "group name"
        );
    }

    #[test]
    fn delete_missing_is_not_found() {
        assert!(repo()
            .delete("ghost", EntityType::Group)
            .unwrap_err()
            .is_not_found());
    }
}
