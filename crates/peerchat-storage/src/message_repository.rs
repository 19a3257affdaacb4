//! Direct and group message persistence.
//!
//! Message bodies arrive already encrypted under the data key; this
//! repository never sees plaintext.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::params;

use peerchat_types::{PeerchatError, Result, StoredGroupMessage, StoredMessage};

use crate::db::{map_sql_err, Database};

/// Repository for the `messages` and `group_messages` tables.
#[derive(Clone)]
pub struct MessageRepository {
    db: Database,
}

impl MessageRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a direct message row, returning its database ID.
    pub fn store(&self, msg: &StoredMessage) -> Result<i64> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO messages (sender_peer_id, recipient_peer_id, send_time, content, is_outgoing)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                msg.sender_peer_id,
                msg.recipient_peer_id,
                msg.send_time.to_rfc3339(),
                msg.ciphertext,
                msg.is_outgoing,
            ],
        )
        .map_err(|e| map_sql_err("failed to insert message", e))?;

        Ok(conn.last_insert_rowid())
    }

    /// Returns the conversation with `peer_id`, oldest first. Both
    /// directions match: rows where the peer is the sender or the
    /// recipient.
    pub fn messages_with_peer(&self, peer_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, sender_peer_id, recipient_peer_id, send_time, content, is_outgoing
                 FROM messages
                 WHERE sender_peer_id = ?1 OR recipient_peer_id = ?1
                 ORDER BY send_time ASC
                 LIMIT ?2",
            )
            .map_err(|e| map_sql_err("failed to prepare message query", e))?;

        let rows = stmt
            .query_map(params![peer_id, limit as i64], |row| {
                let send_time: String = row.get(3)?;
                Ok((
                    StoredMessage {
                        id: row.get(0)?,
                        sender_peer_id: row.get(1)?,
                        recipient_peer_id: row.get(2)?,
                        send_time: Utc::now(), // replaced below
                        ciphertext: row.get(4)?,
                        is_outgoing: row.get(5)?,
                    },
                    send_time,
                ))
            })
            .map_err(|e| map_sql_err("failed to query messages", e))?;

        let mut messages = Vec::new();
        for row in rows {
            let (mut msg, raw_time) =
                row.map_err(|e| map_sql_err("failed to scan message row", e))?;
            msg.send_time = parse_row_time(&raw_time)?;
            messages.push(msg);
        }
        Ok(messages)
    }

    /// Inserts a group message row.
    pub fn store_group_message(&self, msg: &StoredGroupMessage) -> Result<()> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO group_messages (group_id, sender_peer_id, content, sent_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                msg.group_id,
                msg.sender_peer_id,
                msg.encrypted_content,
                msg.sent_at.timestamp(),
            ],
        )
        .map_err(|e| map_sql_err("failed to insert group message", e))?;
        Ok(())
    }

    /// Returns a group's messages, oldest first.
    pub fn group_messages(&self, group_id: &str, limit: usize) -> Result<Vec<StoredGroupMessage>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, group_id, sender_peer_id, content, sent_at
                 FROM group_messages
                 WHERE group_id = ?1
                 ORDER BY sent_at ASC
                 LIMIT ?2",
            )
            .map_err(|e| map_sql_err("failed to prepare group message query", e))?;

        let rows = stmt
            .query_map(params![group_id, limit as i64], |row| {
                let sent_at: i64 = row.get(4)?;
                Ok(StoredGroupMessage {
                    id: row.get(0)?,
                    group_id: row.get(1)?,
                    sender_peer_id: row.get(2)?,
                    encrypted_content: row.get(3)?,
                    sent_at: Utc
                        .timestamp_opt(sent_at, 0)
                        .single()
                        .unwrap_or_else(Utc::now),
                })
            })
            .map_err(|e| map_sql_err("failed to query group messages", e))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| map_sql_err("failed to scan group message row", e))
    }
}

fn parse_row_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PeerchatError::PersistenceFailure {
            reason: format!("unparseable send_time '{raw}': {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> MessageRepository {
        MessageRepository::new(Database::open_in_memory().unwrap())
    }

    fn sample(sender: &str, recipient: &str, outgoing: bool) -> StoredMessage {
        StoredMessage {
            id: 0,
            sender_peer_id: sender.into(),
            recipient_peer_id: recipient.into(),
            send_time: Utc::now(),
            ciphertext: vec![1, 2, 3],
            is_outgoing: outgoing,
        }
    }

    #[test]
    fn store_and_list_conversation() {
        let repo = repo();
        repo.store(&sample("me", "them", true)).unwrap();
        repo.store(&sample("them", "me", false)).unwrap();
        repo.store(&sample("me", "unrelated", true)).unwrap();

        let convo = repo.messages_with_peer("them", 100).unwrap();
        assert_eq!(convo.len(), 2);
        assert!(convo[0].is_outgoing);
        assert!(!convo[1].is_outgoing);
    }

    #[test]
    fn ciphertext_is_stored_verbatim() {
        let repo = repo();
        let mut msg = sample("a", "b", true);
        msg.ciphertext = vec![0xDE, 0xAD, 0xBE, 0xEF];
        repo.store(&msg).unwrap();

        let rows = repo.messages_with_peer("b", 10).unwrap();
        assert_eq!(rows[0].ciphertext, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn group_messages_ordered_by_time() {
        let repo = repo();
        let base = Utc::now();
        for (i, offset) in [2i64, 0, 1].iter().enumerate() {
            repo.store_group_message(&StoredGroupMessage {
                id: 0,
                group_id: "g1".into(),
                sender_peer_id: format!("peer-{i}"),
                encrypted_content: vec![i as u8],
                sent_at: base + chrono::Duration::seconds(*offset),
            })
            .unwrap();
        }

        let msgs = repo.group_messages("g1", 10).unwrap();
        assert_eq!(msgs.len(), 3);
        assert!(msgs.windows(2).all(|w| w[0].sent_at <= w[1].sent_at));
    }

    #[test]
    fn group_query_is_scoped_by_group() {
        let repo = repo();
        repo.store_group_message(&StoredGroupMessage {
            id: 0,
            group_id: "g1".into(),
            sender_peer_id: "p".into(),
            encrypted_content: vec![],
            sent_at: Utc::now(),
        })
        .unwrap();

        assert!(repo.group_messages("g2", 10).unwrap().is_empty());
    }
}
