//! Relationship persistence consumer.
//!
//! Translates friendship events into relationship rows:
//!
//! - `FriendRequestSent` → `Sent` row for the target (idempotent)
//! - `FriendRequestReceived` → `Pending` row for the sender
//!   (idempotent: a repeat request never duplicates or resets)
//! - `FriendResponseReceived` → status update with approval time

use tokio::sync::watch;
use tokio::task::JoinHandle;

use peerchat_bus::{Event, EventBus, EventKind};
use peerchat_protocol::timeutil::parse_wire_timestamp;
use peerchat_storage::RelationshipRepository;
use peerchat_types::{FriendStatus, Relationship};

/// Spawns the relationship persistence consumer.
pub fn spawn_profile_consumer(
    relationship_repo: RelationshipRepository,
    bus: &EventBus,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let mut events = bus.subscribe(&[
        EventKind::FriendRequestSent,
        EventKind::FriendRequestReceived,
        EventKind::FriendResponseReceived,
    ]);

    tokio::spawn(async move {
        tracing::debug!("profile consumer started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::debug!("profile consumer stopping");
                        return;
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else { return };
                    handle_event(&relationship_repo, event);
                }
            }
        }
    })
}

fn handle_event(repo: &RelationshipRepository, event: Event) {
    match event {
        Event::FriendRequestSent {
            receiver_peer_id,
            timestamp,
        } => {
            let row = Relationship {
                peer_id: receiver_peer_id.clone(),
                status: FriendStatus::Sent,
                requested_at: Some(timestamp),
                approved_at: None,
            };
            match repo.store_if_absent(&row) {
                Ok(true) => {
                    tracing::debug!(peer_id = %receiver_peer_id, "sent-request row stored")
                }
                Ok(false) => {
                    tracing::debug!(peer_id = %receiver_peer_id, "relationship row already exists")
                }
                Err(e) => tracing::error!(%e, "failed to store sent-request row"),
            }
        }

        Event::FriendRequestReceived {
            sender_peer_id,
            timestamp,
        } => {
            let requested_at = match parse_wire_timestamp(&timestamp) {
                Ok(t) => Some(t),
                Err(e) => {
                    tracing::warn!(%timestamp, %e, "unparseable request timestamp, using now");
                    Some(chrono::Utc::now())
                }
            };
            let row = Relationship {
                peer_id: sender_peer_id.clone(),
                status: FriendStatus::Pending,
                requested_at,
                approved_at: None,
            };
            match repo.store_if_absent(&row) {
                Ok(true) => {
                    tracing::info!(peer_id = %sender_peer_id, "pending friend request stored")
                }
                Ok(false) => {
                    tracing::debug!(peer_id = %sender_peer_id, "duplicate friend request ignored")
                }
                Err(e) => tracing::error!(%e, "failed to store pending request row"),
            }
        }

        Event::FriendResponseReceived {
            sender_peer_id,
            status,
            timestamp,
        } => {
            let approved_at = if status == FriendStatus::Approved {
                Some(parse_wire_timestamp(&timestamp).unwrap_or_else(|_| chrono::Utc::now()))
            } else {
                None
            };
            if let Err(e) = repo.update_status(&sender_peer_id, status, approved_at) {
                tracing::error!(%e, peer_id = %sender_peer_id, "failed to record friend response");
            } else {
                tracing::info!(peer_id = %sender_peer_id, %status, "friend response recorded");
            }
        }

        other => {
            tracing::trace!(?other, "ignoring event");
        }
    }
}
