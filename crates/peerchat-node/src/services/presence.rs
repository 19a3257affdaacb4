//! Friend presence service.
//!
//! Every 15 seconds, probes each approved friend and publishes
//! `FriendOnlineStatusChanged` on transitions. One failed probe
//! flips a friend offline; there is no hysteresis.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use peerchat_bus::{Event, EventBus};
use peerchat_network::OverlayCell;
use peerchat_storage::RelationshipRepository;
use peerchat_types::OnlineStatusChange;

use crate::capabilities::OnlineStatus;
use crate::services::chat::decode_peer_id;

/// How often every friend is probed.
const STATUS_CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// Deadline for a single probe.
const PING_TIMEOUT: Duration = Duration::from_secs(15);

/// Periodically probes friends and tracks their last known status.
pub struct PresenceService {
    overlay: OverlayCell,
    bus: Arc<EventBus>,
    relationship_repo: RelationshipRepository,
    statuses: RwLock<HashMap<String, bool>>,
}

impl PresenceService {
    pub fn new(
        overlay: OverlayCell,
        bus: Arc<EventBus>,
        relationship_repo: RelationshipRepository,
    ) -> Self {
        Self {
            overlay,
            bus,
            relationship_repo,
            statuses: RwLock::new(HashMap::new()),
        }
    }

    /// Runs the probe ticker until shutdown.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("presence service started");
            let mut tick = tokio::time::interval(STATUS_CHECK_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            tracing::info!("presence service stopping");
                            return;
                        }
                    }
                    _ = tick.tick() => self.check_all_friends().await,
                }
            }
        })
    }

    /// Probes every approved friend concurrently, one task per
    /// friend, joined before the next tick.
    async fn check_all_friends(self: &Arc<Self>) {
        let friends = match self.relationship_repo.approved() {
            Ok(friends) => friends,
            Err(e) => {
                tracing::error!(%e, "cannot list friends for presence check");
                return;
            }
        };
        if friends.is_empty() {
            return;
        }

        tracing::debug!(count = friends.len(), "probing friends");
        let mut probes = JoinSet::new();
        for friend in friends {
            let service = Arc::clone(self);
            probes.spawn(async move { service.probe_friend(&friend.peer_id).await });
        }
        while probes.join_next().await.is_some() {}
    }

    async fn probe_friend(&self, peer_id: &str) {
        let peer = match decode_peer_id(peer_id) {
            Ok(peer) => peer,
            Err(e) => {
                tracing::warn!(%peer_id, %e, "skipping friend with bad peer id");
                return;
            }
        };
        let Ok(overlay) = self.overlay.get() else {
            return;
        };
        if peer == overlay.local_peer_id() {
            return;
        }

        let outcome = tokio::time::timeout(PING_TIMEOUT, overlay.probe(peer)).await;
        let (is_online, rtt) = match outcome {
            Ok(Ok(rtt)) => (true, rtt),
            Ok(Err(e)) => {
                tracing::debug!(%peer_id, %e, "probe failed");
                (false, None)
            }
            Err(_) => {
                tracing::debug!(%peer_id, "probe timed out");
                (false, None)
            }
        };

        self.update_and_notify(peer_id, is_online, rtt);
    }

    /// Records the probe outcome; publishes an event only on change.
    fn update_and_notify(&self, peer_id: &str, is_online: bool, rtt: Option<Duration>) {
        let changed = {
            let mut statuses = match self.statuses.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match statuses.insert(peer_id.to_string(), is_online) {
                Some(previous) => previous != is_online,
                None => true,
            }
        };

        if changed {
            tracing::info!(%peer_id, is_online, ?rtt, "friend status changed");
            self.bus.publish(Event::FriendOnlineStatusChanged {
                change: OnlineStatusChange {
                    peer_id: peer_id.to_string(),
                    is_online,
                    last_seen: Utc::now(),
                    rtt,
                },
            });
        }
    }
}

impl OnlineStatus for PresenceService {
    fn is_online(&self, peer_id: &str) -> bool {
        let statuses = match self.statuses.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        statuses.get(peer_id).copied().unwrap_or(false)
    }
}
