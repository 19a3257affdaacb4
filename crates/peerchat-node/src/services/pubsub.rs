//! Group pub/sub service.
//!
//! One topic per group. Outbound messages are encrypted under the
//! group key before they reach the overlay; inbound messages are
//! decrypted, parsed, and checked for publisher authenticity before
//! an event is emitted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use libp2p_identity::PeerId;

use peerchat_bus::{Event, EventBus};
use peerchat_network::OverlayCell;
use peerchat_protocol::wire::GroupEnvelope;
use peerchat_protocol::{group_id_from_topic, group_topic};
use peerchat_storage::GroupMemberRepository;
use peerchat_types::{GroupChatMessage, Result};

use crate::capabilities::GroupTopics;
use crate::identity::GroupKeyStore;

/// Publishing proceeds once the routing table has this many peers...
const MIN_DHT_PEERS: usize = 2;

/// ...and the topic mesh has this many.
const MIN_MESH_PEERS: usize = 1;

/// Spacing between readiness polls.
const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Joins, publishes to, and consumes group topics.
pub struct PubSubService {
    overlay: OverlayCell,
    bus: Arc<EventBus>,
    group_keys: GroupKeyStore,
    member_repo: GroupMemberRepository,
}

impl PubSubService {
    pub fn new(
        overlay: OverlayCell,
        bus: Arc<EventBus>,
        group_keys: GroupKeyStore,
        member_repo: GroupMemberRepository,
    ) -> Self {
        Self {
            overlay,
            bus,
            group_keys,
            member_repo,
        }
    }

    /// Rejoins the topic of every group this node is a member of.
    /// Called once at startup.
    pub async fn resume_group_topics(&self) {
        let groups = match self.member_repo.groups_with_members() {
            Ok(groups) => groups,
            Err(e) => {
                tracing::error!(%e, "cannot list groups for topic resume");
                return;
            }
        };

        for group_id in groups.keys() {
            tracing::info!(%group_id, "rejoining group topic");
            if let Err(e) = self.join_topic(group_id).await {
                tracing::warn!(%group_id, %e, "failed to rejoin group topic");
            }
        }
    }

    /// Inbound pipeline for one gossip message:
    /// self-filter → decrypt → envelope parse → publisher
    /// authenticity → event.
    pub fn handle_gossip_message(
        &self,
        propagation_source: PeerId,
        source: Option<PeerId>,
        topic: &str,
        data: &[u8],
    ) {
        let Some(group_id) = group_id_from_topic(topic) else {
            tracing::trace!(%topic, "gossip on non-group topic ignored");
            return;
        };

        let Ok(overlay) = self.overlay.get() else {
            return;
        };
        if propagation_source == overlay.local_peer_id() {
            return;
        }

        let plaintext = match self.group_keys.decrypt_for_group(group_id, data) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::debug!(%group_id, %e, "discarding undecryptable group message");
                return;
            }
        };

        let envelope: GroupEnvelope = match serde_json::from_slice(&plaintext) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(%group_id, %e, "discarding malformed group envelope");
                return;
            }
        };

        // Authenticity: the envelope's claimed sender must be the
        // gossipsub publisher identity. Mismatch is a spoof attempt.
        let Some(publisher) = source else {
            tracing::debug!(%group_id, "discarding group message without publisher identity");
            return;
        };
        if publisher.to_string() != envelope.sender_peer_id {
            tracing::warn!(
                %group_id,
                claimed = %envelope.sender_peer_id,
                actual = %publisher,
                "discarding group message with mismatched sender"
            );
            return;
        }

        self.bus.publish(Event::GroupChatMessageReceived {
            message: GroupChatMessage {
                group_id: group_id.to_string(),
                sender_peer_id: envelope.sender_peer_id,
                message: envelope.message,
                time: Utc::now(),
            },
        });
    }

    /// Blocks until the overlay looks able to deliver a publish:
    /// enough DHT peers and at least one mesh peer on the topic.
    async fn wait_for_topic_readiness(&self, topic: &str) -> Result<()> {
        let overlay = self.overlay.get()?;
        let mut reported = false;
        loop {
            let readiness = overlay.topic_readiness(topic).await?;
            if readiness.dht_peers >= MIN_DHT_PEERS && readiness.mesh_peers >= MIN_MESH_PEERS {
                return Ok(());
            }
            if !reported {
                tracing::info!(
                    %topic,
                    dht_peers = readiness.dht_peers,
                    mesh_peers = readiness.mesh_peers,
                    "waiting for topic readiness before publishing"
                );
                reported = true;
            }
            tokio::time::sleep(READINESS_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl GroupTopics for PubSubService {
    async fn join_topic(&self, group_id: &str) -> Result<()> {
        self.overlay.get()?.subscribe(&group_topic(group_id)).await
    }

    async fn publish(&self, group_id: &str, data: Vec<u8>) -> Result<()> {
        let topic = group_topic(group_id);
        self.wait_for_topic_readiness(&topic).await?;
        self.overlay.get()?.publish(&topic, data).await
    }
}
