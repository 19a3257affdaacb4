//! Direct and group chat service.
//!
//! Owns the send contracts of `/chat/1.0.0` and
//! `/group-chat/1.0.0`, the inbound handlers for both, and the
//! decrypting read paths used by the API.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use libp2p_identity::PeerId;
use serde::Serialize;
use uuid::Uuid;

use peerchat_bus::{Event, EventBus};
use peerchat_crypto::{aead, DEFAULT_CRYPTO_PARAMS};
use peerchat_network::{OverlayCell, OverlayHandle, WireRequest};
use peerchat_protocol::wire::{GroupEnvelope, GroupInvite};
use peerchat_storage::{GroupMemberRepository, MessageRepository};
use peerchat_types::{
    ChatMessage, DaemonState, GroupChatMessage, GroupInfo, PeerchatError, Result,
};

use crate::capabilities::{FriendshipGate, GroupTopics};
use crate::identity::{GroupKeyStore, KeyStore};
use crate::state::AppState;

/// Deadline for establishing a connection to the target peer.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline for opening the stream and writing the frame.
const STREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Read-path page size; effectively "the whole conversation".
const MESSAGE_QUERY_LIMIT: usize = 1_000_000;

/// A decrypted direct message as returned to the UI.
#[derive(Clone, Debug, Serialize)]
pub struct ConversationMessage {
    pub send_time: DateTime<Utc>,
    pub message: String,
    pub is_outgoing: bool,
}

/// Direct and group messaging operations.
pub struct ChatService {
    app_state: Arc<AppState>,
    bus: Arc<EventBus>,
    overlay: OverlayCell,
    keystore: Arc<KeyStore>,
    group_keys: GroupKeyStore,
    friend_gate: Arc<dyn FriendshipGate>,
    topics: Arc<dyn GroupTopics>,
    member_repo: GroupMemberRepository,
    message_repo: MessageRepository,
}

impl ChatService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        app_state: Arc<AppState>,
        bus: Arc<EventBus>,
        overlay: OverlayCell,
        keystore: Arc<KeyStore>,
        group_keys: GroupKeyStore,
        friend_gate: Arc<dyn FriendshipGate>,
        topics: Arc<dyn GroupTopics>,
        member_repo: GroupMemberRepository,
        message_repo: MessageRepository,
    ) -> Self {
        Self {
            app_state,
            bus,
            overlay,
            keystore,
            group_keys,
            friend_gate,
            topics,
            member_repo,
            message_repo,
        }
    }

    // -----------------------------------------------------------------------
    // Direct messages
    // -----------------------------------------------------------------------

    /// Sends a direct chat message.
    ///
    /// Decodes the target, rejects self-sends and non-running state,
    /// connects if needed (failing fast without known addresses),
    /// writes the length-prefixed frame, and emits `MessageSent`.
    pub async fn send_message(&self, target_peer_id: &str, message: &str) -> Result<()> {
        let target = decode_peer_id(target_peer_id)?;
        self.ensure_running()?;
        let overlay = self.overlay.get()?;

        let local_peer_id = overlay.local_peer_id();
        if target == local_peer_id {
            return Err(PeerchatError::InvalidInput {
                reason: "cannot send a chat message to self".into(),
            });
        }

        tracing::debug!(%target, "sending direct message");
        send_with_deadline(
            &overlay,
            target,
            WireRequest::Chat(message.to_string()),
        )
        .await?;

        self.bus.publish(Event::MessageSent {
            message: ChatMessage {
                sender_peer_id: local_peer_id.to_string(),
                recipient_peer_id: target_peer_id.to_string(),
                content: message.to_string(),
                send_time: Utc::now(),
                is_outgoing: true,
            },
        });
        tracing::info!(%target, "direct message sent");
        Ok(())
    }

    /// Inbound half of `/chat/1.0.0`. Non-friends are dropped
    /// silently; trailing whitespace is trimmed.
    pub fn handle_inbound_chat(&self, peer: PeerId, content: &str) {
        let Ok(overlay) = self.overlay.get() else {
            return;
        };
        let peer_str = peer.to_string();
        if !self.friend_gate.is_friend(&peer_str) {
            tracing::info!(%peer, "dropping chat message from non-friend");
            return;
        }

        let content = content.trim();
        tracing::info!(%peer, "direct message received");

        self.bus.publish(Event::MessageReceived {
            message: ChatMessage {
                sender_peer_id: peer_str,
                recipient_peer_id: overlay.local_peer_id().to_string(),
                content: content.to_string(),
                send_time: Utc::now(),
                is_outgoing: false,
            },
        });
    }

    /// The decrypted conversation with a peer, oldest first.
    pub fn get_messages(&self, peer_id: &str) -> Result<Vec<ConversationMessage>> {
        let data_key = self.keystore.data_key()?;
        let rows = self.message_repo.messages_with_peer(peer_id, MESSAGE_QUERY_LIMIT)?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            match aead::decrypt_with_key(&data_key, &row.ciphertext, &DEFAULT_CRYPTO_PARAMS) {
                Ok(plaintext) => messages.push(ConversationMessage {
                    send_time: row.send_time,
                    message: String::from_utf8_lossy(&plaintext).into_owned(),
                    is_outgoing: row.is_outgoing,
                }),
                Err(e) => {
                    tracing::error!(id = row.id, %e, "failed to decrypt stored message");
                }
            }
        }
        Ok(messages)
    }

    // -----------------------------------------------------------------------
    // Groups
    // -----------------------------------------------------------------------

    /// Creates a group: fresh UUID and key, one invitation stream
    /// per member, then local membership and topic join.
    pub async fn create_group(&self, member_peers: &[String], name: &str) -> Result<String> {
        self.ensure_running()?;
        let overlay = self.overlay.get()?;

        let group_id = Uuid::new_v4().to_string();
        let key = self.group_keys.generate_new_key(&group_id, name)?;

        let invite = GroupInvite {
            member_peers: member_peers.to_vec(),
            key,
            name: name.to_string(),
            id: group_id.clone(),
        };

        for member in member_peers {
            let target = decode_peer_id(member)?;
            tracing::info!(%target, %group_id, "sending group invitation");
            send_with_deadline(
                &overlay,
                target,
                WireRequest::GroupInvite(invite.clone()),
            )
            .await?;
        }

        self.member_repo.add_members(&group_id, member_peers)?;

        tracing::info!(%group_id, "joining group topic");
        self.topics.join_topic(&group_id).await?;
        Ok(group_id)
    }

    /// Inbound half of `/group-chat/1.0.0`. The invitation is trusted
    /// on the transport's peer authentication. Partial failures are
    /// logged, not fatal: a member with the key but a torn membership
    /// list can still read the topic.
    pub async fn handle_group_invite(&self, peer: PeerId, invite: GroupInvite) {
        tracing::info!(%peer, group_id = %invite.id, "group invitation received");

        if let Err(e) =
            self.group_keys
                .store_received_key(&invite.id, &invite.name, invite.key.clone())
        {
            tracing::error!(group_id = %invite.id, %e, "failed to store group key");
        }

        if let Err(e) = self.member_repo.add_members(&invite.id, &invite.member_peers) {
            tracing::error!(group_id = %invite.id, %e, "failed to store group members");
        }

        if let Err(e) = self.topics.join_topic(&invite.id).await {
            tracing::error!(group_id = %invite.id, %e, "failed to join group topic");
        }
    }

    /// Publishes a message to a group topic, encrypted under the
    /// group key, and emits `GroupChatMessageSent`.
    pub async fn send_group_message(&self, group_id: &str, message: &str) -> Result<()> {
        self.ensure_running()?;

        let local_peer_id = self.overlay.get()?.local_peer_id().to_string();
        let now = Utc::now();

        let envelope = GroupEnvelope {
            id: Uuid::new_v4().to_string(),
            sender_peer_id: local_peer_id.clone(),
            message: message.to_string(),
            time: peerchat_protocol::timeutil::format_wire_timestamp(now),
        };
        let plaintext =
            serde_json::to_vec(&envelope).map_err(|e| PeerchatError::InvalidInput {
                reason: format!("failed to encode group envelope: {e}"),
            })?;

        let ciphertext = self.group_keys.encrypt_for_group(group_id, &plaintext)?;
        self.topics.publish(group_id, ciphertext).await?;

        self.bus.publish(Event::GroupChatMessageSent {
            message: GroupChatMessage {
                group_id: group_id.to_string(),
                sender_peer_id: local_peer_id,
                message: message.to_string(),
                time: now,
            },
        });
        Ok(())
    }

    /// The decrypted history of a group, oldest first.
    pub fn get_group_messages(&self, group_id: &str) -> Result<Vec<GroupChatMessage>> {
        let data_key = self.keystore.data_key()?;
        let rows = self.message_repo.group_messages(group_id, MESSAGE_QUERY_LIMIT)?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            match aead::decrypt_with_key(&data_key, &row.encrypted_content, &DEFAULT_CRYPTO_PARAMS)
            {
                Ok(plaintext) => messages.push(GroupChatMessage {
                    group_id: row.group_id,
                    sender_peer_id: row.sender_peer_id,
                    message: String::from_utf8_lossy(&plaintext).into_owned(),
                    time: row.sent_at,
                }),
                Err(e) => {
                    tracing::error!(id = row.id, %e, "failed to decrypt stored group message");
                }
            }
        }
        Ok(messages)
    }

    /// Every group this node belongs to, with members and name.
    pub fn get_groups(&self) -> Result<Vec<GroupInfo>> {
        let groups = self.member_repo.groups_with_members()?;
        let mut result = Vec::with_capacity(groups.len());
        for (group_id, members) in groups {
            let name = self
                .group_keys
                .group_name(&group_id)?
                .unwrap_or_default();
            result.push(GroupInfo {
                group_id,
                members,
                name,
            });
        }
        Ok(result)
    }

    fn ensure_running(&self) -> Result<()> {
        let state = self.app_state.state();
        if state != DaemonState::Running {
            return Err(PeerchatError::NotReady {
                reason: format!("node is not ready (state: {state})"),
            });
        }
        Ok(())
    }
}

/// Decodes a peer ID string into a `PeerId`.
pub(crate) fn decode_peer_id(raw: &str) -> Result<PeerId> {
    PeerId::from_str(raw).map_err(|e| PeerchatError::InvalidInput {
        reason: format!("invalid target PeerID format: {e}"),
    })
}

/// Sends a wire request with the connect + stream deadlines applied.
pub(crate) async fn send_with_deadline(
    overlay: &OverlayHandle,
    target: PeerId,
    request: WireRequest,
) -> Result<peerchat_network::WireResponse> {
    match tokio::time::timeout(
        CONNECT_TIMEOUT + STREAM_TIMEOUT,
        overlay.send_request(target, request),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(PeerchatError::PeerUnreachable {
            reason: format!("timed out establishing a stream to {target}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_decoding_rejects_garbage() {
        assert!(matches!(
            decode_peer_id("not-a-peer-id").unwrap_err(),
            PeerchatError::InvalidInput { .. }
        ));
    }

    #[test]
    fn peer_id_decoding_accepts_real_ids() {
        let keypair = libp2p_identity::Keypair::generate_ed25519();
        let peer_id = PeerId::from(keypair.public()).to_string();
        assert_eq!(decode_peer_id(&peer_id).unwrap().to_string(), peer_id);
    }
}
