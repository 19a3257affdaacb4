//! Overlay event dispatcher.
//!
//! Routes [`OverlayEvent`]s into the protocol services. Each event is
//! handled on its own task, matching the one-task-per-stream model of
//! the overlay's stream handlers.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use peerchat_network::{OverlayEvent, OverlayHandle};

use crate::services::{ChatService, ProfileService, PubSubService};

/// Spawns the dispatcher task. It exits when the overlay drops its
/// event channel (overlay shutdown).
pub fn spawn_overlay_dispatcher(
    mut events: mpsc::UnboundedReceiver<OverlayEvent>,
    overlay: OverlayHandle,
    chat: Arc<ChatService>,
    profile: Arc<ProfileService>,
    pubsub: Arc<PubSubService>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!("overlay dispatcher started");
        while let Some(event) = events.recv().await {
            match event {
                OverlayEvent::InboundChat { peer, content } => {
                    let chat = Arc::clone(&chat);
                    tokio::spawn(async move {
                        chat.handle_inbound_chat(peer, &content);
                    });
                }

                OverlayEvent::InboundGroupInvite { peer, invite } => {
                    let chat = Arc::clone(&chat);
                    tokio::spawn(async move {
                        chat.handle_group_invite(peer, invite).await;
                    });
                }

                OverlayEvent::InboundFriendRequest { peer, request } => {
                    let profile = Arc::clone(&profile);
                    tokio::spawn(async move {
                        profile.handle_inbound_request(peer, request);
                    });
                }

                OverlayEvent::InboundFriendResponse { peer, response } => {
                    let profile = Arc::clone(&profile);
                    tokio::spawn(async move {
                        profile.handle_inbound_response(peer, response);
                    });
                }

                OverlayEvent::RelationshipPoll { peer, poll_id } => {
                    let profile = Arc::clone(&profile);
                    let overlay = overlay.clone();
                    tokio::spawn(async move {
                        let row = profile.relationship_row_for(&peer);
                        if let Err(e) = overlay.respond_poll(poll_id, row).await {
                            tracing::debug!(%peer, %e, "failed to answer relationship poll");
                        }
                    });
                }

                OverlayEvent::GossipMessage {
                    propagation_source,
                    source,
                    topic,
                    data,
                } => {
                    let pubsub = Arc::clone(&pubsub);
                    tokio::spawn(async move {
                        pubsub.handle_gossip_message(propagation_source, source, &topic, &data);
                    });
                }
            }
        }
        tracing::debug!("overlay dispatcher stopped");
    })
}
