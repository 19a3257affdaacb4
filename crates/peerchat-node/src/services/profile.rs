//! Friendship (profile) service.
//!
//! Sends and receives the signed friendship request/response
//! protocols, answers relationship polls, and runs the slow poll
//! loop that recovers responses lost in transit.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use libp2p_identity::PeerId;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use peerchat_bus::{Event, EventBus};
use peerchat_network::{OverlayCell, WireRequest, WireResponse};
use peerchat_protocol::timeutil::format_wire_timestamp;
use peerchat_protocol::wire::{
    sign_payload, verify_payload, FriendRequest, FriendRequestData, FriendResponse,
    FriendResponseData,
};
use peerchat_storage::RelationshipRepository;
use peerchat_types::{DaemonState, FriendStatus, PeerchatError, Relationship, Result};

use crate::capabilities::FriendshipGate;
use crate::identity::KeyStore;
use crate::services::chat::{decode_peer_id, send_with_deadline};
use crate::state::AppState;

/// Cadence of the response poll loop.
const RESPONSE_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Friendship operations and protocol handlers.
pub struct ProfileService {
    app_state: Arc<AppState>,
    bus: Arc<EventBus>,
    overlay: OverlayCell,
    keystore: Arc<KeyStore>,
    relationship_repo: RelationshipRepository,
}

impl ProfileService {
    pub fn new(
        app_state: Arc<AppState>,
        bus: Arc<EventBus>,
        overlay: OverlayCell,
        keystore: Arc<KeyStore>,
        relationship_repo: RelationshipRepository,
    ) -> Self {
        Self {
            app_state,
            bus,
            overlay,
            keystore,
            relationship_repo,
        }
    }

    // -----------------------------------------------------------------------
    // Request send / receive
    // -----------------------------------------------------------------------

    /// Signs and sends a friendship request, then emits
    /// `FriendRequestSent` so the consumer records the `Sent` row.
    pub async fn send_friend_request(&self, receiver_peer_id: &str) -> Result<()> {
        let target = decode_peer_id(receiver_peer_id)?;
        self.ensure_running()?;
        let overlay = self.overlay.get()?;

        let local_peer_id = overlay.local_peer_id();
        if target == local_peer_id {
            return Err(PeerchatError::InvalidInput {
                reason: "cannot send a friend request to self".into(),
            });
        }

        let data = FriendRequestData {
            sender_peer_id: local_peer_id.to_string(),
            timestamp: format_wire_timestamp(Utc::now()),
        };
        let signature = sign_payload(&self.keystore.keypair()?, &data)?;
        let request = FriendRequest { data, signature };

        tracing::info!(%target, "sending friend request");
        send_with_deadline(&overlay, target, WireRequest::FriendRequest(request)).await?;

        self.bus.publish(Event::FriendRequestSent {
            receiver_peer_id: receiver_peer_id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Inbound half of `/friends-request/1.0.0`. Re-canonicalises
    /// the payload and verifies the signature against the stream
    /// peer's key; failures are dropped without a trace on the wire.
    pub fn handle_inbound_request(&self, peer: PeerId, request: FriendRequest) {
        if let Err(e) = verify_payload(&peer, &request.data, &request.signature) {
            tracing::warn!(%peer, %e, "dropping friend request with bad signature");
            return;
        }

        tracing::info!(%peer, "friend request verified");
        self.bus.publish(Event::FriendRequestReceived {
            sender_peer_id: request.data.sender_peer_id,
            timestamp: request.data.timestamp,
        });
    }

    // -----------------------------------------------------------------------
    // Response send / receive
    // -----------------------------------------------------------------------

    /// Records the local accept/reject decision, emits
    /// `FriendResponseSent`, and pushes the signed response to the
    /// requester. The wire send is best-effort: the requester's poll
    /// loop recovers a lost response.
    pub async fn respond_to_friend_request(
        &self,
        peer_id: &str,
        is_accepted: bool,
    ) -> Result<()> {
        let status = if is_accepted {
            FriendStatus::Approved
        } else {
            FriendStatus::Rejected
        };
        self.relationship_repo
            .update_status(peer_id, status, Some(Utc::now()))?;

        self.bus.publish(Event::FriendResponseSent {
            peer_id: peer_id.to_string(),
            is_accepted,
        });

        if let Err(e) = self.send_friend_response(peer_id, is_accepted).await {
            tracing::warn!(%peer_id, %e, "could not deliver friend response; peer will poll");
        }
        Ok(())
    }

    /// Signs and sends a friendship response document.
    pub async fn send_friend_response(&self, receiver_peer_id: &str, is_approved: bool) -> Result<()> {
        let target = decode_peer_id(receiver_peer_id)?;
        let overlay = self.overlay.get()?;

        let data = FriendResponseData {
            responder_peer_id: overlay.local_peer_id().to_string(),
            is_approved,
            timestamp: format_wire_timestamp(Utc::now()),
        };
        let signature = sign_payload(&self.keystore.keypair()?, &data)?;
        let response = FriendResponse { data, signature };

        tracing::info!(%target, is_approved, "sending friend response");
        send_with_deadline(&overlay, target, WireRequest::FriendResponse(response)).await?;
        Ok(())
    }

    /// Inbound half of `/friends-response/1.0.0`.
    pub fn handle_inbound_response(&self, peer: PeerId, response: FriendResponse) {
        if let Err(e) = verify_payload(&peer, &response.data, &response.signature) {
            tracing::warn!(%peer, %e, "dropping friend response with bad signature");
            return;
        }

        let status = if response.data.is_approved {
            FriendStatus::Approved
        } else {
            FriendStatus::Rejected
        };

        tracing::info!(%peer, %status, "friend response verified");
        self.bus.publish(Event::FriendResponseReceived {
            sender_peer_id: response.data.responder_peer_id,
            status,
            timestamp: response.data.timestamp,
        });
    }

    // -----------------------------------------------------------------------
    // Response poll
    // -----------------------------------------------------------------------

    /// The row served to a polling peer: our stored relationship for
    /// them, or a `None`-status row when we have nothing yet.
    pub fn relationship_row_for(&self, peer: &PeerId) -> Relationship {
        let peer_id = peer.to_string();
        match self.relationship_repo.get_by_peer_id(&peer_id) {
            Ok(row) => row,
            Err(e) => {
                if !e.is_not_found() {
                    tracing::error!(%peer_id, %e, "relationship lookup failed for poll");
                }
                Relationship {
                    peer_id,
                    status: FriendStatus::None,
                    requested_at: None,
                    approved_at: None,
                }
            }
        }
    }

    /// Runs the slow poll loop: for every request we sent and have
    /// no answer to, ask the remote for its current view.
    pub fn spawn_response_poll(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(RESPONSE_POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            tracing::debug!("response poll loop stopping");
                            return;
                        }
                    }
                    _ = tick.tick() => self.poll_outstanding_requests().await,
                }
            }
        })
    }

    async fn poll_outstanding_requests(&self) {
        if self.app_state.state() != DaemonState::Running {
            return;
        }

        let outstanding = match self.relationship_repo.sent() {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(%e, "cannot list outstanding friend requests");
                return;
            }
        };

        for row in outstanding {
            if let Err(e) = self.ask_for_response(&row.peer_id).await {
                tracing::debug!(peer_id = %row.peer_id, %e, "response poll attempt failed");
            }
        }
    }

    /// One poll round-trip to a peer we sent a request to. A
    /// `Pending` (or absent) remote row means they have not decided;
    /// anything else is surfaced as a received response.
    pub async fn ask_for_response(&self, peer_id: &str) -> Result<()> {
        let target = decode_peer_id(peer_id)?;
        let overlay = self.overlay.get()?;
        let requester = overlay.local_peer_id().to_string();

        let response =
            send_with_deadline(&overlay, target, WireRequest::ResponsePoll { requester })
                .await?;

        let WireResponse::PollResult(row) = response else {
            return Err(PeerchatError::TransportFailure {
                reason: format!("unexpected poll response from {peer_id}"),
            });
        };

        match row.status {
            FriendStatus::Pending | FriendStatus::None => Ok(()),
            status @ (FriendStatus::Approved | FriendStatus::Rejected | FriendStatus::Sent) => {
                // `Sent` on their side means they consider themselves
                // the requester; treat like an undecided row.
                if status == FriendStatus::Sent {
                    return Ok(());
                }
                tracing::info!(%peer_id, %status, "discovered friend response via poll");
                self.bus.publish(Event::FriendResponseReceived {
                    sender_peer_id: peer_id.to_string(),
                    status,
                    timestamp: row
                        .approved_at
                        .map(format_wire_timestamp)
                        .unwrap_or_default(),
                });
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// All approved relationships.
    pub fn get_friends(&self) -> Result<Vec<Relationship>> {
        self.relationship_repo.approved()
    }

    /// Requests from peers awaiting our decision.
    pub fn get_friend_requests(&self) -> Result<Vec<Relationship>> {
        self.relationship_repo.pending()
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

impl FriendshipGate for ProfileService {
    fn is_friend(&self, peer_id: &str) -> bool {
        match self.relationship_repo.get_by_peer_id(peer_id) {
            Ok(row) => row.status == FriendStatus::Approved,
            Err(e) => {
                if !e.is_not_found() {
                    tracing::error!(%peer_id, %e, "friendship lookup failed");
                }
                false
            }
        }
    }
}
