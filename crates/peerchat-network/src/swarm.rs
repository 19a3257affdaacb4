//! The overlay swarm task.
//!
//! [`OverlayService`] owns the libp2p `Swarm`. The daemon drives it
//! through [`OverlayHandle`] commands and consumes [`OverlayEvent`]s;
//! the task itself never touches persistence or the event bus.
//!
//! # Cancellation
//!
//! The run loop watches a shutdown channel. On shutdown every queued
//! reply channel is dropped, which surfaces as a transport failure to
//! any caller still waiting.

use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;
use libp2p::multiaddr::Protocol;
use libp2p::request_response::{self, OutboundRequestId, ResponseChannel};
use libp2p::swarm::dial_opts::{DialOpts, PeerCondition};
use libp2p::swarm::{DialError, SwarmEvent};
use libp2p::{gossipsub, identify, identity, kad, mdns, noise, ping, yamux};
use libp2p::{Multiaddr, PeerId, Swarm};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use peerchat_types::{PeerchatError, Relationship, Result};

use crate::behaviour::{build_behaviour, PeerchatBehaviour, PeerchatBehaviourEvent};
use crate::codec::{WireRequest, WireResponse};
use crate::config::NetworkConfig;
use crate::peers::PeerAddressBook;

/// Cadence of the DHT advertise/find-peers loop.
const DISCOVERY_INTERVAL: Duration = Duration::from_secs(60);

/// Command channel depth; commands are small and drained quickly.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Commands, events, readiness
// ---------------------------------------------------------------------------

/// Peer counts used to gate publishing into a fresh topic.
#[derive(Clone, Copy, Debug, Default)]
pub struct TopicReadiness {
    /// Peers in the Kademlia routing table.
    pub dht_peers: usize,
    /// Peers in this topic's gossipsub mesh.
    pub mesh_peers: usize,
}

/// Commands accepted by the swarm task.
enum OverlayCommand {
    /// Send a wire request, connecting first if necessary using
    /// known addresses. Fails fast when no addresses are known.
    SendRequest {
        peer: PeerId,
        request: WireRequest,
        reply: oneshot::Sender<Result<WireResponse>>,
    },
    /// Respond to an inbound relationship poll.
    RespondPoll {
        poll_id: u64,
        relationship: Relationship,
    },
    /// Liveness probe. `Ok(Some(rtt))` from a measured ping,
    /// `Ok(None)` when connected but not yet measured, `Err` when
    /// the peer is unreachable.
    Probe {
        peer: PeerId,
        reply: oneshot::Sender<Result<Option<Duration>>>,
    },
    /// Join a gossipsub topic.
    Subscribe {
        topic: String,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Publish to a joined topic.
    Publish {
        topic: String,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Report readiness counters for a topic.
    Readiness {
        topic: String,
        reply: oneshot::Sender<TopicReadiness>,
    },
    /// Current listen addresses, with the `/p2p/<peer>` suffix.
    ListenAddrs { reply: oneshot::Sender<Vec<String>> },
}

/// Events delivered to the daemon's protocol handlers.
#[derive(Debug)]
pub enum OverlayEvent {
    /// A direct chat frame arrived.
    InboundChat { peer: PeerId, content: String },
    /// A group-creation invitation arrived.
    InboundGroupInvite {
        peer: PeerId,
        invite: peerchat_protocol::wire::GroupInvite,
    },
    /// A friendship request document arrived (not yet verified).
    InboundFriendRequest {
        peer: PeerId,
        request: peerchat_protocol::wire::FriendRequest,
    },
    /// A friendship response document arrived (not yet verified).
    InboundFriendResponse {
        peer: PeerId,
        response: peerchat_protocol::wire::FriendResponse,
    },
    /// A peer is asking for our stored relationship row. Answer via
    /// [`OverlayHandle::respond_poll`] with the same `poll_id`.
    RelationshipPoll { peer: PeerId, poll_id: u64 },
    /// A gossipsub message arrived on some topic.
    GossipMessage {
        /// Peer the message arrived from (may be a relay hop).
        propagation_source: PeerId,
        /// Original publisher, from the signed message envelope.
        source: Option<PeerId>,
        topic: String,
        data: Vec<u8>,
    },
}

// ---------------------------------------------------------------------------
// OverlayHandle
// ---------------------------------------------------------------------------

/// Cloneable handle used by services to drive the overlay.
#[derive(Clone)]
pub struct OverlayHandle {
    commands: mpsc::Sender<OverlayCommand>,
    local_peer_id: PeerId,
}

impl OverlayHandle {
    /// The local node's peer ID.
    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    /// Sends a wire request, connecting first if needed.
    pub async fn send_request(&self, peer: PeerId, request: WireRequest) -> Result<WireResponse> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(OverlayCommand::SendRequest {
            peer,
            request,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(Self::task_gone)?
    }

    /// Answers an inbound relationship poll.
    pub async fn respond_poll(&self, poll_id: u64, relationship: Relationship) -> Result<()> {
        self.send_command(OverlayCommand::RespondPoll {
            poll_id,
            relationship,
        })
        .await
    }

    /// Probes a peer's liveness.
    pub async fn probe(&self, peer: PeerId) -> Result<Option<Duration>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(OverlayCommand::Probe {
            peer,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(Self::task_gone)?
    }

    /// Joins a gossipsub topic.
    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(OverlayCommand::Subscribe {
            topic: topic.to_string(),
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(Self::task_gone)?
    }

    /// Publishes raw bytes to a joined topic.
    pub async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(OverlayCommand::Publish {
            topic: topic.to_string(),
            data,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(Self::task_gone)?
    }

    /// Readiness counters for a topic.
    pub async fn topic_readiness(&self, topic: &str) -> Result<TopicReadiness> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(OverlayCommand::Readiness {
            topic: topic.to_string(),
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(Self::task_gone)
    }

    /// The node's current listen addresses.
    pub async fn listen_addrs(&self) -> Result<Vec<String>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(OverlayCommand::ListenAddrs { reply: reply_tx })
            .await?;
        reply_rx.await.map_err(Self::task_gone)
    }

    async fn send_command(&self, command: OverlayCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PeerchatError::TransportFailure {
                reason: "overlay task is not running".into(),
            })
    }

    fn task_gone<E>(_: E) -> PeerchatError {
        PeerchatError::TransportFailure {
            reason: "overlay task dropped the reply".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// OverlayCell
// ---------------------------------------------------------------------------

/// Late-bound [`OverlayHandle`].
///
/// The control interface (and with it every service) starts before
/// the node key is unlocked, which is before the overlay exists. The
/// coordinator fills this cell once the swarm is up; until then every
/// overlay-touching call fails with `NotReady`, which the lifecycle
/// gates surface as HTTP 503.
#[derive(Clone, Default)]
pub struct OverlayCell {
    inner: std::sync::Arc<std::sync::OnceLock<OverlayHandle>>,
}

impl OverlayCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the handle. Later calls are ignored; the overlay is
    /// created exactly once per process.
    pub fn set(&self, handle: OverlayHandle) {
        if self.inner.set(handle).is_err() {
            tracing::warn!("overlay handle already installed");
        }
    }

    /// The installed handle.
    ///
    /// # Errors
    ///
    /// [`PeerchatError::NotReady`] before the overlay is up.
    pub fn get(&self) -> Result<OverlayHandle> {
        self.inner.get().cloned().ok_or(PeerchatError::NotReady {
            reason: "overlay is not initialized".into(),
        })
    }
}

// ---------------------------------------------------------------------------
// OverlayService
// ---------------------------------------------------------------------------

/// Queued work for a peer we are still dialling.
enum PendingAction {
    Request {
        request: WireRequest,
        reply: oneshot::Sender<Result<WireResponse>>,
    },
    Probe {
        reply: oneshot::Sender<Result<Option<Duration>>>,
    },
}

/// Owns the swarm and all in-flight bookkeeping.
pub struct OverlayService {
    swarm: Swarm<PeerchatBehaviour>,
    config: NetworkConfig,
    commands: mpsc::Receiver<OverlayCommand>,
    events: mpsc::UnboundedSender<OverlayEvent>,
    address_book: PeerAddressBook,
    pending_dials: HashMap<PeerId, Vec<PendingAction>>,
    pending_requests: HashMap<OutboundRequestId, oneshot::Sender<Result<WireResponse>>>,
    pending_polls: HashMap<u64, ResponseChannel<WireResponse>>,
    next_poll_id: u64,
    ping_waiters: HashMap<PeerId, Vec<oneshot::Sender<Result<Option<Duration>>>>>,
    rtt_cache: HashMap<PeerId, Duration>,
}

impl OverlayService {
    /// Builds the swarm and starts listening. This is the "host
    /// initialized" moment of the startup sequence.
    ///
    /// # Errors
    ///
    /// [`PeerchatError::TransportFailure`] if transport or behaviour
    /// construction fails, or no listen address can be bound.
    pub fn new(
        keypair: identity::Keypair,
        config: NetworkConfig,
    ) -> Result<(
        Self,
        OverlayHandle,
        mpsc::UnboundedReceiver<OverlayEvent>,
    )> {
        config.validate()?;

        let config_for_behaviour = config.clone();
        let mut swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(
                libp2p::tcp::Config::default().nodelay(true),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|e| PeerchatError::TransportFailure {
                reason: format!("failed to configure TCP transport: {e}"),
            })?
            .with_quic()
            .with_relay_client(noise::Config::new, yamux::Config::default)
            .map_err(|e| PeerchatError::TransportFailure {
                reason: format!("failed to configure relay client: {e}"),
            })?
            .with_behaviour(|key, relay_client| {
                build_behaviour(key, &config_for_behaviour, relay_client)
                    .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
            })
            .map_err(|e| PeerchatError::TransportFailure {
                reason: format!("failed to build behaviour: {e}"),
            })?
            .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(120)))
            .build();

        for addr in &config.listen_addrs {
            swarm
                .listen_on(addr.clone())
                .map_err(|e| PeerchatError::TransportFailure {
                    reason: format!("failed to listen on {addr}: {e}"),
                })?;
        }

        let local_peer_id = *swarm.local_peer_id();
        tracing::info!(%local_peer_id, "overlay node created");

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let service = Self {
            swarm,
            config,
            commands: command_rx,
            events: event_tx,
            address_book: PeerAddressBook::new(),
            pending_dials: HashMap::new(),
            pending_requests: HashMap::new(),
            pending_polls: HashMap::new(),
            next_poll_id: 0,
            ping_waiters: HashMap::new(),
            rtt_cache: HashMap::new(),
        };

        let handle = OverlayHandle {
            commands: command_tx,
            local_peer_id,
        };

        Ok((service, handle, event_rx))
    }

    /// Seeds the routing table with the bootstrap peers, dials them,
    /// and kicks off a Kademlia bootstrap. This is the "DHT created"
    /// moment of the startup sequence.
    pub fn bootstrap(&mut self) {
        for addr in self.config.bootstrap_peers.clone() {
            let Some(peer_id) = peer_id_from_multiaddr(&addr) else {
                tracing::warn!(%addr, "bootstrap address lacks /p2p component, skipping");
                continue;
            };

            self.swarm
                .behaviour_mut()
                .kademlia
                .add_address(&peer_id, addr.clone());
            self.address_book.add_address(peer_id, addr.clone());

            tracing::info!(%peer_id, %addr, "dialling bootstrap peer");
            if let Err(e) = self.swarm.dial(addr) {
                tracing::warn!(%peer_id, %e, "failed to dial bootstrap peer");
            }
        }

        match self.swarm.behaviour_mut().kademlia.bootstrap() {
            Ok(_) => tracing::info!("kademlia bootstrap started"),
            Err(e) => tracing::warn!(%e, "kademlia bootstrap not started"),
        }
    }

    /// Runs the event loop until shutdown. Consumes the service.
    pub fn spawn(mut self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut discovery_tick = tokio::time::interval(DISCOVERY_INTERVAL);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            tracing::info!("overlay task shutting down");
                            break;
                        }
                    }
                    command = self.commands.recv() => {
                        match command {
                            Some(command) => self.handle_command(command),
                            None => break,
                        }
                    }
                    event = self.swarm.select_next_some() => {
                        self.handle_swarm_event(event);
                    }
                    _ = discovery_tick.tick() => {
                        self.advertise_and_find_peers();
                    }
                }
            }
        })
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn handle_command(&mut self, command: OverlayCommand) {
        match command {
            OverlayCommand::SendRequest {
                peer,
                request,
                reply,
            } => self.send_or_dial(peer, PendingAction::Request { request, reply }),

            OverlayCommand::RespondPoll {
                poll_id,
                relationship,
            } => {
                let Some(channel) = self.pending_polls.remove(&poll_id) else {
                    tracing::warn!(poll_id, "no pending poll for id");
                    return;
                };
                if self
                    .swarm
                    .behaviour_mut()
                    .wire
                    .send_response(channel, WireResponse::PollResult(relationship))
                    .is_err()
                {
                    tracing::warn!(poll_id, "poll response channel closed");
                }
            }

            OverlayCommand::Probe { peer, reply } => {
                self.send_or_dial(peer, PendingAction::Probe { reply })
            }

            OverlayCommand::Subscribe { topic, reply } => {
                let result = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .subscribe(&gossipsub::IdentTopic::new(topic.as_str()))
                    .map(|_| ())
                    .map_err(|e| PeerchatError::TransportFailure {
                        reason: format!("failed to subscribe to {topic}: {e}"),
                    });
                let _ = reply.send(result);
            }

            OverlayCommand::Publish { topic, data, reply } => {
                let result = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .publish(gossipsub::IdentTopic::new(topic.as_str()), data)
                    .map(|_| ())
                    .map_err(|e| PeerchatError::TransportFailure {
                        reason: format!("failed to publish to {topic}: {e}"),
                    });
                let _ = reply.send(result);
            }

            OverlayCommand::Readiness { topic, reply } => {
                let dht_peers: usize = self
                    .swarm
                    .behaviour_mut()
                    .kademlia
                    .kbuckets()
                    .map(|bucket| bucket.num_entries())
                    .sum();
                let hash = gossipsub::IdentTopic::new(topic.as_str()).hash();
                let mesh_peers = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .mesh_peers(&hash)
                    .count();
                let _ = reply.send(TopicReadiness {
                    dht_peers,
                    mesh_peers,
                });
            }

            OverlayCommand::ListenAddrs { reply } => {
                let peer_id = *self.swarm.local_peer_id();
                let addrs = self
                    .swarm
                    .listeners()
                    .map(|addr| format!("{addr}/p2p/{peer_id}"))
                    .collect();
                let _ = reply.send(addrs);
            }
        }
    }

    /// Executes an action now when the peer is connected, otherwise
    /// dials with the peer's known addresses and queues it.
    fn send_or_dial(&mut self, peer: PeerId, action: PendingAction) {
        if peer == *self.swarm.local_peer_id() {
            fail_action(
                action,
                PeerchatError::InvalidInput {
                    reason: "refusing to open a stream to self".into(),
                },
            );
            return;
        }

        if self.address_book.is_connected(&peer) {
            self.execute_action(peer, action);
            return;
        }

        let addrs = self.address_book.addresses_of(&peer);
        if addrs.is_empty() {
            fail_action(
                action,
                PeerchatError::PeerUnreachable {
                    reason: format!("no known addresses for peer {peer}"),
                },
            );
            return;
        }

        let opts = DialOpts::peer_id(peer)
            .addresses(addrs)
            .condition(PeerCondition::DisconnectedAndNotDialing)
            .build();

        match self.swarm.dial(opts) {
            Ok(()) => {
                tracing::debug!(%peer, "dialling for queued action");
                self.pending_dials.entry(peer).or_default().push(action);
            }
            // A dial to this peer is already in flight; ride along.
            Err(DialError::DialPeerConditionFalse(_)) => {
                self.pending_dials.entry(peer).or_default().push(action);
            }
            Err(e) => fail_action(
                action,
                PeerchatError::PeerUnreachable {
                    reason: format!("failed to dial {peer}: {e}"),
                },
            ),
        }
    }

    fn execute_action(&mut self, peer: PeerId, action: PendingAction) {
        match action {
            PendingAction::Request { request, reply } => {
                let request_id = self
                    .swarm
                    .behaviour_mut()
                    .wire
                    .send_request(&peer, request);
                self.pending_requests.insert(request_id, reply);
            }
            PendingAction::Probe { reply } => {
                if let Some(rtt) = self.rtt_cache.get(&peer) {
                    let _ = reply.send(Ok(Some(*rtt)));
                } else {
                    // Connected but not yet measured; resolve on the
                    // next ping result for this peer.
                    self.ping_waiters.entry(peer).or_default().push(reply);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Swarm events
    // -----------------------------------------------------------------------

    fn handle_swarm_event(&mut self, event: SwarmEvent<PeerchatBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                tracing::info!(%address, "listening");
            }

            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                tracing::debug!(%peer_id, "connection established");
                self.address_book.mark_connected(peer_id);
                if let Some(actions) = self.pending_dials.remove(&peer_id) {
                    for action in actions {
                        self.execute_action(peer_id, action);
                    }
                }
            }

            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                if num_established == 0 {
                    tracing::debug!(%peer_id, "all connections closed");
                    self.address_book.mark_disconnected(&peer_id);
                    self.rtt_cache.remove(&peer_id);
                    self.fail_ping_waiters(&peer_id, "connection closed");
                }
            }

            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                tracing::debug!(?peer_id, %error, "outgoing connection error");
                if let Some(peer) = peer_id {
                    if !self.address_book.is_connected(&peer) {
                        if let Some(actions) = self.pending_dials.remove(&peer) {
                            for action in actions {
                                fail_action(
                                    action,
                                    PeerchatError::PeerUnreachable {
                                        reason: format!("failed to connect to {peer}: {error}"),
                                    },
                                );
                            }
                        }
                        self.fail_ping_waiters(&peer, "dial failed");
                    }
                }
            }

            SwarmEvent::Behaviour(event) => self.handle_behaviour_event(event),

            other => {
                tracing::trace!(?other, "unhandled swarm event");
            }
        }
    }

    fn handle_behaviour_event(&mut self, event: PeerchatBehaviourEvent) {
        match event {
            PeerchatBehaviourEvent::Wire(event) => self.handle_wire_event(event),

            PeerchatBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            }) => {
                let _ = self.events.send(OverlayEvent::GossipMessage {
                    propagation_source,
                    source: message.source,
                    topic: message.topic.to_string(),
                    data: message.data,
                });
            }
            PeerchatBehaviourEvent::Gossipsub(event) => {
                tracing::trace!(?event, "gossipsub event");
            }

            PeerchatBehaviourEvent::Identify(identify::Event::Received {
                peer_id, info, ..
            }) => {
                for addr in &info.listen_addrs {
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, addr.clone());
                }
                self.address_book
                    .add_addresses(peer_id, info.listen_addrs);
            }
            PeerchatBehaviourEvent::Identify(event) => {
                tracing::trace!(?event, "identify event");
            }

            PeerchatBehaviourEvent::Kademlia(kad::Event::RoutingUpdated {
                peer, addresses, ..
            }) => {
                self.address_book
                    .add_addresses(peer, addresses.into_vec());
            }
            PeerchatBehaviourEvent::Kademlia(kad::Event::OutboundQueryProgressed {
                result:
                    kad::QueryResult::GetProviders(Ok(kad::GetProvidersOk::FoundProviders {
                        providers,
                        ..
                    })),
                ..
            }) => {
                let local = *self.swarm.local_peer_id();
                for provider in providers {
                    if provider != local && !self.address_book.is_connected(&provider) {
                        tracing::debug!(%provider, "dialling discovered service peer");
                        let _ = self.swarm.dial(
                            DialOpts::peer_id(provider)
                                .condition(PeerCondition::DisconnectedAndNotDialing)
                                .build(),
                        );
                    }
                }
            }
            PeerchatBehaviourEvent::Kademlia(event) => {
                tracing::trace!(?event, "kademlia event");
            }

            PeerchatBehaviourEvent::Mdns(mdns::Event::Discovered(peers)) => {
                for (peer_id, addr) in peers {
                    tracing::debug!(%peer_id, %addr, "mDNS discovered peer");
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, addr.clone());
                    self.address_book.add_address(peer_id, addr);
                }
            }
            PeerchatBehaviourEvent::Mdns(mdns::Event::Expired(_)) => {}

            PeerchatBehaviourEvent::Ping(ping::Event { peer, result, .. }) => match result {
                Ok(rtt) => {
                    self.rtt_cache.insert(peer, rtt);
                    if let Some(waiters) = self.ping_waiters.remove(&peer) {
                        for waiter in waiters {
                            let _ = waiter.send(Ok(Some(rtt)));
                        }
                    }
                }
                Err(failure) => {
                    tracing::debug!(%peer, %failure, "ping failed");
                    self.rtt_cache.remove(&peer);
                    self.fail_ping_waiters(&peer, "ping failed");
                }
            },

            PeerchatBehaviourEvent::RelayClient(event) => {
                tracing::debug!(?event, "relay client event");
            }
            PeerchatBehaviourEvent::Dcutr(event) => {
                tracing::debug!(?event, "dcutr event");
            }
            PeerchatBehaviourEvent::Autonat(event) => {
                tracing::debug!(?event, "autonat event");
            }
        }
    }

    fn handle_wire_event(&mut self, event: request_response::Event<WireRequest, WireResponse>) {
        match event {
            request_response::Event::Message {
                peer,
                message:
                    request_response::Message::Request {
                        request, channel, ..
                    },
                ..
            } => match request {
                WireRequest::ResponsePoll { requester } => {
                    tracing::debug!(%peer, %requester, "relationship poll received");
                    let poll_id = self.next_poll_id;
                    self.next_poll_id += 1;
                    self.pending_polls.insert(poll_id, channel);
                    let _ = self
                        .events
                        .send(OverlayEvent::RelationshipPoll { peer, poll_id });
                }
                request => {
                    // Fire-and-forget protocols: acknowledge at the
                    // transport level, then hand the payload up.
                    if self
                        .swarm
                        .behaviour_mut()
                        .wire
                        .send_response(channel, WireResponse::Ack)
                        .is_err()
                    {
                        tracing::debug!(%peer, "ack channel already closed");
                    }
                    let event = match request {
                        WireRequest::Chat(content) => {
                            OverlayEvent::InboundChat { peer, content }
                        }
                        WireRequest::GroupInvite(invite) => {
                            OverlayEvent::InboundGroupInvite { peer, invite }
                        }
                        WireRequest::FriendRequest(request) => {
                            OverlayEvent::InboundFriendRequest { peer, request }
                        }
                        WireRequest::FriendResponse(response) => {
                            OverlayEvent::InboundFriendResponse { peer, response }
                        }
                        WireRequest::ResponsePoll { .. } => unreachable!("handled above"),
                    };
                    let _ = self.events.send(event);
                }
            },

            request_response::Event::Message {
                message:
                    request_response::Message::Response {
                        request_id,
                        response,
                    },
                ..
            } => {
                if let Some(reply) = self.pending_requests.remove(&request_id) {
                    let _ = reply.send(Ok(response));
                }
            }

            request_response::Event::OutboundFailure {
                peer,
                request_id,
                error,
                ..
            } => {
                tracing::debug!(%peer, %error, "outbound wire request failed");
                if let Some(reply) = self.pending_requests.remove(&request_id) {
                    let mapped = match &error {
                        request_response::OutboundFailure::DialFailure => {
                            PeerchatError::PeerUnreachable {
                                reason: format!("failed to connect to {peer}: {error}"),
                            }
                        }
                        _ => PeerchatError::TransportFailure {
                            reason: format!("stream to {peer} failed: {error}"),
                        },
                    };
                    let _ = reply.send(Err(mapped));
                }
            }

            request_response::Event::InboundFailure { peer, error, .. } => {
                tracing::debug!(%peer, %error, "inbound wire request failed");
            }

            request_response::Event::ResponseSent { .. } => {}
        }
    }

    // -----------------------------------------------------------------------
    // Discovery loop
    // -----------------------------------------------------------------------

    /// Advertises the discovery service name and looks up other
    /// providers, dialling any that are new.
    fn advertise_and_find_peers(&mut self) {
        let key = kad::RecordKey::new(&self.config.discovery_service_id);

        if let Err(e) = self.swarm.behaviour_mut().kademlia.start_providing(key.clone()) {
            tracing::debug!(%e, "cannot advertise yet");
            return;
        }
        self.swarm.behaviour_mut().kademlia.get_providers(key);
    }

    fn fail_ping_waiters(&mut self, peer: &PeerId, why: &str) {
        if let Some(waiters) = self.ping_waiters.remove(peer) {
            for waiter in waiters {
                let _ = waiter.send(Err(PeerchatError::PeerUnreachable {
                    reason: format!("{why} for {peer}"),
                }));
            }
        }
    }
}

fn fail_action(action: PendingAction, error: PeerchatError) {
    match action {
        PendingAction::Request { reply, .. } => {
            let _ = reply.send(Err(error));
        }
        PendingAction::Probe { reply } => {
            let _ = reply.send(Err(error));
        }
    }
}

/// Extracts the trailing `/p2p/<peer>` component of a multiaddr.
fn peer_id_from_multiaddr(addr: &Multiaddr) -> Option<PeerId> {
    addr.iter().find_map(|component| match component {
        Protocol::P2p(peer_id) => Some(peer_id),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_extraction_from_bootstrap_addr() {
        let addr: Multiaddr =
            "/ip4/13.61.254.164/tcp/4001/p2p/12D3KooWFujV1a69zhXj7DZeQGKh96ubEVvPBqptHAGYpd6TGdFn"
                .parse()
                .unwrap();
        assert!(peer_id_from_multiaddr(&addr).is_some());

        let bare: Multiaddr = "/ip4/10.0.0.1/tcp/4001".parse().unwrap();
        assert!(peer_id_from_multiaddr(&bare).is_none());
    }

    #[tokio::test]
    async fn service_builds_and_reports_identity() {
        let keypair = identity::Keypair::generate_ed25519();
        let expected = PeerId::from(keypair.public());

        let config = NetworkConfig {
            listen_addrs: vec!["/ip4/127.0.0.1/tcp/0".parse().unwrap()],
            enable_mdns: false,
            ..NetworkConfig::default()
        };

        let (_service, handle, _events) = OverlayService::new(keypair, config).unwrap();
        assert_eq!(handle.local_peer_id(), expected);
    }

    #[tokio::test]
    async fn send_to_unknown_peer_fails_with_no_addresses() {
        let keypair = identity::Keypair::generate_ed25519();
        let config = NetworkConfig {
            listen_addrs: vec!["/ip4/127.0.0.1/tcp/0".parse().unwrap()],
            bootstrap_peers: vec![],
            enable_mdns: false,
            ..NetworkConfig::default()
        };

        let (service, handle, _events) = OverlayService::new(keypair, config).unwrap();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = service.spawn(shutdown_rx);

        let err = handle
            .send_request(PeerId::random(), WireRequest::Chat("hi".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, PeerchatError::PeerUnreachable { .. }));

        task.abort();
    }

    #[tokio::test]
    async fn self_send_is_rejected() {
        let keypair = identity::Keypair::generate_ed25519();
        let config = NetworkConfig {
            listen_addrs: vec!["/ip4/127.0.0.1/tcp/0".parse().unwrap()],
            bootstrap_peers: vec![],
            enable_mdns: false,
            ..NetworkConfig::default()
        };

        let (service, handle, _events) = OverlayService::new(keypair, config).unwrap();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = service.spawn(shutdown_rx);

        let err = handle
            .send_request(handle.local_peer_id(), WireRequest::Chat("me".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, PeerchatError::InvalidInput { .. }));

        task.abort();
    }
}
