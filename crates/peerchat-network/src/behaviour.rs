//! Combined libp2p behaviour for the peerchat overlay.

use std::time::Duration;

use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::swarm::NetworkBehaviour;
use libp2p::{autonat, dcutr, gossipsub, identify, kad, mdns, ping, relay, request_response};
use libp2p::{identity, PeerId, StreamProtocol};

use peerchat_types::PeerchatError;

use crate::codec::{wire_protocols, WireCodec};
use crate::config::NetworkConfig;

/// Stream-open deadline for the wire protocols.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Presence probing cadence; also the per-connection keep-alive ping.
const PING_INTERVAL: Duration = Duration::from_secs(15);

/// Upper bound on a gossipsub frame (an encrypted group envelope).
const MAX_GOSSIP_SIZE: usize = 64 * 1024;

/// Combined behaviour. The `#[derive(NetworkBehaviour)]` macro
/// generates `PeerchatBehaviourEvent` with one variant per field.
#[derive(NetworkBehaviour)]
pub struct PeerchatBehaviour {
    /// Kademlia DHT: routing, peer lookup, service advertising.
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    /// Peer metadata exchange on every connection; feeds the address
    /// book and the routing table.
    pub identify: identify::Behaviour,
    /// The five wire protocols (chat, group invite, friendship
    /// request/response, response poll).
    pub wire: request_response::Behaviour<WireCodec>,
    /// Authenticated pub/sub for group topics.
    pub gossipsub: gossipsub::Behaviour,
    /// Liveness probing for the presence service.
    pub ping: ping::Behaviour,
    /// Optional LAN discovery.
    pub mdns: Toggle<mdns::tokio::Behaviour>,
    /// Relay client for NAT'd peers.
    pub relay_client: relay::client::Behaviour,
    /// Direct connection upgrade through relay (hole punching).
    pub dcutr: dcutr::Behaviour,
    /// Reachability detection.
    pub autonat: autonat::Behaviour,
}

/// Builds the combined behaviour from the node identity and config.
///
/// # Errors
///
/// Returns [`PeerchatError::InvalidInput`] for an unusable DHT
/// protocol ID and [`PeerchatError::TransportFailure`] if a
/// sub-behaviour rejects its configuration.
pub fn build_behaviour(
    keypair: &identity::Keypair,
    config: &NetworkConfig,
    relay_client: relay::client::Behaviour,
) -> peerchat_types::Result<PeerchatBehaviour> {
    let local_peer_id = PeerId::from(keypair.public());

    // --- Kademlia ---------------------------------------------------------
    let mut kad_config = if config.use_public_bootstraps {
        kad::Config::new(kad::PROTOCOL_NAME)
    } else {
        let protocol = StreamProtocol::try_from_owned(config.dht_protocol_id.clone()).map_err(
            |e| PeerchatError::InvalidInput {
                reason: format!("invalid DHT protocol id '{}': {e}", config.dht_protocol_id),
            },
        )?;
        kad::Config::new(protocol)
    };
    kad_config.set_query_timeout(Duration::from_secs(60));

    let store = kad::store::MemoryStore::new(local_peer_id);
    let kademlia = kad::Behaviour::with_config(local_peer_id, store, kad_config);

    // --- Identify ---------------------------------------------------------
    let identify = identify::Behaviour::new(
        identify::Config::new("/p2p-chat-daemon/id/1.0.0".into(), keypair.public())
            .with_agent_version(format!("peerchat/{}", env!("CARGO_PKG_VERSION"))),
    );

    // --- Wire protocols ---------------------------------------------------
    let wire = request_response::Behaviour::with_codec(
        WireCodec,
        wire_protocols()
            .into_iter()
            .map(|p| (p, request_response::ProtocolSupport::Full)),
        request_response::Config::default().with_request_timeout(REQUEST_TIMEOUT),
    );

    // --- Gossipsub --------------------------------------------------------
    let gossip_config = gossipsub::ConfigBuilder::default()
        .max_transmit_size(MAX_GOSSIP_SIZE)
        .build()
        .map_err(|e| PeerchatError::TransportFailure {
            reason: format!("failed to build gossipsub config: {e}"),
        })?;

    let gossipsub = gossipsub::Behaviour::new(
        gossipsub::MessageAuthenticity::Signed(keypair.clone()),
        gossip_config,
    )
    .map_err(|e| PeerchatError::TransportFailure {
        reason: format!("failed to create gossipsub behaviour: {e}"),
    })?;

    // --- Ping -------------------------------------------------------------
    let ping = ping::Behaviour::new(
        ping::Config::new()
            .with_interval(PING_INTERVAL)
            .with_timeout(PING_INTERVAL),
    );

    // --- mDNS -------------------------------------------------------------
    let mdns = if config.enable_mdns {
        let behaviour = mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id)
            .map_err(|e| PeerchatError::TransportFailure {
                reason: format!("failed to start mDNS: {e}"),
            })?;
        tracing::info!(tag = %config.mdns_service_tag, "mDNS discovery enabled");
        Toggle::from(Some(behaviour))
    } else {
        Toggle::from(None)
    };

    // --- NAT --------------------------------------------------------------
    let dcutr = dcutr::Behaviour::new(local_peer_id);
    let autonat = autonat::Behaviour::new(local_peer_id, autonat::Config::default());

    Ok(PeerchatBehaviour {
        kademlia,
        identify,
        wire,
        gossipsub,
        ping,
        mdns,
        relay_client,
        dcutr,
        autonat,
    })
}
