//! libp2p overlay adapter.
//!
//! Thin wrapper over the external overlay substrate: peer identity,
//! TCP/QUIC transports with Noise, Kademlia DHT, mDNS, gossipsub,
//! ping, relay and hole punching. The rest of the daemon talks to it
//! through [`OverlayHandle`] (commands) and a stream of
//! [`OverlayEvent`]s; nothing outside this crate touches libp2p
//! machinery directly.
//!
//! - [`config`] — listen/bootstrap/discovery settings
//! - [`behaviour`] — the combined `NetworkBehaviour`
//! - [`codec`] — wire framing for the five stream protocols
//! - [`peers`] — known-address book fed by identify/mDNS/Kademlia
//! - [`swarm`] — the swarm task, commands, and events

pub mod behaviour;
pub mod codec;
pub mod config;
pub mod peers;
pub mod swarm;

pub use codec::{WireRequest, WireResponse};
pub use config::NetworkConfig;
pub use swarm::{OverlayCell, OverlayEvent, OverlayHandle, OverlayService, TopicReadiness};
