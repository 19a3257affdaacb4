//! Network configuration.

use libp2p::Multiaddr;

use peerchat_types::{PeerchatError, Result};

/// Compiled-in private bootstrap nodes. Used unless the operator opts
/// into the public bootstrap set.
pub const DEFAULT_BOOTSTRAP_NODES: &[&str] = &[
    "/ip4/13.61.254.164/tcp/4001/p2p/12D3KooWFujV1a69zhXj7DZeQGKh96ubEVvPBqptHAGYpd6TGdFn",
    "/ip4/51.21.217.209/tcp/4001/p2p/12D3KooWDW4onEGqyg7Tu9HP8zgnJKZvbo2hgPin63XSVVTsd2eN",
];

/// Public IPFS bootstrap nodes, used with `use_public_bootstraps`.
pub const PUBLIC_BOOTSTRAP_NODES: &[&str] = &[
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmNnooDu7bfjPFoTZYxMNLWUQJyrVwtbZg5gBMjTezGAJN",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmQCU2EcMqAqQPR2i9bChDtGNJchTbq5TbXJJ16u19uLTa",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmbLHAnMoJPWSCR5Zhtx6BHJX9KiKNN6tpvbUcqanj75Nb",
];

/// Overlay-layer configuration.
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    /// Multiaddrs to listen on. Defaults to OS-assigned TCP and QUIC
    /// ports on all interfaces.
    pub listen_addrs: Vec<Multiaddr>,

    /// Bootstrap peers (fully-qualified multiaddrs ending in
    /// `/p2p/<peer_id>`).
    pub bootstrap_peers: Vec<Multiaddr>,

    /// Whether the public bootstrap set was selected. With private
    /// bootstraps the DHT runs under its own protocol ID so unrelated
    /// libp2p nodes do not pollute the routing table.
    pub use_public_bootstraps: bool,

    /// Kademlia protocol ID (only applied with private bootstraps).
    pub dht_protocol_id: String,

    /// Service name advertised and searched in the DHT.
    pub discovery_service_id: String,

    /// Enable mDNS local discovery.
    pub enable_mdns: bool,

    /// mDNS service tag. Retained from the daemon flags; libp2p's
    /// mDNS implementation uses the standard `_p2p._udp.local`
    /// service, so this currently only shows up in logs.
    pub mdns_service_tag: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addrs: vec![
                "/ip4/0.0.0.0/tcp/0".parse().expect("static multiaddr"),
                "/ip4/0.0.0.0/udp/0/quic-v1".parse().expect("static multiaddr"),
                "/ip6/::/tcp/0".parse().expect("static multiaddr"),
                "/ip6/::/udp/0/quic-v1".parse().expect("static multiaddr"),
            ],
            bootstrap_peers: parse_multiaddrs(DEFAULT_BOOTSTRAP_NODES),
            use_public_bootstraps: false,
            dht_protocol_id: "/p2p-chat-daemon/kad/1.0.0".into(),
            discovery_service_id: "p2p-chat-daemon".into(),
            enable_mdns: true,
            mdns_service_tag: "p2p-chat-daemon.local".into(),
        }
    }
}

impl NetworkConfig {
    /// Validates invariants a broken flag combination could violate.
    pub fn validate(&self) -> Result<()> {
        if self.listen_addrs.is_empty() {
            return Err(PeerchatError::InvalidInput {
                reason: "at least one listen address is required".into(),
            });
        }
        if !self.use_public_bootstraps && self.dht_protocol_id.is_empty() {
            return Err(PeerchatError::InvalidInput {
                reason: "dht_protocol_id cannot be empty with private bootstraps".into(),
            });
        }
        if self.discovery_service_id.is_empty() {
            return Err(PeerchatError::InvalidInput {
                reason: "discovery_service_id cannot be empty".into(),
            });
        }
        Ok(())
    }
}

/// Parses a list of multiaddr strings, skipping invalid entries.
pub fn parse_multiaddrs(addrs: &[&str]) -> Vec<Multiaddr> {
    addrs
        .iter()
        .filter_map(|raw| match raw.parse() {
            Ok(addr) => Some(addr),
            Err(e) => {
                tracing::warn!(%raw, %e, "skipping invalid bootstrap multiaddr");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        NetworkConfig::default().validate().unwrap();
    }

    #[test]
    fn compiled_in_bootstrap_peers_all_parse() {
        assert_eq!(
            parse_multiaddrs(DEFAULT_BOOTSTRAP_NODES).len(),
            DEFAULT_BOOTSTRAP_NODES.len()
        );
        assert_eq!(
            parse_multiaddrs(PUBLIC_BOOTSTRAP_NODES).len(),
            PUBLIC_BOOTSTRAP_NODES.len()
        );
    }

    #[test]
    fn empty_listen_addrs_are_rejected() {
        let cfg = NetworkConfig {
            listen_addrs: vec![],
            ..NetworkConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
