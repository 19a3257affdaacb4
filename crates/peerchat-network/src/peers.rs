//! Known-address book.
//!
//! The overlay's peer store: multiaddrs learned from identify, mDNS,
//! and Kademlia routing updates. A send to a disconnected peer
//! consults this book first and fails with a distinct error when it
//! is empty for that peer.

use std::collections::{HashMap, HashSet};

use libp2p::{Multiaddr, PeerId};

/// Cap per peer so a hostile identify push cannot grow memory.
const MAX_ADDRS_PER_PEER: usize = 16;

/// Tracks known addresses and connection state per peer.
#[derive(Default)]
pub struct PeerAddressBook {
    addresses: HashMap<PeerId, HashSet<Multiaddr>>,
    connected: HashSet<PeerId>,
}

impl PeerAddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an address for a peer.
    pub fn add_address(&mut self, peer: PeerId, addr: Multiaddr) {
        let entry = self.addresses.entry(peer).or_default();
        if entry.len() < MAX_ADDRS_PER_PEER {
            entry.insert(addr);
        }
    }

    /// Records several addresses at once.
    pub fn add_addresses(&mut self, peer: PeerId, addrs: impl IntoIterator<Item = Multiaddr>) {
        for addr in addrs {
            self.add_address(peer, addr);
        }
    }

    /// Known addresses for a peer, if any.
    pub fn addresses_of(&self, peer: &PeerId) -> Vec<Multiaddr> {
        self.addresses
            .get(peer)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn mark_connected(&mut self, peer: PeerId) {
        self.connected.insert(peer);
    }

    pub fn mark_disconnected(&mut self, peer: &PeerId) {
        self.connected.remove(peer);
    }

    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.connected.contains(peer)
    }
}
