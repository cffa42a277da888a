//! Known peers, deduplicated by address.

use std::net::IpAddr;

use serde::Serialize;

/// How a peer entry came to be known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerOrigin {
    /// One of this host's own interface addresses.
    Local,
    /// Answered a discovery probe.
    Discovered,
}

/// A peer the UI can offer as a send target. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PeerRecord {
    pub label: String,
    pub address: IpAddr,
    pub origin: PeerOrigin,
}

impl PeerRecord {
    pub fn local(address: IpAddr) -> Self {
        Self {
            label: format!("This device ({})", address),
            address,
            origin: PeerOrigin::Local,
        }
    }

    pub fn discovered(address: IpAddr) -> Self {
        Self {
            label: format!("Device ({})", address),
            address,
            origin: PeerOrigin::Discovered,
        }
    }
}

/// Peer set keyed by address. Insertion order is kept only for stable listing.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: Vec<PeerRecord>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the address is already known. Returns true if the record was added.
    pub fn insert(&mut self, record: PeerRecord) -> bool {
        if self.contains(&record.address) {
            return false;
        }
        self.peers.push(record);
        true
    }

    pub fn contains(&self, address: &IpAddr) -> bool {
        self.peers.iter().any(|p| p.address == *address)
    }

    pub fn list(&self) -> Vec<PeerRecord> {
        self.peers.clone()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Forget every peer (discovery reset).
    pub fn clear(&mut self) {
        self.peers.clear();
    }
}
