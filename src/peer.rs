//! Peer registry (`ListPeers` / `Peer`) and downstream hand-off
//! bookkeeping (SUPPLEMENTED FEATURES, SPEC_FULL.md; spec.md §9
//! "Downstream replicas").
//!
//! `TellGroupId` carries a `(downstream_flag, upstream_pubkey)` pair:
//! a downstream replica's server advertises that it is downstream of
//! some upstream, and hands the upstream's public key to the client so
//! the client can verify witnesses minted there. We record that
//! hand-off plus a flat list of known replica addresses; the
//! replication stream itself is out of scope (spec.md §1).

use parking_lot::RwLock;

/// One known peer: an address and whether it is reachable as a
/// downstream replica.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Peer {
    /// `host:port` the peer is reachable at.
    pub address: String,
    /// Server name advertised in that peer's `TellGroupId`.
    pub server_name: String,
}

/// The downstream hand-off carried in `TellGroupId`: whether this
/// server is itself downstream of another, and if so, that upstream's
/// public key, used by a connecting client to verify witnesses minted
/// upstream (spec.md §9).
#[derive(Debug, Clone, Default)]
pub struct DownstreamInfo {
    /// Whether this server is a downstream replica.
    pub downstream: bool,
    /// The upstream's public key, present iff `downstream` is set.
    pub upstream_pubkey: Option<Vec<u8>>,
}

/// Tracks known peers (`ListPeers`) and this server's own downstream
/// hand-off (advertised in every `TellGroupId`).
pub struct PeerRegistry {
    peers: RwLock<Vec<Peer>>,
    downstream: DownstreamInfo,
}

impl PeerRegistry {
    /// Creates a registry for a server with the given downstream
    /// hand-off, initially aware of no peers.
    pub fn new(downstream: DownstreamInfo) -> Self {
        Self {
            peers: RwLock::new(Vec::new()),
            downstream,
        }
    }

    /// This server's downstream hand-off, echoed in `TellGroupId`.
    pub fn downstream_info(&self) -> &DownstreamInfo {
        &self.downstream
    }

    /// Adds or updates a known peer (`Peer` operation).
    pub fn add_peer(&self, peer: Peer) {
        let mut peers = self.peers.write();
        if let Some(existing) = peers.iter_mut().find(|p| p.address == peer.address) {
            *existing = peer;
        } else {
            peers.push(peer);
        }
    }

    /// Removes a known peer by address.
    pub fn remove_peer(&self, address: &str) {
        self.peers.write().retain(|p| p.address != address);
    }

    /// Lists every known peer (`ListPeers` operation).
    pub fn list_peers(&self) -> Vec<Peer> {
        self.peers.read().clone()
    }
}
