//! Consistent hash ring with virtual nodes.
//!
//! Every peer is placed on a 64-bit token ring `virtual_nodes` times. A key
//! belongs to the first token at or after its hash, wrapping around to the
//! start of the ring. Adding or removing a peer only moves the keys that fall
//! between that peer's tokens and their predecessors.
//!
//! A [`HashRing`] is an immutable snapshot; membership changes build a new
//! one (see [`crate::membership`]).

use std::hash::Hasher;

use siphasher::sip::SipHasher24;
use thiserror::Error;

use crate::error::DispatchError;
use crate::model::Peer;

pub const DEFAULT_VIRTUAL_NODES: usize = 128;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RingError {
    #[error("Hash ring has no peers")]
    Empty,
}

impl From<RingError> for DispatchError {
    fn from(err: RingError) -> Self {
        DispatchError::Internal(err.to_string())
    }
}

/// SipHash-2-4 of `data` with fixed keys, stable across processes.
pub fn hash_bytes(data: &[u8]) -> u64 {
    let mut hasher = SipHasher24::new();
    hasher.write(data);
    hasher.finish()
}

#[derive(Debug, Clone)]
pub struct HashRing {
    virtual_nodes: usize,
    /// `(token, index into peers)`, sorted.
    tokens: Vec<(u64, usize)>,
    /// Sorted by id.
    peers: Vec<Peer>,
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(DEFAULT_VIRTUAL_NODES)
    }
}

impl HashRing {
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
            tokens: Vec::new(),
            peers: Vec::new(),
        }
    }

    /// Builds a ring from a peer set. A peer listed twice keeps its last address.
    pub fn with_peers(virtual_nodes: usize, peers: impl IntoIterator<Item = Peer>) -> Self {
        let mut ring = Self::new(virtual_nodes);
        for peer in peers {
            ring.peers.retain(|p| p.id != peer.id);
            ring.peers.push(peer);
        }
        ring.rebuild();
        ring
    }

    fn rebuild(&mut self) {
        self.peers.sort_by(|a, b| a.id.cmp(&b.id));
        self.tokens.clear();
        self.tokens.reserve(self.peers.len() * self.virtual_nodes);
        for (index, peer) in self.peers.iter().enumerate() {
            for replica in 0..self.virtual_nodes {
                let token = hash_bytes(format!("{}-{}", peer.id, replica).as_bytes());
                self.tokens.push((token, index));
            }
        }
        // ties on a token go to the lower peer id, whatever the insertion order
        self.tokens.sort_unstable();
    }

    /// New snapshot with `peer` added, or its address updated.
    pub fn with_peer(&self, peer: Peer) -> Self {
        Self::with_peers(
            self.virtual_nodes,
            self.peers.iter().cloned().chain(std::iter::once(peer)),
        )
    }

    /// New snapshot without the peer `id`.
    pub fn without_peer(&self, id: &str) -> Self {
        Self::with_peers(
            self.virtual_nodes,
            self.peers.iter().filter(|p| p.id != id).cloned(),
        )
    }

    pub fn owner_of(&self, key: &[u8]) -> Result<&Peer, RingError> {
        if self.tokens.is_empty() {
            return Err(RingError::Empty);
        }
        let hash = hash_bytes(key);
        let position = self.tokens.partition_point(|(token, _)| *token < hash);
        let (_, index) = self.tokens[position % self.tokens.len()];
        Ok(&self.peers[index])
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn peer(&self, id: &str) -> Option<&Peer> {
        self.peers.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peer(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }
}
