//! Cluster membership and the live ring snapshot.
//!
//! [`Membership`] publishes the current [`HashRing`] through a
//! `tokio::sync::watch` channel. Readers take an `Arc` snapshot and route on
//! it; updates build a complete new ring and swap it in one step, so a lookup
//! never sees a half-applied change.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};

use crate::model::Peer;
use crate::ring::{HashRing, RingError};

/// A change reported by the membership feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MembershipEvent {
    Join { peer: Peer },
    Leave { id: String },
    /// Full peer list; the local peer is always kept.
    Replace { peers: Vec<Peer> },
}

#[derive(Clone)]
pub struct Membership {
    local: Peer,
    virtual_nodes: usize,
    tx: Arc<watch::Sender<Arc<HashRing>>>,
}

impl Membership {
    /// Starts with `local` plus the static `peers`.
    pub fn new(local: Peer, peers: impl IntoIterator<Item = Peer>, virtual_nodes: usize) -> Self {
        let ring = HashRing::with_peers(
            virtual_nodes,
            peers
                .into_iter()
                .filter(|p| p.id != local.id)
                .chain(std::iter::once(local.clone())),
        );
        let (tx, _) = watch::channel(Arc::new(ring));
        Self {
            local,
            virtual_nodes,
            tx: Arc::new(tx),
        }
    }

    pub fn local(&self) -> &Peer {
        &self.local
    }

    pub fn snapshot(&self) -> Arc<HashRing> {
        self.tx.borrow().clone()
    }

    /// Owner of `key` on the current snapshot.
    pub fn owner_of(&self, key: &[u8]) -> Result<Peer, RingError> {
        self.snapshot().owner_of(key).cloned()
    }

    pub fn is_local(&self, peer: &Peer) -> bool {
        peer.id == self.local.id
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.snapshot().peers().to_vec()
    }

    /// Applies one event; returns whether the ring changed.
    pub fn apply(&self, event: MembershipEvent) -> bool {
        self.tx.send_if_modified(|current| {
            let next = match &event {
                MembershipEvent::Join { peer } => {
                    if current.peer(&peer.id) == Some(peer) {
                        return false;
                    }
                    current.with_peer(peer.clone())
                }
                MembershipEvent::Leave { id } => {
                    if *id == self.local.id {
                        warn!(peer = %id, "ignoring leave event for the local peer");
                        return false;
                    }
                    if !current.contains(id) {
                        return false;
                    }
                    current.without_peer(id)
                }
                MembershipEvent::Replace { peers } => {
                    let next = HashRing::with_peers(
                        self.virtual_nodes,
                        peers
                            .iter()
                            .filter(|p| p.id != self.local.id)
                            .cloned()
                            .chain(std::iter::once(self.local.clone())),
                    );
                    if next.peers() == current.peers() {
                        return false;
                    }
                    next
                }
            };
            info!(?event, peers = next.len(), "membership changed");
            *current = Arc::new(next);
            true
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<HashRing>> {
        self.tx.subscribe()
    }

    /// Stream of snapshots, starting with the current one.
    pub fn changes(&self) -> WatchStream<Arc<HashRing>> {
        WatchStream::new(self.subscribe())
    }

    /// Consumes an external membership feed until it ends.
    pub fn spawn_feed<S>(&self, feed: S) -> JoinHandle<()>
    where
        S: Stream<Item = MembershipEvent> + Send + 'static,
    {
        let membership = self.clone();
        tokio::spawn(async move {
            let mut feed = Box::pin(feed);
            while let Some(event) = feed.next().await {
                membership.apply(event);
            }
            info!("membership feed ended");
        })
    }
}

impl std::fmt::Debug for Membership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Membership")
            .field("local", &self.local)
            .field("peers", &self.snapshot().len())
            .finish()
    }
}
