use relcheck::{CacheStats, Peer};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Peer information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PeerInfo {
    pub id: String,
    pub address: String,
}

impl From<Peer> for PeerInfo {
    fn from(peer: Peer) -> Self {
        Self {
            id: peer.id,
            address: peer.address,
        }
    }
}

/// Ring owner response model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RingOwnerResponse {
    pub object_id: String,
    pub owner: PeerInfo,

    /// Whether the answering node owns the object
    pub is_local: bool,

    /// Number of peers in the ring snapshot used
    pub ring_size: usize,
}

/// Cache statistics response model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CacheStatsResponse {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
}

impl From<CacheStats> for CacheStatsResponse {
    fn from(stats: CacheStats) -> Self {
        Self {
            entries: stats.entries,
            hits: stats.hits,
            misses: stats.misses,
            coalesced: stats.coalesced,
        }
    }
}
