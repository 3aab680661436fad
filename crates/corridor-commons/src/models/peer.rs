//! Peer identity and membership record.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Joining,
    #[default]
    Active,
    Draining,
}

/// A cluster member as recorded in the replicated cluster configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Peer {
    /// Stable unique id (>= 1). Id 0 is reserved to mean "unknown"
    /// (e.g. an unresolved slot leader).
    pub peer_id: u64,
    /// Intra-cluster raft transport address (host:port).
    pub server_addr: String,
    /// Control-plane gRPC address for peer commands.
    pub grpc_addr: String,
    /// Advertised HTTP address used as a forward target for leader-routed
    /// API requests.
    pub api_addr: String,
    pub status: PeerStatus,
}

impl Peer {
    pub fn new(peer_id: u64, server_addr: impl Into<String>, grpc_addr: impl Into<String>) -> Self {
        Self {
            peer_id,
            server_addr: server_addr.into(),
            grpc_addr: grpc_addr.into(),
            api_addr: String::new(),
            status: PeerStatus::Active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_peer_defaults_to_active() {
        let peer = Peer::new(7, "10.0.0.7:11110", "10.0.0.7:11111");
        assert_eq!(peer.peer_id, 7);
        assert_eq!(peer.status, PeerStatus::Active);
        assert!(peer.api_addr.is_empty());
    }
}
