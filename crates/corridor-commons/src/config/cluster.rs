//! Cluster configuration, parsed from the `[cluster]` section of config.toml.
//!
//! The section has a FLAT structure (no nesting). If it is absent the server
//! runs standalone: commands are applied locally without replication and no
//! raft transport is opened.
//!
//! Example config.toml:
//! ```toml
//! [cluster]
//! on = true
//! peer_id = 1
//! addr = "0.0.0.0:11110"
//! grpc_addr = "0.0.0.0:11111"
//! slot_count = 64
//! replica_count = 3
//!
//! [[cluster.peers]]
//! id = 2
//! server_addr = "10.0.0.2:11110"
//! grpc_addr = "10.0.0.2:11111"
//! api_addr = "http://10.0.0.2:5001"
//! ```

use serde::{Deserialize, Serialize};

/// The `[cluster]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Enables cluster mode. Present-but-off lets an operator stage the
    /// section without joining a cluster.
    #[serde(default = "default_on")]
    pub on: bool,

    /// This peer's unique id (must be >= 1).
    pub peer_id: u64,

    /// Raft transport listen address (host:port).
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Peer gRPC listen address for forwarded commands (host:port).
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: String,

    /// Number of slots the channel keyspace is hashed into. Fixed at
    /// genesis; changing it requires a full reshard migration.
    #[serde(default = "default_slot_count")]
    pub slot_count: u32,

    /// Replicas per slot. Slots are allocated with exactly this many peers
    /// once the cluster has that many members.
    #[serde(default = "default_replica_count")]
    pub replica_count: u32,

    /// Seed peer list; identical on every founding member.
    #[serde(default)]
    pub peers: Vec<PeerSeed>,
}

/// A seed entry for a founding cluster member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSeed {
    pub id: u64,
    pub server_addr: String,
    #[serde(default)]
    pub grpc_addr: String,
    #[serde(default)]
    pub api_addr: String,
}

impl ClusterConfig {
    /// A single-node cluster layout, used by tests and standalone setups
    /// that still want the replicated code path.
    pub fn single_node(peer_id: u64) -> Self {
        Self {
            on: true,
            peer_id,
            addr: default_addr(),
            grpc_addr: default_grpc_addr(),
            slot_count: 1,
            replica_count: 1,
            peers: Vec::new(),
        }
    }
}

fn default_on() -> bool {
    true
}

fn default_addr() -> String {
    "0.0.0.0:11110".to_string()
}

fn default_grpc_addr() -> String {
    "0.0.0.0:11111".to_string()
}

fn default_slot_count() -> u32 {
    64
}

fn default_replica_count() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg: ClusterConfig = toml::from_str("peer_id = 1").unwrap();
        assert!(cfg.on);
        assert_eq!(cfg.slot_count, 64);
        assert_eq!(cfg.replica_count, 3);
        assert!(cfg.peers.is_empty());
    }

    #[test]
    fn peers_parse() {
        let cfg: ClusterConfig = toml::from_str(
            r#"
            peer_id = 1
            slot_count = 8

            [[peers]]
            id = 2
            server_addr = "10.0.0.2:11110"
            grpc_addr = "10.0.0.2:11111"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.peers.len(), 1);
        assert_eq!(cfg.peers[0].id, 2);
        assert_eq!(cfg.slot_count, 8);
    }
}
