//! openraft type configuration.

use std::io::Cursor;

use openraft::{Entry, RaftTypeConfig};
use serde::{Deserialize, Serialize};

/// Type configuration shared by every replication group.
///
/// Commands and responses are opaque bytes: the fabric replicates encoded
/// [`crate::commands::CmdRequest`] envelopes and hands back the apply
/// result bytes unchanged.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TypeConfig;

impl RaftTypeConfig for TypeConfig {
    type D = Vec<u8>;
    type R = Vec<u8>;
    type NodeId = u64;
    type Node = PeerNode;
    type Entry = Entry<Self>;
    type SnapshotData = Cursor<Vec<u8>>;
    type AsyncRuntime = openraft::TokioRuntime;
    type Responder = openraft::impls::OneshotResponder<Self>;
}

/// Node addresses carried in raft membership.
///
/// All fields must serialize unconditionally — membership entries are
/// decoded by every replica and a missing field poisons the log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PeerNode {
    /// Raft replication transport address (host:port).
    pub rpc_addr: String,
    /// Peer command (control plane) gRPC address (host:port).
    #[serde(default)]
    pub grpc_addr: String,
    /// Advertised HTTP address for leader-routed API forwards.
    pub api_addr: String,
}

impl PeerNode {
    pub fn new(rpc_addr: impl Into<String>, api_addr: impl Into<String>) -> Self {
        Self {
            rpc_addr: rpc_addr.into(),
            grpc_addr: String::new(),
            api_addr: api_addr.into(),
        }
    }

    pub fn with_grpc_addr(
        rpc_addr: impl Into<String>,
        grpc_addr: impl Into<String>,
        api_addr: impl Into<String>,
    ) -> Self {
        Self {
            rpc_addr: rpc_addr.into(),
            grpc_addr: grpc_addr.into(),
            api_addr: api_addr.into(),
        }
    }

    /// Peer command address, falling back to the replication address for
    /// nodes that co-host both services on one port.
    pub fn command_addr(&self) -> &str {
        if self.grpc_addr.is_empty() {
            &self.rpc_addr
        } else {
            &self.grpc_addr
        }
    }
}

impl std::fmt::Display for PeerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.rpc_addr, self.api_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_node_display() {
        let node = PeerNode::new("127.0.0.1:11110", "http://127.0.0.1:5001");
        assert_eq!(node.to_string(), "127.0.0.1:11110|http://127.0.0.1:5001");
    }
}
