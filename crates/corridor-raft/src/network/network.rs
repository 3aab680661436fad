//! openraft network implementation over the shared gRPC transport.
//!
//! One [`PeerRegistry`] per node holds the peer address book and a lazy
//! channel pool; every replication group gets a lightweight
//! [`NetworkFactory`] view onto it.

use std::sync::Arc;

use dashmap::DashMap;
use openraft::error::{
    InstallSnapshotError, NetworkError, RPCError, RaftError as ORaftError,
};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use corridor_sharding::GroupId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tonic::transport::Channel;

use crate::codec::{decode, encode};
use crate::error::RaftError;
use crate::network::service::{
    raft_client::RaftClient, RaftRpcRequest, RPC_TYPE_APPEND_ENTRIES, RPC_TYPE_INSTALL_SNAPSHOT,
    RPC_TYPE_VOTE,
};
use crate::storage::{PeerNode, TypeConfig};

/// Which of a peer's two gRPC endpoints a channel targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ChannelKind {
    /// Raft replication transport (`rpc_addr`).
    Raft,
    /// Peer command control plane (`grpc_addr`).
    Command,
}

/// Address book + channel pools shared by all groups on this node.
#[derive(Default)]
pub struct PeerRegistry {
    nodes: DashMap<u64, PeerNode>,
    channels: DashMap<(u64, ChannelKind), Channel>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_peer(&self, peer_id: u64, node: PeerNode) {
        // A changed address invalidates the pooled channels.
        if let Some(existing) = self.nodes.get(&peer_id) {
            if existing.rpc_addr != node.rpc_addr || existing.grpc_addr != node.grpc_addr {
                self.channels.remove(&(peer_id, ChannelKind::Raft));
                self.channels.remove(&(peer_id, ChannelKind::Command));
            }
        }
        self.nodes.insert(peer_id, node);
    }

    pub fn get_node(&self, peer_id: u64) -> Option<PeerNode> {
        self.nodes.get(&peer_id).map(|n| n.clone())
    }

    pub fn get_all_peers(&self) -> Vec<(u64, PeerNode)> {
        self.nodes
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    fn channel_to(&self, peer_id: u64, kind: ChannelKind) -> Result<Channel, RaftError> {
        if let Some(channel) = self.channels.get(&(peer_id, kind)) {
            return Ok(channel.clone());
        }
        let node = self
            .get_node(peer_id)
            .ok_or_else(|| RaftError::Network(format!("Unknown peer {}", peer_id)))?;
        let addr = match kind {
            ChannelKind::Raft => node.rpc_addr.as_str(),
            ChannelKind::Command => node.command_addr(),
        };
        let endpoint = tonic::transport::Endpoint::from_shared(format!("http://{}", addr))
            .map_err(|e| RaftError::Network(format!("Invalid rpc address {}: {}", addr, e)))?
            .connect_timeout(std::time::Duration::from_secs(5));
        let channel = endpoint.connect_lazy();
        self.channels.insert((peer_id, kind), channel.clone());
        Ok(channel)
    }

    /// Pooled lazy channel to a peer's raft transport. Connections are
    /// established on first use and reconnect with tonic's built-in
    /// backoff.
    pub fn get_raft_channel(&self, peer_id: u64) -> Result<Channel, RaftError> {
        self.channel_to(peer_id, ChannelKind::Raft)
    }

    /// Pooled lazy channel to a peer's command endpoint.
    pub fn get_command_channel(&self, peer_id: u64) -> Result<Channel, RaftError> {
        self.channel_to(peer_id, ChannelKind::Command)
    }
}

/// Per-group view of the registry, handed to openraft.
#[derive(Clone)]
pub struct NetworkFactory {
    group_id: GroupId,
    registry: Arc<PeerRegistry>,
}

impl NetworkFactory {
    pub fn new(group_id: GroupId, registry: Arc<PeerRegistry>) -> Self {
        Self { group_id, registry }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn get_node(&self, peer_id: u64) -> Option<PeerNode> {
        self.registry.get_node(peer_id)
    }
}

impl RaftNetworkFactory<TypeConfig> for NetworkFactory {
    type Network = NetworkConnection;

    async fn new_client(&mut self, target: u64, node: &PeerNode) -> Self::Network {
        // Membership entries carry addresses discovered after startup.
        self.registry.register_peer(target, node.clone());
        NetworkConnection {
            group_id: self.group_id,
            target,
            registry: self.registry.clone(),
        }
    }
}

/// A connection from one group to one target peer.
pub struct NetworkConnection {
    group_id: GroupId,
    target: u64,
    registry: Arc<PeerRegistry>,
}

impl NetworkConnection {
    async fn send_rpc<Req, Resp, E>(
        &self,
        rpc_type: &str,
        rpc: &Req,
    ) -> Result<Resp, RPCError<u64, PeerNode, E>>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
        E: std::error::Error,
    {
        let payload = encode(rpc).map_err(|e| RPCError::Network(NetworkError::new(&e)))?;

        let channel = self
            .registry
            .get_raft_channel(self.target)
            .map_err(|e| RPCError::Network(NetworkError::new(&e)))?;

        let mut client = RaftClient::new(channel);
        let request = tonic::Request::new(RaftRpcRequest {
            group_id: self.group_id.as_u64(),
            rpc_type: rpc_type.to_string(),
            payload,
        });

        let response = client
            .raft_rpc(request)
            .await
            .map_err(|e| {
                RPCError::Network(NetworkError::new(&RaftError::Network(format!(
                    "raft rpc to peer {} failed: {}",
                    self.target, e
                ))))
            })?
            .into_inner();

        if !response.error.is_empty() {
            return Err(RPCError::Network(NetworkError::new(&RaftError::Network(
                response.error,
            ))));
        }

        decode(&response.payload).map_err(|e| RPCError::Network(NetworkError::new(&e)))
    }
}

impl RaftNetwork<TypeConfig> for NetworkConnection {
    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<u64>, RPCError<u64, PeerNode, ORaftError<u64>>> {
        self.send_rpc(RPC_TYPE_APPEND_ENTRIES, &rpc).await
    }

    async fn install_snapshot(
        &mut self,
        rpc: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<
        InstallSnapshotResponse<u64>,
        RPCError<u64, PeerNode, ORaftError<u64, InstallSnapshotError>>,
    > {
        self.send_rpc(RPC_TYPE_INSTALL_SNAPSHOT, &rpc).await
    }

    async fn vote(
        &mut self,
        rpc: VoteRequest<u64>,
        _option: RPCOption,
    ) -> Result<VoteResponse<u64>, RPCError<u64, PeerNode, ORaftError<u64>>> {
        self.send_rpc(RPC_TYPE_VOTE, &rpc).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_registers_and_lists_peers() {
        let registry = PeerRegistry::new();
        registry.register_peer(1, PeerNode::new("127.0.0.1:11110", "127.0.0.1:5001"));
        registry.register_peer(2, PeerNode::new("127.0.0.1:11120", "127.0.0.1:5002"));

        assert_eq!(
            registry.get_node(1).unwrap().rpc_addr,
            "127.0.0.1:11110".to_string()
        );
        assert_eq!(registry.get_all_peers().len(), 2);
    }

    #[test]
    fn changed_address_drops_pooled_channel() {
        let registry = PeerRegistry::new();
        registry.register_peer(1, PeerNode::new("127.0.0.1:11110", "a"));
        registry.get_raft_channel(1).unwrap();
        registry.register_peer(1, PeerNode::new("127.0.0.1:19999", "a"));
        // The next channel fetch reconnects to the new address.
        assert!(registry.get_raft_channel(1).is_ok());
        assert_eq!(registry.get_node(1).unwrap().rpc_addr, "127.0.0.1:19999");
    }

    #[test]
    fn command_addr_falls_back_to_rpc_addr() {
        let plain = PeerNode::new("127.0.0.1:11110", "a");
        assert_eq!(plain.command_addr(), "127.0.0.1:11110");
        let full = PeerNode::with_grpc_addr("127.0.0.1:11110", "127.0.0.1:11111", "a");
        assert_eq!(full.command_addr(), "127.0.0.1:11111");
    }
}
