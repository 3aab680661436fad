//! gRPC networking: raft replication transport, peer command service, and
//! the shared channel pool.
//!
//! ## Components
//!
//! - [`NetworkFactory`] / [`NetworkConnection`]: openraft transport per group
//! - [`PeerRegistry`]: peer address book + pooled channels
//! - [`RaftService`]: incoming replication RPC dispatch
//! - [`PeerClient`]: typed client for peer commands
//! - [`start_raft_server`] / [`start_peer_server`]: bind the two services

mod network;
mod peer_client;
pub mod peer_service;
pub mod service;

use std::net::SocketAddr;
use std::sync::Arc;

pub use network::{NetworkConnection, NetworkFactory, PeerRegistry};
pub use peer_client::PeerClient;
pub use peer_service::{PeerCommandHandler, PeerCommandService};
pub use service::RaftService;

use crate::error::RaftError;
use crate::fabric::RaftFabric;

/// Serves the raft replication service on the node's transport address.
/// Runs until the returned task is aborted or the process exits.
pub fn start_raft_server(
    addr: SocketAddr,
    fabric: Arc<RaftFabric>,
) -> tokio::task::JoinHandle<Result<(), RaftError>> {
    tokio::spawn(async move {
        let raft_service = service::raft_server::RaftServer::new(RaftService::new(fabric));
        log::info!("Raft transport listening on {}", addr);
        tonic::transport::Server::builder()
            .add_service(raft_service)
            .serve(addr)
            .await
            .map_err(|e| RaftError::Network(format!("raft server failed: {}", e)))
    })
}

/// Serves the peer command service on the node's control-plane address.
pub fn start_peer_server<H: PeerCommandHandler + 'static>(
    addr: SocketAddr,
    handler: Arc<H>,
) -> tokio::task::JoinHandle<Result<(), RaftError>> {
    tokio::spawn(async move {
        let peer_service =
            peer_service::peer_server::PeerServer::new(PeerCommandService::new(handler));
        log::info!("Peer command RPC listening on {}", addr);
        tonic::transport::Server::builder()
            .add_service(peer_service)
            .serve(addr)
            .await
            .map_err(|e| RaftError::Network(format!("peer server failed: {}", e)))
    })
}
