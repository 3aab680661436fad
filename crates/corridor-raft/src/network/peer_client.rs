//! Typed client for peer commands.
//!
//! Wraps the generated-style gRPC client with the shared channel pool,
//! per-call deadlines, and status decoding. `NotLeader` responses surface
//! as [`RaftError::NotLeader`] with the leader hint so callers can refresh
//! and retry once.

use std::sync::Arc;
use std::time::Duration;

use crate::error::RaftError;
use crate::network::network::PeerRegistry;
use crate::network::peer_service::{
    peer_client_gen::PeerServiceClient, ConnPingRequest, ConnWriteRequest, ConnectRequest,
    ForwardRecvRequest, ForwardRecvackRequest, ForwardSendRequest, SyncProposeRequest,
    STATUS_NOT_LEADER, STATUS_SUCCESS, STATUS_UNAVAILABLE,
};

/// High-level peer command client built on the shared channel pool.
#[derive(Clone)]
pub struct PeerClient {
    registry: Arc<PeerRegistry>,
    self_peer_id: u64,
    timeout: Duration,
}

impl PeerClient {
    pub fn new(registry: Arc<PeerRegistry>, self_peer_id: u64, timeout: Duration) -> Self {
        Self {
            registry,
            self_peer_id,
            timeout,
        }
    }

    fn client(&self, peer_id: u64) -> Result<PeerServiceClient<tonic::transport::Channel>, RaftError> {
        let channel = self.registry.get_command_channel(peer_id)?;
        Ok(PeerServiceClient::new(channel))
    }

    async fn with_deadline<T>(
        &self,
        peer_id: u64,
        fut: impl std::future::Future<Output = Result<T, tonic::Status>>,
    ) -> Result<T, RaftError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(status)) => Err(RaftError::Network(format!(
                "peer {} rpc failed: {}",
                peer_id, status
            ))),
            Err(_) => Err(RaftError::Timeout(self.timeout)),
        }
    }

    /// Forward a proposal to a replica (normally the leader) of the target
    /// group and return the apply result.
    pub async fn send_sync_propose(
        &self,
        peer_id: u64,
        group_id: corridor_sharding::GroupId,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, RaftError> {
        let mut client = self.client(peer_id)?;
        let request = tonic::Request::new(SyncProposeRequest {
            group_id: group_id.as_u64(),
            payload,
        });
        let response = self
            .with_deadline(peer_id, async move { client.sync_propose(request).await })
            .await?
            .into_inner();

        match response.status {
            STATUS_SUCCESS => Ok(response.payload),
            STATUS_NOT_LEADER => Err(RaftError::not_leader(
                group_id.to_string(),
                (response.leader_peer_id != 0).then_some(response.leader_peer_id),
            )),
            STATUS_UNAVAILABLE => Err(RaftError::Unavailable(response.error)),
            _ => Err(RaftError::Proposal(response.error)),
        }
    }

    pub async fn send_connect(
        &self,
        peer_id: u64,
        uid: String,
        conn_id: u64,
    ) -> Result<(), RaftError> {
        let mut client = self.client(peer_id)?;
        let request = tonic::Request::new(ConnectRequest {
            uid,
            conn_id,
            from_peer_id: self.self_peer_id,
        });
        let response = self
            .with_deadline(peer_id, async move { client.connect(request).await })
            .await?
            .into_inner();
        if response.status == STATUS_SUCCESS {
            Ok(())
        } else {
            Err(RaftError::Network(response.error))
        }
    }

    pub async fn conn_write(
        &self,
        peer_id: u64,
        uid: String,
        conn_id: u64,
        payload: Vec<u8>,
    ) -> Result<(), RaftError> {
        let mut client = self.client(peer_id)?;
        let request = tonic::Request::new(ConnWriteRequest {
            uid,
            conn_id,
            payload,
        });
        let response = self
            .with_deadline(peer_id, async move { client.conn_write(request).await })
            .await?
            .into_inner();
        if response.status == STATUS_SUCCESS {
            Ok(())
        } else {
            Err(RaftError::Unavailable("conn write rejected".to_string()))
        }
    }

    pub async fn conn_ping(&self, peer_id: u64) -> Result<(), RaftError> {
        let mut client = self.client(peer_id)?;
        let request = tonic::Request::new(ConnPingRequest {
            from_peer_id: self.self_peer_id,
        });
        let response = self
            .with_deadline(peer_id, async move { client.conn_ping(request).await })
            .await?
            .into_inner();
        if response.status == STATUS_SUCCESS {
            Ok(())
        } else {
            Err(RaftError::Unavailable(format!("peer {} ping failed", peer_id)))
        }
    }

    /// Forward a send request to the channel's slot-leader node; returns
    /// the encoded send result.
    pub async fn forward_send(&self, peer_id: u64, payload: Vec<u8>) -> Result<Vec<u8>, RaftError> {
        let mut client = self.client(peer_id)?;
        let request = tonic::Request::new(ForwardSendRequest {
            from_peer_id: self.self_peer_id,
            payload,
        });
        let response = self
            .with_deadline(peer_id, async move { client.forward_send(request).await })
            .await?
            .into_inner();

        match response.status {
            STATUS_SUCCESS => Ok(response.payload),
            STATUS_NOT_LEADER => Err(RaftError::not_leader("send", None)),
            STATUS_UNAVAILABLE => Err(RaftError::Unavailable(response.error)),
            _ => Err(RaftError::Network(response.error)),
        }
    }

    /// Deliver a batch of messages to subscribers connected on `peer_id`.
    pub async fn forward_recv(&self, peer_id: u64, payload: Vec<u8>) -> Result<(), RaftError> {
        let mut client = self.client(peer_id)?;
        let request = tonic::Request::new(ForwardRecvRequest {
            from_peer_id: self.self_peer_id,
            payload,
        });
        let response = self
            .with_deadline(peer_id, async move { client.forward_recv(request).await })
            .await?
            .into_inner();

        match response.status {
            STATUS_SUCCESS => Ok(()),
            STATUS_UNAVAILABLE => Err(RaftError::Unavailable(response.error)),
            _ => Err(RaftError::Network(response.error)),
        }
    }

    pub async fn forward_recvack(&self, peer_id: u64, payload: Vec<u8>) -> Result<(), RaftError> {
        let mut client = self.client(peer_id)?;
        let request = tonic::Request::new(ForwardRecvackRequest {
            from_peer_id: self.self_peer_id,
            payload,
        });
        let response = self
            .with_deadline(peer_id, async move {
                client.forward_recvack(request).await
            })
            .await?
            .into_inner();
        if response.status == STATUS_SUCCESS {
            Ok(())
        } else {
            Err(RaftError::Network("recvack rejected".to_string()))
        }
    }
}

impl std::fmt::Debug for PeerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerClient")
            .field("self_peer_id", &self.self_peer_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}
