//! Peer command gRPC service.
//!
//! Inter-node commands that are *not* raft replication: forwarded slot
//! proposals, cross-node message forwarding, and connection plumbing. Each
//! command has its own explicit gRPC method; the service is co-hosted on
//! the raft transport port and shares the same channel pool.
//!
//! ## Adding a new peer RPC
//!
//! 1. Define `FooRequest` / `FooResponse` prost messages below
//! 2. Add `async fn foo(...)` to the `peer_server::PeerService` trait
//! 3. Add the path routing in `PeerServer::call()`
//! 4. Add the client method in `peer_client_gen::PeerServiceClient`
//! 5. Handle it in the `PeerCommandHandler` implementation

use std::sync::Arc;

use async_trait::async_trait;
use tonic::{Request, Response, Status};

use crate::error::RaftError;

// Binary status carried by every peer command response.
pub const STATUS_SUCCESS: i32 = 1;
pub const STATUS_ERROR: i32 = 2;
pub const STATUS_NOT_LEADER: i32 = 3;
pub const STATUS_UNAVAILABLE: i32 = 4;

// ─── Request/Response Messages ──────────────────────────────────────────────

/// Forwarded proposal: propose `payload` on the target group and return
/// the apply result. `group_id` uses the numeric group encoding
/// (0 = peer group, n+1 = slot n).
#[derive(Clone, PartialEq, prost::Message)]
pub struct SyncProposeRequest {
    #[prost(uint64, tag = "1")]
    pub group_id: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SyncProposeResponse {
    #[prost(int32, tag = "1")]
    pub status: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    #[prost(string, tag = "3")]
    pub error: String,
    /// Current leader hint when status is NotLeader; 0 when unknown.
    #[prost(uint64, tag = "4")]
    pub leader_peer_id: u64,
}

/// A client connected on another node wants a proxy connection here.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ConnectRequest {
    #[prost(string, tag = "1")]
    pub uid: String,
    #[prost(uint64, tag = "2")]
    pub conn_id: u64,
    #[prost(uint64, tag = "3")]
    pub from_peer_id: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ConnectResponse {
    #[prost(int32, tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub error: String,
}

/// Write bytes to a proxied connection.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ConnWriteRequest {
    #[prost(string, tag = "1")]
    pub uid: String,
    #[prost(uint64, tag = "2")]
    pub conn_id: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ConnWriteResponse {
    #[prost(int32, tag = "1")]
    pub status: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ConnPingRequest {
    #[prost(uint64, tag = "1")]
    pub from_peer_id: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ConnPingResponse {
    #[prost(int32, tag = "1")]
    pub status: i32,
}

/// Forward a send request to the channel's slot-leader node.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ForwardSendRequest {
    #[prost(uint64, tag = "1")]
    pub from_peer_id: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ForwardSendResponse {
    #[prost(int32, tag = "1")]
    pub status: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    #[prost(string, tag = "3")]
    pub error: String,
}

/// Deliver messages to subscribers connected on this node.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ForwardRecvRequest {
    #[prost(uint64, tag = "1")]
    pub from_peer_id: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ForwardRecvResponse {
    #[prost(int32, tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub error: String,
}

/// Forward receive-acks back to the node that owns the delivery state.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ForwardRecvackRequest {
    #[prost(uint64, tag = "1")]
    pub from_peer_id: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ForwardRecvackResponse {
    #[prost(int32, tag = "1")]
    pub status: i32,
}

// ─── gRPC Client ────────────────────────────────────────────────────────────

pub mod peer_client_gen {
    use super::*;
    use tonic::codegen::*;

    /// Peer command gRPC client.
    #[derive(Debug, Clone)]
    pub struct PeerServiceClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl PeerServiceClient<tonic::transport::Channel> {
        pub fn new(channel: tonic::transport::Channel) -> Self {
            let inner = tonic::client::Grpc::new(channel);
            Self { inner }
        }
    }

    macro_rules! unary_method {
        ($name:ident, $req:ty, $resp:ty, $path:literal, $method:literal) => {
            pub async fn $name(
                &mut self,
                request: impl tonic::IntoRequest<$req>,
            ) -> std::result::Result<tonic::Response<$resp>, tonic::Status> {
                self.inner.ready().await.map_err(|e| {
                    tonic::Status::new(
                        tonic::Code::Unknown,
                        format!("Service not ready: {:?}", e),
                    )
                })?;

                let codec = tonic::codec::ProstCodec::default();
                let path = http::uri::PathAndQuery::from_static($path);
                let mut req = request.into_request();
                req.extensions_mut()
                    .insert(GrpcMethod::new("corridor.peer.PeerService", $method));
                self.inner.unary(req, path, codec).await
            }
        };
    }

    impl<T> PeerServiceClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError> + std::fmt::Debug,
        T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
    {
        unary_method!(
            sync_propose,
            SyncProposeRequest,
            SyncProposeResponse,
            "/corridor.peer.PeerService/SyncPropose",
            "SyncPropose"
        );
        unary_method!(
            connect,
            ConnectRequest,
            ConnectResponse,
            "/corridor.peer.PeerService/Connect",
            "Connect"
        );
        unary_method!(
            conn_write,
            ConnWriteRequest,
            ConnWriteResponse,
            "/corridor.peer.PeerService/ConnWrite",
            "ConnWrite"
        );
        unary_method!(
            conn_ping,
            ConnPingRequest,
            ConnPingResponse,
            "/corridor.peer.PeerService/ConnPing",
            "ConnPing"
        );
        unary_method!(
            forward_send,
            ForwardSendRequest,
            ForwardSendResponse,
            "/corridor.peer.PeerService/ForwardSend",
            "ForwardSend"
        );
        unary_method!(
            forward_recv,
            ForwardRecvRequest,
            ForwardRecvResponse,
            "/corridor.peer.PeerService/ForwardRecv",
            "ForwardRecv"
        );
        unary_method!(
            forward_recvack,
            ForwardRecvackRequest,
            ForwardRecvackResponse,
            "/corridor.peer.PeerService/ForwardRecvack",
            "ForwardRecvack"
        );
    }
}

// ─── gRPC Server ────────────────────────────────────────────────────────────

pub mod peer_server {
    use super::*;
    use tonic::codegen::*;

    /// Peer command service trait — implement to handle incoming commands.
    #[async_trait::async_trait]
    pub trait PeerService: std::marker::Send + std::marker::Sync + 'static {
        async fn sync_propose(
            &self,
            request: tonic::Request<SyncProposeRequest>,
        ) -> std::result::Result<tonic::Response<SyncProposeResponse>, tonic::Status>;

        async fn connect(
            &self,
            request: tonic::Request<ConnectRequest>,
        ) -> std::result::Result<tonic::Response<ConnectResponse>, tonic::Status>;

        async fn conn_write(
            &self,
            request: tonic::Request<ConnWriteRequest>,
        ) -> std::result::Result<tonic::Response<ConnWriteResponse>, tonic::Status>;

        async fn conn_ping(
            &self,
            request: tonic::Request<ConnPingRequest>,
        ) -> std::result::Result<tonic::Response<ConnPingResponse>, tonic::Status>;

        async fn forward_send(
            &self,
            request: tonic::Request<ForwardSendRequest>,
        ) -> std::result::Result<tonic::Response<ForwardSendResponse>, tonic::Status>;

        async fn forward_recv(
            &self,
            request: tonic::Request<ForwardRecvRequest>,
        ) -> std::result::Result<tonic::Response<ForwardRecvResponse>, tonic::Status>;

        async fn forward_recvack(
            &self,
            request: tonic::Request<ForwardRecvackRequest>,
        ) -> std::result::Result<tonic::Response<ForwardRecvackResponse>, tonic::Status>;
    }

    /// tonic server wrapper.
    #[derive(Debug)]
    pub struct PeerServer<T: PeerService> {
        inner: Arc<T>,
    }

    impl<T: PeerService> PeerServer<T> {
        pub fn new(inner: T) -> Self {
            Self {
                inner: Arc::new(inner),
            }
        }

        pub fn from_arc(inner: Arc<T>) -> Self {
            Self { inner }
        }
    }

    impl<T: PeerService> Clone for PeerServer<T> {
        fn clone(&self) -> Self {
            Self {
                inner: self.inner.clone(),
            }
        }
    }

    impl<T: PeerService> tonic::server::NamedService for PeerServer<T> {
        const NAME: &'static str = "corridor.peer.PeerService";
    }

    macro_rules! unary_svc {
        ($svc:ident, $trait_method:ident, $req:ty, $resp:ty) => {
            struct $svc<T: PeerService>(Arc<T>);

            impl<T: PeerService> tonic::server::UnaryService<$req> for $svc<T> {
                type Response = $resp;
                type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

                fn call(&mut self, request: tonic::Request<$req>) -> Self::Future {
                    let inner = self.0.clone();
                    let fut = async move { inner.$trait_method(request).await };
                    Box::pin(fut)
                }
            }
        };
    }

    unary_svc!(SyncProposeSvc, sync_propose, SyncProposeRequest, SyncProposeResponse);
    unary_svc!(ConnectSvc, connect, ConnectRequest, ConnectResponse);
    unary_svc!(ConnWriteSvc, conn_write, ConnWriteRequest, ConnWriteResponse);
    unary_svc!(ConnPingSvc, conn_ping, ConnPingRequest, ConnPingResponse);
    unary_svc!(ForwardSendSvc, forward_send, ForwardSendRequest, ForwardSendResponse);
    unary_svc!(ForwardRecvSvc, forward_recv, ForwardRecvRequest, ForwardRecvResponse);
    unary_svc!(
        ForwardRecvackSvc,
        forward_recvack,
        ForwardRecvackRequest,
        ForwardRecvackResponse
    );

    impl<T, B> tonic::codegen::Service<http::Request<B>> for PeerServer<T>
    where
        T: PeerService,
        B: Body + std::marker::Send + 'static,
        B::Error: Into<StdError> + std::marker::Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = std::convert::Infallible;
        type Future = BoxFuture<Self::Response, Self::Error>;

        fn poll_ready(
            &mut self,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            let inner = self.inner.clone();

            macro_rules! dispatch {
                ($svc:ident) => {{
                    let fut = async move {
                        let mut grpc =
                            tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                        let method = $svc(inner);
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }};
            }

            match req.uri().path() {
                "/corridor.peer.PeerService/SyncPropose" => dispatch!(SyncProposeSvc),
                "/corridor.peer.PeerService/Connect" => dispatch!(ConnectSvc),
                "/corridor.peer.PeerService/ConnWrite" => dispatch!(ConnWriteSvc),
                "/corridor.peer.PeerService/ConnPing" => dispatch!(ConnPingSvc),
                "/corridor.peer.PeerService/ForwardSend" => dispatch!(ForwardSendSvc),
                "/corridor.peer.PeerService/ForwardRecv" => dispatch!(ForwardRecvSvc),
                "/corridor.peer.PeerService/ForwardRecvack" => dispatch!(ForwardRecvackSvc),
                _ => Box::pin(async move {
                    let mut builder = http::Response::builder();
                    builder = builder.status(200).header("grpc-status", "12");
                    Ok(builder.body(tonic::body::empty_body()).unwrap())
                }),
            }
        }
    }
}

// ─── Handler plumbing ───────────────────────────────────────────────────────

/// Application-side handler for incoming peer commands.
///
/// The gRPC layer stays transport-only; the server core implements this
/// trait and receives decoded payloads.
#[async_trait]
pub trait PeerCommandHandler: Send + Sync {
    /// Propose on a local replica of the target group; returns the apply
    /// result.
    async fn on_sync_propose(&self, group_id: u64, payload: Vec<u8>) -> Result<Vec<u8>, RaftError>;

    async fn on_connect(&self, uid: String, conn_id: u64, from_peer_id: u64)
        -> Result<(), RaftError>;

    async fn on_conn_write(
        &self,
        uid: String,
        conn_id: u64,
        payload: Vec<u8>,
    ) -> Result<(), RaftError>;

    async fn on_forward_send(
        &self,
        from_peer_id: u64,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, RaftError>;

    async fn on_forward_recv(&self, from_peer_id: u64, payload: Vec<u8>) -> Result<(), RaftError>;

    async fn on_forward_recvack(
        &self,
        from_peer_id: u64,
        payload: Vec<u8>,
    ) -> Result<(), RaftError>;
}

fn status_of(err: &RaftError) -> i32 {
    match err {
        RaftError::NotLeader { .. } => STATUS_NOT_LEADER,
        RaftError::Unavailable(_) | RaftError::Network(_) | RaftError::Timeout(_) => {
            STATUS_UNAVAILABLE
        }
        _ => STATUS_ERROR,
    }
}

/// Bridges the gRPC trait onto a [`PeerCommandHandler`].
pub struct PeerCommandService<H: PeerCommandHandler> {
    handler: Arc<H>,
}

impl<H: PeerCommandHandler> PeerCommandService<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<H: PeerCommandHandler + 'static> peer_server::PeerService for PeerCommandService<H> {
    async fn sync_propose(
        &self,
        request: Request<SyncProposeRequest>,
    ) -> std::result::Result<Response<SyncProposeResponse>, Status> {
        let req = request.into_inner();
        let response = match self.handler.on_sync_propose(req.group_id, req.payload).await {
            Ok(payload) => SyncProposeResponse {
                status: STATUS_SUCCESS,
                payload,
                error: String::new(),
                leader_peer_id: 0,
            },
            Err(e) => SyncProposeResponse {
                status: status_of(&e),
                payload: Vec::new(),
                error: e.to_string(),
                leader_peer_id: e.leader_hint().unwrap_or(0),
            },
        };
        Ok(Response::new(response))
    }

    async fn connect(
        &self,
        request: Request<ConnectRequest>,
    ) -> std::result::Result<Response<ConnectResponse>, Status> {
        let req = request.into_inner();
        let response = match self
            .handler
            .on_connect(req.uid, req.conn_id, req.from_peer_id)
            .await
        {
            Ok(()) => ConnectResponse {
                status: STATUS_SUCCESS,
                error: String::new(),
            },
            Err(e) => ConnectResponse {
                status: status_of(&e),
                error: e.to_string(),
            },
        };
        Ok(Response::new(response))
    }

    async fn conn_write(
        &self,
        request: Request<ConnWriteRequest>,
    ) -> std::result::Result<Response<ConnWriteResponse>, Status> {
        let req = request.into_inner();
        let status = match self
            .handler
            .on_conn_write(req.uid, req.conn_id, req.payload)
            .await
        {
            Ok(()) => STATUS_SUCCESS,
            Err(e) => status_of(&e),
        };
        Ok(Response::new(ConnWriteResponse { status }))
    }

    async fn conn_ping(
        &self,
        _request: Request<ConnPingRequest>,
    ) -> std::result::Result<Response<ConnPingResponse>, Status> {
        Ok(Response::new(ConnPingResponse {
            status: STATUS_SUCCESS,
        }))
    }

    async fn forward_send(
        &self,
        request: Request<ForwardSendRequest>,
    ) -> std::result::Result<Response<ForwardSendResponse>, Status> {
        let req = request.into_inner();
        let response = match self
            .handler
            .on_forward_send(req.from_peer_id, req.payload)
            .await
        {
            Ok(payload) => ForwardSendResponse {
                status: STATUS_SUCCESS,
                payload,
                error: String::new(),
            },
            Err(e) => ForwardSendResponse {
                status: status_of(&e),
                payload: Vec::new(),
                error: e.to_string(),
            },
        };
        Ok(Response::new(response))
    }

    async fn forward_recv(
        &self,
        request: Request<ForwardRecvRequest>,
    ) -> std::result::Result<Response<ForwardRecvResponse>, Status> {
        let req = request.into_inner();
        let response = match self
            .handler
            .on_forward_recv(req.from_peer_id, req.payload)
            .await
        {
            Ok(()) => ForwardRecvResponse {
                status: STATUS_SUCCESS,
                error: String::new(),
            },
            Err(e) => ForwardRecvResponse {
                status: status_of(&e),
                error: e.to_string(),
            },
        };
        Ok(Response::new(response))
    }

    async fn forward_recvack(
        &self,
        request: Request<ForwardRecvackRequest>,
    ) -> std::result::Result<Response<ForwardRecvackResponse>, Status> {
        let req = request.into_inner();
        let status = match self
            .handler
            .on_forward_recvack(req.from_peer_id, req.payload)
            .await
        {
            Ok(()) => STATUS_SUCCESS,
            Err(e) => status_of(&e),
        };
        Ok(Response::new(ForwardRecvackResponse { status }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            status_of(&RaftError::not_leader("slot:0001", Some(2))),
            STATUS_NOT_LEADER
        );
        assert_eq!(
            status_of(&RaftError::Unavailable("down".to_string())),
            STATUS_UNAVAILABLE
        );
        assert_eq!(
            status_of(&RaftError::Internal("boom".to_string())),
            STATUS_ERROR
        );
    }

    #[test]
    fn sync_propose_message_fields() {
        let req = SyncProposeRequest {
            group_id: 8,
            payload: vec![1, 2, 3],
        };
        assert_eq!(req.group_id, 8);
        assert_eq!(req.payload, vec![1, 2, 3]);
    }
}
