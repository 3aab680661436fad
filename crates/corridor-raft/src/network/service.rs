//! Raft replication gRPC service.
//!
//! Carries vote / append-entries / install-snapshot RPCs for every
//! replication group over a single method; the group id and RPC kind are
//! fields of the request. Hand-written generated-style client and server,
//! so there is no protoc build step.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::error::RaftError;
use crate::fabric::RaftFabric;

/// Raft RPC request.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RaftRpcRequest {
    /// Numeric group id (0 = peer group, n+1 = slot n).
    #[prost(uint64, tag = "1")]
    pub group_id: u64,

    /// RPC kind: "vote", "append_entries", "install_snapshot".
    #[prost(string, tag = "2")]
    pub rpc_type: String,

    /// Serialized RPC payload.
    #[prost(bytes = "vec", tag = "3")]
    pub payload: Vec<u8>,
}

/// Raft RPC response.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RaftRpcResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,

    /// Error message, empty on success.
    #[prost(string, tag = "2")]
    pub error: String,
}

pub const RPC_TYPE_VOTE: &str = "vote";
pub const RPC_TYPE_APPEND_ENTRIES: &str = "append_entries";
pub const RPC_TYPE_INSTALL_SNAPSHOT: &str = "install_snapshot";

pub mod raft_client {
    use super::*;
    use tonic::codegen::*;

    /// Raft replication RPC client.
    #[derive(Debug, Clone)]
    pub struct RaftClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl RaftClient<tonic::transport::Channel> {
        pub fn new(channel: tonic::transport::Channel) -> Self {
            let inner = tonic::client::Grpc::new(channel);
            Self { inner }
        }
    }

    impl<T> RaftClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError> + std::fmt::Debug,
        T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
    {
        pub async fn raft_rpc(
            &mut self,
            request: impl tonic::IntoRequest<RaftRpcRequest>,
        ) -> std::result::Result<tonic::Response<RaftRpcResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(tonic::Code::Unknown, format!("Service not ready: {:?}", e))
            })?;

            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/corridor.raft.RaftService/RaftRpc");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("corridor.raft.RaftService", "RaftRpc"));
            self.inner.unary(req, path, codec).await
        }
    }
}

pub mod raft_server {
    use super::*;
    use tonic::codegen::*;

    /// Raft service trait for incoming replication RPCs.
    #[async_trait::async_trait]
    pub trait Raft: std::marker::Send + std::marker::Sync + 'static {
        async fn raft_rpc(
            &self,
            request: tonic::Request<RaftRpcRequest>,
        ) -> std::result::Result<tonic::Response<RaftRpcResponse>, tonic::Status>;
    }

    /// tonic server wrapper.
    #[derive(Debug)]
    pub struct RaftServer<T: Raft> {
        inner: Arc<T>,
    }

    impl<T: Raft> RaftServer<T> {
        pub fn new(inner: T) -> Self {
            Self {
                inner: Arc::new(inner),
            }
        }

        pub fn from_arc(inner: Arc<T>) -> Self {
            Self { inner }
        }
    }

    impl<T: Raft> Clone for RaftServer<T> {
        fn clone(&self) -> Self {
            Self {
                inner: self.inner.clone(),
            }
        }
    }

    impl<T: Raft> tonic::server::NamedService for RaftServer<T> {
        const NAME: &'static str = "corridor.raft.RaftService";
    }

    impl<T, B> tonic::codegen::Service<http::Request<B>> for RaftServer<T>
    where
        T: Raft,
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

            match req.uri().path() {
                "/corridor.raft.RaftService/RaftRpc" => {
                    let fut = async move {
                        let mut grpc =
                            tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                        let method = RaftRpcSvc(inner);
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                _ => Box::pin(async move {
                    let mut builder = http::Response::builder();
                    builder = builder.status(200).header("grpc-status", "12");
                    Ok(builder.body(tonic::body::empty_body()).unwrap())
                }),
            }
        }
    }

    struct RaftRpcSvc<T: Raft>(Arc<T>);

    impl<T: Raft> tonic::server::UnaryService<RaftRpcRequest> for RaftRpcSvc<T> {
        type Response = RaftRpcResponse;
        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

        fn call(&mut self, request: tonic::Request<RaftRpcRequest>) -> Self::Future {
            let inner = self.0.clone();
            let fut = async move { inner.raft_rpc(request).await };
            Box::pin(fut)
        }
    }
}

/// Dispatches incoming replication RPCs into the fabric.
pub struct RaftService {
    fabric: Arc<RaftFabric>,
}

impl RaftService {
    pub fn new(fabric: Arc<RaftFabric>) -> Self {
        Self { fabric }
    }
}

#[async_trait::async_trait]
impl raft_server::Raft for RaftService {
    async fn raft_rpc(
        &self,
        request: Request<RaftRpcRequest>,
    ) -> std::result::Result<Response<RaftRpcResponse>, Status> {
        let req = request.into_inner();
        let group_id = corridor_sharding::GroupId::from_u64(req.group_id)
            .ok_or_else(|| Status::invalid_argument(format!("bad group id {}", req.group_id)))?;

        let result = match req.rpc_type.as_str() {
            RPC_TYPE_VOTE => self.fabric.handle_vote(group_id, &req.payload).await,
            RPC_TYPE_APPEND_ENTRIES => {
                self.fabric
                    .handle_append_entries(group_id, &req.payload)
                    .await
            }
            RPC_TYPE_INSTALL_SNAPSHOT => {
                self.fabric
                    .handle_install_snapshot(group_id, &req.payload)
                    .await
            }
            other => Err(RaftError::Internal(format!("unknown rpc type: {}", other))),
        };

        let response = match result {
            Ok(payload) => RaftRpcResponse {
                payload,
                error: String::new(),
            },
            Err(e) => RaftRpcResponse {
                payload: Vec::new(),
                error: e.to_string(),
            },
        };
        Ok(Response::new(response))
    }
}
