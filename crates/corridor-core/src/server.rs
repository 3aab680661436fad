//! Server assembly: builds every subsystem, wires the capability handles,
//! and drives startup/shutdown in dependency order.
//!
//! Subcomponents receive only the handles they need (store, executor,
//! delivery, cluster view); nothing holds a back-reference to the server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use corridor_commons::config::ClusterConfig;
use corridor_raft::fabric::{FabricConfig, RaftFabric};
use corridor_raft::group::GroupRaftConfig;
use corridor_raft::{
    start_peer_server, start_raft_server, GroupStateMachine, PeerCommandHandler, RaftError,
};
use corridor_sharding::{GroupId, SlotRouter};
use corridor_store::{MessageStore, StorageBackend};
use parking_lot::Mutex;

use crate::channel::ChannelReactor;
use crate::cluster::{Cluster, ClusterManager, ClusterManagerOptions, ClusterOptions};
use crate::conn::ConnManager;
use crate::delivery::{
    DeliveryManager, PeerForwarder, PeerInFlightConfig, PeerInFlightQueue, RecipientLocator,
    RetryQueue, RetryQueueConfig,
};
use crate::error::{CoreError, Result};
use crate::executor::{ClusterExecutor, CommandExecutor, DirectExecutor};
use crate::fsm::{Fsm, PeerFsm, SlotFsm};
use crate::idgen::MessageIdGenerator;
use crate::ip_guard::IpGuard;
use crate::timing_wheel::TimingWheel;
use crate::types::{RecvAckBatch, SendRequest, SendResult};

/// Core runtime options, distilled from the binary's config file.
#[derive(Debug, Clone)]
pub struct CoreOptions {
    pub data_dir: PathBuf,
    /// Reactor sub (worker) count.
    pub handle_pool_size: usize,
    pub timing_wheel_tick: Duration,
    pub timing_wheel_size: usize,
    /// Advertised HTTP address (leader forward target).
    pub api_url: String,
    pub rpc_timeout: Duration,
    /// Absent (or `on = false`) means standalone mode.
    pub cluster: Option<ClusterConfig>,
}

impl CoreOptions {
    pub fn standalone(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            handle_pool_size: 4,
            timing_wheel_tick: Duration::from_millis(100),
            timing_wheel_size: 512,
            api_url: String::new(),
            rpc_timeout: Duration::from_secs(5),
            cluster: None,
        }
    }

    fn cluster_enabled(&self) -> Option<&ClusterConfig> {
        self.cluster.as_ref().filter(|c| c.on)
    }
}

/// Everything the API surface needs, threaded explicitly.
pub struct Context {
    pub opts: CoreOptions,
    pub store: Arc<MessageStore>,
    pub conns: Arc<ConnManager>,
    pub wheel: Arc<TimingWheel>,
    pub idgen: Arc<MessageIdGenerator>,
    pub fsm: Arc<Fsm>,
    pub executor: Arc<dyn CommandExecutor>,
    pub reactor: Arc<ChannelReactor>,
    pub delivery: Arc<DeliveryManager>,
    pub retry: Arc<RetryQueue>,
    pub router: SlotRouter,
    pub ip_guard: Arc<IpGuard>,
    pub cluster: Option<Arc<Cluster>>,
    pub peer_queue: Option<Arc<PeerInFlightQueue>>,
}

impl Context {
    pub fn peer_id(&self) -> u64 {
        self.opts
            .cluster_enabled()
            .map(|c| c.peer_id)
            .unwrap_or(1)
    }

    pub fn cluster_on(&self) -> bool {
        self.cluster.is_some()
    }
}

/// Routes a uid to the leader of its home slot.
struct ClusterRecipientLocator {
    manager: Arc<ClusterManager>,
    router: SlotRouter,
    self_peer: u64,
}

impl RecipientLocator for ClusterRecipientLocator {
    fn self_peer(&self) -> u64 {
        self.self_peer
    }

    fn home_peer(&self, uid: &str) -> Option<u64> {
        let slot = self.router.slot_of_uid(uid);
        self.manager.get_leader_peer(slot).map(|p| p.peer_id)
    }
}

/// Pushes delivery batches over the peer RPC.
struct ClusterForwarder {
    cluster: Arc<Cluster>,
}

#[async_trait]
impl PeerForwarder for ClusterForwarder {
    async fn forward(&self, peer_id: u64, payload: Vec<u8>) -> Result<()> {
        self.cluster.forward_recv(peer_id, payload).await
    }
}

/// The assembled node.
pub struct CorridorServer {
    context: Arc<Context>,
    rpc_tasks: Mutex<Vec<tokio::task::JoinHandle<std::result::Result<(), RaftError>>>>,
}

impl CorridorServer {
    /// Builds the full component graph. Nothing network-facing runs until
    /// [`CorridorServer::start`].
    pub fn new(opts: CoreOptions, backend: Arc<dyn StorageBackend>) -> Result<Arc<Self>> {
        let store = Arc::new(MessageStore::open(backend)?);
        let conns = Arc::new(ConnManager::new());
        let wheel = TimingWheel::new(opts.timing_wheel_tick, opts.timing_wheel_size);
        let fsm = Arc::new(Fsm::new(store.clone()));
        let retry = RetryQueue::new(wheel.clone(), conns.clone(), RetryQueueConfig::default());
        let ip_guard = Arc::new(IpGuard::new());

        let (cluster, executor, peer_queue, locator, router, idgen): (
            Option<Arc<Cluster>>,
            Arc<dyn CommandExecutor>,
            Option<Arc<PeerInFlightQueue>>,
            Option<Arc<dyn RecipientLocator>>,
            SlotRouter,
            Arc<MessageIdGenerator>,
        ) = match opts.cluster_enabled() {
            Some(cluster_cfg) => {
                let router = SlotRouter::new(cluster_cfg.slot_count);
                let idgen = Arc::new(MessageIdGenerator::with_start(
                    cluster_cfg.peer_id,
                    store.get_message_id_high_water(cluster_cfg.peer_id)?,
                ));

                let manager = Arc::new(ClusterManager::new(ClusterManagerOptions {
                    peer_id: cluster_cfg.peer_id,
                    slot_count: cluster_cfg.slot_count,
                    replica_count: cluster_cfg.replica_count,
                    config_path: opts
                        .data_dir
                        .join("cluster")
                        .join(cluster_cfg.peer_id.to_string())
                        .join("cluster.json"),
                    server_addr: cluster_cfg.addr.clone(),
                    grpc_addr: cluster_cfg.grpc_addr.clone(),
                    api_addr: opts.api_url.clone(),
                }));

                let peer_fsm = Arc::new(PeerFsm::new(manager.clone()));
                let slot_fsm_source = fsm.clone();
                let fabric = Arc::new(RaftFabric::new(
                    FabricConfig {
                        peer_id: cluster_cfg.peer_id,
                        listen_addr: cluster_cfg.addr.clone(),
                        grpc_listen_addr: cluster_cfg.grpc_addr.clone(),
                        api_addr: opts.api_url.clone(),
                        slot_count: cluster_cfg.slot_count,
                        raft: GroupRaftConfig {
                            single_node: cluster_cfg.peers.is_empty(),
                            ..Default::default()
                        },
                        rpc_timeout: opts.rpc_timeout,
                    },
                    peer_fsm,
                    Box::new(move |slot_id| -> Arc<dyn GroupStateMachine> {
                        Arc::new(SlotFsm::new(slot_id, slot_fsm_source.clone()))
                    }),
                ));

                let cluster = Cluster::new(
                    ClusterOptions {
                        peer_id: cluster_cfg.peer_id,
                        addr: cluster_cfg.addr.clone(),
                        grpc_addr: cluster_cfg.grpc_addr.clone(),
                        api_addr: opts.api_url.clone(),
                        slot_count: cluster_cfg.slot_count,
                        replica_count: cluster_cfg.replica_count,
                        data_dir: opts.data_dir.clone(),
                        peers: cluster_cfg.peers.clone(),
                        rpc_timeout: opts.rpc_timeout,
                    },
                    manager.clone(),
                    fabric,
                );

                let executor: Arc<dyn CommandExecutor> =
                    Arc::new(ClusterExecutor::new(cluster.clone(), router));
                let peer_queue = PeerInFlightQueue::new(
                    wheel.clone(),
                    Arc::new(ClusterForwarder {
                        cluster: cluster.clone(),
                    }),
                    PeerInFlightConfig {
                        base_timeout: opts.rpc_timeout,
                        ..Default::default()
                    },
                );
                let locator: Arc<dyn RecipientLocator> = Arc::new(ClusterRecipientLocator {
                    manager,
                    router,
                    self_peer: cluster_cfg.peer_id,
                });

                (
                    Some(cluster),
                    executor,
                    Some(peer_queue),
                    Some(locator),
                    router,
                    idgen,
                )
            }
            None => {
                let router = SlotRouter::new(1);
                let executor: Arc<dyn CommandExecutor> =
                    Arc::new(DirectExecutor::new(fsm.clone()));
                let idgen = Arc::new(MessageIdGenerator::with_start(
                    1,
                    store.get_message_id_high_water(1)?,
                ));
                (None, executor, None, None, router, idgen)
            }
        };

        let delivery = Arc::new(DeliveryManager::new(
            conns.clone(),
            retry.clone(),
            peer_queue.clone(),
            locator,
        ));

        let reactor = ChannelReactor::new(
            opts.handle_pool_size,
            store.clone(),
            executor.clone(),
            delivery.clone(),
            idgen.clone(),
        );
        fsm.set_apply_hook(reactor.clone());

        let context = Arc::new(Context {
            opts,
            store,
            conns,
            wheel,
            idgen,
            fsm,
            executor,
            reactor,
            delivery,
            retry,
            router,
            ip_guard,
            cluster,
            peer_queue,
        });

        Ok(Arc::new(Self {
            context,
            rpc_tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let ctx = &self.context;
        ctx.wheel.start();
        ctx.ip_guard.refresh(&ctx.store)?;

        if let Some(cluster) = &ctx.cluster {
            let cluster_cfg = ctx
                .opts
                .cluster_enabled()
                .expect("cluster present implies config");

            let raft_addr = cluster_cfg
                .addr
                .parse()
                .map_err(|e| CoreError::InvalidInput(format!("cluster.addr: {}", e)))?;
            let grpc_addr = cluster_cfg
                .grpc_addr
                .parse()
                .map_err(|e| CoreError::InvalidInput(format!("cluster.grpc_addr: {}", e)))?;

            let handler = Arc::new(PeerHandler {
                context: ctx.clone(),
            });
            let mut tasks = self.rpc_tasks.lock();
            tasks.push(start_raft_server(raft_addr, cluster.fabric().clone()));
            tasks.push(start_peer_server(grpc_addr, handler));
            drop(tasks);

            cluster.start().await?;
        }

        log::info!(
            "Corridor core started (peer {}, cluster {})",
            ctx.peer_id(),
            if ctx.cluster_on() { "on" } else { "off" }
        );
        Ok(())
    }

    /// Drains in order: stop intake (API layer's job), stop cluster
    /// proposals, stop timers, storage closes with the last handle.
    pub async fn stop(&self) {
        if let Some(cluster) = &self.context.cluster {
            cluster.stop().await;
        }
        for task in self.rpc_tasks.lock().drain(..) {
            task.abort();
        }
        self.context.wheel.stop();

        // Ids must never be reused across restarts.
        let ctx = &self.context;
        if let Err(e) = ctx
            .store
            .set_message_id_high_water(ctx.peer_id(), ctx.idgen.high_water())
        {
            log::error!("Failed to persist message-id high-water: {}", e);
        }
        log::info!("Corridor core stopped");
    }
}

/// Incoming peer command dispatch.
pub struct PeerHandler {
    context: Arc<Context>,
}

#[async_trait]
impl PeerCommandHandler for PeerHandler {
    async fn on_sync_propose(
        &self,
        group_id: u64,
        payload: Vec<u8>,
    ) -> std::result::Result<Vec<u8>, RaftError> {
        let group = GroupId::from_u64(group_id)
            .ok_or_else(|| RaftError::GroupNotFound(format!("group {}", group_id)))?;
        let cluster = self
            .context
            .cluster
            .as_ref()
            .ok_or_else(|| RaftError::InvalidState("cluster mode is off".to_string()))?;
        cluster.fabric().propose_local(group, payload).await
    }

    async fn on_connect(
        &self,
        uid: String,
        conn_id: u64,
        from_peer_id: u64,
    ) -> std::result::Result<(), RaftError> {
        // Proxy connections are owned by the protocol gateway, which is
        // external to this core. Accept the handshake so the gateway can
        // take over the stream.
        log::debug!(
            "Proxy connect for uid={} conn={} from peer {}",
            uid,
            conn_id,
            from_peer_id
        );
        Ok(())
    }

    async fn on_conn_write(
        &self,
        uid: String,
        _conn_id: u64,
        _payload: Vec<u8>,
    ) -> std::result::Result<(), RaftError> {
        if self.context.conns.is_online(&uid) {
            Ok(())
        } else {
            Err(RaftError::Unavailable(format!("uid {} not connected", uid)))
        }
    }

    async fn on_forward_send(
        &self,
        _from_peer_id: u64,
        payload: Vec<u8>,
    ) -> std::result::Result<Vec<u8>, RaftError> {
        let request: SendRequest = corridor_raft::codec::decode(&payload)?;
        let result: SendResult = self
            .context
            .reactor
            .send(request)
            .await
            .map_err(|e| match e {
                CoreError::NotLeader { leader } => RaftError::not_leader("send", leader),
                other => RaftError::Internal(other.to_string()),
            })?;
        corridor_raft::codec::encode(&result)
    }

    async fn on_forward_recv(
        &self,
        _from_peer_id: u64,
        payload: Vec<u8>,
    ) -> std::result::Result<(), RaftError> {
        let batch = corridor_raft::codec::decode(&payload)?;
        self.context.delivery.deliver_forwarded(batch);
        Ok(())
    }

    async fn on_forward_recvack(
        &self,
        _from_peer_id: u64,
        payload: Vec<u8>,
    ) -> std::result::Result<(), RaftError> {
        let batch: RecvAckBatch = corridor_raft::codec::decode(&payload)?;
        for ack in batch.acks {
            self.context.retry.ack(ack.conn_id, ack.message_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corridor_store::MemoryBackend;

    #[tokio::test]
    async fn standalone_server_builds_and_serves_sends() {
        let dir = tempfile::tempdir().unwrap();
        let server = CorridorServer::new(
            CoreOptions::standalone(dir.path().to_path_buf()),
            Arc::new(MemoryBackend::new()),
        )
        .unwrap();
        server.start().await.unwrap();

        let ctx = server.context();
        let channel = corridor_commons::models::ChannelKey::new("g1", 2);
        ctx.store
            .add_subscribers(&channel, &["u1".to_string(), "u2".to_string()])
            .unwrap();

        let result = ctx
            .reactor
            .send(SendRequest {
                client_msg_no: String::new(),
                from_uid: "u1".to_string(),
                channel_id: "g1".to_string(),
                channel_type: 2,
                payload: b"hello".to_vec(),
                expire_at: 0,
            })
            .await
            .unwrap();
        assert_eq!(result.message_seq, 1);

        let loaded = ctx.store.load_last_msgs(&channel, 10).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].from_uid, "u1");

        server.stop().await;
    }
}
