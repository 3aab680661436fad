//! The cluster orchestrator.
//!
//! Glues the configuration manager to the fabric: consumes reconciliation
//! events and turns them into peer-group proposals or local slot startups,
//! bootstraps the seed configuration on first election, and routes slot
//! proposals to a replica (local or remote) of the target slot.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use corridor_commons::config::PeerSeed;
use corridor_commons::models::{ClusterDocument, Peer, PeerStatus};
use corridor_raft::commands::{encode_command, Command, CommandResult};
use corridor_raft::{GroupId, PeerNode, RaftFabric};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::cluster::manager::{
    ClusterManager, ClusterReady, SlotAction, SlotActionKind,
};
use crate::error::{CoreError, Result};

const READY_CHANNEL_CAPACITY: usize = 64;
const TICK_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub peer_id: u64,
    /// Raft transport listen address.
    pub addr: String,
    /// Peer command listen address.
    pub grpc_addr: String,
    /// Advertised HTTP address.
    pub api_addr: String,
    pub slot_count: u32,
    pub replica_count: u32,
    pub data_dir: PathBuf,
    /// Founding member seeds (identical on every founding peer). May be
    /// empty for a single-node cluster.
    pub peers: Vec<PeerSeed>,
    pub rpc_timeout: Duration,
}

pub struct Cluster {
    opts: ClusterOptions,
    manager: Arc<ClusterManager>,
    fabric: Arc<RaftFabric>,
    request_ids: AtomicU64,
    ready_tx: mpsc::Sender<ClusterReady>,
    ready_rx: Mutex<Option<mpsc::Receiver<ClusterReady>>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    stop_tx: tokio::sync::watch::Sender<bool>,
}

impl Cluster {
    pub fn new(opts: ClusterOptions, manager: Arc<ClusterManager>, fabric: Arc<RaftFabric>) -> Arc<Self> {
        let (ready_tx, ready_rx) = mpsc::channel(READY_CHANNEL_CAPACITY);
        let (stop_tx, _) = tokio::sync::watch::channel(false);
        Arc::new(Self {
            opts,
            manager,
            fabric,
            request_ids: AtomicU64::new(0),
            ready_tx,
            ready_rx: Mutex::new(Some(ready_rx)),
            tasks: Mutex::new(Vec::new()),
            stop_tx,
        })
    }

    pub fn manager(&self) -> &Arc<ClusterManager> {
        &self.manager
    }

    pub fn fabric(&self) -> &Arc<RaftFabric> {
        &self.fabric
    }

    pub fn peer_id(&self) -> u64 {
        self.opts.peer_id
    }

    fn next_request_id(&self) -> u64 {
        self.request_ids.fetch_add(1, Ordering::SeqCst) + 1
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.manager.load()?;

        // Seed the transport address book before anything dials out.
        for seed in &self.opts.peers {
            self.fabric.register_peer(
                seed.id,
                PeerNode::with_grpc_addr(
                    seed.server_addr.clone(),
                    seed.grpc_addr.clone(),
                    seed.api_addr.clone(),
                ),
            );
        }
        for peer in self.manager.get_peers() {
            self.fabric.register_peer(
                peer.peer_id,
                PeerNode::with_grpc_addr(peer.server_addr, peer.grpc_addr, peer.api_addr),
            );
        }

        let weak = Arc::downgrade(self);
        self.fabric
            .set_on_leader_changed(Arc::new(move |group, leader| {
                if let Some(cluster) = weak.upgrade() {
                    cluster.on_leader_changed(group, leader);
                }
            }));

        self.fabric.start().await?;

        // Founding members all initialize the peer group with the same
        // member map; re-initialization of a non-empty group is rejected
        // by raft and means a restart, which is fine.
        let members = self.founding_members();
        if let Err(e) = self.fabric.initialize_peer_group(members).await {
            log::debug!("Peer group already initialized: {}", e);
        }

        let ready_rx = self
            .ready_rx
            .lock()
            .take()
            .ok_or_else(|| CoreError::Internal("cluster already started".to_string()))?;
        self.spawn_ready_loop(ready_rx);
        self.spawn_tick_loop();
        Ok(())
    }

    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.fabric.shutdown().await;
    }

    fn founding_members(&self) -> BTreeMap<u64, PeerNode> {
        let mut members = BTreeMap::new();
        members.insert(
            self.opts.peer_id,
            PeerNode::with_grpc_addr(
                self.opts.addr.clone(),
                self.opts.grpc_addr.clone(),
                self.opts.api_addr.clone(),
            ),
        );
        for seed in &self.opts.peers {
            members.insert(
                seed.id,
                PeerNode::with_grpc_addr(
                    seed.server_addr.clone(),
                    seed.grpc_addr.clone(),
                    seed.api_addr.clone(),
                ),
            );
        }
        members
    }

    fn on_leader_changed(self: Arc<Self>, group: GroupId, leader: Option<u64>) {
        match group {
            GroupId::Peer => {
                let leader = leader.unwrap_or(0);
                self.manager.set_leader_id(leader);
                if leader == self.opts.peer_id {
                    let cluster = self.clone();
                    tokio::spawn(async move {
                        cluster.bootstrap().await;
                    });
                }
            }
            GroupId::Slot(slot_id) => {
                let term = self
                    .fabric
                    .group(group)
                    .map(|g| g.current_term())
                    .unwrap_or(0);
                self.manager
                    .set_slot_leader(slot_id, leader.unwrap_or(0), term);
            }
        }
    }

    /// First elected peer-group leader seeds the cluster configuration
    /// when none has been committed yet.
    async fn bootstrap(self: Arc<Self>) {
        if self.manager.initialized() {
            return;
        }

        let mut peers: Vec<Peer> = vec![Peer {
            peer_id: self.opts.peer_id,
            server_addr: self.opts.addr.clone(),
            grpc_addr: self.opts.grpc_addr.clone(),
            api_addr: self.opts.api_addr.clone(),
            status: PeerStatus::Active,
        }];
        for seed in &self.opts.peers {
            if seed.id == self.opts.peer_id {
                continue;
            }
            peers.push(Peer {
                peer_id: seed.id,
                server_addr: seed.server_addr.clone(),
                grpc_addr: seed.grpc_addr.clone(),
                api_addr: seed.api_addr.clone(),
                status: PeerStatus::Active,
            });
        }
        peers.sort_by_key(|p| p.peer_id);

        let doc = ClusterDocument {
            peers,
            slots: Vec::new(),
            slot_count: self.opts.slot_count,
            replica_count: self.opts.replica_count,
        };

        log::info!(
            "Bootstrapping cluster configuration: {} peers, {} slots",
            doc.peers.len(),
            doc.slot_count
        );
        if let Err(e) = self.propose_to_peer(Command::UpdateClusterConfig(doc)).await {
            log::error!("Cluster bootstrap proposal failed: {}", e);
        }
    }

    // ─── Reconciliation loops ───────────────────────────────────────────

    fn spawn_tick_loop(self: &Arc<Self>) {
        let cluster = self.clone();
        let mut stop_rx = self.stop_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let fabric = cluster.fabric.clone();
                        let ready = cluster
                            .manager
                            .tick(&move |slot| fabric.is_slot_started(slot));
                        if !ready.is_empty() {
                            let _ = cluster.ready_tx.send(ready).await;
                        }
                    }
                    _ = stop_rx.changed() => return,
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    fn spawn_ready_loop(self: &Arc<Self>, mut ready_rx: mpsc::Receiver<ClusterReady>) {
        let cluster = self.clone();
        let mut stop_rx = self.stop_tx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                let recv_fut = ready_rx.recv();
                let changed_fut = stop_rx.changed();
                tokio::select! {
                    ready = recv_fut => {
                        let Some(ready) = ready else { return };
                        cluster.clone().handle_ready(ready).await;
                    }
                    _ = changed_fut => return,
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    async fn handle_ready(self: Arc<Self>, ready: ClusterReady) {
        if let Some(allocate) = ready.allocate_slot_set {
            if let Err(e) = self.propose_to_peer(Command::AllocateSlot(allocate)).await {
                log::error!("Slot allocation proposal failed: {}", e);
            }
        }
        if !ready.slot_actions.is_empty() {
            self.clone().handle_slot_actions(ready.slot_actions).await;
        }
        if let Some(peer) = ready.update_peer {
            if let Err(e) = self.propose_to_peer(Command::UpdatePeerConfig(peer)).await {
                log::error!("Peer update proposal failed: {}", e);
            }
        }
        if let Some(relations) = ready.slot_leader_relation_set {
            if let Err(e) = self
                .propose_to_peer(Command::UpdateSlotLeaderRelationSet(relations))
                .await
            {
                log::error!("Slot leader relation proposal failed: {}", e);
            }
        }
    }

    async fn handle_slot_actions(self: Arc<Self>, actions: Vec<SlotAction>) {
        for action in &actions {
            match action.action {
                SlotActionKind::Start => {
                    let Some(slot) = self.manager.get_slot(action.slot_id) else {
                        continue;
                    };
                    let mut members = BTreeMap::new();
                    for peer_id in &slot.peers {
                        let Some(peer) = self.manager.get_peer(*peer_id) else {
                            continue;
                        };
                        members.insert(
                            *peer_id,
                            PeerNode::with_grpc_addr(
                                peer.server_addr,
                                peer.grpc_addr,
                                peer.api_addr,
                            ),
                        );
                    }
                    if members.len() != slot.peers.len() {
                        log::warn!(
                            "Slot {:04} peers not fully known yet, deferring start",
                            action.slot_id
                        );
                        continue;
                    }
                    if let Err(e) = self
                        .fabric
                        .start_slot(action.slot_id, members, true)
                        .await
                    {
                        log::error!("Failed to start slot {:04}: {}", action.slot_id, e);
                    }
                }
            }
        }
    }

    // ─── Proposals ──────────────────────────────────────────────────────

    async fn propose_to_peer(&self, command: Command) -> Result<CommandResult> {
        let bytes = encode_command(self.next_request_id(), None, &command)
            .map_err(CoreError::from)?;
        let result = self.fabric.sync_propose_to_peer(bytes).await?;
        let result = CommandResult::decode_from(&result).map_err(CoreError::from)?;
        if let CommandResult::Error(msg) = result {
            return Err(CoreError::Internal(msg));
        }
        Ok(result)
    }

    /// Proposes a command on a slot's replicated log, from anywhere in the
    /// cluster. Local replica → propose directly (with internal leader
    /// forwarding). Otherwise forward to the slot leader's peer service; a
    /// stale leader hint is refreshed and retried once.
    pub async fn sync_propose_to_slot(&self, slot_id: u32, bytes: Vec<u8>) -> Result<Vec<u8>> {
        if self.manager.is_replica_of(slot_id) {
            return Ok(self.fabric.sync_propose_to_slot(slot_id, bytes).await?);
        }

        let leader = self
            .manager
            .get_leader_peer(slot_id)
            .ok_or(CoreError::NotInitialized)?;

        match self
            .fabric
            .peer_client()
            .send_sync_propose(leader.peer_id, GroupId::Slot(slot_id), bytes.clone())
            .await
        {
            Ok(result) => Ok(result),
            Err(e) => {
                // One redirect on a stale hint.
                if let Some(hint) = e.leader_hint() {
                    if hint != leader.peer_id {
                        self.manager.set_slot_leader(slot_id, hint, 0);
                        return Ok(self
                            .fabric
                            .peer_client()
                            .send_sync_propose(hint, GroupId::Slot(slot_id), bytes)
                            .await?);
                    }
                }
                Err(e.into())
            }
        }
    }

    // ─── Peer command wrappers ──────────────────────────────────────────

    pub async fn forward_send(&self, peer_id: u64, payload: Vec<u8>) -> Result<Vec<u8>> {
        Ok(self.fabric.peer_client().forward_send(peer_id, payload).await?)
    }

    pub async fn forward_recv(&self, peer_id: u64, payload: Vec<u8>) -> Result<()> {
        Ok(self.fabric.peer_client().forward_recv(peer_id, payload).await?)
    }

    pub async fn forward_recvack(&self, peer_id: u64, payload: Vec<u8>) -> Result<()> {
        Ok(self
            .fabric
            .peer_client()
            .forward_recvack(peer_id, payload)
            .await?)
    }

    pub async fn conn_ping(&self, peer_id: u64) -> Result<()> {
        Ok(self.fabric.peer_client().conn_ping(peer_id).await?)
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("peer_id", &self.opts.peer_id)
            .field("slot_count", &self.opts.slot_count)
            .finish_non_exhaustive()
    }
}
