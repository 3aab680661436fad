//! The multi-raft fabric: one replication group per slot plus the peer
//! group, sharing a single transport.
//!
//! The fabric is transport + consensus only. What commands *mean* is the
//! business of the state machines installed into each group; leadership
//! changes are surfaced through a single callback so the cluster manager
//! can track slot leaders.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use corridor_sharding::GroupId;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::error::RaftError;
use crate::group::{GroupRaftConfig, RaftGroup};
use crate::network::{NetworkFactory, PeerClient, PeerRegistry};
use crate::state_machine::GroupStateMachine;
use crate::storage::PeerNode;

/// Produces the state machine for a slot group when the slot is started on
/// this node.
pub type SlotStateMachineFactory = dyn Fn(u32) -> Arc<dyn GroupStateMachine> + Send + Sync;

/// Leadership observer: `(group, new_leader)`.
pub type LeaderChangedFn = dyn Fn(GroupId, Option<u64>) + Send + Sync;

/// Fabric-wide configuration.
#[derive(Debug, Clone)]
pub struct FabricConfig {
    pub peer_id: u64,
    /// Raft replication listen address (host:port).
    pub listen_addr: String,
    /// Peer command (control plane) listen address (host:port).
    pub grpc_listen_addr: String,
    /// Advertised HTTP address, carried in membership for API forwards.
    pub api_addr: String,
    pub slot_count: u32,
    pub raft: GroupRaftConfig,
    /// Per-call deadline for forwarded commands.
    pub rpc_timeout: Duration,
}

/// Hosts `1 + slot_count` replication groups; only slot groups whose
/// replica set includes this peer actually run here.
pub struct RaftFabric {
    config: FabricConfig,
    registry: Arc<PeerRegistry>,
    peer_client: PeerClient,

    peer_group: Arc<RaftGroup>,
    slot_groups: DashMap<u32, Arc<RaftGroup>>,
    slot_sm_factory: Box<SlotStateMachineFactory>,

    leader_callback: RwLock<Option<Arc<LeaderChangedFn>>>,
    watch_handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    started: RwLock<bool>,
}

impl RaftFabric {
    pub fn new(
        config: FabricConfig,
        peer_state_machine: Arc<dyn GroupStateMachine>,
        slot_sm_factory: Box<SlotStateMachineFactory>,
    ) -> Self {
        let registry = Arc::new(PeerRegistry::new());
        let peer_client = PeerClient::new(registry.clone(), config.peer_id, config.rpc_timeout);
        let peer_group = Arc::new(RaftGroup::new(
            GroupId::Peer,
            peer_state_machine,
            NetworkFactory::new(GroupId::Peer, registry.clone()),
        ));

        Self {
            config,
            registry,
            peer_client,
            peer_group,
            slot_groups: DashMap::new(),
            slot_sm_factory,
            leader_callback: RwLock::new(None),
            watch_handles: Mutex::new(Vec::new()),
            started: RwLock::new(false),
        }
    }

    pub fn peer_id(&self) -> u64 {
        self.config.peer_id
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn peer_client(&self) -> &PeerClient {
        &self.peer_client
    }

    pub fn is_started(&self) -> bool {
        *self.started.read()
    }

    /// Installs the leadership observer. Must be called before `start` so
    /// no election is missed.
    pub fn set_on_leader_changed(&self, callback: Arc<LeaderChangedFn>) {
        let mut guard = self.leader_callback.write();
        *guard = Some(callback);
    }

    pub fn register_peer(&self, peer_id: u64, node: PeerNode) {
        self.registry.register_peer(peer_id, node);
    }

    fn self_node(&self) -> PeerNode {
        PeerNode::with_grpc_addr(
            self.config.listen_addr.clone(),
            self.config.grpc_listen_addr.clone(),
            self.config.api_addr.clone(),
        )
    }

    /// Starts the peer group (slot groups start on demand as slots are
    /// assigned to this node).
    pub async fn start(self: &Arc<Self>) -> Result<(), RaftError> {
        if self.is_started() {
            log::warn!("Fabric already started, skipping");
            return Ok(());
        }

        self.register_peer(self.config.peer_id, self.self_node());

        self.peer_group
            .start(self.config.peer_id, &self.config.raft)
            .await?;
        self.watch_group(&self.peer_group)?;

        {
            let mut started = self.started.write();
            *started = true;
        }
        log::debug!(
            "Fabric started on peer {}: peer group up, {} slots available",
            self.config.peer_id,
            self.config.slot_count
        );
        Ok(())
    }

    /// Bootstraps the peer group with the founding member set. Identical on
    /// every founding peer.
    pub async fn initialize_peer_group(
        &self,
        members: BTreeMap<u64, PeerNode>,
    ) -> Result<(), RaftError> {
        self.peer_group.initialize(members).await
    }

    /// Starts (and optionally bootstraps) the replica of one slot on this
    /// node. No-op if the slot is already running.
    pub async fn start_slot(
        self: &Arc<Self>,
        slot_id: u32,
        members: BTreeMap<u64, PeerNode>,
        bootstrap: bool,
    ) -> Result<(), RaftError> {
        if slot_id >= self.config.slot_count {
            return Err(RaftError::GroupNotFound(format!("slot:{:04}", slot_id)));
        }
        if self.is_slot_started(slot_id) {
            return Ok(());
        }

        let group = Arc::new(RaftGroup::new(
            GroupId::Slot(slot_id),
            (self.slot_sm_factory)(slot_id),
            NetworkFactory::new(GroupId::Slot(slot_id), self.registry.clone()),
        ));
        group.start(self.config.peer_id, &self.config.raft).await?;
        if bootstrap {
            group.initialize(members).await?;
        }
        self.watch_group(&group)?;
        self.slot_groups.insert(slot_id, group);
        log::debug!("Started slot group {:04} on peer {}", slot_id, self.config.peer_id);
        Ok(())
    }

    pub fn is_slot_started(&self, slot_id: u32) -> bool {
        self.slot_groups
            .get(&slot_id)
            .map(|g| g.is_started())
            .unwrap_or(false)
    }

    fn watch_group(&self, group: &Arc<RaftGroup>) -> Result<(), RaftError> {
        let callback = { self.leader_callback.read().clone() };
        if let Some(callback) = callback {
            let handle = group.watch_leader(callback)?;
            self.watch_handles.lock().push(handle);
        }
        Ok(())
    }

    pub fn group(&self, group_id: GroupId) -> Result<Arc<RaftGroup>, RaftError> {
        match group_id {
            GroupId::Peer => Ok(self.peer_group.clone()),
            GroupId::Slot(slot_id) if slot_id >= self.config.slot_count => {
                Err(RaftError::GroupNotFound(group_id.to_string()))
            }
            GroupId::Slot(slot_id) => self
                .slot_groups
                .get(&slot_id)
                .map(|g| g.clone())
                .ok_or_else(|| RaftError::NotStarted(group_id.to_string())),
        }
    }

    pub fn peer_group(&self) -> &Arc<RaftGroup> {
        &self.peer_group
    }

    pub fn is_leader(&self, group_id: GroupId) -> bool {
        self.group(group_id).map(|g| g.is_leader()).unwrap_or(false)
    }

    pub fn current_leader(&self, group_id: GroupId) -> Option<u64> {
        self.group(group_id).ok().and_then(|g| g.current_leader())
    }

    // ─── Proposals ──────────────────────────────────────────────────────

    /// Proposes on the local replica only; a follower gets `NotLeader`.
    /// Used by the RPC server side of forwarding.
    pub async fn propose_local(&self, group_id: GroupId, command: Vec<u8>) -> Result<Vec<u8>, RaftError> {
        self.group(group_id)?.propose(command).await
    }

    /// Proposes on the peer group, forwarding to the current leader when
    /// this node is a follower. Blocks until committed and applied.
    pub async fn sync_propose_to_peer(&self, command: Vec<u8>) -> Result<Vec<u8>, RaftError> {
        let group = self.peer_group.clone();
        self.propose_with_forward(&group, command).await
    }

    /// Proposes on a slot group. Must be called on a node hosting a
    /// replica of the slot; routing non-replica writers is the cluster
    /// layer's job.
    pub async fn sync_propose_to_slot(
        &self,
        slot_id: u32,
        command: Vec<u8>,
    ) -> Result<Vec<u8>, RaftError> {
        let group = self.group(GroupId::Slot(slot_id))?;
        self.propose_with_forward(&group, command).await
    }

    /// Local fast path when leader, otherwise forward to the leader with
    /// bounded retries (the leader may be unknown mid-election).
    async fn propose_with_forward(
        &self,
        group: &Arc<RaftGroup>,
        command: Vec<u8>,
    ) -> Result<Vec<u8>, RaftError> {
        if group.is_leader() {
            return group.propose(command).await;
        }

        const MAX_RETRIES: u32 = 5;
        const INITIAL_BACKOFF_MS: u64 = 50;

        let mut backoff = INITIAL_BACKOFF_MS;
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match group.current_leader() {
                Some(leader) if leader == self.config.peer_id => {
                    match group.propose(command.clone()).await {
                        Ok(result) => return Ok(result),
                        Err(e) => last_error = Some(e),
                    }
                }
                Some(leader) => {
                    log::debug!(
                        "Forwarding proposal for group {} to leader {} (attempt {})",
                        group.group_id(),
                        leader,
                        attempt + 1
                    );
                    match self
                        .peer_client
                        .send_sync_propose(leader, group.group_id(), command.clone())
                        .await
                    {
                        Ok(result) => return Ok(result),
                        Err(e) => {
                            log::debug!("Forward attempt {} failed: {}", attempt + 1, e);
                            last_error = Some(e);
                        }
                    }
                }
                None => {
                    last_error = Some(RaftError::Unavailable(format!(
                        "leader unknown for group {}",
                        group.group_id()
                    )));
                }
            }

            tokio::time::sleep(Duration::from_millis(backoff)).await;
            backoff = (backoff * 2).min(1000);
        }

        Err(last_error
            .unwrap_or_else(|| RaftError::Unavailable("proposal forwarding failed".to_string())))
    }

    // ─── Incoming replication RPC handlers ──────────────────────────────

    fn raft_for(&self, group_id: GroupId) -> Result<crate::group::RaftInstance, RaftError> {
        self.group(group_id)?
            .raft()
            .ok_or_else(|| RaftError::NotStarted(group_id.to_string()))
    }

    pub async fn handle_vote(&self, group_id: GroupId, payload: &[u8]) -> Result<Vec<u8>, RaftError> {
        use crate::codec::{decode, encode};
        use openraft::raft::VoteRequest;

        let raft = self.raft_for(group_id)?;
        let request: VoteRequest<u64> = decode(payload)?;
        let response = raft
            .vote(request)
            .await
            .map_err(|e| RaftError::Internal(format!("Vote RPC failed: {:?}", e)))?;
        encode(&response)
    }

    pub async fn handle_append_entries(
        &self,
        group_id: GroupId,
        payload: &[u8],
    ) -> Result<Vec<u8>, RaftError> {
        use crate::codec::{decode, encode};
        use crate::storage::TypeConfig;
        use openraft::raft::AppendEntriesRequest;

        let raft = self.raft_for(group_id)?;
        let request: AppendEntriesRequest<TypeConfig> = decode(payload)?;
        let response = raft
            .append_entries(request)
            .await
            .map_err(|e| RaftError::Internal(format!("AppendEntries RPC failed: {:?}", e)))?;
        encode(&response)
    }

    pub async fn handle_install_snapshot(
        &self,
        group_id: GroupId,
        payload: &[u8],
    ) -> Result<Vec<u8>, RaftError> {
        use crate::codec::{decode, encode};
        use crate::storage::TypeConfig;
        use openraft::raft::InstallSnapshotRequest;

        let raft = self.raft_for(group_id)?;
        let request: InstallSnapshotRequest<TypeConfig> = decode(payload)?;
        let response = raft
            .install_snapshot(request)
            .await
            .map_err(|e| RaftError::Internal(format!("InstallSnapshot RPC failed: {:?}", e)))?;
        encode(&response)
    }

    /// Stops every group and the leader watchers. New proposals fail with
    /// `NotStarted` afterwards.
    pub async fn shutdown(&self) {
        {
            let mut started = self.started.write();
            *started = false;
        }
        for handle in self.watch_handles.lock().drain(..) {
            handle.abort();
        }
        for entry in self.slot_groups.iter() {
            entry.value().shutdown().await;
        }
        self.peer_group.shutdown().await;
        log::debug!("Fabric on peer {} shut down", self.config.peer_id);
    }
}

impl std::fmt::Debug for RaftFabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaftFabric")
            .field("peer_id", &self.config.peer_id)
            .field("slot_count", &self.config.slot_count)
            .field("running_slots", &self.slot_groups.len())
            .finish_non_exhaustive()
    }
}
