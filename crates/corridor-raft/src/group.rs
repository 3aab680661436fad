//! A single replication group: its raft instance, storage, and network.

use std::collections::BTreeMap;
use std::sync::Arc;

use corridor_sharding::GroupId;
use openraft::storage::Adaptor;
use openraft::{Config, Raft, RaftMetrics};
use parking_lot::RwLock;

use crate::error::RaftError;
use crate::network::NetworkFactory;
use crate::state_machine::GroupStateMachine;
use crate::storage::{GroupRaftStorage, PeerNode, TypeConfig};

pub type RaftInstance = Raft<TypeConfig>;

type DynStateMachine = Arc<dyn GroupStateMachine>;
type StorageAdaptor = Adaptor<TypeConfig, Arc<GroupRaftStorage<DynStateMachine>>>;

/// Raft timing knobs shared by every group on a node.
#[derive(Debug, Clone)]
pub struct GroupRaftConfig {
    pub heartbeat_interval_ms: u64,
    pub election_timeout_ms: (u64, u64),
    /// True when the node runs without peers; elections stay enabled but
    /// heartbeats are pointless.
    pub single_node: bool,
}

impl Default for GroupRaftConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 250,
            election_timeout_ms: (500, 1000),
            single_node: false,
        }
    }
}

/// One replication group with its own log, state machine and transport.
pub struct RaftGroup {
    group_id: GroupId,
    raft: RwLock<Option<RaftInstance>>,
    storage: Arc<GroupRaftStorage<DynStateMachine>>,
    network_factory: NetworkFactory,
}

impl RaftGroup {
    pub fn new(
        group_id: GroupId,
        state_machine: DynStateMachine,
        network_factory: NetworkFactory,
    ) -> Self {
        Self {
            group_id,
            raft: RwLock::new(None),
            storage: Arc::new(GroupRaftStorage::new(group_id, state_machine)),
            network_factory,
        }
    }

    /// Starts the raft instance. Idempotent: a started group stays as-is.
    pub async fn start(&self, peer_id: u64, config: &GroupRaftConfig) -> Result<(), RaftError> {
        if self.is_started() {
            return Ok(());
        }

        let raft_config = if config.single_node {
            Config {
                cluster_name: format!("corridor-{}", self.group_id),
                election_timeout_min: 150,
                election_timeout_max: 300,
                heartbeat_interval: 50,
                max_in_snapshot_log_to_keep: 0,
                purge_batch_size: 64,
                enable_heartbeat: false,
                enable_elect: true,
                enable_tick: true,
                ..Default::default()
            }
        } else {
            Config {
                cluster_name: format!("corridor-{}", self.group_id),
                election_timeout_min: config.election_timeout_ms.0,
                election_timeout_max: config.election_timeout_ms.1,
                heartbeat_interval: config.heartbeat_interval_ms,
                install_snapshot_timeout: 10_000,
                purge_batch_size: 256,
                ..Default::default()
            }
        };

        let raft_config = Arc::new(
            raft_config
                .validate()
                .map_err(|e| RaftError::Config(e.to_string()))?,
        );

        let (log_store, state_machine): (StorageAdaptor, StorageAdaptor) =
            Adaptor::new(self.storage.clone());

        let raft = Raft::new(
            peer_id,
            raft_config,
            self.network_factory.clone(),
            log_store,
            state_machine,
        )
        .await
        .map_err(|e| RaftError::Internal(format!("Failed to create raft: {:?}", e)))?;

        {
            let mut guard = self.raft.write();
            *guard = Some(raft);
        }

        log::debug!("Started group {} on peer {}", self.group_id, peer_id);
        Ok(())
    }

    /// Bootstraps the group with an initial membership.
    ///
    /// Safe to call on every founding replica with an identical member map;
    /// the genesis entry is byte-identical so the logs cannot conflict. A
    /// group that already has log state rejects re-initialization, which
    /// callers treat as "already bootstrapped".
    pub async fn initialize(&self, members: BTreeMap<u64, PeerNode>) -> Result<(), RaftError> {
        let raft = self.raft_instance()?;
        raft.initialize(members)
            .await
            .map_err(|e| RaftError::Internal(format!("Failed to initialize group: {:?}", e)))?;
        log::debug!("Initialized group {}", self.group_id);
        Ok(())
    }

    pub async fn add_learner(&self, peer_id: u64, node: PeerNode) -> Result<(), RaftError> {
        let raft = self.raft_instance()?;
        raft.add_learner(peer_id, node, true)
            .await
            .map_err(|e| RaftError::Internal(format!("Failed to add learner: {:?}", e)))?;
        Ok(())
    }

    /// Promotes a learner to voter using the current membership.
    pub async fn promote_learner(&self, peer_id: u64) -> Result<(), RaftError> {
        let raft = self.raft_instance()?;

        let metrics = raft.metrics().borrow().clone();
        if metrics.current_leader != Some(metrics.id) {
            return Err(RaftError::not_leader(
                self.group_id.to_string(),
                metrics.current_leader,
            ));
        }

        let mut voters: std::collections::BTreeSet<u64> =
            metrics.membership_config.voter_ids().collect();
        if voters.contains(&peer_id) {
            return Ok(());
        }
        voters.insert(peer_id);
        raft.change_membership(voters, false)
            .await
            .map_err(|e| RaftError::Internal(format!("Failed to change membership: {:?}", e)))?;
        Ok(())
    }

    pub fn raft(&self) -> Option<RaftInstance> {
        self.raft.read().clone()
    }

    fn raft_instance(&self) -> Result<RaftInstance, RaftError> {
        self.raft
            .read()
            .clone()
            .ok_or_else(|| RaftError::NotStarted(self.group_id.to_string()))
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn storage(&self) -> &Arc<GroupRaftStorage<DynStateMachine>> {
        &self.storage
    }

    pub fn is_started(&self) -> bool {
        self.raft.read().is_some()
    }

    pub fn is_leader(&self) -> bool {
        match self.raft.read().as_ref() {
            Some(r) => {
                let metrics = r.metrics().borrow().clone();
                metrics.current_leader == Some(metrics.id)
            }
            None => false,
        }
    }

    pub fn current_leader(&self) -> Option<u64> {
        let raft = self.raft.read();
        raft.as_ref().and_then(|r| r.metrics().borrow().current_leader)
    }

    pub fn current_term(&self) -> u64 {
        let raft = self.raft.read();
        raft.as_ref()
            .map(|r| r.metrics().borrow().current_term)
            .unwrap_or(0)
    }

    pub fn metrics(&self) -> Option<RaftMetrics<u64, PeerNode>> {
        let raft = self.raft.read();
        raft.as_ref().map(|r| r.metrics().borrow().clone())
    }

    /// Proposes a command and waits for commit + apply. Leader-only: a
    /// follower gets `NotLeader` with the hint from raft.
    pub async fn propose(&self, command: Vec<u8>) -> Result<Vec<u8>, RaftError> {
        let raft = self.raft_instance()?;

        match raft.client_write(command).await {
            Ok(response) => Ok(response.data),
            Err(openraft::error::RaftError::APIError(
                openraft::error::ClientWriteError::ForwardToLeader(fwd),
            )) => Err(RaftError::not_leader(self.group_id.to_string(), fwd.leader_id)),
            Err(e) => Err(RaftError::Proposal(format!("{:?}", e))),
        }
    }

    /// Watches leader changes and invokes `callback` with each new value.
    ///
    /// The callback also fires once with the current leader at subscription
    /// time so late subscribers converge.
    pub fn watch_leader(
        self: &Arc<Self>,
        callback: Arc<dyn Fn(GroupId, Option<u64>) + Send + Sync>,
    ) -> Result<tokio::task::JoinHandle<()>, RaftError> {
        let raft = self.raft_instance()?;
        let group_id = self.group_id;
        let handle = tokio::spawn(async move {
            let mut rx = raft.metrics();
            let mut last: Option<u64> = None;
            let mut first = true;
            loop {
                let current = rx.borrow().current_leader;
                if first || current != last {
                    callback(group_id, current);
                    last = current;
                    first = false;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });
        Ok(handle)
    }

    pub async fn shutdown(&self) {
        let raft = { self.raft.write().take() };
        if let Some(raft) = raft {
            if let Err(e) = raft.shutdown().await {
                log::warn!("Group {} shutdown error: {:?}", self.group_id, e);
            }
        }
    }
}

impl std::fmt::Debug for RaftGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaftGroup")
            .field("group_id", &self.group_id)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}
