//! Deterministic apply of committed commands.
//!
//! [`Fsm`] turns a decoded command into storage mutations; it holds no
//! state of its own beyond the store handle and an invalidation hook. The
//! [`SlotFsm`] / [`PeerFsm`] wrappers adapt it to the fabric's
//! per-group state-machine interface with last-applied tracking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use corridor_commons::models::ChannelKey;
use corridor_raft::commands::{decode_command, Command, CommandResult};
use corridor_raft::state_machine::{ApplyResult, GroupStateMachine, StateMachineSnapshot};
use corridor_raft::{GroupId, RaftError};
use corridor_store::MessageStore;
use parking_lot::RwLock;

use crate::cluster::ClusterManager;
use crate::error::{CoreError, Result};

/// Observer of applied channel mutations; used to invalidate reactor
/// caches on every replica, including mutations that arrived via the log
/// rather than a local API call.
pub trait ApplyHook: Send + Sync {
    fn on_channel_mutated(&self, channel: &ChannelKey);
}

/// The command → storage transform shared by every slot group.
pub struct Fsm {
    store: Arc<MessageStore>,
    hook: RwLock<Option<Arc<dyn ApplyHook>>>,
}

impl Fsm {
    pub fn new(store: Arc<MessageStore>) -> Self {
        Self {
            store,
            hook: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    /// Installs the cache-invalidation hook once the reactor exists.
    pub fn set_apply_hook(&self, hook: Arc<dyn ApplyHook>) {
        let mut guard = self.hook.write();
        *guard = Some(hook);
    }

    fn notify(&self, channel: &ChannelKey) {
        if let Some(hook) = self.hook.read().as_ref() {
            hook.on_channel_mutated(channel);
        }
    }

    /// Applies one command. Storage failures bubble up (fatal to the
    /// group); everything else is deterministic.
    pub fn apply(&self, command: &Command) -> Result<CommandResult> {
        match command {
            Command::AddOrUpdateChannel(info) => {
                self.store.add_or_update_channel(info)?;
                self.notify(&info.key());
                Ok(CommandResult::None)
            }
            Command::DeleteChannel(p) => {
                self.store.delete_channel_and_clear_messages(&p.channel)?;
                self.notify(&p.channel);
                Ok(CommandResult::None)
            }
            Command::AddSubscribers(p) => {
                self.store.add_subscribers(&p.channel, &p.uids)?;
                self.notify(&p.channel);
                Ok(CommandResult::None)
            }
            Command::RemoveSubscribers(p) => {
                self.store.remove_subscribers(&p.channel, &p.uids)?;
                self.notify(&p.channel);
                Ok(CommandResult::None)
            }
            Command::RemoveAllSubscribers(p) => {
                self.store.remove_all_subscribers(&p.channel)?;
                self.notify(&p.channel);
                Ok(CommandResult::None)
            }
            Command::AddDenylist(p) => {
                self.store.add_denylist(&p.channel, &p.uids)?;
                self.notify(&p.channel);
                Ok(CommandResult::None)
            }
            Command::RemoveDenylist(p) => {
                self.store.remove_denylist(&p.channel, &p.uids)?;
                self.notify(&p.channel);
                Ok(CommandResult::None)
            }
            Command::RemoveAllDenylist(p) => {
                self.store.remove_all_denylist(&p.channel)?;
                self.notify(&p.channel);
                Ok(CommandResult::None)
            }
            Command::AddAllowlist(p) => {
                self.store.add_allowlist(&p.channel, &p.uids)?;
                self.notify(&p.channel);
                Ok(CommandResult::None)
            }
            Command::RemoveAllowlist(p) => {
                self.store.remove_allowlist(&p.channel, &p.uids)?;
                self.notify(&p.channel);
                Ok(CommandResult::None)
            }
            Command::RemoveAllAllowlist(p) => {
                self.store.remove_all_allowlist(&p.channel)?;
                self.notify(&p.channel);
                Ok(CommandResult::None)
            }
            Command::AppendMessages(p) => {
                let mut messages = p.messages.clone();
                let seqs = self.store.append_messages(&p.channel, &mut messages)?;
                Ok(CommandResult::AppendMessages { seqs })
            }
            Command::AddIpBlocklist(p) => {
                self.store.add_ip_blocklist(&p.ips)?;
                Ok(CommandResult::None)
            }
            Command::RemoveIpBlocklist(p) => {
                self.store.remove_ip_blocklist(&p.ips)?;
                Ok(CommandResult::None)
            }
            other if other.is_config() => Err(CoreError::InvalidInput(
                "config command on a slot group".to_string(),
            )),
            _ => Err(CoreError::InvalidInput("unhandled command".to_string())),
        }
    }
}

/// Per-slot-group adaptor around the shared [`Fsm`].
pub struct SlotFsm {
    slot_id: u32,
    fsm: Arc<Fsm>,
    last_applied_index: AtomicU64,
    last_applied_term: AtomicU64,
}

impl SlotFsm {
    pub fn new(slot_id: u32, fsm: Arc<Fsm>) -> Self {
        Self {
            slot_id,
            fsm,
            last_applied_index: AtomicU64::new(0),
            last_applied_term: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl GroupStateMachine for SlotFsm {
    fn group_id(&self) -> GroupId {
        GroupId::Slot(self.slot_id)
    }

    async fn apply(&self, index: u64, term: u64, entry: &[u8]) -> std::result::Result<ApplyResult, RaftError> {
        if index <= self.last_applied_index.load(Ordering::SeqCst) {
            return Ok(ApplyResult::NoOp);
        }

        let (_, command) = decode_command(entry)?;
        let result = match self.fsm.apply(&command) {
            Ok(result) => {
                let bytes = result
                    .encode()
                    .map_err(|e| RaftError::Serialization(e.to_string()))?;
                ApplyResult::ok_with_data(bytes)
            }
            // Input-shaped rejections replay identically on every replica.
            Err(CoreError::InvalidInput(msg)) | Err(CoreError::Unauthorized(msg)) => {
                ApplyResult::Error(msg)
            }
            Err(CoreError::Store(e)) => {
                return Err(RaftError::Storage(e.to_string()));
            }
            Err(e) => {
                return Err(RaftError::ApplyFailed(e.to_string()));
            }
        };

        self.last_applied_index.store(index, Ordering::SeqCst);
        self.last_applied_term.store(term, Ordering::SeqCst);
        Ok(result)
    }

    fn last_applied_index(&self) -> u64 {
        self.last_applied_index.load(Ordering::SeqCst)
    }

    fn last_applied_term(&self) -> u64 {
        self.last_applied_term.load(Ordering::SeqCst)
    }

    async fn snapshot(&self) -> std::result::Result<StateMachineSnapshot, RaftError> {
        // Applied state is durable in the message store; the snapshot only
        // carries the applied position.
        Ok(StateMachineSnapshot {
            group_id: self.group_id(),
            last_applied_index: self.last_applied_index(),
            last_applied_term: self.last_applied_term(),
            data: Vec::new(),
        })
    }

    async fn restore(&self, snapshot: StateMachineSnapshot) -> std::result::Result<(), RaftError> {
        self.last_applied_index
            .store(snapshot.last_applied_index, Ordering::SeqCst);
        self.last_applied_term
            .store(snapshot.last_applied_term, Ordering::SeqCst);
        Ok(())
    }
}

/// Peer-group state machine: applies cluster configuration commands.
pub struct PeerFsm {
    manager: Arc<ClusterManager>,
    last_applied_index: AtomicU64,
    last_applied_term: AtomicU64,
}

impl PeerFsm {
    pub fn new(manager: Arc<ClusterManager>) -> Self {
        Self {
            manager,
            last_applied_index: AtomicU64::new(0),
            last_applied_term: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl GroupStateMachine for PeerFsm {
    fn group_id(&self) -> GroupId {
        GroupId::Peer
    }

    async fn apply(&self, index: u64, term: u64, entry: &[u8]) -> std::result::Result<ApplyResult, RaftError> {
        if index <= self.last_applied_index.load(Ordering::SeqCst) {
            return Ok(ApplyResult::NoOp);
        }

        let (_, command) = decode_command(entry)?;
        let result = match command {
            Command::UpdatePeerConfig(peer) => {
                self.manager.apply_update_peer(peer);
                ApplyResult::ok()
            }
            Command::UpdateClusterConfig(doc) => {
                self.manager.apply_cluster_config(doc);
                ApplyResult::ok()
            }
            Command::AllocateSlot(set) => {
                self.manager.apply_allocate_slots(&set);
                ApplyResult::ok()
            }
            Command::UpdateSlotLeaderRelationSet(set) => {
                self.manager.apply_slot_leader_relations(&set);
                ApplyResult::ok()
            }
            other => ApplyResult::Error(format!(
                "non-config command {} on the peer group",
                other.cmd_type()
            )),
        };

        self.last_applied_index.store(index, Ordering::SeqCst);
        self.last_applied_term.store(term, Ordering::SeqCst);
        Ok(result)
    }

    fn last_applied_index(&self) -> u64 {
        self.last_applied_index.load(Ordering::SeqCst)
    }

    fn last_applied_term(&self) -> u64 {
        self.last_applied_term.load(Ordering::SeqCst)
    }

    async fn snapshot(&self) -> std::result::Result<StateMachineSnapshot, RaftError> {
        let data = self
            .manager
            .snapshot_document()
            .map_err(|e| RaftError::Storage(e.to_string()))?;
        Ok(StateMachineSnapshot {
            group_id: GroupId::Peer,
            last_applied_index: self.last_applied_index(),
            last_applied_term: self.last_applied_term(),
            data,
        })
    }

    async fn restore(&self, snapshot: StateMachineSnapshot) -> std::result::Result<(), RaftError> {
        self.manager
            .restore_document(&snapshot.data)
            .map_err(|e| RaftError::Storage(e.to_string()))?;
        self.last_applied_index
            .store(snapshot.last_applied_index, Ordering::SeqCst);
        self.last_applied_term
            .store(snapshot.last_applied_term, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corridor_commons::models::{ChannelInfo, Message, CHANNEL_TYPE_GROUP};
    use corridor_raft::commands::{encode_command, AppendMessagesParam, MembersParam};
    use corridor_store::MemoryBackend;

    fn fsm() -> Arc<Fsm> {
        let store = Arc::new(MessageStore::open(Arc::new(MemoryBackend::new())).unwrap());
        Arc::new(Fsm::new(store))
    }

    fn channel() -> ChannelKey {
        ChannelKey::new("g1", CHANNEL_TYPE_GROUP)
    }

    #[test]
    fn append_messages_returns_seqs() {
        let fsm = fsm();
        let command = Command::AppendMessages(AppendMessagesParam {
            channel: channel(),
            messages: vec![Message {
                message_id: 1,
                from_uid: "u1".to_string(),
                channel_id: "g1".to_string(),
                channel_type: CHANNEL_TYPE_GROUP,
                payload: b"hi".to_vec(),
                timestamp: 1,
                ..Default::default()
            }],
        });
        match fsm.apply(&command).unwrap() {
            CommandResult::AppendMessages { seqs } => assert_eq!(seqs, vec![1]),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn config_command_rejected_on_slot_path() {
        let fsm = fsm();
        let command = Command::UpdateClusterConfig(Default::default());
        assert!(matches!(
            fsm.apply(&command),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn slot_fsm_is_idempotent_per_index() {
        let fsm = fsm();
        let slot_fsm = SlotFsm::new(0, fsm.clone());

        let command = Command::AddSubscribers(MembersParam {
            channel: channel(),
            uids: vec!["u1".to_string()],
        });
        let bytes = encode_command(1, Some(0), &command).unwrap();

        let first = slot_fsm.apply(5, 1, &bytes).await.unwrap();
        assert!(first.is_ok());
        let replay = slot_fsm.apply(5, 1, &bytes).await.unwrap();
        assert!(matches!(replay, ApplyResult::NoOp));
        assert_eq!(slot_fsm.last_applied_index(), 5);
    }

    #[tokio::test]
    async fn slot_fsm_apply_is_deterministic() {
        let command = Command::AddOrUpdateChannel(ChannelInfo::new("g1", CHANNEL_TYPE_GROUP));
        let bytes = encode_command(9, Some(0), &command).unwrap();

        // Two independent replicas applying the same entry produce the
        // same result bytes.
        let a = SlotFsm::new(0, fsm());
        let b = SlotFsm::new(0, fsm());
        let ra = a.apply(1, 1, &bytes).await.unwrap();
        let rb = b.apply(1, 1, &bytes).await.unwrap();
        match (ra, rb) {
            (ApplyResult::Ok(x), ApplyResult::Ok(y)) => assert_eq!(x, y),
            other => panic!("unexpected results: {:?}", other),
        }
    }
}
