//! Combined raft storage: log, vote, state-machine driver, snapshots.
//!
//! Implements the combined `RaftStorage` trait (v1 API) over in-memory log
//! state. Durable system state lives behind the group's
//! [`GroupStateMachine`]; the raft log itself is rebuilt from peers (or a
//! snapshot) after a restart.
//!
//! Lock discipline: raft-side log state (entries, vote, watermarks) lives
//! under one lock so every mutation sees a consistent view; applied state
//! and snapshots have their own locks. No lock is ever held across an
//! await — the state machine synchronizes internally.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io::Cursor;
use std::ops::RangeBounds;
use std::sync::Arc;

use corridor_sharding::GroupId;
use openraft::storage::{LogState, RaftLogReader, RaftStorage, Snapshot};
use openraft::{
    Entry, EntryPayload, LogId, OptionalSend, RaftSnapshotBuilder, SnapshotMeta, StorageError,
    StorageIOError, StoredMembership, Vote,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::codec::{decode, encode};
use crate::state_machine::{ApplyResult, GroupStateMachine};
use crate::storage::types::{PeerNode, TypeConfig};

/// Raft log plus the per-log metadata raft persists alongside it.
#[derive(Default)]
struct WalState {
    /// index → encoded entry payload.
    entries: BTreeMap<u64, (LogId<u64>, Vec<u8>)>,
    vote: Option<Vote<u64>>,
    committed: Option<LogId<u64>>,
    purged_upto: Option<LogId<u64>>,
}

/// Where the state machine has caught up to.
#[derive(Default)]
struct AppliedState {
    last_applied: Option<LogId<u64>>,
    membership: StoredMembership<u64, PeerNode>,
}

/// The most recent snapshot, plus a counter for snapshot ids.
#[derive(Default)]
struct SnapshotState {
    taken: u64,
    current: Option<(SnapshotMeta<u64, PeerNode>, Vec<u8>)>,
}

/// Serialized snapshot contents: applied position, membership, and the
/// state machine's own bytes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct SnapshotBlob {
    last_applied: Option<LogId<u64>>,
    membership: StoredMembership<u64, PeerNode>,
    machine: Vec<u8>,
}

/// Combined log + state machine storage for one replication group.
///
/// Handed to openraft as `Arc<Self>`; the same handle doubles as the log
/// reader and snapshot builder.
pub struct GroupRaftStorage<SM: GroupStateMachine + Send + Sync + 'static> {
    group_id: GroupId,
    /// Arc because apply uses the state machine's internal synchronization.
    state_machine: Arc<SM>,
    wal: RwLock<WalState>,
    applied: RwLock<AppliedState>,
    snapshots: RwLock<SnapshotState>,
}

impl<SM: GroupStateMachine + Send + Sync + 'static> Debug for GroupRaftStorage<SM> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupRaftStorage")
            .field("group_id", &self.group_id)
            .field("snapshots_taken", &self.snapshots.read().taken)
            .finish_non_exhaustive()
    }
}

impl<SM: GroupStateMachine + Send + Sync + 'static> GroupRaftStorage<SM> {
    pub fn new(group_id: GroupId, state_machine: SM) -> Self {
        Self {
            group_id,
            state_machine: Arc::new(state_machine),
            wal: RwLock::new(WalState::default()),
            applied: RwLock::new(AppliedState::default()),
            snapshots: RwLock::new(SnapshotState::default()),
        }
    }

    pub fn state_machine(&self) -> &Arc<SM> {
        &self.state_machine
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// Decodes the stored entries in `range`. A payload that fails to
    /// decode degrades to a blank entry rather than poisoning the log —
    /// the index sequence must stay gap-free for raft.
    fn entries_between(&self, range: impl RangeBounds<u64>) -> Vec<Entry<TypeConfig>> {
        let wal = self.wal.read();
        wal.entries
            .range(range)
            .map(|(_, (log_id, bytes))| {
                let payload = decode::<EntryPayload<TypeConfig>>(bytes).unwrap_or_else(|e| {
                    log::warn!(
                        "Undecodable log entry at {} on group {}: {:?}",
                        log_id,
                        self.group_id,
                        e
                    );
                    EntryPayload::Blank
                });
                Entry {
                    log_id: *log_id,
                    payload,
                }
            })
            .collect()
    }
}

impl<SM: GroupStateMachine + Send + Sync + 'static> RaftLogReader<TypeConfig>
    for Arc<GroupRaftStorage<SM>>
{
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<u64>> {
        Ok(self.entries_between(range))
    }
}

impl<SM: GroupStateMachine + Send + Sync + 'static> RaftSnapshotBuilder<TypeConfig>
    for Arc<GroupRaftStorage<SM>>
{
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<u64>> {
        let (last_applied, membership) = {
            let applied = self.applied.read();
            (applied.last_applied, applied.membership.clone())
        };

        let machine = self
            .state_machine
            .snapshot()
            .await
            .map_err(|e| StorageIOError::read_state_machine(&e))?;

        let blob = SnapshotBlob {
            last_applied,
            membership: membership.clone(),
            machine: machine.data,
        };
        let bytes = encode(&blob).map_err(|e| StorageIOError::read_state_machine(&e))?;

        let meta = {
            let mut snapshots = self.snapshots.write();
            snapshots.taken += 1;
            let meta = SnapshotMeta {
                last_log_id: last_applied,
                last_membership: membership,
                snapshot_id: format!(
                    "{}:{}",
                    last_applied.map(|id| id.index).unwrap_or(0),
                    snapshots.taken
                ),
            };
            snapshots.current = Some((meta.clone(), bytes.clone()));
            meta
        };

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(bytes)),
        })
    }
}

#[allow(deprecated)] // RaftStorage v1: the v2 split traits are sealed
impl<SM: GroupStateMachine + Send + Sync + 'static> RaftStorage<TypeConfig>
    for Arc<GroupRaftStorage<SM>>
{
    type LogReader = Self;
    type SnapshotBuilder = Self;

    async fn save_vote(&mut self, vote: &Vote<u64>) -> Result<(), StorageError<u64>> {
        self.wal.write().vote = Some(*vote);
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<u64>>, StorageError<u64>> {
        Ok(self.wal.read().vote)
    }

    async fn save_committed(
        &mut self,
        committed: Option<LogId<u64>>,
    ) -> Result<(), StorageError<u64>> {
        self.wal.write().committed = committed;
        Ok(())
    }

    async fn read_committed(&mut self) -> Result<Option<LogId<u64>>, StorageError<u64>> {
        Ok(self.wal.read().committed)
    }

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<u64>> {
        let wal = self.wal.read();
        let last_in_log = wal.entries.values().next_back().map(|(log_id, _)| *log_id);
        Ok(LogState {
            last_purged_log_id: wal.purged_upto,
            last_log_id: last_in_log.or(wal.purged_upto),
        })
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }

    async fn append_to_log<I>(&mut self, entries: I) -> Result<(), StorageError<u64>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
    {
        // Encode outside the lock; the write section is pure insertion.
        let mut encoded = Vec::new();
        for entry in entries {
            let bytes = encode(&entry.payload).map_err(|e| StorageIOError::write_logs(&e))?;
            encoded.push((entry.log_id, bytes));
        }

        let mut wal = self.wal.write();
        for (log_id, bytes) in encoded {
            wal.entries.insert(log_id.index, (log_id, bytes));
        }
        Ok(())
    }

    async fn delete_conflict_logs_since(
        &mut self,
        log_id: LogId<u64>,
    ) -> Result<(), StorageError<u64>> {
        // Everything from the conflict point on is uncommitted and safe to
        // discard.
        let _ = self.wal.write().entries.split_off(&log_id.index);
        Ok(())
    }

    async fn purge_logs_upto(&mut self, log_id: LogId<u64>) -> Result<(), StorageError<u64>> {
        let mut wal = self.wal.write();
        wal.entries = wal.entries.split_off(&(log_id.index + 1));
        wal.purged_upto = Some(log_id);
        Ok(())
    }

    async fn last_applied_state(
        &mut self,
    ) -> Result<(Option<LogId<u64>>, StoredMembership<u64, PeerNode>), StorageError<u64>> {
        let applied = self.applied.read();
        Ok((applied.last_applied, applied.membership.clone()))
    }

    async fn apply_to_state_machine(
        &mut self,
        entries: &[Entry<TypeConfig>],
    ) -> Result<Vec<Vec<u8>>, StorageError<u64>> {
        let mut results = Vec::with_capacity(entries.len());

        for entry in entries {
            let log_id = entry.log_id;

            match &entry.payload {
                EntryPayload::Blank => results.push(Vec::new()),
                EntryPayload::Normal(bytes) => {
                    // The Arc'd state machine synchronizes internally, so no
                    // lock is held across the await.
                    let sm = self.state_machine.clone();
                    match sm.apply(log_id.index, log_id.leader_id.term, bytes).await {
                        Ok(ApplyResult::Ok(response)) => results.push(response),
                        Ok(ApplyResult::NoOp) => results.push(Vec::new()),
                        Ok(ApplyResult::Error(e)) => {
                            // Deterministic rejection: identical on every
                            // replica, reported back to the proposer.
                            let encoded = encode(&crate::commands::CommandResult::Error(e))
                                .unwrap_or_default();
                            results.push(encoded);
                        }
                        Err(e) => {
                            // Infrastructure failure: the log can no longer
                            // be replayed safely on this node.
                            log::error!(
                                "State machine apply failed at index {} on group {}: {:?}",
                                log_id.index,
                                self.group_id,
                                e
                            );
                            return Err(StorageIOError::write_state_machine(&e).into());
                        }
                    }
                }
                EntryPayload::Membership(membership) => {
                    self.applied.write().membership =
                        StoredMembership::new(Some(log_id), membership.clone());
                    results.push(Vec::new());
                }
            }

            self.applied.write().last_applied = Some(log_id);
        }

        Ok(results)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.clone()
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<u64>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<u64, PeerNode>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<u64>> {
        let bytes = snapshot.into_inner();

        let blob: SnapshotBlob = decode(&bytes)
            .map_err(|e| StorageIOError::read_snapshot(Some(meta.signature()), &e))?;

        let restored = crate::state_machine::StateMachineSnapshot {
            group_id: self.group_id,
            last_applied_index: meta.last_log_id.map(|id| id.index).unwrap_or(0),
            last_applied_term: meta.last_log_id.map(|id| id.leader_id.term).unwrap_or(0),
            data: blob.machine,
        };
        self.state_machine
            .restore(restored)
            .await
            .map_err(|e| StorageIOError::read_snapshot(Some(meta.signature()), &e))?;

        {
            let mut applied = self.applied.write();
            applied.last_applied = meta.last_log_id;
            applied.membership = meta.last_membership.clone();
        }
        self.snapshots.write().current = Some((meta.clone(), bytes));

        // Entries covered by the snapshot are dead weight now.
        if let Some(last) = meta.last_log_id {
            let mut wal = self.wal.write();
            wal.entries = wal.entries.split_off(&(last.index + 1));
            wal.purged_upto = Some(last);
        }

        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<u64>> {
        let snapshots = self.snapshots.read();
        Ok(snapshots.current.as_ref().map(|(meta, bytes)| Snapshot {
            meta: meta.clone(),
            snapshot: Box::new(Cursor::new(bytes.clone())),
        }))
    }
}
