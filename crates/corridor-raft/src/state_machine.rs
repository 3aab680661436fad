//! State machine interface for replication groups.
//!
//! Each group owns one state machine. The fabric guarantees single-threaded
//! apply in log order per group; implementations track their last applied
//! index so a replayed entry is a no-op.

use async_trait::async_trait;
use corridor_sharding::GroupId;
use serde::{Deserialize, Serialize};

use crate::error::RaftError;

/// Result of applying a committed entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApplyResult {
    /// Applied; the bytes are returned to the proposer on the leader.
    Ok(Vec<u8>),
    /// Entry was already applied (idempotency) — nothing to do.
    NoOp,
    /// Deterministic rejection. Every replica produces the same rejection
    /// for the same entry; the proposer receives it as a command error.
    Error(String),
}

impl ApplyResult {
    pub fn ok() -> Self {
        ApplyResult::Ok(Vec::new())
    }

    pub fn ok_with_data(data: Vec<u8>) -> Self {
        ApplyResult::Ok(data)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ApplyResult::Ok(_) | ApplyResult::NoOp)
    }
}

/// Snapshot of a state machine's applied state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMachineSnapshot {
    pub group_id: GroupId,
    pub last_applied_index: u64,
    pub last_applied_term: u64,
    pub data: Vec<u8>,
}

/// A replication group's deterministic apply target.
///
/// Infrastructure failures (storage I/O, corruption) surface as `Err` and
/// halt the group — the log must stay replayable. Anything that can be
/// rejected based on the entry alone comes back as
/// [`ApplyResult::Error`] instead.
#[async_trait]
pub trait GroupStateMachine: Send + Sync {
    fn group_id(&self) -> GroupId;

    /// Apply one committed entry. Must be idempotent: entries at or below
    /// `last_applied_index` are skipped with [`ApplyResult::NoOp`].
    async fn apply(&self, index: u64, term: u64, entry: &[u8]) -> Result<ApplyResult, RaftError>;

    fn last_applied_index(&self) -> u64;

    fn last_applied_term(&self) -> u64;

    /// Snapshot all state up to `last_applied_index` for log compaction.
    async fn snapshot(&self) -> Result<StateMachineSnapshot, RaftError>;

    /// Replace state from a snapshot (new replica catch-up).
    async fn restore(&self, snapshot: StateMachineSnapshot) -> Result<(), RaftError>;
}

// The fabric stores heterogeneous state machines behind trait objects;
// storage stays generic over `SM: GroupStateMachine`.
#[async_trait]
impl GroupStateMachine for std::sync::Arc<dyn GroupStateMachine> {
    fn group_id(&self) -> GroupId {
        (**self).group_id()
    }

    async fn apply(&self, index: u64, term: u64, entry: &[u8]) -> Result<ApplyResult, RaftError> {
        (**self).apply(index, term, entry).await
    }

    fn last_applied_index(&self) -> u64 {
        (**self).last_applied_index()
    }

    fn last_applied_term(&self) -> u64 {
        (**self).last_applied_term()
    }

    async fn snapshot(&self) -> Result<StateMachineSnapshot, RaftError> {
        (**self).snapshot().await
    }

    async fn restore(&self, snapshot: StateMachineSnapshot) -> Result<(), RaftError> {
        (**self).restore(snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_result_is_ok() {
        assert!(ApplyResult::ok().is_ok());
        assert!(ApplyResult::ok_with_data(vec![1]).is_ok());
        assert!(ApplyResult::NoOp.is_ok());
        assert!(!ApplyResult::Error("rejected".to_string()).is_ok());
    }
}
