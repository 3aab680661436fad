//! Error types for the replication layer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RaftError>;

#[derive(Debug, Error)]
pub enum RaftError {
    /// The node is not the leader for this group.
    #[error("Not leader for group {group}: leader is peer {leader:?}")]
    NotLeader {
        group: String,
        leader: Option<u64>,
    },

    #[error("Replication group not found: {0}")]
    GroupNotFound(String),

    #[error("Replication group not started: {0}")]
    NotStarted(String),

    #[error("Failed to apply command: {0}")]
    ApplyFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Proposal rejected: {0}")]
    Proposal(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Peer unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Command timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Raft is shutting down")]
    Shutdown,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RaftError {
    pub fn not_leader(group: impl Into<String>, leader: Option<u64>) -> Self {
        RaftError::NotLeader {
            group: group.into(),
            leader,
        }
    }

    /// Returns true if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RaftError::NotLeader { .. }
                | RaftError::Timeout(_)
                | RaftError::Network(_)
                | RaftError::Unavailable(_)
        )
    }

    /// Leader hint carried by a `NotLeader` rejection.
    pub fn leader_hint(&self) -> Option<u64> {
        if let RaftError::NotLeader { leader, .. } = self {
            *leader
        } else {
            None
        }
    }
}

impl From<prost::DecodeError> for RaftError {
    fn from(err: prost::DecodeError) -> Self {
        RaftError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for RaftError {
    fn from(err: std::io::Error) -> Self {
        RaftError::Storage(err.to_string())
    }
}
