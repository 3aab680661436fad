//! Server-core error taxonomy.
//!
//! Callers branch on kind, not message: transient errors are retried inside
//! the owning component up to its budget, `NotLeader` redirects are resolved
//! at most once, permanent input and authorisation errors propagate to the
//! client verbatim.

use corridor_raft::RaftError;
use corridor_store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed or unsupported input; never retried.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Sender banned, denylisted, or outside a non-empty allowlist.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// This node cannot serve the request; retry against `leader`.
    #[error("Not leader; current leader is peer {leader:?}")]
    NotLeader { leader: Option<u64> },

    /// Worth retrying: timeouts, full proposal queues, unknown leaders.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// A bounded queue refused the work; requeue at the client layer.
    #[error("Backpressure: {0}")]
    Backpressure(String),

    /// Channel cluster state not yet initialised.
    #[error("Cluster configuration not initialised")]
    NotInitialized,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Raft(RaftError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Transient(_) | CoreError::Backpressure(_) | CoreError::NotInitialized => {
                true
            }
            CoreError::NotLeader { .. } => true,
            CoreError::Raft(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn leader_hint(&self) -> Option<u64> {
        match self {
            CoreError::NotLeader { leader } => *leader,
            CoreError::Raft(e) => e.leader_hint(),
            _ => None,
        }
    }
}

impl From<RaftError> for CoreError {
    fn from(err: RaftError) -> Self {
        match err {
            RaftError::NotLeader { leader, .. } => CoreError::NotLeader { leader },
            other if other.is_retryable() => CoreError::Transient(other.to_string()),
            other => CoreError::Raft(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raft_not_leader_maps_to_redirect() {
        let err: CoreError = RaftError::not_leader("slot:0001", Some(3)).into();
        assert!(matches!(err, CoreError::NotLeader { leader: Some(3) }));
        assert_eq!(err.leader_hint(), Some(3));
    }

    #[test]
    fn retryability() {
        assert!(CoreError::Transient("queue full".to_string()).is_retryable());
        assert!(CoreError::Backpressure("above watermark".to_string()).is_retryable());
        assert!(!CoreError::InvalidInput("bad id".to_string()).is_retryable());
        assert!(!CoreError::Unauthorized("denylisted".to_string()).is_retryable());
    }
}
