//! Raft storage integration: openraft type configuration and the in-memory
//! log + state machine adaptor.

mod raft_store;
mod types;

pub use raft_store::GroupRaftStorage;
pub use types::{PeerNode, TypeConfig};
