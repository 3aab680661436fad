//! Corridor replication layer.
//!
//! Multi-raft consensus for the channel-sharded message core: a fixed slot
//! space with one replication group per slot, plus a dedicated peer group
//! carrying the cluster configuration. Built on `openraft` with a shared
//! gRPC transport and hand-written generated-style service code.
//!
//! ## Key components
//!
//! - [`RaftFabric`]: hosts the groups, routes proposals, forwards to leaders
//! - [`RaftGroup`]: one group's raft instance + storage + network
//! - [`GroupStateMachine`]: deterministic apply target installed per group
//! - [`Command`] / [`CmdRequest`]: the replicated command taxonomy and its
//!   wire envelope
//! - [`PeerClient`] / [`PeerCommandHandler`]: typed peer command RPC

pub mod codec;
pub mod commands;
pub mod error;
pub mod fabric;
pub mod group;
pub mod network;
pub mod state_machine;
pub mod storage;

pub use commands::{
    decode_command, encode_command, AppendMessagesParam, ChannelParam, CmdRequest, Command,
    CommandResult, IpListParam, MembersParam,
};
pub use corridor_sharding::GroupId;
pub use error::{RaftError, Result};
pub use fabric::{FabricConfig, RaftFabric, SlotStateMachineFactory};
pub use group::{GroupRaftConfig, RaftGroup};
pub use network::{
    start_peer_server, start_raft_server, PeerClient, PeerCommandHandler, PeerCommandService,
    PeerRegistry,
};
pub use state_machine::{ApplyResult, GroupStateMachine, StateMachineSnapshot};
pub use storage::{GroupRaftStorage, PeerNode, TypeConfig};
