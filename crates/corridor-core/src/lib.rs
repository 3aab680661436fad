//! Corridor server core.
//!
//! The channel-sharded message routing layer: a per-channel pipeline that
//! orders and persists messages through the replicated slot logs, a cluster
//! configuration manager driving slot placement, and a delivery engine that
//! fans committed messages out to subscribers — local connections directly,
//! remote ones through the tracked in-flight queue.
//!
//! Wire protocol, TLS and the HTTP surface live outside this crate; they
//! interact with the core through [`server::Context`].

pub mod channel;
pub mod cluster;
pub mod conn;
pub mod delivery;
pub mod error;
pub mod executor;
pub mod fsm;
pub mod idgen;
pub mod ip_guard;
pub mod server;
pub mod timing_wheel;
pub mod types;

pub use channel::{ChannelReactor, MAX_PAYLOAD_BYTES};
pub use cluster::{Cluster, ClusterManager};
pub use conn::{ConnHandle, ConnManager};
pub use delivery::{DeliveryManager, PeerInFlightQueue, RetryQueue};
pub use error::{CoreError, Result};
pub use executor::{ClusterExecutor, CommandExecutor, DirectExecutor, LeaderLocation};
pub use fsm::{ApplyHook, Fsm, PeerFsm, SlotFsm};
pub use idgen::MessageIdGenerator;
pub use ip_guard::IpGuard;
pub use server::{Context, CoreOptions, CorridorServer, PeerHandler};
pub use timing_wheel::TimingWheel;
pub use types::{
    PeerDelivery, PeerDeliveryBatch, RecvAck, RecvAckBatch, SendRequest, SendResult,
};
