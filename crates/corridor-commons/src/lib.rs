//! Shared models and configuration types for the Corridor cluster.
//!
//! Everything in this crate is plain data: peer/channel/message records and
//! the `[cluster]` configuration section. Behaviour lives in the crates that
//! consume these types.

pub mod config;
pub mod models;

pub use config::{ClusterConfig, PeerSeed};
pub use models::{
    ChannelInfo, ChannelKey, Message, Peer, PeerStatus, CHANNEL_TYPE_GROUP, CHANNEL_TYPE_PERSON,
};
