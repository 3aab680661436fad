//! Configuration types shared across crates.

mod cluster;

pub use cluster::{ClusterConfig, PeerSeed};
