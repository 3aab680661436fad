//! Durable storage for the Corridor IM core.
//!
//! Two layers:
//!
//! - [`StorageBackend`]: a pluggable KV abstraction with named partitions
//!   (RocksDB column families in production, a BTreeMap namespace in tests).
//! - [`MessageStore`]: the storage facade the rest of the system talks to —
//!   per-channel message log with dense sequence assignment, channel
//!   metadata, membership sets, and the global IP blocklist.
//!
//! Sequence assignment happens inside [`MessageStore::append_messages`] and
//! is only ever driven from the state-machine apply path, so every replica
//! of a slot computes identical sequences for identical log entries.

mod error;
mod key_encoding;
mod memory;
mod message_store;
mod rocks;
mod storage_trait;

pub use error::{Result, StoreError};
pub use memory::MemoryBackend;
pub use message_store::MessageStore;
pub use rocks::RocksBackend;
pub use storage_trait::{Operation, Partition, StorageBackend};
