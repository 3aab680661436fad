//! Storage backend abstraction for pluggable implementations.
//!
//! Backends expose key-value access grouped into named partitions:
//! RocksDB maps a partition to a column family, the in-memory backend to a
//! BTreeMap namespace. Scans are ordered by key bytes; `scan_rev` walks the
//! same range backwards, which the message log uses for newest-first reads.

use std::fmt;

use crate::error::Result;

/// A logical namespace of keys within a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
    name: String,
}

impl Partition {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl From<&str> for Partition {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A single operation in an atomic batch.
#[derive(Debug, Clone)]
pub enum Operation {
    Put {
        partition: Partition,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        partition: Partition,
        key: Vec<u8>,
    },
}

/// Pluggable storage backend. Implementations must be thread-safe; the
/// facade above them does not add locking for plain reads and writes.
pub trait StorageBackend: Send + Sync {
    /// Returns `Ok(None)` if the key does not exist.
    fn get(&self, partition: &Partition, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, partition: &Partition, key: &[u8], value: &[u8]) -> Result<()>;

    /// Idempotent: deleting a missing key succeeds.
    fn delete(&self, partition: &Partition, key: &[u8]) -> Result<()>;

    /// All operations applied atomically, or none.
    fn batch(&self, operations: Vec<Operation>) -> Result<()>;

    /// Ascending scan over keys with the given prefix, starting at
    /// `start_key` (inclusive) when given, up to `limit` entries.
    fn scan(
        &self,
        partition: &Partition,
        prefix: &[u8],
        start_key: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Descending scan over keys with the given prefix, starting at
    /// `start_key` (inclusive) when given, up to `limit` entries.
    fn scan_rev(
        &self,
        partition: &Partition,
        prefix: &[u8],
        start_key: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Idempotent partition creation.
    fn create_partition(&self, partition: &Partition) -> Result<()>;

    fn partition_exists(&self, partition: &Partition) -> bool;

    /// Drops a partition and all keys in it.
    fn drop_partition(&self, partition: &Partition) -> Result<()>;
}
