//! In-memory storage backend.
//!
//! Backs unit tests and `storage = "memory"` configurations. Partitions are
//! BTreeMaps so scans share the ordering semantics of the RocksDB backend.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use crate::error::{Result, StoreError};
use crate::storage_trait::{Operation, Partition, StorageBackend};

type Keyspace = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Default)]
pub struct MemoryBackend {
    partitions: RwLock<HashMap<String, Keyspace>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_keyspace<T>(
        &self,
        partition: &Partition,
        f: impl FnOnce(&Keyspace) -> T,
    ) -> Result<T> {
        let guard = self.partitions.read();
        let keyspace = guard
            .get(partition.name())
            .ok_or_else(|| StoreError::PartitionNotFound(partition.name().to_string()))?;
        Ok(f(keyspace))
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, partition: &Partition, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.with_keyspace(partition, |ks| ks.get(key).cloned())
    }

    fn put(&self, partition: &Partition, key: &[u8], value: &[u8]) -> Result<()> {
        let mut guard = self.partitions.write();
        let keyspace = guard
            .get_mut(partition.name())
            .ok_or_else(|| StoreError::PartitionNotFound(partition.name().to_string()))?;
        keyspace.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, partition: &Partition, key: &[u8]) -> Result<()> {
        let mut guard = self.partitions.write();
        let keyspace = guard
            .get_mut(partition.name())
            .ok_or_else(|| StoreError::PartitionNotFound(partition.name().to_string()))?;
        keyspace.remove(key);
        Ok(())
    }

    fn batch(&self, operations: Vec<Operation>) -> Result<()> {
        let mut guard = self.partitions.write();
        // Validate all partitions first so the batch is all-or-nothing.
        for op in &operations {
            let name = match op {
                Operation::Put { partition, .. } | Operation::Delete { partition, .. } => {
                    partition.name()
                }
            };
            if !guard.contains_key(name) {
                return Err(StoreError::PartitionNotFound(name.to_string()));
            }
        }
        for op in operations {
            match op {
                Operation::Put {
                    partition,
                    key,
                    value,
                } => {
                    guard
                        .get_mut(partition.name())
                        .expect("partition validated above")
                        .insert(key, value);
                }
                Operation::Delete { partition, key } => {
                    guard
                        .get_mut(partition.name())
                        .expect("partition validated above")
                        .remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan(
        &self,
        partition: &Partition,
        prefix: &[u8],
        start_key: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.with_keyspace(partition, |ks| {
            let limit = limit.unwrap_or(usize::MAX);
            let lower = start_key.unwrap_or(prefix).to_vec();
            ks.range(lower..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
    }

    fn scan_rev(
        &self,
        partition: &Partition,
        prefix: &[u8],
        start_key: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.with_keyspace(partition, |ks| {
            let limit = limit.unwrap_or(usize::MAX);
            let mut out = Vec::new();
            for (k, v) in ks.iter().rev() {
                if out.len() >= limit {
                    break;
                }
                if let Some(start) = start_key {
                    if k.as_slice() > start {
                        continue;
                    }
                }
                if !k.starts_with(prefix) {
                    // Reverse iteration can pass through keys above the
                    // prefix range before reaching it.
                    if !out.is_empty() {
                        break;
                    }
                    continue;
                }
                out.push((k.clone(), v.clone()));
            }
            out
        })
    }

    fn create_partition(&self, partition: &Partition) -> Result<()> {
        let mut guard = self.partitions.write();
        guard.entry(partition.name().to_string()).or_default();
        Ok(())
    }

    fn partition_exists(&self, partition: &Partition) -> bool {
        self.partitions.read().contains_key(partition.name())
    }

    fn drop_partition(&self, partition: &Partition) -> Result<()> {
        self.partitions.write().remove(partition.name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> MemoryBackend {
        let b = MemoryBackend::new();
        b.create_partition(&Partition::new("t")).unwrap();
        b
    }

    #[test]
    fn get_put_delete() {
        let b = backend();
        let p = Partition::new("t");
        assert_eq!(b.get(&p, b"k").unwrap(), None);
        b.put(&p, b"k", b"v").unwrap();
        assert_eq!(b.get(&p, b"k").unwrap(), Some(b"v".to_vec()));
        b.delete(&p, b"k").unwrap();
        assert_eq!(b.get(&p, b"k").unwrap(), None);
    }

    #[test]
    fn missing_partition_errors() {
        let b = MemoryBackend::new();
        let err = b.get(&Partition::new("nope"), b"k").unwrap_err();
        assert!(matches!(err, StoreError::PartitionNotFound(_)));
    }

    #[test]
    fn scan_respects_prefix_and_limit() {
        let b = backend();
        let p = Partition::new("t");
        for i in 0..5u8 {
            b.put(&p, &[b'a', i], &[i]).unwrap();
            b.put(&p, &[b'b', i], &[i]).unwrap();
        }
        let rows = b.scan(&p, b"a", None, Some(3)).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|(k, _)| k[0] == b'a'));
    }

    #[test]
    fn scan_rev_returns_descending() {
        let b = backend();
        let p = Partition::new("t");
        for i in 0..5u8 {
            b.put(&p, &[b'a', i], &[i]).unwrap();
        }
        let rows = b.scan_rev(&p, b"a", None, Some(2)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, vec![b'a', 4]);
        assert_eq!(rows[1].0, vec![b'a', 3]);
    }

    #[test]
    fn scan_rev_with_start_key() {
        let b = backend();
        let p = Partition::new("t");
        for i in 0..5u8 {
            b.put(&p, &[b'a', i], &[i]).unwrap();
        }
        let rows = b.scan_rev(&p, b"a", Some(&[b'a', 2]), None).unwrap();
        let keys: Vec<_> = rows.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![vec![b'a', 2], vec![b'a', 1], vec![b'a', 0]]);
    }
}
