//! RocksDB storage backend.
//!
//! Partitions map to column families. Column families are created lazily on
//! `create_partition`, so a fresh data directory needs no schema step.

use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options,
    WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::storage_trait::{Operation, Partition, StorageBackend};

type Db = DBWithThreadMode<MultiThreaded>;

pub struct RocksBackend {
    db: Arc<Db>,
}

impl RocksBackend {
    /// Opens (or creates) the database at `path`, reattaching every column
    /// family that already exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let existing = Db::list_cf(&opts, path.as_ref()).unwrap_or_default();
        let descriptors: Vec<ColumnFamilyDescriptor> = existing
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = if descriptors.is_empty() {
            Db::open(&opts, path.as_ref())?
        } else {
            Db::open_cf_descriptors(&opts, path.as_ref(), descriptors)?
        };

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, partition: &Partition) -> Result<Arc<rocksdb::BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(partition.name())
            .ok_or_else(|| StoreError::PartitionNotFound(partition.name().to_string()))
    }
}

impl StorageBackend for RocksBackend {
    fn get(&self, partition: &Partition, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(partition)?;
        Ok(self.db.get_cf(&cf, key)?)
    }

    fn put(&self, partition: &Partition, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.cf(partition)?;
        Ok(self.db.put_cf(&cf, key, value)?)
    }

    fn delete(&self, partition: &Partition, key: &[u8]) -> Result<()> {
        let cf = self.cf(partition)?;
        Ok(self.db.delete_cf(&cf, key)?)
    }

    fn batch(&self, operations: Vec<Operation>) -> Result<()> {
        let mut batch = WriteBatch::default();
        for op in operations {
            match op {
                Operation::Put {
                    partition,
                    key,
                    value,
                } => {
                    let cf = self.cf(&partition)?;
                    batch.put_cf(&cf, key, value);
                }
                Operation::Delete { partition, key } => {
                    let cf = self.cf(&partition)?;
                    batch.delete_cf(&cf, key);
                }
            }
        }
        Ok(self.db.write(batch)?)
    }

    fn scan(
        &self,
        partition: &Partition,
        prefix: &[u8],
        start_key: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf(partition)?;
        let limit = limit.unwrap_or(usize::MAX);
        let from = start_key.unwrap_or(prefix);
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(from, Direction::Forward));

        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    fn scan_rev(
        &self,
        partition: &Partition,
        prefix: &[u8],
        start_key: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf(partition)?;
        let limit = limit.unwrap_or(usize::MAX);

        // Without an explicit start, seek to just past the prefix range and
        // walk backwards into it.
        let mode = match start_key {
            Some(start) => IteratorMode::From(start, Direction::Reverse),
            None => IteratorMode::End,
        };
        let iter = self.db.iterator_cf(&cf, mode);

        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                if out.is_empty() {
                    continue;
                }
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    fn create_partition(&self, partition: &Partition) -> Result<()> {
        if self.partition_exists(partition) {
            return Ok(());
        }
        Ok(self.db.create_cf(partition.name(), &Options::default())?)
    }

    fn partition_exists(&self, partition: &Partition) -> bool {
        self.db.cf_handle(partition.name()).is_some()
    }

    fn drop_partition(&self, partition: &Partition) -> Result<()> {
        if !self.partition_exists(partition) {
            return Ok(());
        }
        Ok(self.db.drop_cf(partition.name())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rocks_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RocksBackend::open(dir.path()).unwrap();
        let p = Partition::new("t");
        backend.create_partition(&p).unwrap();

        backend.put(&p, b"a1", b"v1").unwrap();
        backend.put(&p, b"a2", b"v2").unwrap();
        backend.put(&p, b"b1", b"v3").unwrap();

        assert_eq!(backend.get(&p, b"a1").unwrap(), Some(b"v1".to_vec()));

        let rows = backend.scan(&p, b"a", None, None).unwrap();
        assert_eq!(rows.len(), 2);

        let rows = backend.scan_rev(&p, b"a", None, None).unwrap();
        assert_eq!(rows[0].0, b"a2".to_vec());
    }

    #[test]
    fn partitions_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = RocksBackend::open(dir.path()).unwrap();
            let p = Partition::new("kept");
            backend.create_partition(&p).unwrap();
            backend.put(&p, b"k", b"v").unwrap();
        }
        let backend = RocksBackend::open(dir.path()).unwrap();
        let p = Partition::new("kept");
        assert!(backend.partition_exists(&p));
        assert_eq!(backend.get(&p, b"k").unwrap(), Some(b"v".to_vec()));
    }
}
