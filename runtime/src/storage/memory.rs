//! In-memory [crate::Storage].
//!
//! Each opened [Blob] works on its own copy of the blob's content. Only [crate::Blob::sync]
//! publishes that copy back to the partition, so reopening a blob after "crashing" (dropping it
//! without syncing) observes the last synced content.

use super::validate_partition_name;
use crate::Error;
use ratify_utils::hex;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, RwLock},
};

type Partition = BTreeMap<Vec<u8>, Vec<u8>>;
type Partitions = Arc<Mutex<BTreeMap<String, Partition>>>;

/// In-memory storage.
#[derive(Clone, Default)]
pub struct Storage {
    partitions: Partitions,
}

impl Storage {
    /// Returns the synced content of every blob in `partition`.
    pub fn snapshot(&self, partition: &str) -> BTreeMap<Vec<u8>, Vec<u8>> {
        let partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        partitions.get(partition).cloned().unwrap_or_default()
    }
}

impl crate::Storage for Storage {
    type Blob = Blob;

    async fn open(&self, partition: &str, name: &[u8]) -> Result<(Blob, u64), Error> {
        validate_partition_name(partition)?;

        let mut partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        let content = partitions
            .entry(partition.into())
            .or_default()
            .entry(name.into())
            .or_default()
            .clone();
        let len = content.len() as u64;
        Ok((
            Blob {
                partitions: self.partitions.clone(),
                partition: partition.into(),
                name: name.into(),
                content: Arc::new(RwLock::new(content)),
            },
            len,
        ))
    }

    async fn remove(&self, partition: &str, name: Option<&[u8]>) -> Result<(), Error> {
        validate_partition_name(partition)?;

        let mut partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        match name {
            Some(name) => {
                partitions
                    .get_mut(partition)
                    .ok_or_else(|| Error::PartitionMissing(partition.into()))?
                    .remove(name)
                    .ok_or_else(|| Error::BlobMissing(partition.into(), hex(name)))?;
            }
            None => {
                partitions
                    .remove(partition)
                    .ok_or_else(|| Error::PartitionMissing(partition.into()))?;
            }
        }
        Ok(())
    }

    async fn scan(&self, partition: &str) -> Result<Vec<Vec<u8>>, Error> {
        validate_partition_name(partition)?;

        let partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        let partition = partitions
            .get(partition)
            .ok_or_else(|| Error::PartitionMissing(partition.into()))?;
        Ok(partition.keys().cloned().collect())
    }
}

/// A blob opened from [Storage].
#[derive(Clone)]
pub struct Blob {
    partitions: Partitions,
    partition: String,
    name: Vec<u8>,
    content: Arc<RwLock<Vec<u8>>>,
}

fn to_index(offset: u64) -> Result<usize, Error> {
    usize::try_from(offset).map_err(|_| Error::OffsetOverflow)
}

impl crate::Blob for Blob {
    async fn read_at(&self, mut buf: Vec<u8>, offset: u64) -> Result<Vec<u8>, Error> {
        let offset = to_index(offset)?;
        let content = self.content.read().unwrap_or_else(|e| e.into_inner());
        let end = offset
            .checked_add(buf.len())
            .ok_or(Error::OffsetOverflow)?;
        if end > content.len() {
            return Err(Error::BlobInsufficientLength);
        }
        buf.copy_from_slice(&content[offset..end]);
        Ok(buf)
    }

    async fn write_at(&self, buf: Vec<u8>, offset: u64) -> Result<(), Error> {
        let offset = to_index(offset)?;
        let mut content = self.content.write().unwrap_or_else(|e| e.into_inner());
        let end = offset
            .checked_add(buf.len())
            .ok_or(Error::OffsetOverflow)?;
        if end > content.len() {
            content.resize(end, 0);
        }
        content[offset..end].copy_from_slice(&buf);
        Ok(())
    }

    async fn resize(&self, len: u64) -> Result<(), Error> {
        let len = to_index(len)?;
        let mut content = self.content.write().unwrap_or_else(|e| e.into_inner());
        content.resize(len, 0);
        Ok(())
    }

    async fn sync(&self) -> Result<(), Error> {
        let synced = self
            .content
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        let content = partitions
            .get_mut(&self.partition)
            .ok_or_else(|| Error::PartitionMissing(self.partition.clone()))?
            .get_mut(&self.name)
            .ok_or_else(|| Error::BlobMissing(self.partition.clone(), hex(&self.name)))?;
        *content = synced;
        Ok(())
    }
}
