//! Keyed records that are atomically replaced on every write.
//!
//! # Format
//!
//! Each key is backed by two blobs (named `key || 0` and `key || 1`). Each blob holds at most one
//! record:
//!
//! ```text
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
//! | 0 | 1 |    ...    | 7 | 8 | 9 |10 |11 |12 |  ...  |   |   |   |   |   |   |   |
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
//! |    Version (u64)      |  Len (u32)    |    Value (Len bytes)  |  CRC32 (u32)  |
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
//! ```
//!
//! # Atomic Updates
//!
//! Writes to a [Blob] are not atomic and may only complete partially, so a new record is always
//! written to the slot that does *not* hold the latest record. The slot is synced before the
//! write is acknowledged. On read, the valid record (checksum and length intact) with the highest
//! version wins, so a crash mid-write leaves either the previous or the new record, never a mix.
//!
//! Versions must strictly increase: a write with a version that is not greater than the latest
//! one is rejected with [Error::StaleSequence].
//!
//! # Index
//!
//! The keys with blobs on disk are scanned once, on first use, and tracked from then on. Reading
//! a key that is not indexed never touches (or creates) a blob.

use crate::Error;
use futures::lock::Mutex as AsyncMutex;
use ratify_runtime::{Blob, Storage};
use ratify_utils::hex;
use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
};
use tracing::{debug, warn};

const HEADER_SIZE: usize = 8 + 4;
const CHECKSUM_SIZE: usize = 4;
const SLOTS: [u8; 2] = [0, 1];

/// Configuration for [Slots].
#[derive(Clone, Debug)]
pub struct Config {
    /// The [Storage] partition holding the records.
    pub partition: String,

    /// Largest value accepted by [Slots::put] (larger records found on disk are ignored).
    pub max_value_size: usize,
}

/// The latest record of a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Cursor {
    slot: u8,
    version: u64,
}

/// Every key with blobs on disk, with its latest record once read.
type Index = HashMap<Vec<u8>, Option<Cursor>>;

/// Keyed, versioned records stored in a [Storage] partition.
pub struct Slots<S: Storage> {
    storage: S,
    cfg: Config,

    // Never held across an await.
    index: Mutex<Index>,
    loaded: AtomicBool,
    loading: AsyncMutex<()>,
}

fn blob_name(key: &[u8], slot: u8) -> Vec<u8> {
    let mut name = Vec::with_capacity(key.len() + 1);
    name.extend_from_slice(key);
    name.push(slot);
    name
}

fn encode_record(version: u64, value: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(HEADER_SIZE + value.len() + CHECKSUM_SIZE);
    record.extend_from_slice(&version.to_be_bytes());
    record.extend_from_slice(&(value.len() as u32).to_be_bytes());
    record.extend_from_slice(value);
    let checksum = crc32fast::hash(&record);
    record.extend_from_slice(&checksum.to_be_bytes());
    record
}

/// Parses a record, returning `None` if it is incomplete or corrupt.
fn decode_record(buf: &[u8]) -> Option<(u64, Vec<u8>)> {
    if buf.len() < HEADER_SIZE + CHECKSUM_SIZE {
        return None;
    }
    let (body, checksum) = buf.split_at(buf.len() - CHECKSUM_SIZE);
    let stored = u32::from_be_bytes(checksum.try_into().ok()?);
    if stored != crc32fast::hash(body) {
        return None;
    }
    let version = u64::from_be_bytes(body[..8].try_into().ok()?);
    let len = u32::from_be_bytes(body[8..HEADER_SIZE].try_into().ok()?) as usize;
    if HEADER_SIZE + len != body.len() {
        return None;
    }
    Some((version, body[HEADER_SIZE..].to_vec()))
}

impl<S: Storage> Slots<S> {
    /// Initialize a [Slots] over `storage`.
    pub fn new(storage: S, cfg: Config) -> Self {
        Self {
            storage,
            cfg,
            index: Mutex::new(Index::new()),
            loaded: AtomicBool::new(false),
            loading: AsyncMutex::new(()),
        }
    }

    /// The partition holding the records.
    pub fn partition(&self) -> &str {
        &self.cfg.partition
    }

    async fn read_slot(&self, key: &[u8], slot: u8) -> Result<Option<(u64, Vec<u8>)>, Error> {
        let (blob, len) = self
            .storage
            .open(&self.cfg.partition, &blob_name(key, slot))
            .await?;
        if len == 0 {
            return Ok(None);
        }
        let max = (HEADER_SIZE + self.cfg.max_value_size + CHECKSUM_SIZE) as u64;
        if len > max {
            warn!(key = %hex(key), slot, len, "record exceeds maximum size: ignoring");
            return Ok(None);
        }
        let buf = blob.read_at(vec![0; len as usize], 0).await?;
        let record = decode_record(&buf);
        if record.is_none() {
            debug!(key = %hex(key), slot, len, "invalid record: ignoring");
        }
        Ok(record)
    }

    fn index(&self) -> MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Index the keys already on disk (once).
    async fn load(&self) -> Result<(), Error> {
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.loading.lock().await;
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        let keys = self.keys().await?;
        debug!(partition = %self.cfg.partition, keys = keys.len(), "indexed records");
        self.index().extend(keys.into_iter().map(|key| (key, None)));
        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    /// Returns `None` if `key` has no blobs, otherwise its latest record (if already read).
    async fn lookup(&self, key: &[u8]) -> Result<Option<Option<Cursor>>, Error> {
        self.load().await?;
        Ok(self.index().get(key).copied())
    }

    /// Reads both slots, returning the latest valid record.
    async fn latest(&self, key: &[u8]) -> Result<Option<(Cursor, Vec<u8>)>, Error> {
        if self.lookup(key).await?.is_none() {
            return Ok(None);
        }
        let mut latest: Option<(Cursor, Vec<u8>)> = None;
        for slot in SLOTS {
            let Some((version, value)) = self.read_slot(key, slot).await? else {
                continue;
            };
            let newer = latest
                .as_ref()
                .map_or(true, |(cursor, _)| version > cursor.version);
            if newer {
                latest = Some((Cursor { slot, version }, value));
            }
        }
        if let Some(entry) = self.index().get_mut(key) {
            *entry = latest.as_ref().map(|(cursor, _)| *cursor);
        }
        Ok(latest)
    }

    async fn cursor(&self, key: &[u8]) -> Result<Option<Cursor>, Error> {
        match self.lookup(key).await? {
            None => Ok(None),
            Some(Some(cursor)) => Ok(Some(cursor)),
            Some(None) => Ok(self.latest(key).await?.map(|(cursor, _)| cursor)),
        }
    }

    /// Returns the latest version and value stored for `key`.
    pub async fn get(&self, key: &[u8]) -> Result<Option<(u64, Vec<u8>)>, Error> {
        Ok(self
            .latest(key)
            .await?
            .map(|(cursor, value)| (cursor.version, value)))
    }

    /// Returns the latest version stored for `key` (without reading the value if already known).
    pub async fn version(&self, key: &[u8]) -> Result<Option<u64>, Error> {
        Ok(self.cursor(key).await?.map(|cursor| cursor.version))
    }

    /// Durably store `value` as `version` of `key`.
    ///
    /// Concurrent writers of the same key must be serialized by the caller.
    pub async fn put(&self, key: &[u8], version: u64, value: &[u8]) -> Result<(), Error> {
        if value.len() > self.cfg.max_value_size {
            return Err(Error::ValueTooLarge(value.len()));
        }
        let current = self.cursor(key).await?;
        if let Some(current) = current {
            if version <= current.version {
                return Err(Error::StaleSequence {
                    current: current.version,
                    attempted: version,
                });
            }
        }

        // Overwrite the slot not holding the latest record
        let slot = current.map_or(0, |cursor| 1 - cursor.slot);
        let record = encode_record(version, value);
        let len = record.len() as u64;
        self.index().entry(key.to_vec()).or_insert(None);
        let (blob, _) = self
            .storage
            .open(&self.cfg.partition, &blob_name(key, slot))
            .await?;
        blob.write_at(record, 0).await?;
        blob.resize(len).await?;
        blob.sync().await?;

        self.index().insert(key.to_vec(), Some(Cursor { slot, version }));
        debug!(key = %hex(key), slot, version, "stored record");
        Ok(())
    }

    /// Remove every record of `key`. Removing a missing key is a no-op.
    pub async fn remove(&self, key: &[u8]) -> Result<(), Error> {
        if self.lookup(key).await?.is_none() {
            return Ok(());
        }

        // Remove the older slot first so that a crash in between never resurrects an older
        // version.
        let order = match self.cursor(key).await? {
            Some(cursor) => [1 - cursor.slot, cursor.slot],
            None => SLOTS,
        };
        self.index().remove(key);
        for slot in order {
            match self
                .storage
                .remove(&self.cfg.partition, Some(&blob_name(key, slot)))
                .await
            {
                Ok(()) => {}
                Err(err) if err.is_missing() => {}
                Err(err) => {
                    self.index().insert(key.to_vec(), None);
                    return Err(err.into());
                }
            }
        }
        debug!(key = %hex(key), "removed record");
        Ok(())
    }

    /// Number of keys tracked in memory.
    #[cfg(test)]
    fn indexed(&self) -> usize {
        self.index().len()
    }

    /// Returns every key with at least one blob in the partition.
    ///
    /// A returned key may hold no valid record (for example, if its last write never
    /// completed).
    pub async fn keys(&self) -> Result<Vec<Vec<u8>>, Error> {
        let names = match self.storage.scan(&self.cfg.partition).await {
            Ok(names) => names,
            Err(err) if err.is_missing() => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let keys: BTreeSet<Vec<u8>> = names
            .into_iter()
            .filter_map(|mut name| match name.pop() {
                Some(slot) if SLOTS.contains(&slot) => Some(name),
                _ => None,
            })
            .collect();
        Ok(keys.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratify_macros::test_traced;
    use ratify_runtime::memory;

    fn config() -> Config {
        Config {
            partition: "slots".into(),
            max_value_size: 1024,
        }
    }

    #[test_traced]
    async fn test_put_get_remove() {
        let storage = memory::Storage::default();
        let slots = Slots::new(storage, config());

        assert_eq!(slots.get(b"key").await.unwrap(), None);

        slots.put(b"key", 1, b"hello").await.unwrap();
        assert_eq!(
            slots.get(b"key").await.unwrap(),
            Some((1, b"hello".to_vec()))
        );

        slots.put(b"key", 2, b"world").await.unwrap();
        assert_eq!(
            slots.get(b"key").await.unwrap(),
            Some((2, b"world".to_vec()))
        );

        slots.remove(b"key").await.unwrap();
        assert_eq!(slots.get(b"key").await.unwrap(), None);

        // Removing again is a no-op
        slots.remove(b"key").await.unwrap();
    }

    #[test_traced]
    async fn test_stale_version_rejected() {
        let slots = Slots::new(memory::Storage::default(), config());
        slots.put(b"key", 5, b"five").await.unwrap();

        for attempted in [4, 5] {
            let err = slots.put(b"key", attempted, b"old").await.unwrap_err();
            assert!(matches!(
                err,
                Error::StaleSequence { current: 5, attempted: a } if a == attempted
            ));
        }
        assert_eq!(slots.get(b"key").await.unwrap(), Some((5, b"five".to_vec())));
    }

    #[test_traced]
    async fn test_value_too_large() {
        let slots = Slots::new(memory::Storage::default(), config());
        let value = vec![0u8; 1025];
        assert!(matches!(
            slots.put(b"key", 1, &value).await,
            Err(Error::ValueTooLarge(1025))
        ));
    }

    #[test_traced]
    async fn test_recovers_after_restart() {
        let storage = memory::Storage::default();
        {
            let slots = Slots::new(storage.clone(), config());
            slots.put(b"key", 1, b"one").await.unwrap();
            slots.put(b"key", 2, b"two").await.unwrap();
            slots.put(b"key", 3, b"three").await.unwrap();
        }

        // A fresh instance has no cache and must pick the latest slot from disk
        let slots = Slots::new(storage, config());
        assert_eq!(slots.get(b"key").await.unwrap(), Some((3, b"three".to_vec())));
        assert_eq!(slots.version(b"key").await.unwrap(), Some(3));
        slots.put(b"key", 4, b"four").await.unwrap();
        assert_eq!(slots.get(b"key").await.unwrap(), Some((4, b"four".to_vec())));
    }

    #[test_traced]
    async fn test_torn_write_keeps_previous() {
        let storage = memory::Storage::default();
        let slots = Slots::new(storage.clone(), config());
        slots.put(b"key", 1, b"committed").await.unwrap();

        // Simulate a crash halfway through writing version 2 into the other slot
        let record = encode_record(2, b"never finished");
        let (blob, _) = storage.open("slots", &blob_name(b"key", 1)).await.unwrap();
        blob.write_at(record[..record.len() / 2].to_vec(), 0)
            .await
            .unwrap();
        blob.sync().await.unwrap();

        let slots = Slots::new(storage, config());
        assert_eq!(
            slots.get(b"key").await.unwrap(),
            Some((1, b"committed".to_vec()))
        );
    }

    #[test_traced]
    async fn test_corrupt_latest_falls_back() {
        let storage = memory::Storage::default();
        let slots = Slots::new(storage.clone(), config());
        slots.put(b"key", 1, b"first").await.unwrap();
        slots.put(b"key", 2, b"second").await.unwrap();

        // Flip a bit in the latest record (slot 1)
        let (blob, len) = storage.open("slots", &blob_name(b"key", 1)).await.unwrap();
        let mut buf = blob.read_at(vec![0; len as usize], 0).await.unwrap();
        buf[HEADER_SIZE] ^= 0x01;
        blob.write_at(buf, 0).await.unwrap();
        blob.sync().await.unwrap();

        let slots = Slots::new(storage, config());
        assert_eq!(slots.get(b"key").await.unwrap(), Some((1, b"first".to_vec())));
    }

    #[test_traced]
    async fn test_unsynced_put_lost() {
        let storage = memory::Storage::default();
        let slots = Slots::new(storage.clone(), config());
        slots.put(b"key", 1, b"durable").await.unwrap();

        // Write without syncing (as if the process died before sync returned)
        let (blob, _) = storage.open("slots", &blob_name(b"key", 1)).await.unwrap();
        blob.write_at(encode_record(2, b"volatile"), 0).await.unwrap();
        drop(blob);

        let slots = Slots::new(storage, config());
        assert_eq!(slots.get(b"key").await.unwrap(), Some((1, b"durable".to_vec())));
    }

    #[test_traced]
    async fn test_keys() {
        let slots = Slots::new(memory::Storage::default(), config());
        assert!(slots.keys().await.unwrap().is_empty());

        slots.put(b"a", 1, b"1").await.unwrap();
        slots.put(b"b", 1, b"1").await.unwrap();
        slots.put(b"b", 2, b"2").await.unwrap();
        assert_eq!(slots.keys().await.unwrap(), vec![b"a".to_vec(), b"b".to_vec()]);

        slots.remove(b"a").await.unwrap();
        assert_eq!(slots.keys().await.unwrap(), vec![b"b".to_vec()]);
    }

    #[test_traced]
    async fn test_missing_keys_leave_no_trace() {
        let storage = memory::Storage::default();
        let slots = Slots::new(storage.clone(), config());

        // Reading keys that were never written creates nothing
        for i in 0..100u32 {
            let key = i.to_be_bytes();
            assert_eq!(slots.get(&key).await.unwrap(), None);
            assert_eq!(slots.version(&key).await.unwrap(), None);
            slots.remove(&key).await.unwrap();
        }
        assert!(storage.snapshot("slots").is_empty());
        assert!(slots.keys().await.unwrap().is_empty());
        assert_eq!(slots.indexed(), 0);

        // Removed keys are forgotten
        for i in 0..100u32 {
            let key = i.to_be_bytes();
            slots.put(&key, 1, b"value").await.unwrap();
            slots.remove(&key).await.unwrap();
            assert_eq!(slots.get(&key).await.unwrap(), None);
        }
        assert!(storage.snapshot("slots").is_empty());
        assert_eq!(slots.indexed(), 0);
    }

    #[test_traced]
    async fn test_indexes_existing_keys() {
        let storage = memory::Storage::default();
        {
            let slots = Slots::new(storage.clone(), config());
            slots.put(b"a", 1, b"one").await.unwrap();
            slots.put(b"b", 1, b"one").await.unwrap();
        }

        // Keys written by a previous instance are found, absent ones are not created
        let slots = Slots::new(storage.clone(), config());
        assert_eq!(slots.get(b"c").await.unwrap(), None);
        assert_eq!(slots.indexed(), 2);
        assert_eq!(slots.version(b"b").await.unwrap(), Some(1));
        slots.remove(b"a").await.unwrap();
        assert_eq!(slots.keys().await.unwrap(), vec![b"b".to_vec()]);
        assert_eq!(slots.indexed(), 1);
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let mut record = encode_record(1, b"abc");
        assert_eq!(decode_record(&record), Some((1, b"abc".to_vec())));

        // Trailing bytes after a shorter record invalidate it
        record.extend_from_slice(&[0; 3]);
        assert_eq!(decode_record(&record), None);
    }
}
