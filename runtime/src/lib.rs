//! Persist blobs and report telemetry for finality services.
//!
//! # Storage
//!
//! [Storage] organizes data into partitions of named [Blob]s. A blob is a byte array addressed by
//! offset; writes become durable only once [Blob::sync] returns. Two implementations are provided:
//!
//! - [memory::Storage]: keeps every blob in memory. Writes that were not synced are lost when the
//!   blob is reopened, which makes it suitable for simulating crashes in tests.
//! - [tokio::Storage]: keeps every blob in a file on disk, performing positional IO on the
//!   blocking thread pool.
//!
//! # Telemetry
//!
//! [telemetry::init] installs the process-wide `tracing` subscriber and [telemetry::status]
//! provides the label used to count outcomes in `prometheus-client` metrics.

use std::future::Future;
use std::io::Error as IoError;
use thiserror::Error;

pub mod storage;
pub use storage::{memory, tokio};
pub mod telemetry;

/// Errors that can occur when interacting with the runtime.
#[derive(Error, Debug)]
pub enum Error {
    #[error("partition name invalid, must only contain alphanumeric, dash ('-'), or underscore ('_') characters: {0}")]
    PartitionNameInvalid(String),
    #[error("partition creation failed: {0}")]
    PartitionCreationFailed(String),
    #[error("partition missing: {0}")]
    PartitionMissing(String),
    #[error("partition corrupt: {0}")]
    PartitionCorrupt(String),
    #[error("blob open failed: {0}/{1} error: {2}")]
    BlobOpenFailed(String, String, IoError),
    #[error("blob missing: {0}/{1}")]
    BlobMissing(String, String),
    #[error("blob resize failed: {0}/{1} error: {2}")]
    BlobResizeFailed(String, String, IoError),
    #[error("blob sync failed: {0}/{1} error: {2}")]
    BlobSyncFailed(String, String, IoError),
    #[error("blob insufficient length")]
    BlobInsufficientLength,
    #[error("offset overflow")]
    OffsetOverflow,
    #[error("read failed")]
    ReadFailed,
    #[error("write failed")]
    WriteFailed,
}

impl Error {
    /// Returns true if the error reports something that does not exist (which callers removing
    /// or scanning data usually treat as empty).
    pub fn is_missing(&self) -> bool {
        matches!(self, Error::PartitionMissing(_) | Error::BlobMissing(_, _))
    }
}

/// Interface to interact with storage.
///
/// To support storage implementations that enable concurrent reads and writes, blobs are
/// responsible for maintaining synchronization.
///
/// Storage can be backed by a local filesystem, cloud storage, etc.
pub trait Storage: Clone + Send + Sync + 'static {
    /// The readable/writeable storage buffer that can be opened by this Storage.
    type Blob: Blob;

    /// Open an existing blob in a given partition or create a new one, returning the blob and
    /// its length.
    ///
    /// Multiple instances of the same blob can be opened concurrently, however, writing to the
    /// same blob concurrently may lead to undefined behavior.
    fn open(
        &self,
        partition: &str,
        name: &[u8],
    ) -> impl Future<Output = Result<(Self::Blob, u64), Error>> + Send;

    /// Remove a blob from a given partition.
    ///
    /// If no `name` is provided, the entire partition is removed.
    fn remove(
        &self,
        partition: &str,
        name: Option<&[u8]>,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Return all blobs in a given partition.
    fn scan(&self, partition: &str) -> impl Future<Output = Result<Vec<Vec<u8>>, Error>> + Send;
}

/// Interface to read and write to a blob.
///
/// Cloning a blob is similar to wrapping a single file descriptor in a lock whereas opening a new
/// blob (of the same name) is similar to opening a new file descriptor.
///
/// When a blob is dropped, any unsynced changes may be discarded. Call `sync` before dropping to
/// ensure all changes are durably persisted.
pub trait Blob: Clone + Send + Sync + 'static {
    /// Fill `buf` with the bytes stored at `offset`.
    ///
    /// Only returns once the entire buffer has been filled.
    fn read_at(
        &self,
        buf: Vec<u8>,
        offset: u64,
    ) -> impl Future<Output = Result<Vec<u8>, Error>> + Send;

    /// Write `buf` to the blob at the given offset.
    fn write_at(&self, buf: Vec<u8>, offset: u64) -> impl Future<Output = Result<(), Error>> + Send;

    /// Resize the blob to the given length, truncating or zero-extending as needed.
    fn resize(&self, len: u64) -> impl Future<Output = Result<(), Error>> + Send;

    /// Ensure all pending data is durably persisted.
    fn sync(&self) -> impl Future<Output = Result<(), Error>> + Send;
}
