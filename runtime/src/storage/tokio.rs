//! Filesystem-backed [crate::Storage].
//!
//! Each partition is a directory below [Config::storage_directory] and each blob is a file named
//! by the hex encoding of its name.

use super::validate_partition_name;
use crate::Error;
use ::tokio::{fs, sync::Mutex, task};
use ratify_utils::{from_hex, hex};
use std::{fs::File, io::ErrorKind, path::PathBuf, sync::Arc};

/// Configuration for [Storage].
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory in which all partitions are stored.
    pub storage_directory: PathBuf,
}

impl Config {
    pub fn new(storage_directory: PathBuf) -> Self {
        Self { storage_directory }
    }
}

/// Filesystem storage.
#[derive(Clone)]
pub struct Storage {
    lock: Arc<Mutex<()>>,
    cfg: Config,
}

impl Storage {
    pub fn new(cfg: Config) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            cfg,
        }
    }
}

/// A file opened from [Storage].
#[derive(Clone)]
pub struct Blob {
    partition: String,
    name: Vec<u8>,
    file: Arc<File>,
}

impl crate::Storage for Storage {
    type Blob = Blob;

    async fn open(&self, partition: &str, name: &[u8]) -> Result<(Blob, u64), Error> {
        validate_partition_name(partition)?;
        let _guard = self.lock.lock().await;

        // Create the partition directory, if it does not exist
        let dir = self.cfg.storage_directory.join(partition);
        fs::create_dir_all(&dir)
            .await
            .map_err(|_| Error::PartitionCreationFailed(partition.into()))?;

        // Open the file in read-write mode, create if it does not exist
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(hex(name)))
            .await
            .map_err(|e| Error::BlobOpenFailed(partition.into(), hex(name), e))?;
        let len = file.metadata().await.map_err(|_| Error::ReadFailed)?.len();

        // Convert to a blocking std::fs::File to use positional IO
        let file = file.into_std().await;
        Ok((
            Blob {
                partition: partition.into(),
                name: name.into(),
                file: Arc::new(file),
            },
            len,
        ))
    }

    async fn remove(&self, partition: &str, name: Option<&[u8]>) -> Result<(), Error> {
        validate_partition_name(partition)?;
        let _guard = self.lock.lock().await;

        let path = self.cfg.storage_directory.join(partition);
        match name {
            Some(name) => fs::remove_file(path.join(hex(name)))
                .await
                .map_err(|_| Error::BlobMissing(partition.into(), hex(name))),
            None => fs::remove_dir_all(path)
                .await
                .map_err(|_| Error::PartitionMissing(partition.into())),
        }
    }

    async fn scan(&self, partition: &str) -> Result<Vec<Vec<u8>>, Error> {
        validate_partition_name(partition)?;
        let _guard = self.lock.lock().await;

        let path = self.cfg.storage_directory.join(partition);
        let mut entries = fs::read_dir(path)
            .await
            .map_err(|_| Error::PartitionMissing(partition.into()))?;
        let mut blobs = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|_| Error::ReadFailed)? {
            let file_type = entry.file_type().await.map_err(|_| Error::ReadFailed)?;
            if !file_type.is_file() {
                return Err(Error::PartitionCorrupt(partition.into()));
            }
            let name = entry
                .file_name()
                .to_str()
                .and_then(from_hex)
                .ok_or_else(|| Error::PartitionCorrupt(partition.into()))?;
            blobs.push(name);
        }
        Ok(blobs)
    }
}

impl crate::Blob for Blob {
    async fn read_at(&self, mut buf: Vec<u8>, offset: u64) -> Result<Vec<u8>, Error> {
        let file = self.file.clone();
        task::spawn_blocking(move || {
            #[cfg(unix)]
            {
                use std::os::unix::fs::FileExt;
                file.read_exact_at(&mut buf, offset).map_err(|e| match e.kind() {
                    ErrorKind::UnexpectedEof => Error::BlobInsufficientLength,
                    _ => Error::ReadFailed,
                })?;
            }
            #[cfg(windows)]
            {
                use std::os::windows::fs::FileExt;
                let mut read = 0;
                while read < buf.len() {
                    let n = file
                        .seek_read(&mut buf[read..], offset + read as u64)
                        .map_err(|_| Error::ReadFailed)?;
                    if n == 0 {
                        return Err(Error::BlobInsufficientLength);
                    }
                    read += n;
                }
            }
            Ok(buf)
        })
        .await
        .map_err(|_| Error::ReadFailed)?
    }

    async fn write_at(&self, buf: Vec<u8>, offset: u64) -> Result<(), Error> {
        let file = self.file.clone();
        task::spawn_blocking(move || {
            #[cfg(unix)]
            {
                use std::os::unix::fs::FileExt;
                file.write_all_at(&buf, offset)
                    .map_err(|_| Error::WriteFailed)?;
            }
            #[cfg(windows)]
            {
                use std::os::windows::fs::FileExt;
                let mut written = 0;
                while written < buf.len() {
                    let n = file
                        .seek_write(&buf[written..], offset + written as u64)
                        .map_err(|_| Error::WriteFailed)?;
                    written += n;
                }
            }
            Ok(())
        })
        .await
        .map_err(|_| Error::WriteFailed)?
    }

    async fn resize(&self, len: u64) -> Result<(), Error> {
        let file = self.file.clone();
        let partition = self.partition.clone();
        let name = self.name.clone();
        task::spawn_blocking(move || {
            file.set_len(len)
                .map_err(|e| Error::BlobResizeFailed(partition, hex(&name), e))
        })
        .await
        .map_err(|_| Error::WriteFailed)?
    }

    async fn sync(&self) -> Result<(), Error> {
        let file = self.file.clone();
        let partition = self.partition.clone();
        let name = self.name.clone();
        task::spawn_blocking(move || {
            file.sync_all()
                .map_err(|e| Error::BlobSyncFailed(partition, hex(&name), e))
        })
        .await
        .map_err(|_| Error::WriteFailed)?
    }
}
