//! Persist and retrieve crash-safe records and run checkpoints from an abstract store.
//!
//! - [slot::Slots]: keyed, versioned records that are atomically replaced on every write.
//! - [checkpoint::Store]: the durable home of suspended runs, keyed by [checkpoint::RunId].

use thiserror::Error;

pub mod checkpoint;
pub mod slot;

/// Errors that can occur when interacting with storage.
#[derive(Debug, Error)]
pub enum Error {
    #[error("runtime error: {0}")]
    Runtime(#[from] ratify_runtime::Error),
    #[error("stale sequence: current={current} attempted={attempted}")]
    StaleSequence { current: u64, attempted: u64 },
    #[error("value too large: {0} bytes")]
    ValueTooLarge(usize),
    #[error("invalid key: {0}")]
    InvalidKey(String),
}
