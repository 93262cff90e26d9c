//! Error types for codec operations.

use thiserror::Error;

/// Error type for codec operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unexpected end of buffer")]
    EndOfBuffer,
    #[error("extra data found: {0} bytes")]
    ExtraData(usize),
    #[error("invalid length: {0}")]
    InvalidLength(usize),
    #[error("invalid varint")]
    InvalidVarint,
    #[error("invalid usize")]
    InvalidUsize,
    #[error("invalid bool")]
    InvalidBool,
    #[error("invalid enum tag: {0}")]
    InvalidEnum(u8),
    #[error("invalid data in {0}: {1}")]
    Invalid(&'static str, &'static str),
    #[error("wrapped error in {0}: {1}")]
    Wrapped(&'static str, Box<dyn std::error::Error + Send + Sync>),
}
