//! SHA-256 digests.
//!
//! # Example
//!
//! ```rust
//! use ratify_cryptography::{Hasher, Sha256};
//!
//! let mut hasher = Sha256::default();
//! hasher.update(b"hello ").update(b"world");
//! let digest = hasher.finalize();
//! assert_eq!(digest, ratify_cryptography::hash(b"hello world"));
//! ```

use crate::Hasher;
use bytes::{Buf, BufMut};
use ratify_codec::{EncodeSize, Error as CodecError, FixedSize, Read, ReadExt, Write};
use ratify_utils::hex;
use sha2::{Digest as _, Sha256 as ISha256};
use std::fmt::{Debug, Display};

const DIGEST_LENGTH: usize = 32;

/// Hashes `message` in one shot.
pub fn hash(message: &[u8]) -> Digest {
    let mut hasher = Sha256::default();
    hasher.update(message);
    hasher.finalize()
}

/// SHA-256 hasher.
#[derive(Clone, Default)]
pub struct Sha256 {
    hasher: ISha256,
}

impl Hasher for Sha256 {
    type Digest = Digest;

    fn update(&mut self, message: &[u8]) -> &mut Self {
        self.hasher.update(message);
        self
    }

    fn finalize(&mut self) -> Digest {
        let result: [u8; DIGEST_LENGTH] = self.hasher.finalize_reset().into();
        Digest(result)
    }

    fn reset(&mut self) {
        self.hasher = ISha256::new();
    }
}

/// Digest of a SHA-256 hash.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest(pub [u8; DIGEST_LENGTH]);

impl Digest {
    /// Parses a hex-encoded digest (as found in configuration files).
    pub fn from_hex(value: &str) -> Option<Self> {
        let raw = ratify_utils::from_hex_formatted(value)?;
        let raw: [u8; DIGEST_LENGTH] = raw.try_into().ok()?;
        Some(Self(raw))
    }
}

impl Write for Digest {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl Read for Digest {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self(<[u8; DIGEST_LENGTH]>::read(buf)?))
    }
}

impl FixedSize for Digest {
    const SIZE: usize = DIGEST_LENGTH;
}

impl EncodeSize for Digest {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; DIGEST_LENGTH]> for Digest {
    fn from(value: [u8; DIGEST_LENGTH]) -> Self {
        Self(value)
    }
}

impl Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}
