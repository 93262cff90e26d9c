//! Serialize structured data.
//!
//! # Overview
//!
//! A binary serialization library designed to efficiently and safely:
//! - Serialize structured data into a canonical binary format
//! - Deserialize untrusted binary input into structured data
//!
//! # Supported Types
//!
//! Natively supports:
//! - Primitives: `u8`, `u16`, `u32`, `u64`, `i64`, `bool`
//! - Byte strings: `Bytes`, `String`, and fixed-size arrays `[u8; N]`
//! - Collections: `Vec<T>`, `BTreeSet<T>`, `BTreeMap<K, V>`, `Option<T>`, tuples
//!
//! Every variable-length value is prefixed by a varint length and every read of a variable-length
//! value is bounded by a [RangeCfg], supplied through the reader's associated `Cfg`.
//!
//! # Example
//!
//! ```
//! use bytes::{Buf, BufMut};
//! use ratify_codec::{Decode, Encode, EncodeSize, Error, RangeCfg, Read, ReadExt, Write};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Item {
//!     id: u64,
//!     tags: Vec<u8>,
//! }
//!
//! impl Write for Item {
//!     fn write(&self, buf: &mut impl BufMut) {
//!         self.id.write(buf);
//!         self.tags.write(buf);
//!     }
//! }
//!
//! impl EncodeSize for Item {
//!     fn encode_size(&self) -> usize {
//!         self.id.encode_size() + self.tags.encode_size()
//!     }
//! }
//!
//! impl Read for Item {
//!     type Cfg = RangeCfg;
//!
//!     fn read_cfg(buf: &mut impl Buf, max_tags: &RangeCfg) -> Result<Self, Error> {
//!         let id = u64::read(buf)?;
//!         let tags = Vec::<u8>::read_cfg(buf, &(*max_tags, ()))?;
//!         Ok(Self { id, tags })
//!     }
//! }
//!
//! let item = Item { id: 7, tags: vec![1, 2] };
//! let encoded = item.encode();
//! let decoded = Item::decode_cfg(encoded, &(..=8).into()).unwrap();
//! assert_eq!(item, decoded);
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod types;
pub mod varint;

pub use codec::{
    at_least, Codec, Decode, DecodeExt, Encode, EncodeSize, FixedSize, Read, ReadExt, Write,
};
pub use config::RangeCfg;
pub use error::Error;
