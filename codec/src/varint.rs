//! Variable-length encoding of lengths.
//!
//! Each byte carries 7 bits of the value (least significant group first) and a continuation bit
//! indicating whether more bytes follow. Only `u32`-sized values are supported so that the
//! encoding does not depend on the target's pointer width.

use crate::Error;
use bytes::{Buf, BufMut};

const DATA_BITS_MASK: u8 = 0x7F;
const CONTINUATION_BIT_MASK: u8 = 0x80;

/// Maximum number of bytes a `u32` varint may occupy.
pub const MAX_SIZE: usize = 5;

/// Writes `value` to `buf`.
pub fn write(mut value: u32, buf: &mut impl BufMut) {
    loop {
        let byte = (value as u8) & DATA_BITS_MASK;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | CONTINUATION_BIT_MASK);
    }
}

/// Reads a value from `buf`, rejecting overlong or overflowing encodings.
pub fn read(buf: &mut impl Buf) -> Result<u32, Error> {
    let mut result: u32 = 0;
    for i in 0..MAX_SIZE {
        if !buf.has_remaining() {
            return Err(Error::EndOfBuffer);
        }
        let byte = buf.get_u8();
        let shift = 7 * i as u32;

        // The fifth byte may only carry the top 4 bits.
        if i == MAX_SIZE - 1 && byte > 0x0F {
            return Err(Error::InvalidVarint);
        }
        result |= ((byte & DATA_BITS_MASK) as u32) << shift;
        if byte & CONTINUATION_BIT_MASK == 0 {
            // A trailing zero group means the encoding was not minimal.
            if i > 0 && byte == 0 {
                return Err(Error::InvalidVarint);
            }
            return Ok(result);
        }
    }
    Err(Error::InvalidVarint)
}

/// Returns the number of bytes needed to encode `value`.
pub fn size(value: u32) -> usize {
    let bits = 32 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Writes a `usize` length.
///
/// Panics if `len` does not fit in a `u32`.
pub fn write_len(len: usize, buf: &mut impl BufMut) {
    let len = u32::try_from(len).expect("length exceeds u32");
    write(len, buf);
}

/// Returns the encoded size of a `usize` length.
pub fn len_size(len: usize) -> usize {
    size(u32::try_from(len).expect("length exceeds u32"))
}

/// Reads a `usize` length.
pub fn read_len(buf: &mut impl Buf) -> Result<usize, Error> {
    let len = read(buf)?;
    usize::try_from(len).map_err(|_| Error::InvalidUsize)
}
