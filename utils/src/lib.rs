//! Leverage common functionality across multiple primitives.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Converts bytes to a hexadecimal string.
pub fn hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes.iter() {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Converts a hexadecimal string to bytes.
pub fn from_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| match hex.get(i..i + 2) {
            Some(pair) => u8::from_str_radix(pair, 16).ok(),
            None => None,
        })
        .collect()
}

/// Converts a hexadecimal string to bytes, stripping whitespace and/or a `0x` prefix. Commonly used
/// in configuration files where keys are pasted by operators.
pub fn from_hex_formatted(hex: &str) -> Option<Vec<u8>> {
    let hex = hex.replace(['\t', '\n', '\r', ' '], "");
    let res = hex.strip_prefix("0x").unwrap_or(&hex);
    from_hex(res)
}

/// Concatenate a namespace and a message, prepended by a varint encoding of the namespace length.
///
/// This produces a unique byte sequence (i.e. no collisions) for each `(namespace, msg)` pair.
pub fn union_unique(namespace: &[u8], msg: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(5 + namespace.len() + msg.len());
    let mut len = namespace.len();
    loop {
        let byte = (len & 0x7f) as u8;
        len >>= 7;
        if len == 0 {
            result.push(byte);
            break;
        }
        result.push(byte | 0x80);
    }
    result.extend_from_slice(namespace);
    result.extend_from_slice(msg);
    result
}

/// Helpers for converting [SystemTime] into wire-friendly values.
pub trait SystemTimeExt {
    /// Milliseconds since the unix epoch (saturating at zero for times before the epoch).
    fn epoch_millis(&self) -> u64;

    /// Construct a [SystemTime] from milliseconds since the unix epoch.
    fn from_epoch_millis(millis: u64) -> SystemTime;
}

impl SystemTimeExt for SystemTime {
    fn epoch_millis(&self) -> u64 {
        self.duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis().min(u64::MAX as u128) as u64)
            .unwrap_or(0)
    }

    fn from_epoch_millis(millis: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(millis)
    }
}
