//! Key encodings for the fjall partitions
//!
//! Event numbers and position counters are stored as big-endian u64 so that
//! lexicographic key order equals numeric order.

use conduit_store::{Result, StoreError};

/// Key of the log index counter in the meta partition
pub(crate) const INDEX_KEY: &[u8] = b"index";

/// Encode an event number or position counter as a partition key
pub(crate) fn number_key(number: u64) -> [u8; 8] {
    number.to_be_bytes()
}

/// Decode a big-endian u64 key or counter value
pub(crate) fn decode_number(bytes: &[u8]) -> Result<u64> {
    if bytes.len() != 8 {
        return Err(StoreError::Corruption(format!(
            "expected 8 bytes for event number, got {}",
            bytes.len()
        )));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(buf))
}

/// Key of a per-stream position counter in the meta partition
pub(crate) fn stream_position_key(stream_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(9 + stream_id.len());
    key.extend_from_slice(b"position:");
    key.extend_from_slice(stream_id.as_bytes());
    key
}
