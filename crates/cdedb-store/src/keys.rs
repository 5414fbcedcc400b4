//! Key encoding utilities.
//!
//! Integer ids are stored big-endian so that byte order equals numeric order
//! for the non-negative ids the sequences hand out.

use cdedb_core::LogEntryId;

/// Create a primary key from a raw id.
#[must_use]
pub fn id_key(id: i64) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

/// Decode a primary key.
///
/// Returns `None` if the key is not exactly 8 bytes.
#[must_use]
pub fn decode_id(key: &[u8]) -> Option<i64> {
    let bytes: [u8; 8] = key.try_into().ok()?;
    Some(i64::from_be_bytes(bytes))
}

/// Create an index key.
///
/// Format: `parent_id (8 bytes) || child_id (8 bytes)`
#[must_use]
pub fn index_key(parent: i64, child: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&parent.to_be_bytes());
    key.extend_from_slice(&child.to_be_bytes());
    key
}

/// Create a prefix for iterating all children of a parent.
#[must_use]
pub fn index_prefix(parent: i64) -> Vec<u8> {
    parent.to_be_bytes().to_vec()
}

/// Extract the child id from an index key.
///
/// Returns `None` if the key is not 16 bytes long.
#[must_use]
pub fn index_child(key: &[u8]) -> Option<i64> {
    key.get(8..16).and_then(decode_id)
}

/// Create an event log key.
///
/// Format: `event_id (8 bytes) || entry ULID (16 bytes)`; entries of one
/// event sort chronologically.
#[must_use]
pub fn event_log_key(event_id: i64, entry: &LogEntryId) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(&event_id.to_be_bytes());
    key.extend_from_slice(&entry.to_bytes());
    key
}

/// Create a finance log key.
#[must_use]
pub fn cde_log_key(entry: &LogEntryId) -> Vec<u8> {
    entry.to_bytes().to_vec()
}

/// Create a sequence key.
#[must_use]
pub fn sequence_key(name: &str) -> Vec<u8> {
    name.as_bytes().to_vec()
}
