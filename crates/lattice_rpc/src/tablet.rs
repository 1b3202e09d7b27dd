//! Tablet descriptors: the unit of row-range ownership.
//!
//! A tablet owns a contiguous `[start_key, end_key)` slice of one table's
//! row space and is served by exactly one node at a given topology epoch.
//! The epoch increases every time ownership changes, so a descriptor a
//! client cached before a move can be recognized as stale by the server.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Logical node identifier within the cluster.
pub type NodeId = u64;

/// Table identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableName(pub String);

impl TableName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One tablet's row-range ownership at a point in time.
///
/// An empty `start_key` means the range is open below; an empty `end_key`
/// means it is open above.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TabletDesc {
    pub table: TableName,
    pub tablet_id: u64,
    /// Ownership generation; bumped on every relocation or reopen.
    pub epoch: u64,
    pub start_key: Bytes,
    pub end_key: Bytes,
    pub leaseholder: NodeId,
}

impl TabletDesc {
    /// Whether `key` falls inside this tablet's `[start_key, end_key)`.
    pub fn contains(&self, key: &[u8]) -> bool {
        key_in_range(key, &self.start_key, &self.end_key)
    }

    /// Whether the tablet's range is open above (owns the table's tail).
    pub fn is_last(&self) -> bool {
        self.end_key.is_empty()
    }

    /// Whether the tablet's range is open below (owns the table's head).
    pub fn is_first(&self) -> bool {
        self.start_key.is_empty()
    }
}

pub fn key_in_range(key: &[u8], start: &[u8], end: &[u8]) -> bool {
    let lower_ok = start.is_empty() || key >= start;
    let upper_ok = end.is_empty() || key < end;
    lower_ok && upper_ok
}
