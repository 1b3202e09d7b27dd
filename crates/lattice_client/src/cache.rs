//! Ordered queue of fetched rows awaiting consumption.
//!
//! The cache is the bridge between fetch cadence and consumption cadence.
//! Every accepted row gets a sequence number, and acceptance enforces scan
//! order against the previously accepted row, so a batch refetched after a
//! relocation retry can never smuggle an already-delivered row back in.

use std::cmp::Ordering;
use std::collections::VecDeque;

use bytes::Bytes;
use tracing::{trace, warn};

use lattice_rpc::cell::row_key_cmp;
use lattice_rpc::RowResult;

struct CacheEntry {
    seq: u64,
    row: RowResult,
}

pub(crate) struct RowCache {
    entries: VecDeque<CacheEntry>,
    next_seq: u64,
    reversed: bool,
    last_row: Option<Bytes>,
    last_partial: bool,
}

impl RowCache {
    pub(crate) fn new(reversed: bool) -> Self {
        Self {
            entries: VecDeque::new(),
            next_seq: 0,
            reversed,
            last_row: None,
            last_partial: false,
        }
    }

    /// Accept one row in scan order. Returns false (and drops the row) when
    /// it does not advance the scan: a repeated row is only legal while the
    /// previous chunk of that row was partial.
    pub(crate) fn accept(&mut self, row: RowResult) -> bool {
        if let Some(last) = &self.last_row {
            let ord = row_key_cmp(row.row(), last, self.reversed);
            let advances = match ord {
                Ordering::Greater => true,
                Ordering::Equal => self.last_partial,
                Ordering::Less => false,
            };
            if !advances {
                warn!(seq = self.next_seq, "dropping out-of-order row from fetch");
                return false;
            }
        }
        self.last_row = Some(row.row().clone());
        self.last_partial = row.partial();
        self.entries.push_back(CacheEntry {
            seq: self.next_seq,
            row,
        });
        self.next_seq += 1;
        true
    }

    pub(crate) fn pop(&mut self) -> Option<RowResult> {
        let entry = self.entries.pop_front()?;
        trace!(seq = entry.seq, "row leaves the cache");
        Some(entry.row)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sequence number of the next accepted row.
    pub(crate) fn accepted(&self) -> u64 {
        self.next_seq
    }
}
