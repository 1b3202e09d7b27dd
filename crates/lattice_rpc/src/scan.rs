//! Scan and get descriptors.
//!
//! A `Scan` is the immutable specification of one range query: boundaries,
//! direction, shaping knobs, and RPC sizing hints. A `Get` is the
//! single-row counterpart sharing the same shaping fields. Both are built
//! with chained setters and validated once, before any RPC is issued;
//! nothing here fails at fetch time.

use std::cmp::Ordering;

use bytes::Bytes;

use crate::cell::{row_key_cmp, CellCoord};
use crate::tablet::TableName;

/// Column filter evaluated per qualifier while producing rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QualifierFilter {
    /// Keep qualifiers inside a (possibly open-ended) range.
    ColumnRange {
        min: Option<Bytes>,
        min_inclusive: bool,
        max: Option<Bytes>,
        max_inclusive: bool,
    },
    /// Keep qualifiers starting with a prefix.
    ColumnPrefix(Bytes),
}

impl QualifierFilter {
    pub fn matches(&self, qualifier: &[u8]) -> bool {
        match self {
            QualifierFilter::ColumnRange {
                min,
                min_inclusive,
                max,
                max_inclusive,
            } => {
                let lower_ok = match min {
                    None => true,
                    Some(m) => match qualifier.cmp(m) {
                        Ordering::Greater => true,
                        Ordering::Equal => *min_inclusive,
                        Ordering::Less => false,
                    },
                };
                let upper_ok = match max {
                    None => true,
                    Some(m) => match qualifier.cmp(m) {
                        Ordering::Less => true,
                        Ordering::Equal => *max_inclusive,
                        Ordering::Greater => false,
                    },
                };
                lower_ok && upper_ok
            }
            QualifierFilter::ColumnPrefix(prefix) => qualifier.starts_with(prefix),
        }
    }
}

/// Range-scan specification. Immutable once a scan starts.
#[derive(Clone, Debug)]
pub struct Scan {
    pub table: TableName,
    pub start_row: Option<Bytes>,
    pub start_inclusive: bool,
    pub stop_row: Option<Bytes>,
    pub stop_inclusive: bool,
    pub reversed: bool,
    pub filter: Option<QualifierFilter>,
    /// Families to return; empty means all families.
    pub families: Vec<Bytes>,
    /// Newest versions kept per column.
    pub max_versions: u32,
    /// Max cells per caller-visible row chunk; `None` returns whole rows.
    pub batch: Option<usize>,
    /// Rows requested per RPC. Hint only; `None` takes the client default.
    pub caching_rows: Option<usize>,
    /// Hard byte cap per RPC response; `None` takes the client default.
    pub max_result_bytes: Option<u64>,
    /// Collapse the whole scan into single-RPC round trips when possible.
    pub small: bool,
    /// Keep the row cache filled from a background task.
    pub async_prefetch: bool,
    pub max_results_per_family: Option<usize>,
    pub row_offset_per_family: Option<usize>,
}

impl Scan {
    pub fn new(table: TableName) -> Self {
        Self {
            table,
            start_row: None,
            start_inclusive: true,
            stop_row: None,
            stop_inclusive: false,
            reversed: false,
            filter: None,
            families: Vec::new(),
            max_versions: 1,
            batch: None,
            caching_rows: None,
            max_result_bytes: None,
            small: false,
            async_prefetch: false,
            max_results_per_family: None,
            row_offset_per_family: None,
        }
    }

    pub fn with_start_row(mut self, row: impl Into<Bytes>, inclusive: bool) -> Self {
        self.start_row = Some(row.into());
        self.start_inclusive = inclusive;
        self
    }

    pub fn with_stop_row(mut self, row: impl Into<Bytes>, inclusive: bool) -> Self {
        self.stop_row = Some(row.into());
        self.stop_inclusive = inclusive;
        self
    }

    pub fn reversed(mut self, reversed: bool) -> Self {
        self.reversed = reversed;
        self
    }

    pub fn filter(mut self, filter: QualifierFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn add_family(mut self, family: impl Into<Bytes>) -> Self {
        self.families.push(family.into());
        self
    }

    pub fn max_versions(mut self, versions: u32) -> Self {
        self.max_versions = versions;
        self
    }

    /// Keep every stored version of every column.
    pub fn all_versions(mut self) -> Self {
        self.max_versions = u32::MAX;
        self
    }

    pub fn batch(mut self, cells: usize) -> Self {
        self.batch = Some(cells);
        self
    }

    pub fn caching_rows(mut self, rows: usize) -> Self {
        self.caching_rows = Some(rows);
        self
    }

    pub fn max_result_bytes(mut self, bytes: u64) -> Self {
        self.max_result_bytes = Some(bytes);
        self
    }

    pub fn small(mut self, small: bool) -> Self {
        self.small = small;
        self
    }

    pub fn async_prefetch(mut self, prefetch: bool) -> Self {
        self.async_prefetch = prefetch;
        self
    }

    pub fn max_results_per_family(mut self, max: usize) -> Self {
        self.max_results_per_family = Some(max);
        self
    }

    pub fn row_offset_per_family(mut self, offset: usize) -> Self {
        self.row_offset_per_family = Some(offset);
        self
    }

    /// Reject descriptors no fetch could serve. Called once at scan start.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.max_versions > 0, "max_versions must be at least 1");
        anyhow::ensure!(self.batch != Some(0), "batch must be at least 1 cell");
        anyhow::ensure!(
            self.caching_rows != Some(0),
            "caching_rows must be at least 1 row"
        );
        anyhow::ensure!(
            self.max_result_bytes != Some(0),
            "max_result_bytes must be at least 1 byte"
        );
        anyhow::ensure!(
            !(self.small && self.batch.is_some()),
            "small scans cannot be combined with batching"
        );
        if let (Some(start), Some(stop)) = (&self.start_row, &self.stop_row) {
            let ord = row_key_cmp(start, stop, self.reversed);
            anyhow::ensure!(
                ord != Ordering::Greater,
                "start row must not come after stop row for the scan direction"
            );
        }
        Ok(())
    }

    /// Row ordering under this scan's frozen direction.
    pub fn row_cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        row_key_cmp(a, b, self.reversed)
    }

    /// Whether `row` still precedes the stop boundary in scan order.
    pub fn before_stop(&self, row: &[u8]) -> bool {
        match &self.stop_row {
            None => true,
            Some(stop) => match row_key_cmp(row, stop, self.reversed) {
                Ordering::Less => true,
                Ordering::Equal => self.stop_inclusive,
                Ordering::Greater => false,
            },
        }
    }

    /// Whether `row` is at or past the start boundary in scan order.
    pub fn past_start(&self, row: &[u8]) -> bool {
        match &self.start_row {
            None => true,
            Some(start) => match row_key_cmp(row, start, self.reversed) {
                Ordering::Greater => true,
                Ordering::Equal => self.start_inclusive,
                Ordering::Less => false,
            },
        }
    }

    /// Whether `row` is inside both boundaries.
    pub fn includes_row(&self, row: &[u8]) -> bool {
        self.past_start(row) && self.before_stop(row)
    }
}

/// Point-lookup specification. Shares the scan's row-shaping fields; its
/// results must be indistinguishable from a one-row scan over the same data.
#[derive(Clone, Debug)]
pub struct Get {
    pub table: TableName,
    pub row: Bytes,
    pub filter: Option<QualifierFilter>,
    /// Families to return; empty means all families.
    pub families: Vec<Bytes>,
    pub max_versions: u32,
    pub max_results_per_family: Option<usize>,
    pub row_offset_per_family: Option<usize>,
}

impl Get {
    pub fn new(table: TableName, row: impl Into<Bytes>) -> Self {
        Self {
            table,
            row: row.into(),
            filter: None,
            families: Vec::new(),
            max_versions: 1,
            max_results_per_family: None,
            row_offset_per_family: None,
        }
    }

    pub fn filter(mut self, filter: QualifierFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn add_family(mut self, family: impl Into<Bytes>) -> Self {
        self.families.push(family.into());
        self
    }

    pub fn max_versions(mut self, versions: u32) -> Self {
        self.max_versions = versions;
        self
    }

    pub fn max_results_per_family(mut self, max: usize) -> Self {
        self.max_results_per_family = Some(max);
        self
    }

    pub fn row_offset_per_family(mut self, offset: usize) -> Self {
        self.row_offset_per_family = Some(offset);
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.max_versions > 0, "max_versions must be at least 1");
        anyhow::ensure!(!self.row.is_empty(), "get requires a row key");
        Ok(())
    }
}

/// Resume position of a scan: the next row cells are still owed from, plus
/// an optional mid-row marker when a wide row was cut part-way through.
///
/// Owned exclusively by the scan driver and advanced only after a batch is
/// accepted into the row cache, so a retried RPC can never replay cells the
/// caller may already have seen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanPosition {
    /// Row the scan is positioned at; `None` means the descriptor's start
    /// boundary.
    pub row: Option<Bytes>,
    /// When set, `row` has been fully delivered and the scan resumes
    /// strictly past it.
    pub row_done: bool,
    /// Last cell already delivered within `row`; resumption skips every
    /// cell at or before this coordinate.
    pub cell_mark: Option<CellCoord>,
}

impl ScanPosition {
    /// Position at the descriptor's start boundary.
    pub fn start() -> Self {
        Self {
            row: None,
            row_done: false,
            cell_mark: None,
        }
    }

    /// Position strictly after a fully delivered row.
    pub fn after_row(row: Bytes) -> Self {
        Self {
            row: Some(row),
            row_done: true,
            cell_mark: None,
        }
    }

    /// Position inside a partially delivered row.
    pub fn mid_row(row: Bytes, mark: CellCoord) -> Self {
        Self {
            row: Some(row),
            row_done: false,
            cell_mark: Some(mark),
        }
    }
}
