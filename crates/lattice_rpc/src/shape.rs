//! Row-level result shaping.
//!
//! Shaping is evaluated fresh for every row while a batch is produced, and
//! the same rules serve both scans and point lookups: restrict to the
//! requested families, evaluate the qualifier filter, keep the newest
//! `max_versions` per column, then skip the per-family offset and keep up
//! to the per-family cap, in column order. Nothing carries across rows.

use bytes::Bytes;

use crate::cell::{Cell, RowResult};
use crate::scan::{Get, QualifierFilter, Scan};

/// The shaping knobs a row is produced under.
#[derive(Clone, Debug)]
pub struct RowShape<'a> {
    /// Families to keep; empty keeps all.
    pub families: &'a [Bytes],
    pub filter: Option<&'a QualifierFilter>,
    pub max_versions: u32,
    pub max_per_family: Option<usize>,
    pub offset_per_family: Option<usize>,
}

impl<'a> RowShape<'a> {
    pub fn from_scan(scan: &'a Scan) -> Self {
        Self {
            families: &scan.families,
            filter: scan.filter.as_ref(),
            max_versions: scan.max_versions,
            max_per_family: scan.max_results_per_family,
            offset_per_family: scan.row_offset_per_family,
        }
    }

    pub fn from_get(get: &'a Get) -> Self {
        Self {
            families: &get.families,
            filter: get.filter.as_ref(),
            max_versions: get.max_versions,
            max_per_family: get.max_results_per_family,
            offset_per_family: get.row_offset_per_family,
        }
    }
}

/// Shape one row's cells. Input must already be in within-row order
/// (family asc, qualifier asc, timestamp desc); output preserves it.
///
/// An offset larger than a family's surviving cells yields an empty result
/// for that family. That is intentional truncation, not an error.
pub fn shape_row(cells: &[Cell], shape: &RowShape<'_>) -> Vec<Cell> {
    let mut out = Vec::new();
    let mut family: Option<&Bytes> = None;
    let mut column: Option<(&Bytes, &Bytes)> = None;
    let mut versions = 0u32;
    let mut skipped = 0usize;
    let mut kept = 0usize;

    for cell in cells {
        if !shape.families.is_empty() && !shape.families.contains(&cell.family) {
            continue;
        }
        if let Some(filter) = shape.filter {
            if !filter.matches(&cell.qualifier) {
                continue;
            }
        }
        if family != Some(&cell.family) {
            family = Some(&cell.family);
            skipped = 0;
            kept = 0;
        }
        if column != Some((&cell.family, &cell.qualifier)) {
            column = Some((&cell.family, &cell.qualifier));
            versions = 0;
        }
        versions += 1;
        if versions > shape.max_versions {
            continue;
        }
        if skipped < shape.offset_per_family.unwrap_or(0) {
            skipped += 1;
            continue;
        }
        if let Some(max) = shape.max_per_family {
            if kept >= max {
                continue;
            }
        }
        kept += 1;
        out.push(cell.clone());
    }
    out
}

/// Split one row's cells into `batch`-sized chunks. Every chunk except the
/// row's last is flagged partial.
pub fn chunk_row(cells: Vec<Cell>, batch: usize) -> Vec<RowResult> {
    assert!(batch > 0, "batch must be at least 1 cell");
    if cells.is_empty() {
        return Vec::new();
    }
    let total = cells.len();
    let mut chunks = Vec::with_capacity(total.div_ceil(batch));
    let mut iter = cells.into_iter().peekable();
    let mut taken = 0;
    while iter.peek().is_some() {
        let chunk: Vec<Cell> = iter.by_ref().take(batch).collect();
        taken += chunk.len();
        chunks.push(RowResult::new(chunk, taken < total));
    }
    chunks
}
