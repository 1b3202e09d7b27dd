//! Cell-level data model shared by the scan client and the serving side.
//!
//! A cell is the versioned unit of storage: `(row, family, qualifier,
//! timestamp, value)`. Rows surface to callers as `RowResult`, an ordered,
//! non-empty run of cells sharing one row key.

use std::cmp::Ordering;

use bytes::Bytes;

/// One versioned column value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cell {
    pub row: Bytes,
    pub family: Bytes,
    pub qualifier: Bytes,
    /// Version timestamp; higher is newer.
    pub timestamp: u64,
    pub value: Bytes,
}

impl Cell {
    pub fn new(
        row: impl Into<Bytes>,
        family: impl Into<Bytes>,
        qualifier: impl Into<Bytes>,
        timestamp: u64,
        value: impl Into<Bytes>,
    ) -> Self {
        Self {
            row: row.into(),
            family: family.into(),
            qualifier: qualifier.into(),
            timestamp,
            value: value.into(),
        }
    }

    /// Within-row coordinate of this cell, used for mid-row resumption.
    pub fn coord(&self) -> CellCoord {
        CellCoord {
            family: self.family.clone(),
            qualifier: self.qualifier.clone(),
            timestamp: self.timestamp,
        }
    }

    /// Serialized footprint used when enforcing response byte caps.
    pub fn wire_size(&self) -> u64 {
        (self.row.len() + self.family.len() + self.qualifier.len() + self.value.len()) as u64 + 8
    }
}

/// Position of a cell inside its row: family asc, qualifier asc, newest
/// timestamp first. Row key is deliberately absent; coordinates only make
/// sense relative to one row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellCoord {
    pub family: Bytes,
    pub qualifier: Bytes,
    pub timestamp: u64,
}

impl CellCoord {
    /// Within-row ordering: family asc, qualifier asc, timestamp desc.
    pub fn cmp_in_row(&self, other: &CellCoord) -> Ordering {
        self.family
            .cmp(&other.family)
            .then_with(|| self.qualifier.cmp(&other.qualifier))
            .then_with(|| other.timestamp.cmp(&self.timestamp))
    }
}

/// Compare two row keys in scan order (descending when `reversed`).
pub fn row_key_cmp(a: &[u8], b: &[u8], reversed: bool) -> Ordering {
    if reversed {
        b.cmp(a)
    } else {
        a.cmp(b)
    }
}

/// Full cell ordering for one scan direction: row per direction, then the
/// within-row order.
pub fn cell_cmp(a: &Cell, b: &Cell, reversed: bool) -> Ordering {
    row_key_cmp(&a.row, &b.row, reversed).then_with(|| a.coord().cmp_in_row(&b.coord()))
}

/// An ordered, non-empty run of cells sharing one row key.
///
/// `partial` is set when the row was cut by a response byte cap or split by
/// the scan's `batch` setting; it is an explicit flag, never inferred from
/// cell counts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowResult {
    cells: Vec<Cell>,
    partial: bool,
}

impl RowResult {
    /// Build a result row. All cells must share one row key.
    pub fn new(cells: Vec<Cell>, partial: bool) -> Self {
        assert!(!cells.is_empty(), "result row requires at least one cell");
        debug_assert!(cells.iter().all(|c| c.row == cells[0].row));
        Self { cells, partial }
    }

    pub fn row(&self) -> &Bytes {
        &self.cells[0].row
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn into_cells(self) -> Vec<Cell> {
        self.cells
    }

    pub fn partial(&self) -> bool {
        self.partial
    }

    /// Total wire footprint of the row's cells.
    pub fn wire_size(&self) -> u64 {
        self.cells.iter().map(Cell::wire_size).sum()
    }

    /// First value stored under `family:qualifier`, newest version.
    pub fn value(&self, family: &[u8], qualifier: &[u8]) -> Option<&Bytes> {
        self.cells
            .iter()
            .find(|c| c.family == family && c.qualifier == qualifier)
            .map(|c| &c.value)
    }

    /// Append the cells of a continuation chunk for the same row.
    pub fn extend_from(&mut self, chunk: RowResult) {
        debug_assert_eq!(self.row(), chunk.row());
        self.partial = chunk.partial;
        self.cells.extend(chunk.cells);
    }
}
