//! Shared contracts for the Lattice table store client.
//!
//! This crate holds everything the scan client and the serving side have to
//! agree on: the cell/row data model, scan and get descriptors with their
//! validation rules, the row-shaping rules applied while producing batches,
//! the tablet service and locator contracts, and the admin wire protocol.
//! The API surface is intentionally small: higher layers supply a
//! `TabletService` and a `TabletLocator`, then drive scans through the
//! client crate.

pub mod admin;
pub mod cell;
pub mod scan;
pub mod service;
pub mod shape;
pub mod tablet;
pub mod wire;

pub use cell::{Cell, CellCoord, RowResult};
pub use scan::{Get, QualifierFilter, Scan, ScanPosition};
pub use service::{
    FetchBatch, OpenScanRequest, ScanLease, SmallScanResult, TabletError, TabletLocator,
    TabletService,
};
pub use tablet::{NodeId, TableName, TabletDesc};
