//! Collaborator contracts for the scan and lookup paths.
//!
//! `TabletService` is one serving node's batch-fetch surface: open a
//! lease-backed server-side cursor, pull size-bounded batches, close the
//! lease. `TabletLocator` is the cluster directory resolving row keys to
//! tablets. Both are advisory about topology: a fetch may be told
//! `NotServing` immediately after a fresh lookup, and the caller is
//! expected to invalidate and re-locate.

use async_trait::async_trait;
use thiserror::Error;

use crate::cell::RowResult;
use crate::scan::{Get, Scan, ScanPosition};
use crate::tablet::{TableName, TabletDesc};

/// Errors a serving node or the directory can report.
///
/// Every variant is retryable from the client's point of view; retries are
/// bounded and surfacing past the bound is the caller's concern.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TabletError {
    /// The addressed node no longer owns the tablet (moved, reopened, or
    /// the cached descriptor's epoch is stale).
    #[error("tablet {tablet_id} not serving at epoch {epoch}")]
    NotServing { tablet_id: u64, epoch: u64 },
    /// The server-side scan lease timed out and was reclaimed.
    #[error("scan lease {0} expired")]
    LeaseExpired(u64),
    /// Transport-level failure.
    #[error("io failure: {0}")]
    Io(String),
}

impl TabletError {
    /// Whether the cached tablet descriptor must be dropped before retry.
    pub fn invalidates_tablet(&self) -> bool {
        matches!(
            self,
            TabletError::NotServing { .. } | TabletError::LeaseExpired(_)
        )
    }
}

/// Server-side cursor handle. Lease-backed and collaborator-owned; the
/// client must close it on every exit path.
#[derive(Clone, Debug)]
pub struct ScanLease {
    pub lease_id: u64,
    pub tablet: TabletDesc,
}

/// Everything a node needs to establish (or single-shot serve) a scan
/// cursor: the descriptor, the resume position, and the resolved sizing
/// caps (client defaults already applied).
#[derive(Clone, Debug)]
pub struct OpenScanRequest {
    pub scan: Scan,
    pub position: ScanPosition,
    /// Rows per response. Hint; the byte cap wins.
    pub caching_rows: usize,
    /// Hard byte cap per response.
    pub max_result_bytes: u64,
}

/// One response's worth of rows.
#[derive(Clone, Debug)]
pub struct FetchBatch {
    /// Rows in scan order. The last row may be flagged partial when the
    /// byte cap cut it mid-row.
    pub rows: Vec<RowResult>,
    /// More data remains inside this tablet's range.
    pub more_in_tablet: bool,
    /// Serialized size the node accounted for this response.
    pub size_bytes: u64,
}

/// Outcome of a single-RPC small scan attempt.
#[derive(Clone, Debug)]
pub struct SmallScanResult {
    pub batch: FetchBatch,
    /// True when the node proved the whole remaining range fit the byte
    /// cap and `batch` covers it; false means the caller must fall back to
    /// the open/fetch/close loop.
    pub complete: bool,
}

/// One serving node's scan and lookup surface.
#[async_trait]
pub trait TabletService: Send + Sync + 'static {
    /// Establish a server-side cursor over `tablet` for the request's scan,
    /// starting at its resume position.
    async fn open_scan(
        &self,
        tablet: &TabletDesc,
        request: OpenScanRequest,
    ) -> Result<ScanLease, TabletError>;

    /// Produce the next size-bounded batch: the node fills the response
    /// until the byte cap is reached, `caching_rows` rows are produced, or
    /// the tablet range is exhausted, whichever comes first.
    async fn fetch_next(&self, lease: &ScanLease) -> Result<FetchBatch, TabletError>;

    /// Release the server-side cursor. Idempotent and best-effort; never
    /// fails observably.
    async fn close_scan(&self, lease: ScanLease);

    /// Single-RPC scan of the remaining range, when the node can prove it
    /// fits the byte cap. Pure optimization: identical rows and cells to
    /// the open/fetch/close loop.
    async fn small_scan(
        &self,
        tablet: &TabletDesc,
        request: OpenScanRequest,
    ) -> Result<SmallScanResult, TabletError>;

    /// Point lookup, shaped by the get's row-level rules. `None` when the
    /// row has no surviving cells.
    async fn get_row(&self, tablet: &TabletDesc, get: &Get)
        -> Result<Option<RowResult>, TabletError>;
}

/// Cluster directory resolving row keys to tablet ownership.
#[async_trait]
pub trait TabletLocator: Send + Sync + 'static {
    /// Resolve the tablet for `key`. With `reverse` false this is the
    /// tablet whose range contains `key`; with `reverse` true it is the
    /// tablet owning the greatest row strictly below `key`, where an empty
    /// `key` means the table's last tablet.
    async fn locate(
        &self,
        table: &TableName,
        key: &[u8],
        reverse: bool,
    ) -> Result<TabletDesc, TabletError>;

    /// Drop any cached state for a descriptor observed to be stale. Must
    /// be called before re-locating, or a stale answer can loop forever.
    async fn invalidate(&self, tablet: &TabletDesc);
}
