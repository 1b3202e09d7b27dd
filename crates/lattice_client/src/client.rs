//! Client entry point: scans and point lookups against the store.

use std::sync::Arc;

use tracing::warn;

use lattice_rpc::cell::Cell;
use lattice_rpc::{Get, RowResult, Scan, TabletError, TabletLocator, TabletService};

use crate::config::ClientConfig;
use crate::error::ScanError;
use crate::locator::CachingLocator;
use crate::scanner::{ScanDriver, TableScanner};

/// Handle to one Lattice cluster. Cheap to clone; every scan gets its own
/// driver and server-side lease, so scans never share mutable state.
#[derive(Clone)]
pub struct LatticeClient {
    service: Arc<dyn TabletService>,
    locator: Arc<CachingLocator>,
    config: ClientConfig,
}

impl LatticeClient {
    pub fn new(service: Arc<dyn TabletService>, locator: Arc<dyn TabletLocator>) -> Self {
        Self::with_config(service, locator, ClientConfig::default())
    }

    pub fn with_config(
        service: Arc<dyn TabletService>,
        locator: Arc<dyn TabletLocator>,
        config: ClientConfig,
    ) -> Self {
        Self {
            service,
            locator: Arc::new(CachingLocator::new(locator)),
            config,
        }
    }

    /// Start a scan. The descriptor is validated here; fetches begin on the
    /// first `next()` (or immediately, for a prefetching scan).
    pub fn scanner(&self, scan: Scan) -> Result<TableScanner, ScanError> {
        let driver = ScanDriver::new(
            scan,
            self.service.clone(),
            self.locator.clone() as Arc<dyn TabletLocator>,
            &self.config,
        )?;
        Ok(TableScanner::new(driver))
    }

    /// Point lookup. Shares the scan path's row shaping and its
    /// relocation-retry policy; `Ok(None)` when the row has no surviving
    /// cells.
    pub async fn get(&self, get: Get) -> Result<Option<RowResult>, ScanError> {
        get.validate()
            .map_err(|err| ScanError::InvalidDescriptor(err.to_string()))?;
        let retry = self.config.retry;
        let mut attempts = 0u32;
        loop {
            let attempt: Result<Option<RowResult>, TabletError> = async {
                let tablet = self
                    .locator
                    .locate(&get.table, &get.row, false)
                    .await?;
                match self.service.get_row(&tablet, &get).await {
                    Ok(row) => Ok(row),
                    Err(err) => {
                        if err.invalidates_tablet() {
                            self.locator.invalidate(&tablet).await;
                        }
                        Err(err)
                    }
                }
            }
            .await;
            match attempt {
                Ok(row) => return Ok(row),
                Err(err) => {
                    attempts += 1;
                    warn!(error = %err, attempt = attempts, "get rpc failed");
                    if attempts >= retry.max_attempts {
                        return Err(ScanError::RetriesExhausted {
                            attempts,
                            last: err,
                        });
                    }
                    tokio::time::sleep(retry.backoff_for(attempts - 1)).await;
                }
            }
        }
    }

    /// Run a scan to completion and return every cell in delivery order.
    pub async fn scan_cells(&self, scan: Scan) -> Result<Vec<Cell>, ScanError> {
        let mut scanner = self.scanner(scan)?;
        let mut cells = Vec::new();
        loop {
            match scanner.next().await {
                Ok(Some(row)) => cells.extend(row.into_cells()),
                Ok(None) => break,
                Err(err) => {
                    scanner.close().await;
                    return Err(err);
                }
            }
        }
        scanner.close().await;
        Ok(cells)
    }

    /// The client-side tablet cache, for inspection.
    pub fn locator(&self) -> &CachingLocator {
        &self.locator
    }
}
