//! One tablet's RPC cycle: open a lease, pull batches, release the lease.
//!
//! The channel owns at most one server-side lease at a time and guarantees
//! it is released on every exit path: explicit close, reopen against the
//! next tablet, or drop (best-effort, detached).

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::debug;

use lattice_rpc::{
    FetchBatch, OpenScanRequest, ScanLease, SmallScanResult, TabletDesc, TabletError,
    TabletService,
};

pub(crate) struct ScanChannel {
    service: Arc<dyn TabletService>,
    lease: Option<ScanLease>,
}

impl ScanChannel {
    pub(crate) fn new(service: Arc<dyn TabletService>) -> Self {
        Self {
            service,
            lease: None,
        }
    }

    /// Establish a server-side cursor on `tablet`. Any prior lease is
    /// released first so the scan never holds two cursors.
    pub(crate) async fn open(
        &mut self,
        tablet: &TabletDesc,
        request: OpenScanRequest,
    ) -> Result<(), TabletError> {
        self.close().await;
        let lease = self.service.open_scan(tablet, request).await?;
        debug!(
            tablet_id = tablet.tablet_id,
            lease_id = lease.lease_id,
            "opened scan lease"
        );
        self.lease = Some(lease);
        Ok(())
    }

    pub(crate) async fn fetch(&mut self) -> Result<FetchBatch, TabletError> {
        let lease = self
            .lease
            .as_ref()
            .ok_or_else(|| TabletError::Io("fetch without an open scan lease".to_string()))?;
        match self.service.fetch_next(lease).await {
            Ok(batch) => Ok(batch),
            Err(err) => {
                // The lease is unusable after any fetch error; drop it so a
                // retry path reopens instead of pulling on a dead cursor.
                self.lease = None;
                Err(err)
            }
        }
    }

    /// Single-RPC scan attempt; holds no lease.
    pub(crate) async fn small_scan(
        &self,
        tablet: &TabletDesc,
        request: OpenScanRequest,
    ) -> Result<SmallScanResult, TabletError> {
        self.service.small_scan(tablet, request).await
    }

    /// Release the current lease, if any. Idempotent; never fails.
    pub(crate) async fn close(&mut self) {
        if let Some(lease) = self.lease.take() {
            self.service.close_scan(lease).await;
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.lease.is_some()
    }
}

impl Drop for ScanChannel {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            let service = self.service.clone();
            // Last-resort release when a scan is dropped without close().
            if let Ok(handle) = Handle::try_current() {
                handle.spawn(async move {
                    service.close_scan(lease).await;
                });
            }
        }
    }
}
