//! Background prefetch: keep rows ready ahead of the consumer.
//!
//! One task per scan owns the driver and feeds a bounded channel sized to
//! the caching hint. The channel is the only structure the two sides
//! share: sends suspend when the consumer lags (backpressure, no
//! spinning), and a cancellation token is checked at every suspension
//! point so close is observable mid-fetch and the server-side lease is
//! still released.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use lattice_rpc::RowResult;

use crate::error::ScanError;
use crate::scanner::ScanDriver;

pub(crate) struct PrefetchHandle {
    rx: mpsc::Receiver<Result<RowResult, ScanError>>,
    task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    finished: bool,
    failed: bool,
}

impl PrefetchHandle {
    pub(crate) fn spawn(driver: ScanDriver, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(driver, tx, cancel.clone()));
        Self {
            rx,
            task: Some(task),
            cancel,
            finished: false,
            failed: false,
        }
    }

    pub(crate) async fn next(&mut self) -> Result<Option<RowResult>, ScanError> {
        if self.failed {
            return Err(ScanError::Closed);
        }
        if self.finished {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(err)) => {
                self.finished = true;
                self.failed = true;
                Err(err)
            }
            None => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    pub(crate) fn buffered(&self) -> usize {
        self.rx.len()
    }

    /// Stop the producer and join it before returning, so no fetch can
    /// outlive the scanner.
    pub(crate) async fn close(&mut self) {
        self.cancel.cancel();
        self.rx.close();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PrefetchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    mut driver: ScanDriver,
    tx: mpsc::Sender<Result<RowResult, ScanError>>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let filled = tokio::select! {
            _ = cancel.cancelled() => break,
            result = driver.fill() => result,
        };
        if let Err(err) = filled {
            let _ = tx.send(Err(err)).await;
            break;
        }
        let mut sent_any = false;
        let mut cancelled = false;
        while let Some(row) = driver.cache_pop() {
            sent_any = true;
            let send = tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                sent = tx.send(Ok(row)) => sent,
            };
            if send.is_err() {
                cancelled = true;
                break;
            }
        }
        if cancelled {
            break;
        }
        if !sent_any && driver.is_done() {
            trace!("prefetch reached end of scan");
            break;
        }
    }
    driver.shutdown().await;
}
