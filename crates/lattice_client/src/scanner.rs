//! The scan driver and its caller-facing scanner.
//!
//! `ScanDriver` owns one scan's entire lifecycle: locate the tablet under
//! the cursor, open a batch-fetch channel, stream size-bounded batches into
//! the row cache, cross tablet boundaries, and absorb relocations behind a
//! bounded backoff. `TableScanner` is the pull surface over it, in either
//! consumption mode.
//!
//! Driver states: `Idle → Locating → Opening → Streaming → {Retrying,
//! TabletDrained, Done} → Closed`. Relocation and reopen-in-place are the
//! same event here: any not-serving or lease-expiry signal invalidates the
//! cached tablet and re-enters `Locating`. Rows already surfaced are never
//! replayed because the resume position only ever advances.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::Stream;
use tracing::{debug, trace, warn};

use lattice_rpc::cell::{Cell, RowResult};
use lattice_rpc::scan::{Scan, ScanPosition};
use lattice_rpc::shape;
use lattice_rpc::{
    FetchBatch, OpenScanRequest, TabletDesc, TabletError, TabletLocator, TabletService,
};

use crate::cache::RowCache;
use crate::config::ClientConfig;
use crate::error::ScanError;
use crate::fetch::ScanChannel;
use crate::prefetch::PrefetchHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DriverState {
    Idle,
    Locating,
    Opening,
    Streaming,
    Retrying,
    TabletDrained,
    Done,
    Closed,
}

/// Where the next tablet lookup should probe.
#[derive(Clone, Debug)]
enum Probe {
    /// Tablet whose range contains the key.
    Containing(Bytes),
    /// Tablet owning the greatest row strictly below the key; empty key
    /// means the table's last tablet.
    Before(Bytes),
}

/// A row being reassembled from server chunks before delivery.
struct RowAssembly {
    row: Bytes,
    buffer: Vec<Cell>,
}

pub(crate) struct ScanDriver {
    scan: Scan,
    locator: Arc<dyn TabletLocator>,
    channel: ScanChannel,
    cache: RowCache,
    position: ScanPosition,
    state: DriverState,
    tablet: Option<TabletDesc>,
    pending_probe: Option<Probe>,
    assembly: Option<RowAssembly>,
    caching_rows: usize,
    max_result_bytes: u64,
    retry: crate::config::RetryConfig,
    attempts: u32,
    /// The current tablet refused the single-RPC path; use the full loop.
    small_declined: bool,
}

impl ScanDriver {
    pub(crate) fn new(
        scan: Scan,
        service: Arc<dyn TabletService>,
        locator: Arc<dyn TabletLocator>,
        config: &ClientConfig,
    ) -> Result<Self, ScanError> {
        scan.validate()
            .map_err(|err| ScanError::InvalidDescriptor(err.to_string()))?;
        let caching_rows = scan.caching_rows.unwrap_or(config.caching_rows);
        let max_result_bytes = scan.max_result_bytes.unwrap_or(config.max_result_bytes);
        let reversed = scan.reversed;
        Ok(Self {
            scan,
            locator,
            channel: ScanChannel::new(service),
            cache: RowCache::new(reversed),
            position: ScanPosition::start(),
            state: DriverState::Idle,
            tablet: None,
            pending_probe: None,
            assembly: None,
            caching_rows,
            max_result_bytes,
            retry: config.retry,
            attempts: 0,
            small_declined: false,
        })
    }

    pub(crate) fn scan(&self) -> &Scan {
        &self.scan
    }

    pub(crate) fn cached_rows(&self) -> usize {
        self.cache.len()
    }

    pub(crate) fn cache_pop(&mut self) -> Option<RowResult> {
        self.cache.pop()
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state == DriverState::Done
    }

    /// Pull one row, fetching as needed. `Ok(None)` at end of scan.
    pub(crate) async fn next(&mut self) -> Result<Option<RowResult>, ScanError> {
        loop {
            if let Some(row) = self.cache.pop() {
                return Ok(Some(row));
            }
            match self.state {
                DriverState::Done => return Ok(None),
                DriverState::Closed => return Err(ScanError::Closed),
                _ => self.fill().await?,
            }
        }
    }

    /// Drive the state machine until the cache holds at least one row or
    /// the scan finished.
    pub(crate) async fn fill(&mut self) -> Result<(), ScanError> {
        while self.cache.is_empty() {
            match self.state {
                DriverState::Done => return Ok(()),
                DriverState::Closed => return Err(ScanError::Closed),
                _ => self.step().await?,
            }
        }
        Ok(())
    }

    /// Release every resource the scan holds. Idempotent.
    pub(crate) async fn shutdown(&mut self) {
        self.channel.close().await;
        self.state = DriverState::Closed;
    }

    async fn step(&mut self) -> Result<(), ScanError> {
        match self.state {
            DriverState::Idle => {
                self.state = DriverState::Locating;
                Ok(())
            }
            DriverState::Locating => self.locate().await,
            DriverState::Opening => self.open().await,
            DriverState::Streaming => self.stream().await,
            DriverState::TabletDrained => self.advance_tablet().await,
            DriverState::Retrying | DriverState::Done | DriverState::Closed => Ok(()),
        }
    }

    async fn locate(&mut self) -> Result<(), ScanError> {
        let probe = self
            .pending_probe
            .clone()
            .unwrap_or_else(|| self.resume_probe());
        let (key, reverse) = match &probe {
            Probe::Containing(key) => (key.clone(), false),
            Probe::Before(key) => (key.clone(), true),
        };
        match self.locator.locate(&self.scan.table, &key, reverse).await {
            Ok(tablet) => {
                trace!(
                    tablet_id = tablet.tablet_id,
                    epoch = tablet.epoch,
                    "located tablet for cursor"
                );
                self.tablet = Some(tablet);
                self.small_declined = false;
                self.state = DriverState::Opening;
                Ok(())
            }
            Err(err) => self.backoff_or_fail(err).await,
        }
    }

    /// Probe for re-locating the cursor's own position (initial placement
    /// or retry). Boundary crossings use `pending_probe` instead.
    fn resume_probe(&self) -> Probe {
        if let Some(row) = &self.position.row {
            return Probe::Containing(row.clone());
        }
        match (&self.scan.start_row, self.scan.reversed) {
            (Some(start), _) => Probe::Containing(start.clone()),
            (None, false) => Probe::Containing(Bytes::new()),
            (None, true) => Probe::Before(Bytes::new()),
        }
    }

    fn open_request(&self) -> OpenScanRequest {
        OpenScanRequest {
            scan: self.scan.clone(),
            position: self.position.clone(),
            caching_rows: self.caching_rows,
            max_result_bytes: self.max_result_bytes,
        }
    }

    async fn open(&mut self) -> Result<(), ScanError> {
        let Some(tablet) = self.tablet.clone() else {
            self.state = DriverState::Locating;
            return Ok(());
        };
        if self.scan.small && !self.small_declined {
            match self.channel.small_scan(&tablet, self.open_request()).await {
                Ok(result) if result.complete => {
                    self.attempts = 0;
                    self.pending_probe = None;
                    self.process_batch(result.batch).await;
                    if self.state != DriverState::Done {
                        self.state = DriverState::TabletDrained;
                    }
                    return Ok(());
                }
                Ok(_) => {
                    trace!(tablet_id = tablet.tablet_id, "small scan declined, using scan lease");
                    self.small_declined = true;
                }
                Err(err) => return self.backoff_or_fail(err).await,
            }
        }
        match self.channel.open(&tablet, self.open_request()).await {
            Ok(()) => {
                self.pending_probe = None;
                self.state = DriverState::Streaming;
                Ok(())
            }
            Err(err) => self.backoff_or_fail(err).await,
        }
    }

    async fn stream(&mut self) -> Result<(), ScanError> {
        match self.channel.fetch().await {
            Ok(batch) => {
                self.attempts = 0;
                self.process_batch(batch).await;
                Ok(())
            }
            Err(err) => self.backoff_or_fail(err).await,
        }
    }

    /// Accept one batch: reassemble chunked rows, apply batch splitting,
    /// and advance the resume position as rows land in the cache.
    async fn process_batch(&mut self, batch: FetchBatch) {
        for chunk in batch.rows {
            if !self.scan.before_stop(chunk.row()) {
                debug!("fetch crossed the stop boundary");
                self.state = DriverState::Done;
                break;
            }
            if self.row_is_stale(chunk.row()) {
                warn!("ignoring replayed row from fetch");
                continue;
            }
            self.accept_chunk(chunk);
        }
        if self.state == DriverState::Done {
            self.channel.close().await;
            return;
        }
        if !batch.more_in_tablet {
            self.state = DriverState::TabletDrained;
            self.channel.close().await;
        }
    }

    /// A row that does not advance past the resume position was already
    /// delivered (a retried RPC can replay the tail of a batch).
    fn row_is_stale(&self, row: &[u8]) -> bool {
        match &self.position.row {
            None => false,
            Some(current) => match self.scan.row_cmp(row, current) {
                std::cmp::Ordering::Less => true,
                std::cmp::Ordering::Equal => self.position.row_done,
                std::cmp::Ordering::Greater => false,
            },
        }
    }

    fn accept_chunk(&mut self, chunk: RowResult) {
        let row = chunk.row().clone();
        let complete = !chunk.partial();

        let mut stale = None;
        match self.assembly.take() {
            Some(mut asm) if asm.row == row => {
                asm.buffer.extend(chunk.into_cells());
                self.assembly = Some(asm);
            }
            other => {
                stale = other;
                self.assembly = Some(RowAssembly {
                    row: row.clone(),
                    buffer: chunk.into_cells(),
                });
            }
        }
        if let Some(stale) = stale {
            // The server moved to a new row without finishing the old one;
            // flush what we have so no cells are lost.
            warn!("row changed mid-assembly, flushing previous row");
            self.flush_buffer(stale);
        }

        if let Some(asm) = &self.assembly {
            if let Some(last) = asm.buffer.last() {
                self.position = ScanPosition::mid_row(row.clone(), last.coord());
            }
        }
        self.drain_assembly(complete);
        if complete {
            self.assembly = None;
            self.position = ScanPosition::after_row(row);
        }
    }

    /// Move assembled cells into the cache according to the batch setting.
    fn drain_assembly(&mut self, complete: bool) {
        let Some(mut asm) = self.assembly.take() else {
            return;
        };
        match self.scan.batch {
            Some(batch) => {
                if complete {
                    while asm.buffer.len() > batch {
                        let chunk: Vec<Cell> = asm.buffer.drain(..batch).collect();
                        self.emit(RowResult::new(chunk, true));
                    }
                    if !asm.buffer.is_empty() {
                        let rest = std::mem::take(&mut asm.buffer);
                        self.emit(RowResult::new(rest, false));
                    }
                } else {
                    while asm.buffer.len() >= batch {
                        let chunk: Vec<Cell> = asm.buffer.drain(..batch).collect();
                        self.emit(RowResult::new(chunk, true));
                    }
                }
            }
            None => {
                if complete && !asm.buffer.is_empty() {
                    let cells = std::mem::take(&mut asm.buffer);
                    self.emit(RowResult::new(cells, false));
                }
            }
        }
        if !complete {
            self.assembly = Some(asm);
        }
    }

    /// Emit a row whose continuation will never arrive, as if complete.
    fn flush_buffer(&mut self, asm: RowAssembly) {
        if asm.buffer.is_empty() {
            return;
        }
        match self.scan.batch {
            Some(batch) => {
                for chunk in shape::chunk_row(asm.buffer, batch) {
                    self.emit(chunk);
                }
            }
            None => self.emit(RowResult::new(asm.buffer, false)),
        }
    }

    fn emit(&mut self, row: RowResult) {
        if !self.cache.accept(row) {
            warn!(accepted = self.cache.accepted(), "row cache refused a fetched row");
        }
    }

    /// The current tablet has no more data for this scan; either the stop
    /// boundary lives inside it (scan done) or the scan continues in the
    /// neighboring tablet.
    async fn advance_tablet(&mut self) -> Result<(), ScanError> {
        self.channel.close().await;
        let Some(tablet) = self.tablet.take() else {
            self.state = DriverState::Locating;
            return Ok(());
        };
        let done = if !self.scan.reversed {
            tablet.is_last() || !self.scan.before_stop(&tablet.end_key)
        } else {
            tablet.is_first()
                || self
                    .scan
                    .stop_row
                    .as_ref()
                    .is_some_and(|stop| tablet.start_key <= *stop)
        };
        if done {
            debug!("scan passed its stop boundary");
            self.state = DriverState::Done;
            return Ok(());
        }
        self.pending_probe = Some(if !self.scan.reversed {
            Probe::Containing(tablet.end_key.clone())
        } else {
            Probe::Before(tablet.start_key.clone())
        });
        self.state = DriverState::Locating;
        Ok(())
    }

    /// Shared recovery for locate/open/fetch failures: drop the lease,
    /// invalidate stale topology, back off, re-locate. The attempt budget
    /// spans the whole recovery, not one RPC kind.
    async fn backoff_or_fail(&mut self, err: TabletError) -> Result<(), ScanError> {
        self.channel.close().await;
        self.attempts += 1;
        warn!(error = %err, attempt = self.attempts, "scan rpc failed");
        if self.attempts >= self.retry.max_attempts {
            self.state = DriverState::Closed;
            return Err(ScanError::RetriesExhausted {
                attempts: self.attempts,
                last: err,
            });
        }
        if let Some(tablet) = &self.tablet {
            if err.invalidates_tablet() {
                self.locator.invalidate(tablet).await;
            }
        }
        self.tablet = None;
        self.state = DriverState::Retrying;
        tokio::time::sleep(self.retry.backoff_for(self.attempts - 1)).await;
        self.state = DriverState::Locating;
        Ok(())
    }
}

enum ScannerMode {
    Sync(ScanDriver),
    Prefetch(PrefetchHandle),
    Closed,
}

/// Pull iterator over one scan's rows.
///
/// Both consumption modes produce byte-identical row sequences; prefetch
/// only hides fetch latency. Call `close` when done with a scan early; it
/// releases the server-side lease and joins the prefetch task.
pub struct TableScanner {
    mode: ScannerMode,
    finished: bool,
}

impl TableScanner {
    pub(crate) fn new(driver: ScanDriver) -> Self {
        let mode = if driver.scan().async_prefetch {
            let capacity = driver.caching_rows;
            ScannerMode::Prefetch(PrefetchHandle::spawn(driver, capacity))
        } else {
            ScannerMode::Sync(driver)
        };
        Self {
            mode,
            finished: false,
        }
    }

    /// Next row in scan order; `Ok(None)` at end of scan. After an error
    /// the scan is unusable.
    pub async fn next(&mut self) -> Result<Option<RowResult>, ScanError> {
        if self.finished {
            return Ok(None);
        }
        let result = match &mut self.mode {
            ScannerMode::Sync(driver) => driver.next().await,
            ScannerMode::Prefetch(handle) => handle.next().await,
            ScannerMode::Closed => Err(ScanError::Closed),
        };
        if matches!(result, Ok(None)) {
            self.finished = true;
        }
        result
    }

    /// Pull up to `count` rows.
    pub async fn next_many(&mut self, count: usize) -> Result<Vec<RowResult>, ScanError> {
        let mut rows = Vec::with_capacity(count);
        while rows.len() < count {
            match self.next().await? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    /// Rows fetched but not yet consumed.
    pub fn buffered_rows(&self) -> usize {
        match &self.mode {
            ScannerMode::Sync(driver) => driver.cached_rows(),
            ScannerMode::Prefetch(handle) => handle.buffered(),
            ScannerMode::Closed => 0,
        }
    }

    /// Release the scan's resources. Idempotent; safe mid-scan.
    pub async fn close(&mut self) {
        match std::mem::replace(&mut self.mode, ScannerMode::Closed) {
            ScannerMode::Sync(mut driver) => driver.shutdown().await,
            ScannerMode::Prefetch(mut handle) => handle.close().await,
            ScannerMode::Closed => {}
        }
    }

    /// Consume the scanner as a row stream. The stream ends after the
    /// first error or end-of-scan.
    pub fn into_stream(self) -> impl Stream<Item = Result<RowResult, ScanError>> {
        futures_util::stream::unfold((self, false), |(mut scanner, failed)| async move {
            if failed {
                scanner.close().await;
                return None;
            }
            match scanner.next().await {
                Ok(Some(row)) => Some((Ok(row), (scanner, false))),
                Ok(None) => {
                    scanner.close().await;
                    None
                }
                Err(err) => Some((Err(err), (scanner, true))),
            }
        })
    }
}
