//! Shared in-memory store node for integration tests.
//!
//! Implements the two collaborator contracts over a mutex-guarded table
//! map: multi-tablet tables, versioned cells with family tombstones,
//! byte/row-capped batch production, and fault injection for relocation,
//! lease expiry, and transport errors. Batches are produced with the same
//! shaping rules the client re-checks, so every observable behavior of a
//! real serving node that matters to the scan path is represented.

#![allow(dead_code)]

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use lattice_rpc::cell::{Cell, RowResult};
use lattice_rpc::scan::{Get, Scan, ScanPosition};
use lattice_rpc::shape::{shape_row, RowShape};
use lattice_rpc::{
    FetchBatch, OpenScanRequest, ScanLease, SmallScanResult, TableName, TabletDesc, TabletError,
    TabletLocator, TabletService,
};

#[derive(Clone, Copy, Debug, Default)]
pub struct ClusterStats {
    pub locates: u64,
    pub invalidations: u64,
    pub opens: u64,
    pub fetches: u64,
    pub small_scans: u64,
    pub gets: u64,
    pub closes: u64,
}

#[derive(Clone, Default)]
struct RowData {
    /// (family, qualifier, inverted timestamp) -> value; iterates in
    /// within-row order.
    cells: BTreeMap<(Bytes, Bytes, u64), Bytes>,
    /// family -> delete-versions-at-or-below timestamp.
    tombstones: HashMap<Bytes, u64>,
}

impl RowData {
    fn live_cells(&self, row: &Bytes) -> Vec<Cell> {
        let mut out = Vec::new();
        for ((family, qualifier, inv_ts), value) in &self.cells {
            let ts = u64::MAX - inv_ts;
            if let Some(dead_at) = self.tombstones.get(family) {
                if ts <= *dead_at {
                    continue;
                }
            }
            out.push(Cell {
                row: row.clone(),
                family: family.clone(),
                qualifier: qualifier.clone(),
                timestamp: ts,
                value: value.clone(),
            });
        }
        out
    }
}

struct TableData {
    tablets: Vec<TabletDesc>,
    rows: BTreeMap<Bytes, RowData>,
}

struct LeaseState {
    tablet_id: u64,
    epoch: u64,
    table: TableName,
    scan: Scan,
    caching_rows: usize,
    max_result_bytes: u64,
    position: ScanPosition,
    expired: bool,
}

#[derive(Default)]
struct ClusterState {
    tables: HashMap<TableName, TableData>,
    leases: HashMap<u64, LeaseState>,
    next_lease: u64,
    stats: ClusterStats,
    /// Respond NotServing to this many opens/small scans before serving.
    fail_opens: u32,
    /// Respond with a transport error to this many fetches.
    fail_fetches: u32,
    /// Fail this many directory lookups.
    fail_locates: u32,
}

/// In-memory cluster: storage, directory, and fault injection in one.
#[derive(Default)]
pub struct TestCluster {
    state: Mutex<ClusterState>,
}

impl TestCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with tablet boundaries at `splits`.
    pub fn create_table(&self, table: &TableName, splits: &[&[u8]]) {
        let mut state = self.state.lock().unwrap();
        let mut boundaries: Vec<Bytes> = vec![Bytes::new()];
        boundaries.extend(splits.iter().map(|s| Bytes::copy_from_slice(s)));
        boundaries.push(Bytes::new());
        let mut tablets = Vec::new();
        for (idx, pair) in boundaries.windows(2).enumerate() {
            tablets.push(TabletDesc {
                table: table.clone(),
                tablet_id: (idx as u64) + 1,
                epoch: 1,
                start_key: pair[0].clone(),
                end_key: pair[1].clone(),
                leaseholder: (idx as u64) % 3 + 1,
            });
        }
        state.tables.insert(
            table.clone(),
            TableData {
                tablets,
                rows: BTreeMap::new(),
            },
        );
    }

    pub fn put_cell(
        &self,
        table: &TableName,
        row: &[u8],
        family: &[u8],
        qualifier: &[u8],
        timestamp: u64,
        value: &[u8],
    ) {
        let mut state = self.state.lock().unwrap();
        let data = state.tables.get_mut(table).expect("unknown table");
        data.rows
            .entry(Bytes::copy_from_slice(row))
            .or_default()
            .cells
            .insert(
                (
                    Bytes::copy_from_slice(family),
                    Bytes::copy_from_slice(qualifier),
                    u64::MAX - timestamp,
                ),
                Bytes::copy_from_slice(value),
            );
    }

    /// Drop every version in `family` with a timestamp at or below `ts`.
    pub fn delete_family_before(&self, table: &TableName, row: &[u8], family: &[u8], ts: u64) {
        let mut state = self.state.lock().unwrap();
        let data = state.tables.get_mut(table).expect("unknown table");
        if let Some(row_data) = data.rows.get_mut(row) {
            let entry = row_data
                .tombstones
                .entry(Bytes::copy_from_slice(family))
                .or_insert(0);
            *entry = (*entry).max(ts);
        }
    }

    /// Close and reopen every tablet of a table: epochs bump, outstanding
    /// leases die with NotServing, cached descriptors go stale.
    pub fn reopen_tablets(&self, table: &TableName) {
        let mut state = self.state.lock().unwrap();
        let data = state.tables.get_mut(table).expect("unknown table");
        for tablet in &mut data.tablets {
            tablet.epoch += 1;
        }
    }

    /// Expire every outstanding scan lease.
    pub fn expire_leases(&self) {
        let mut state = self.state.lock().unwrap();
        for lease in state.leases.values_mut() {
            lease.expired = true;
        }
    }

    pub fn fail_next_opens(&self, count: u32) {
        self.state.lock().unwrap().fail_opens = count;
    }

    pub fn fail_next_fetches(&self, count: u32) {
        self.state.lock().unwrap().fail_fetches = count;
    }

    pub fn fail_next_locates(&self, count: u32) {
        self.state.lock().unwrap().fail_locates = count;
    }

    pub fn stats(&self) -> ClusterStats {
        self.state.lock().unwrap().stats
    }

    pub fn open_lease_count(&self) -> usize {
        self.state.lock().unwrap().leases.len()
    }

    /// Row keys a scan would visit inside one tablet, in direction order.
    fn candidate_rows(data: &TableData, tablet: &TabletDesc, scan: &Scan) -> Vec<Bytes> {
        let mut rows: Vec<Bytes> = data
            .rows
            .keys()
            .filter(|row| tablet.contains(row) && scan.includes_row(row))
            .cloned()
            .collect();
        if scan.reversed {
            rows.reverse();
        }
        rows
    }

    fn current_tablet(
        data: &TableData,
        tablet_id: u64,
        epoch: u64,
    ) -> Result<TabletDesc, TabletError> {
        let current = data
            .tablets
            .iter()
            .find(|t| t.tablet_id == tablet_id)
            .ok_or(TabletError::NotServing { tablet_id, epoch })?;
        if current.epoch != epoch {
            return Err(TabletError::NotServing {
                tablet_id,
                epoch: current.epoch,
            });
        }
        Ok(current.clone())
    }

    /// Produce one batch from `position`, honoring the byte and row caps.
    /// Returns the batch and the advanced position.
    fn produce(
        data: &TableData,
        tablet: &TabletDesc,
        scan: &Scan,
        position: &ScanPosition,
        caching_rows: usize,
        max_result_bytes: u64,
    ) -> (FetchBatch, ScanPosition) {
        let mut rows_out: Vec<RowResult> = Vec::new();
        let mut bytes_out = 0u64;
        let mut produced_rows = 0usize;
        let mut position = position.clone();

        let candidates = Self::candidate_rows(data, tablet, scan);
        for row in candidates {
            match &position.row {
                Some(current) => {
                    let ord = if scan.reversed {
                        current.cmp(&row)
                    } else {
                        row.cmp(current)
                    };
                    if ord == Ordering::Less || (ord == Ordering::Equal && position.row_done) {
                        continue;
                    }
                }
                None => {}
            }

            let shaped = shape_row(
                &data.rows[&row].live_cells(&row),
                &RowShape::from_scan(scan),
            );
            let resuming_mid_row = position.row.as_deref() == Some(row.as_ref())
                && !position.row_done;
            let mark = if resuming_mid_row {
                position.cell_mark.clone()
            } else {
                None
            };
            let cells: Vec<Cell> = shaped
                .into_iter()
                .filter(|cell| match &mark {
                    None => true,
                    Some(mark) => cell.coord().cmp_in_row(mark) == Ordering::Greater,
                })
                .collect();
            if cells.is_empty() {
                position = ScanPosition::after_row(row);
                continue;
            }

            let mut taken: Vec<Cell> = Vec::new();
            let mut cut = false;
            for cell in cells {
                let size = cell.wire_size();
                let first_of_batch = rows_out.is_empty() && taken.is_empty();
                if !first_of_batch && bytes_out + size > max_result_bytes {
                    cut = true;
                    break;
                }
                bytes_out += size;
                taken.push(cell);
            }
            if cut {
                if taken.is_empty() {
                    // The cap landed on a row boundary.
                    return (
                        FetchBatch {
                            rows: rows_out,
                            more_in_tablet: true,
                            size_bytes: bytes_out,
                        },
                        position,
                    );
                }
                let last = taken.last().expect("cells present").coord();
                position = ScanPosition::mid_row(row.clone(), last);
                rows_out.push(RowResult::new(taken, true));
                return (
                    FetchBatch {
                        rows: rows_out,
                        more_in_tablet: true,
                        size_bytes: bytes_out,
                    },
                    position,
                );
            }

            position = ScanPosition::after_row(row.clone());
            rows_out.push(RowResult::new(taken, false));
            produced_rows += 1;
            if produced_rows >= caching_rows {
                return (
                    FetchBatch {
                        rows: rows_out,
                        more_in_tablet: true,
                        size_bytes: bytes_out,
                    },
                    position,
                );
            }
        }

        (
            FetchBatch {
                rows: rows_out,
                more_in_tablet: false,
                size_bytes: bytes_out,
            },
            position,
        )
    }

    /// Exact remaining size of a scan inside one tablet, for the small-scan
    /// fit proof.
    fn remaining_bytes(data: &TableData, tablet: &TabletDesc, scan: &Scan) -> u64 {
        Self::candidate_rows(data, tablet, scan)
            .iter()
            .map(|row| {
                shape_row(
                    &data.rows[row].live_cells(row),
                    &RowShape::from_scan(scan),
                )
                .iter()
                .map(Cell::wire_size)
                .sum::<u64>()
            })
            .sum()
    }
}

#[async_trait]
impl TabletService for TestCluster {
    async fn open_scan(
        &self,
        tablet: &TabletDesc,
        request: OpenScanRequest,
    ) -> Result<ScanLease, TabletError> {
        let mut state = self.state.lock().unwrap();
        state.stats.opens += 1;
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(TabletError::NotServing {
                tablet_id: tablet.tablet_id,
                epoch: tablet.epoch,
            });
        }
        let data = state
            .tables
            .get(&tablet.table)
            .ok_or_else(|| TabletError::Io(format!("unknown table {}", tablet.table)))?;
        let current = Self::current_tablet(data, tablet.tablet_id, tablet.epoch)?;
        let lease_id = state.next_lease + 1;
        state.next_lease = lease_id;
        state.leases.insert(
            lease_id,
            LeaseState {
                tablet_id: current.tablet_id,
                epoch: current.epoch,
                table: tablet.table.clone(),
                scan: request.scan,
                caching_rows: request.caching_rows,
                max_result_bytes: request.max_result_bytes,
                position: request.position,
                expired: false,
            },
        );
        Ok(ScanLease {
            lease_id,
            tablet: current,
        })
    }

    async fn fetch_next(&self, lease: &ScanLease) -> Result<FetchBatch, TabletError> {
        let mut state = self.state.lock().unwrap();
        state.stats.fetches += 1;
        if state.fail_fetches > 0 {
            state.fail_fetches -= 1;
            return Err(TabletError::Io("injected transport failure".to_string()));
        }
        match state.leases.get(&lease.lease_id).map(|l| l.expired) {
            None => return Err(TabletError::LeaseExpired(lease.lease_id)),
            Some(true) => {
                state.leases.remove(&lease.lease_id);
                return Err(TabletError::LeaseExpired(lease.lease_id));
            }
            Some(false) => {}
        }
        let lease_state = &state.leases[&lease.lease_id];
        let table = lease_state.table.clone();
        let tablet_id = lease_state.tablet_id;
        let epoch = lease_state.epoch;
        let scan = lease_state.scan.clone();
        let position = lease_state.position.clone();
        let caching_rows = lease_state.caching_rows;
        let max_result_bytes = lease_state.max_result_bytes;

        let data = state
            .tables
            .get(&table)
            .ok_or_else(|| TabletError::Io(format!("unknown table {table}")))?;
        let tablet = Self::current_tablet(data, tablet_id, epoch)?;
        let (batch, position) = Self::produce(
            data,
            &tablet,
            &scan,
            &position,
            caching_rows,
            max_result_bytes,
        );
        state
            .leases
            .get_mut(&lease.lease_id)
            .expect("lease present")
            .position = position;
        Ok(batch)
    }

    async fn close_scan(&self, lease: ScanLease) {
        let mut state = self.state.lock().unwrap();
        state.stats.closes += 1;
        state.leases.remove(&lease.lease_id);
    }

    async fn small_scan(
        &self,
        tablet: &TabletDesc,
        request: OpenScanRequest,
    ) -> Result<SmallScanResult, TabletError> {
        let mut state = self.state.lock().unwrap();
        state.stats.small_scans += 1;
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(TabletError::NotServing {
                tablet_id: tablet.tablet_id,
                epoch: tablet.epoch,
            });
        }
        let data = state
            .tables
            .get(&tablet.table)
            .ok_or_else(|| TabletError::Io(format!("unknown table {}", tablet.table)))?;
        let current = Self::current_tablet(data, tablet.tablet_id, tablet.epoch)?;
        if Self::remaining_bytes(data, &current, &request.scan) > request.max_result_bytes {
            return Ok(SmallScanResult {
                batch: FetchBatch {
                    rows: Vec::new(),
                    more_in_tablet: true,
                    size_bytes: 0,
                },
                complete: false,
            });
        }
        let (batch, _) = Self::produce(
            data,
            &current,
            &request.scan,
            &request.position,
            usize::MAX,
            u64::MAX,
        );
        Ok(SmallScanResult {
            batch,
            complete: true,
        })
    }

    async fn get_row(
        &self,
        tablet: &TabletDesc,
        get: &Get,
    ) -> Result<Option<RowResult>, TabletError> {
        let mut state = self.state.lock().unwrap();
        state.stats.gets += 1;
        let data = state
            .tables
            .get(&tablet.table)
            .ok_or_else(|| TabletError::Io(format!("unknown table {}", tablet.table)))?;
        let current = Self::current_tablet(data, tablet.tablet_id, tablet.epoch)?;
        if !current.contains(&get.row) {
            return Err(TabletError::NotServing {
                tablet_id: current.tablet_id,
                epoch: current.epoch,
            });
        }
        let Some(row_data) = data.rows.get(&get.row) else {
            return Ok(None);
        };
        let row = Bytes::copy_from_slice(&get.row);
        let shaped = shape_row(&row_data.live_cells(&row), &RowShape::from_get(get));
        if shaped.is_empty() {
            return Ok(None);
        }
        Ok(Some(RowResult::new(shaped, false)))
    }
}

#[async_trait]
impl TabletLocator for TestCluster {
    async fn locate(
        &self,
        table: &TableName,
        key: &[u8],
        reverse: bool,
    ) -> Result<TabletDesc, TabletError> {
        let mut state = self.state.lock().unwrap();
        state.stats.locates += 1;
        if state.fail_locates > 0 {
            state.fail_locates -= 1;
            return Err(TabletError::Io("injected directory failure".to_string()));
        }
        let data = state
            .tables
            .get(table)
            .ok_or_else(|| TabletError::Io(format!("unknown table {table}")))?;
        let found = if reverse {
            if key.is_empty() {
                data.tablets.last()
            } else {
                data.tablets
                    .iter()
                    .rev()
                    .find(|t| t.start_key.as_ref() < key)
            }
        } else {
            data.tablets.iter().find(|t| t.contains(key))
        };
        found.cloned().ok_or_else(|| {
            TabletError::Io(format!("no tablet covers the probe key in {table}"))
        })
    }

    async fn invalidate(&self, _tablet: &TabletDesc) {
        let mut state = self.state.lock().unwrap();
        state.stats.invalidations += 1;
    }
}

/// Two-digit row keys "00".."<n>", the fixture layout used across tests.
pub fn numbered_row(i: usize) -> Vec<u8> {
    format!("{i:02}").into_bytes()
}

/// Qualifier names "q00".."q<n>" in lexical order.
pub fn numbered_qualifier(i: usize) -> Vec<u8> {
    format!("q{i:02}").into_bytes()
}
