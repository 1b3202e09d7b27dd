//! Consumption modes: small scans, background prefetch, and their
//! equivalence with the plain pull path.

mod common;

use std::sync::Arc;

use common::{numbered_qualifier, numbered_row, TestCluster};
use lattice_client::{LatticeClient, Scan, TableName};
use lattice_rpc::cell::Cell;

const FAMILY: &[u8] = b"f";
const VALUE: &[u8] = b"testValue";

fn grid_table(
    cluster: &TestCluster,
    table: &TableName,
    rows: usize,
    families: usize,
    qualifiers: usize,
    splits: &[&[u8]],
) {
    cluster.create_table(table, splits);
    for r in 0..rows {
        for f in 0..families {
            for q in 0..qualifiers {
                cluster.put_cell(
                    table,
                    &numbered_row(r),
                    format!("f{f}").as_bytes(),
                    &numbered_qualifier(q),
                    1,
                    VALUE,
                );
            }
        }
    }
}

async fn counts(client: &LatticeClient, scan: Scan) -> (usize, usize) {
    let mut scanner = client.scanner(scan).expect("scanner");
    let mut rows = 0usize;
    let mut cells = 0usize;
    let mut chunks: Vec<lattice_rpc::RowResult> = Vec::new();
    while let Some(row) = scanner.next().await.expect("next") {
        cells += row.cells().len();
        // Chunks of one row count once.
        if chunks.last().map(|prev| prev.row() == row.row()) != Some(true) {
            rows += 1;
        }
        chunks.push(row);
    }
    scanner.close().await;
    (rows, cells)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn small_scans_are_a_pure_optimization() {
    let table = TableName::new("small_scan");
    let cluster = Arc::new(TestCluster::new());
    grid_table(&cluster, &table, 10, 1, 10, &[b"05"]);
    let client = LatticeClient::new(cluster.clone(), cluster.clone());

    for reversed in [false, true] {
        let base = Scan::new(table.clone()).reversed(reversed).small(true);
        let (rows, cells) = counts(&client, base).await;
        assert_eq!((rows, cells), (10, 100), "reversed={reversed}");
    }
    // The whole range fit every time: no lease was ever opened.
    assert_eq!(cluster.stats().opens, 0);
    assert!(cluster.stats().small_scans > 0);

    for reversed in [false, true] {
        let base = Scan::new(table.clone()).reversed(reversed).small(true);

        // A one-byte cap forces the fallback loop; results are identical.
        let (rows, cells) = counts(&client, base.clone().max_result_bytes(1)).await;
        assert_eq!((rows, cells), (10, 100), "reversed={reversed} capped");

        let (rows, cells) = counts(
            &client,
            base.clone().max_result_bytes(1).caching_rows(usize::MAX),
        )
        .await;
        assert_eq!((rows, cells), (10, 100), "reversed={reversed} capped+caching");
    }
    // The capped variants fell back to the lease loop.
    assert!(cluster.stats().opens > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn prefetch_delivers_the_same_small_data_set() {
    let table = TableName::new("prefetch_small");
    let cluster = Arc::new(TestCluster::new());
    grid_table(&cluster, &table, 2, 3, 10, &[]);
    let client = LatticeClient::new(cluster.clone(), cluster.clone());

    let cells = client
        .scan_cells(Scan::new(table.clone()).async_prefetch(true))
        .await
        .expect("prefetch scan");
    assert_eq!(cells.len(), 2 * 3 * 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn prefetch_delivers_many_rows_in_order() {
    let table = TableName::new("prefetch_many");
    let cluster = Arc::new(TestCluster::new());
    cluster.create_table(&table, &[b"1000", b"2000"]);
    let rows = 3_000usize;
    for r in 0..rows {
        cluster.put_cell(
            &table,
            format!("{r:04}").as_bytes(),
            FAMILY,
            b"q",
            1,
            VALUE,
        );
    }
    let client = LatticeClient::new(cluster.clone(), cluster.clone());

    let mut scanner = client
        .scanner(Scan::new(table.clone()).async_prefetch(true).caching_rows(64))
        .expect("scanner");
    let mut seen = 0usize;
    while let Some(row) = scanner.next().await.expect("next") {
        let key = String::from_utf8(row.row().to_vec()).expect("utf8");
        assert_eq!(key, format!("{seen:04}"));
        seen += 1;
    }
    scanner.close().await;
    assert_eq!(seen, rows);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn both_modes_yield_byte_identical_sequences() {
    let table = TableName::new("mode_equivalence");
    let cluster = Arc::new(TestCluster::new());
    grid_table(&cluster, &table, 40, 2, 5, &[b"13", b"27"]);
    let client = LatticeClient::new(cluster.clone(), cluster.clone());

    let variants = [
        Scan::new(table.clone()).caching_rows(7),
        Scan::new(table.clone()).caching_rows(7).batch(3),
        Scan::new(table.clone()).reversed(true).max_result_bytes(256),
    ];
    for scan in variants {
        let sync_cells: Vec<Cell> = client
            .scan_cells(scan.clone())
            .await
            .expect("sync scan");
        let prefetch_cells: Vec<Cell> = client
            .scan_cells(scan.clone().async_prefetch(true))
            .await
            .expect("prefetch scan");
        assert_eq!(sync_cells, prefetch_cells);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn closing_a_prefetching_scan_stops_its_task_and_lease() {
    let table = TableName::new("prefetch_close");
    let cluster = Arc::new(TestCluster::new());
    grid_table(&cluster, &table, 200, 1, 2, &[]);
    let client = LatticeClient::new(cluster.clone(), cluster.clone());

    let mut scanner = client
        .scanner(
            Scan::new(table.clone())
                .async_prefetch(true)
                .caching_rows(4),
        )
        .expect("scanner");
    scanner.next().await.expect("next").expect("row");

    // Close joins the prefetch task; afterwards nothing is left running
    // against the cluster and the lease is gone.
    scanner.close().await;
    assert_eq!(cluster.open_lease_count(), 0);
    let fetches_after_close = cluster.stats().fetches;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(cluster.stats().fetches, fetches_after_close);
}
