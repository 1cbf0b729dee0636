// The rebuild driver.
//
// A rebuild is a bulk batch job: wipe the database, index every host in
// turn, store the global metadata last.  Per-file and per-record failures
// are logged and skipped; the only fatal errors are an unusable input root
// and a database that cannot be opened.  There is no mid-rebuild recovery --
// if the process dies the operator wipes and reruns.

use crate::dumptree::{find_dump_files, find_hosts};
use crate::funcs::func_occurrences;
use crate::series::{aggregate, children_index, parse_dumps};
use crate::store::Store;
use anyhow::Result;
use log::{error, info};
use std::collections::BTreeSet;
use std::path::Path;

/// Rebuild the index at `db_path` from every host directory below
/// `input_root`, parsing dumps with `workers` threads.

pub fn rebuild(input_root: &str, db_path: &str, workers: usize) -> Result<()> {
    let mut store = Store::create(db_path)?;

    let hosts = find_hosts(input_root)?;
    info!("Found {} hosts", hosts.len());

    // Per-rebuild accumulator, threaded through the driver.  A BTreeSet so
    // the persisted function list comes out sorted.
    let mut all_funcs = BTreeSet::<String>::new();

    for host in &hosts {
        info!("Processing host {}", host);
        all_funcs.extend(index_host(&mut store, input_root, host, workers));
    }

    let funcs = all_funcs.into_iter().collect::<Vec<String>>();
    store.put_metadata(&hosts, &funcs)?;

    info!("Indexing complete, {} unique functions indexed", funcs.len());
    Ok(())
}

/// Index one host: parse its dumps, merge them, and persist the series, the
/// children adjacency, the snapshot counts, and the function occurrences.
/// Returns the function symbols seen on this host.

fn index_host(store: &mut Store, input_root: &str, host: &str, workers: usize) -> Vec<String> {
    let files = match find_dump_files(&Path::new(input_root).join(host)) {
        Ok(files) => files,
        Err(e) => {
            error!("Skipping host {}: {:#}", host, e);
            return vec![];
        }
    };

    let dumps = parse_dumps(&files, workers);
    info!("  Parsed {} of {} dumps for {}", dumps.len(), files.len(), host);

    let data = aggregate(dumps);
    let occurrences = func_occurrences(host, &data.series, workers);

    let mut written = 0;
    for (id, series) in &data.series {
        match store.put_task_series(host, *id, series) {
            Ok(()) => written += 1,
            Err(e) => error!("Failed to write series {}:{}: {:#}", host, id, e),
        }
    }
    if let Err(e) = store.flush_batch() {
        error!("Failed to apply series batch for {}: {:#}", host, e);
    }
    info!("  Wrote {} task time series for {}", written, host);

    let children = children_index(&data.series);
    for (parent, list) in &children {
        if let Err(e) = store.put_children(host, *parent, list) {
            error!("Failed to write children of {}:{}: {:#}", host, parent, e);
        }
    }
    info!("  Indexed children for {} parent tasks on {}", children.len(), host);

    if let Err(e) = store.put_snapshot_counts(host, &data.counts) {
        error!("Failed to write snapshot counts for {}: {:#}", host, e);
    }

    let mut funcs = Vec::with_capacity(occurrences.len());
    for (symbol, tasks) in occurrences {
        if let Err(e) = store.merge_func_index(&symbol, tasks.into_values().collect()) {
            error!("Failed to merge function index for {}: {:#}", symbol, e);
        }
        funcs.push(symbol);
    }
    info!("  Indexed {} functions for {}", funcs.len(), host);

    funcs
}
