// Second pass over the per-host time series: for every function symbol that
// appears anywhere in a task's history, emit one occurrence carrying the
// task's first-seen and last-seen timestamps.
//
// The task ids are sharded into contiguous chunks across worker threads.
// The series map is frozen before this pass starts (all parser workers have
// been joined and all inserts are done), so the workers read it through
// shared references without locking.  Symbols are re-extracted from the
// normalized stack text rather than carried through from the parser; the
// persisted entries hold only the stack, and re-extraction keeps the two
// sides in agreement.

use crate::normalize::extract_symbols;
use crate::{FuncOccurrence, SeriesMap};
use crossbeam::channel;
use std::collections::{HashMap, HashSet};
use std::thread;

/// Function symbol -> task id -> occurrence, for one host.

pub type OccurrenceMap = HashMap<String, HashMap<u64, FuncOccurrence>>;

/// Build the occurrence map of one host with `workers` threads.

pub fn func_occurrences(host: &str, series: &SeriesMap, workers: usize) -> OccurrenceMap {
    let ids = series.keys().copied().collect::<Vec<u64>>();
    if ids.is_empty() {
        return OccurrenceMap::new();
    }

    let workers = workers.max(1);
    let chunk = (ids.len() + workers - 1) / workers;
    let (tx, rx) = channel::bounded::<OccurrenceMap>(workers);

    thread::scope(|s| {
        for shard in ids.chunks(chunk) {
            let tx = tx.clone();
            s.spawn(move || {
                let mut local = OccurrenceMap::new();

                for id in shard {
                    let ts = &series[id];
                    if ts.entries.is_empty() {
                        continue;
                    }
                    let first_seen = ts.entries[0].timestamp;
                    let last_seen = ts.entries[ts.entries.len() - 1].timestamp;

                    // The set, not multiset, of symbols across the history.
                    let mut symbols = HashSet::new();
                    for entry in &ts.entries {
                        symbols.extend(extract_symbols(&entry.stack));
                    }

                    for sym in symbols {
                        local.entry(sym).or_default().insert(
                            *id,
                            FuncOccurrence {
                                host: host.to_string(),
                                task: *id,
                                first_seen,
                                last_seen,
                            },
                        );
                    }
                }

                let _ = tx.send(local);
            });
        }
    });
    drop(tx);

    // Merge the worker-local maps.  Shards are disjoint, so a (symbol, task)
    // pair cannot arrive twice; if it somehow did, the last write would win.
    let mut merged = OccurrenceMap::new();
    for local in rx {
        for (sym, tasks) in local {
            merged.entry(sym).or_default().extend(tasks);
        }
    }
    merged
}

// ---------------------------------------------------------------------------

#[cfg(test)]
use crate::{StackEntry, TaskSeries};

#[cfg(test)]
fn entry(timestamp: i64, stack: &str) -> StackEntry {
    StackEntry {
        timestamp,
        state: "running".to_string(),
        stack: stack.to_string(),
        parent: 0,
    }
}

#[test]
fn test_func_occurrences() {
    let mut series = SeriesMap::new();
    series.insert(
        1,
        TaskSeries {
            entries: vec![
                entry(1000, "pkg.read()\n\t/src/a.go:1\nmain.main()"),
                entry(1060, "pkg.write()\n\t/src/a.go:9\nmain.main()"),
            ],
        },
    );
    series.insert(
        2,
        TaskSeries { entries: vec![entry(1060, "pkg.read()\n\t/src/a.go:1")] },
    );

    // More workers than tasks: the chunking must still cover every id.
    let occ = func_occurrences("h_8080", &series, 4);

    let read = occ.get("pkg.read").unwrap();
    assert!(read.len() == 2);
    assert!(read.get(&1).unwrap().first_seen == 1000);
    assert!(read.get(&1).unwrap().last_seen == 1060);
    assert!(read.get(&2).unwrap().first_seen == 1060);
    assert!(read.get(&2).unwrap().host == "h_8080");

    // pkg.write appears only in the second entry of task 1, but the
    // occurrence still spans the task's whole lifetime.
    let write = occ.get("pkg.write").unwrap();
    assert!(write.len() == 1);
    assert!(write.get(&1).unwrap().first_seen == 1000);
    assert!(write.get(&1).unwrap().last_seen == 1060);

    let main = occ.get("main.main").unwrap();
    assert!(main.len() == 1);
}
