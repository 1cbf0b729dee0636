// Per-host aggregation.
//
// Parsing fans out over a bounded work queue: N worker threads pull file
// paths, each does its own I/O and regex work, and the parsed dumps come
// back over a results channel.  The merge itself is sequential and runs in
// timestamp order, which is what makes the per-task series come out sorted
// without a later sort pass.

use crate::dumpfile::parse_dump_file;
use crate::normalize::entry_point_label;
use crate::{ChildInfo, SeriesMap, SnapshotCounts, StackEntry, TaskMap};
use crossbeam::channel;
use log::warn;
use std::collections::HashMap;
use std::path::PathBuf;
use std::thread;

/// One successfully parsed dump: the timestamp from the file name and the
/// tasks that were live at that instant.

pub struct DumpSet {
    pub timestamp: i64,
    pub tasks: TaskMap,
}

/// The merged data of one host: a time series per task id, and one
/// (timestamp, count) pair per dump.

pub struct HostData {
    pub series: SeriesMap,
    pub counts: SnapshotCounts,
}

/// Parse all dump files of one host with `workers` parser threads.  Files
/// that cannot be parsed are logged and skipped; the rebuild continues
/// without them.  The result is sorted ascending by dump timestamp.

pub fn parse_dumps(files: &[PathBuf], workers: usize) -> Vec<DumpSet> {
    let (file_tx, file_rx) = channel::bounded::<PathBuf>(files.len());
    let (result_tx, result_rx) = channel::bounded::<DumpSet>(files.len());

    // The queue has room for every file, so queuing cannot block.
    for f in files {
        let _ = file_tx.send(f.clone());
    }
    drop(file_tx);

    thread::scope(|s| {
        for _ in 0..workers.max(1) {
            let file_rx = file_rx.clone();
            let result_tx = result_tx.clone();
            s.spawn(move || {
                for path in file_rx {
                    match parse_dump_file(&path) {
                        Ok((timestamp, tasks)) => {
                            let _ = result_tx.send(DumpSet { timestamp, tasks });
                        }
                        Err(e) => {
                            warn!("Skipping {}: {:#}", path.display(), e);
                        }
                    }
                }
            });
        }
    });
    drop(result_tx);

    let mut dumps = result_rx.iter().collect::<Vec<DumpSet>>();
    dumps.sort_by_key(|d| d.timestamp);
    dumps
}

/// Merge parsed dumps, already sorted ascending by timestamp, into per-task
/// time series and snapshot counts.
///
/// A task appearing in N dumps yields exactly N entries, in non-decreasing
/// timestamp order.  A task that disappears and then reappears with the same
/// id remains a single series with a gap; within one process lifetime the id
/// is the task's identity.

pub fn aggregate(dumps: Vec<DumpSet>) -> HostData {
    let mut series = SeriesMap::new();
    let mut counts = SnapshotCounts::default();

    for dump in dumps {
        counts.timestamps.push(dump.timestamp);
        counts.counts.push(dump.tasks.len() as u64);

        for (id, task) in dump.tasks {
            series.entry(id).or_default().entries.push(StackEntry {
                timestamp: dump.timestamp,
                state: task.state,
                stack: task.stack,
                parent: task.parent,
            });
        }
    }

    HostData { series, counts }
}

/// Build the parent -> children adjacency of one host.
///
/// The parent link is not necessarily emitted in every dump, so the scan
/// walks each series until it finds the first entry with a non-zero parent;
/// that entry's parent id is canonical and its stack yields the entry-point
/// label.  Children are sorted ascending by id so the persisted lists do not
/// depend on map iteration order or worker count.

pub fn children_index(series: &SeriesMap) -> HashMap<u64, Vec<ChildInfo>> {
    let mut children = HashMap::<u64, Vec<ChildInfo>>::new();

    for (id, s) in series {
        if s.entries.is_empty() {
            continue;
        }
        if let Some(linked) = s.entries.iter().find(|e| e.parent != 0) {
            children.entry(linked.parent).or_default().push(ChildInfo {
                id: *id,
                funcs: entry_point_label(&linked.stack),
                first_seen: s.entries[0].timestamp,
                last_seen: s.entries[s.entries.len() - 1].timestamp,
            });
        }
    }

    for list in children.values_mut() {
        list.sort_by_key(|c| c.id);
    }

    children
}

// ---------------------------------------------------------------------------

#[cfg(test)]
use crate::ParsedTask;

#[cfg(test)]
fn task(state: &str, stack: &str, parent: u64) -> ParsedTask {
    ParsedTask {
        state: state.to_string(),
        stack: stack.to_string(),
        funcs: vec![],
        parent,
    }
}

#[test]
fn test_aggregate() {
    let mut d1 = TaskMap::new();
    d1.insert(7, task("running", "main.work()\n\t/src/main.go:10", 0));
    let mut d2 = TaskMap::new();
    d2.insert(7, task("select", "main.work()\n\t/src/main.go:10", 0));
    d2.insert(9, task("running", "pkg.serve()\n\t/src/s.go:3", 7));

    let data = aggregate(vec![
        DumpSet { timestamp: 1000, tasks: d1 },
        DumpSet { timestamp: 1060, tasks: d2 },
    ]);

    assert!(data.counts.timestamps.eq(&vec![1000, 1060]));
    assert!(data.counts.counts.eq(&vec![1, 2]));

    let s7 = data.series.get(&7).unwrap();
    assert!(s7.entries.len() == 2);
    assert!(s7.entries[0].timestamp == 1000);
    assert!(s7.entries[1].timestamp == 1060);
    assert!(s7.entries[0].state == "running");
    assert!(s7.entries[1].state == "select");

    let s9 = data.series.get(&9).unwrap();
    assert!(s9.entries.len() == 1);
    assert!(s9.entries[0].parent == 7);
}

#[test]
fn test_children_index_late_parent_link() {
    // The parent link shows up only in the second dump; the scan past the
    // first entry must still find it, and the label comes from the stack of
    // the entry that carried the link.
    let mut d1 = TaskMap::new();
    d1.insert(2, task("running", "pkg.busy()\n\t/src/a.go:1", 0));
    let mut d2 = TaskMap::new();
    d2.insert(
        2,
        task(
            "select",
            "pkg.inner()\npkg.middle()\npkg.outer()\ncreated by pkg.outer",
            1,
        ),
    );

    let data = aggregate(vec![
        DumpSet { timestamp: 1000, tasks: d1 },
        DumpSet { timestamp: 1060, tasks: d2 },
    ]);
    let children = children_index(&data.series);

    assert!(children.len() == 1);
    let kids = children.get(&1).unwrap();
    assert!(kids.len() == 1);
    assert!(kids[0].id == 2);
    assert!(kids[0].funcs == "pkg.middle -> pkg.outer");
    assert!(kids[0].first_seen == 1000);
    assert!(kids[0].last_seen == 1060);
}

#[test]
fn test_children_index_sorted_by_id() {
    let mut d1 = TaskMap::new();
    for id in [5u64, 3, 9] {
        d1.insert(id, task("running", "pkg.child()\ncreated by pkg.spawn", 1));
    }
    let data = aggregate(vec![DumpSet { timestamp: 1000, tasks: d1 }]);
    let children = children_index(&data.series);

    let ids = children.get(&1).unwrap().iter().map(|c| c.id).collect::<Vec<u64>>();
    assert!(ids.eq(&vec![3, 5, 9]));
}
