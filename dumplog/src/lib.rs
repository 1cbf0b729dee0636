// This library handles a tree of task dump files.  It finds the per-host dump
// files written by the scraper, parses them, merges them into per-task time
// series, and writes the derived indices to an ordered key-value store.
//
// The tree has one directory per monitored endpoint (host:port with ':'
// replaced by '_') and one gzipped textual dump per scrape inside it.  A dump
// enumerates every live task with its stack; stacks are normalized on ingest
// so that two stacks taken moments apart compare equal whenever the code path
// is identical.
//
// The dump parser is hard-coded to the one textual format the scraper emits.
// An alternative format (say, a binary profile) would be a sibling of
// `dumpfile` producing the same `TaskMap`; everything downstream of the
// parser is format-agnostic.

mod dumpfile;
mod dumptree;
mod funcs;
mod index;
mod normalize;
mod series;
mod store;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// Compute the set of host directories and dump files below an input root.

pub use dumptree::{find_dump_files, find_hosts};

// Parse one dump file (or its decompressed text) into a map from task id to
// ParsedTask.

pub use dumpfile::{parse_dump, parse_dump_file, timestamp_from_name};

// The shared normalization and symbol-extraction pass.

pub use normalize::{entry_point_label, extract_symbol, extract_symbols, normalize_line};

// Per-host aggregation: parallel parse fan-out and the timestamp-ordered
// merge into series, children adjacency, and snapshot counts.

pub use series::{aggregate, children_index, parse_dumps, DumpSet, HostData};

// The second pass that maps every function symbol to the tasks it appeared
// in.

pub use funcs::{func_occurrences, OccurrenceMap};

// The ordered key-value store and the rebuild driver.

pub use index::rebuild;
pub use store::Store;

/// One task block parsed out of a single dump.  Ephemeral; lives only until
/// the per-host merge has consumed it.

#[derive(Debug, Clone)]
pub struct ParsedTask {
    /// Scheduler state from the block header, e.g. "running" or "IO wait".
    pub state: String,

    /// The normalized stack, one frame per line, root frame last.  This is
    /// the identity key for "same code path at this instant".
    pub stack: String,

    /// Function symbols in order of appearance, most recent call first.
    pub funcs: Vec<String>,

    /// Parent task id from the "created by ... in task N" line, 0 when the
    /// block carries no parent.
    pub parent: u64,
}

/// All tasks of one dump, keyed by task id.

pub type TaskMap = HashMap<u64, ParsedTask>;

/// One dump-occurrence of a task, as persisted inside a TaskSeries.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEntry {
    #[serde(rename = "t")]
    pub timestamp: i64,

    #[serde(rename = "s")]
    pub state: String,

    /// Normalized stack text.
    #[serde(rename = "k")]
    pub stack: String,

    /// Parent task id, omitted from the encoded form when 0.
    #[serde(rename = "c", default, skip_serializing_if = "is_zero")]
    pub parent: u64,
}

/// The history of one task: its stack entries in non-decreasing timestamp
/// order, one per dump the task appeared in.

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSeries {
    #[serde(rename = "e")]
    pub entries: Vec<StackEntry>,
}

/// All time series of one host, keyed by task id.

pub type SeriesMap = HashMap<u64, TaskSeries>;

/// One child in a parent task's children list.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildInfo {
    #[serde(rename = "i")]
    pub id: u64,

    /// Entry-point label: the child's two outermost frame symbols, showing
    /// where the task was spawned rather than what it is doing.
    #[serde(rename = "f")]
    pub funcs: String,

    #[serde(rename = "s")]
    pub first_seen: i64,

    #[serde(rename = "e")]
    pub last_seen: i64,
}

/// Per-dump task counts for one host: two parallel arrays, timestamps
/// ascending, one element per successfully parsed dump.

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCounts {
    #[serde(rename = "t")]
    pub timestamps: Vec<i64>,

    #[serde(rename = "c")]
    pub counts: Vec<u64>,
}

/// One (host, task) pair a function symbol appeared in.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuncOccurrence {
    #[serde(rename = "h")]
    pub host: String,

    #[serde(rename = "g")]
    pub task: u64,

    #[serde(rename = "f")]
    pub first_seen: i64,

    #[serde(rename = "l")]
    pub last_seen: i64,
}

/// All occurrences of one function symbol, across hosts.  At most one entry
/// per (host, task) pair; insertion order, not sorted.

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuncIndex {
    #[serde(rename = "o")]
    pub occurrences: Vec<FuncOccurrence>,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}
