// The ordered key-value store holding the index.
//
// Key schema (keys sort lexicographically):
//
//   g:<host>:<task-id>   gzip JSON TaskSeries     history of one task
//   c:<host>:<task-id>   gzip JSON [ChildInfo]    children spawned by the task
//   s:<host>             gzip JSON SnapshotCounts per-dump task counts
//   f:<symbol>           gzip JSON FuncIndex      occurrences across hosts
//   m:hosts              plain JSON [String]      all host names
//   m:funcs              plain JSON [String]      all function symbols, sorted
//
// Values are JSON with one-character field names, gzip-compressed; the gzip
// header is self-describing so readers need no out-of-band format marker.
// The two metadata records are plain JSON.
//
// Write policy: snapshot counts and metadata are flushed before returning;
// everything else is best-effort, with task series batched 1000 records per
// apply.  The store handle is exclusive to the rebuild for its duration, and
// downstream consumers open the finished store only to read.

use crate::{ChildInfo, FuncIndex, FuncOccurrence, SnapshotCounts, TaskSeries};
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};
use std::path::Path;

const BATCH_SIZE: usize = 1000;

pub struct Store {
    db: sled::Db,
    batch: sled::Batch,
    batched: usize,
}

impl Store {
    /// Destroy any prior state at `path` and open a fresh store.  A rebuild
    /// is always a full rebuild against an empty database.

    pub fn create(path: &str) -> Result<Store> {
        if Path::new(path).exists() {
            std::fs::remove_dir_all(path)
                .with_context(|| format!("Failed to remove old database at {}", path))?;
        }
        Store::open(path)
    }

    /// Open the store at `path`.  The query commands use this directly and
    /// perform no writes.

    pub fn open(path: &str) -> Result<Store> {
        let db = sled::open(path)
            .with_context(|| format!("Failed to open database at {}", path))?;
        Ok(Store {
            db,
            batch: sled::Batch::default(),
            batched: 0,
        })
    }

    /// Queue one task time series.  Writes are batched; call `flush_batch`
    /// after the last series of a host.

    pub fn put_task_series(&mut self, host: &str, task: u64, series: &TaskSeries) -> Result<()> {
        let value = compress_json(series)?;
        self.batch.insert(format!("g:{}:{}", host, task).into_bytes(), value);
        self.batched += 1;
        if self.batched >= BATCH_SIZE {
            self.flush_batch()?;
        }
        Ok(())
    }

    /// Apply any queued bulk writes.

    pub fn flush_batch(&mut self) -> Result<()> {
        if self.batched > 0 {
            let batch = std::mem::take(&mut self.batch);
            self.db.apply_batch(batch)?;
            self.batched = 0;
        }
        Ok(())
    }

    pub fn put_children(&self, host: &str, parent: u64, children: &[ChildInfo]) -> Result<()> {
        let value = compress_json(&children)?;
        self.db.insert(format!("c:{}:{}", host, parent).into_bytes(), value)?;
        Ok(())
    }

    /// Durable: the counts record is synced before returning.

    pub fn put_snapshot_counts(&self, host: &str, counts: &SnapshotCounts) -> Result<()> {
        let value = compress_json(counts)?;
        self.db.insert(format!("s:{}", host).into_bytes(), value)?;
        self.db.flush()?;
        Ok(())
    }

    /// Read the existing index of `symbol`, if any, append the new
    /// occurrences, and write the result back.  Hosts are indexed one at a
    /// time, so the read-modify-write cycle does not race with itself.

    pub fn merge_func_index(&self, symbol: &str, occurrences: Vec<FuncOccurrence>) -> Result<()> {
        let key = format!("f:{}", symbol).into_bytes();
        let mut index = match self.db.get(&key)? {
            Some(v) => decompress_json::<FuncIndex>(&v)
                .with_context(|| format!("Bad stored index for {}", symbol))?,
            None => FuncIndex::default(),
        };
        index.occurrences.extend(occurrences);
        self.db.insert(key, compress_json(&index)?)?;
        Ok(())
    }

    /// Durable; written last, after every host has been indexed.

    pub fn put_metadata(&self, hosts: &[String], funcs: &[String]) -> Result<()> {
        self.db.insert("m:hosts", serde_json::to_vec(hosts)?)?;
        self.db.insert("m:funcs", serde_json::to_vec(funcs)?)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn task_series(&self, host: &str, task: u64) -> Result<Option<TaskSeries>> {
        self.read_compressed(&format!("g:{}:{}", host, task))
    }

    pub fn children(&self, host: &str, parent: u64) -> Result<Option<Vec<ChildInfo>>> {
        self.read_compressed(&format!("c:{}:{}", host, parent))
    }

    pub fn snapshot_counts(&self, host: &str) -> Result<Option<SnapshotCounts>> {
        self.read_compressed(&format!("s:{}", host))
    }

    pub fn func_index(&self, symbol: &str) -> Result<Option<FuncIndex>> {
        self.read_compressed(&format!("f:{}", symbol))
    }

    pub fn hosts(&self) -> Result<Vec<String>> {
        self.read_plain("m:hosts")
    }

    pub fn func_names(&self) -> Result<Vec<String>> {
        self.read_plain("m:funcs")
    }

    fn read_compressed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.db.get(key)? {
            Some(v) => Ok(Some(decompress_json(&v)?)),
            None => Ok(None),
        }
    }

    fn read_plain<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        match self.db.get(key)? {
            Some(v) => Ok(serde_json::from_slice(&v)?),
            None => Ok(T::default()),
        }
    }
}

fn compress_json<T: Serialize>(v: &T) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(v)?;
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(&json)?;
    Ok(enc.finish()?)
}

fn decompress_json<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    let mut json = Vec::new();
    GzDecoder::new(data).read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

// ---------------------------------------------------------------------------

#[cfg(test)]
use crate::StackEntry;

#[test]
fn test_store_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let path = path.to_str().unwrap();

    let mut store = Store::create(path).unwrap();

    let series = TaskSeries {
        entries: vec![StackEntry {
            timestamp: 1000,
            state: "running".to_string(),
            stack: "main.main()".to_string(),
            parent: 0,
        }],
    };
    store.put_task_series("h_8080", 7, &series).unwrap();
    store.flush_batch().unwrap();

    let children = vec![ChildInfo {
        id: 2,
        funcs: "pkg.middle -> pkg.outer".to_string(),
        first_seen: 1000,
        last_seen: 1060,
    }];
    store.put_children("h_8080", 1, &children).unwrap();

    let counts = SnapshotCounts {
        timestamps: vec![1000, 1060],
        counts: vec![1, 2],
    };
    store.put_snapshot_counts("h_8080", &counts).unwrap();

    store
        .put_metadata(&["h_8080".to_string()], &["main.main".to_string()])
        .unwrap();

    assert!(store.task_series("h_8080", 7).unwrap() == Some(series));
    assert!(store.task_series("h_8080", 8).unwrap() == None);
    assert!(store.children("h_8080", 1).unwrap() == Some(children));
    assert!(store.children("h_8080", 7).unwrap() == None);
    assert!(store.snapshot_counts("h_8080").unwrap() == Some(counts));
    assert!(store.hosts().unwrap().eq(&vec!["h_8080".to_string()]));
    assert!(store.func_names().unwrap().eq(&vec!["main.main".to_string()]));
}

#[test]
fn test_merge_func_index() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let path = path.to_str().unwrap();

    let store = Store::create(path).unwrap();

    let occ = |host: &str, task: u64| FuncOccurrence {
        host: host.to_string(),
        task,
        first_seen: 1000,
        last_seen: 1060,
    };

    store.merge_func_index("pkg.Handle", vec![occ("a_80", 1)]).unwrap();
    store
        .merge_func_index("pkg.Handle", vec![occ("b_80", 1), occ("b_80", 2)])
        .unwrap();

    let index = store.func_index("pkg.Handle").unwrap().unwrap();
    assert!(index.occurrences.len() == 3);
    assert!(index.occurrences[0].host == "a_80");
    assert!(store.func_index("pkg.Missing").unwrap() == None);
}

#[test]
fn test_create_wipes_prior_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let path = path.to_str().unwrap();

    let store = Store::create(path).unwrap();
    store
        .put_metadata(&["old-host".to_string()], &[])
        .unwrap();
    drop(store);

    let store = Store::create(path).unwrap();
    assert!(store.hosts().unwrap().is_empty());
}
