// Parser for a single compressed task dump file.
//
// A dump is a concatenation of per-task blocks.  Each block starts with a
// header line of the form
//
//     task <decimal-id> [<state>[, <N> minutes]]:
//
// and continues with pairs of symbol and location lines; a line of the form
// `created by <symbol> in task <N>` near the block end names the parent
// task.  Stage A locates every header with one regex scan and slices the
// text between consecutive header starts; stage B walks the lines of each
// block, extracts the parent id, normalizes each line, and collects function
// symbols.
//
// The parse is a pure function of the file bytes.  I/O failures, corrupt
// gzip streams, and unparseable file-name timestamps are per-file errors the
// caller logs and skips; a block whose header does not parse is dropped
// while the remaining blocks of the same file still produce results.

use crate::dumptree::DUMP_SUFFIX;
use crate::normalize::{extract_symbol, normalize_line};
use crate::{ParsedTask, TaskMap};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use flate2::read::GzDecoder;
use lazy_static::lazy_static;
use regex::Regex;
use std::fs::File;
use std::io::Read;
use std::path::Path;

lazy_static! {
    static ref HEADER_RE: Regex = Regex::new(r"(?m)^task (\d+) \[([^\],]+)").unwrap();
    static ref IN_TASK_RE: Regex = Regex::new(r"in task (\d+)\s*$").unwrap();
}

/// Extract the dump timestamp from a file name of the form
/// `<YYYY-MM-DDTHH-MM-SS>.dump.gz`.  The timestamp is the scrape instant in
/// UTC with colons replaced by dashes.  Returns None if the name does not
/// have that shape.

pub fn timestamp_from_name(path: &Path) -> Option<i64> {
    let base = path.file_name()?.to_str()?;
    let stem = base.strip_suffix(DUMP_SUFFIX)?;
    let t = NaiveDateTime::parse_from_str(stem, "%Y-%m-%dT%H-%M-%S").ok()?;
    Some(t.and_utc().timestamp())
}

/// Read, decompress, and parse one dump file.  Returns the dump timestamp
/// and the parsed task map.

pub fn parse_dump_file(path: &Path) -> Result<(i64, TaskMap)> {
    let timestamp = timestamp_from_name(path)
        .ok_or_else(|| anyhow!("Bad timestamp in file name {}", path.display()))?;

    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut text = String::new();
    GzDecoder::new(file)
        .read_to_string(&mut text)
        .with_context(|| format!("Failed to decompress {}", path.display()))?;

    Ok((timestamp, parse_dump(&text)))
}

/// Parse the text of one dump into a map from task id to ParsedTask.  If the
/// same id appears twice the later block wins.

pub fn parse_dump(text: &str) -> TaskMap {
    let mut result = TaskMap::new();

    let starts = HEADER_RE
        .find_iter(text)
        .map(|m| m.start())
        .collect::<Vec<usize>>();

    for (i, &start) in starts.iter().enumerate() {
        let end = if i + 1 < starts.len() {
            starts[i + 1]
        } else {
            text.len()
        };
        if let Some((id, task)) = parse_block(&text[start..end]) {
            result.insert(id, task);
        }
    }

    result
}

fn parse_block(block: &str) -> Option<(u64, ParsedTask)> {
    let header = HEADER_RE.captures(block)?;
    let id = header[1].parse::<u64>().ok()?;
    let state = header[2].to_string();

    let mut stack_lines = vec![];
    let mut funcs = vec![];
    let mut parent = 0u64;

    // The first line is the header; everything after it is stack.
    for line in block.lines().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if parent == 0 {
            if let Some(m) = IN_TASK_RE.captures(line) {
                parent = m[1].parse().unwrap_or(0);
            }
        }

        let normalized = normalize_line(line);
        if let Some(sym) = extract_symbol(&normalized) {
            funcs.push(sym);
        }
        stack_lines.push(normalized);
    }

    Some((
        id,
        ParsedTask {
            state,
            stack: stack_lines.join("\n"),
            funcs,
            parent,
        },
    ))
}

// ---------------------------------------------------------------------------

#[cfg(test)]
use flate2::{write::GzEncoder, Compression};
#[cfg(test)]
use std::io::Write;

#[cfg(test)]
const SAMPLE: &str = "task 1 [running]:
main.main()
\t/src/app/main.go:12 +0x1f

task 2 [IO wait, 3 minutes]:
pkg.inner(0xc000123456)
\t/src/app/pkg/a.go:40 +0x2a
pkg.middle()
\t/src/app/pkg/b.go:21 +0x19
pkg.outer()
\t/src/app/pkg/c.go:9 +0x33
created by pkg.outer in task 1
\t/src/app/pkg/c.go:7 +0x45
";

#[test]
fn test_timestamp_from_name() {
    let ts = timestamp_from_name(Path::new("2026-01-17T14-33-01.dump.gz")).unwrap();
    let expect = NaiveDateTime::parse_from_str("2026-01-17T14:33:01", "%Y-%m-%dT%H:%M:%S")
        .unwrap()
        .and_utc()
        .timestamp();
    assert!(ts == expect);

    assert!(timestamp_from_name(Path::new("notes.txt")) == None);
    assert!(timestamp_from_name(Path::new("garbage.dump.gz")) == None);
    assert!(timestamp_from_name(Path::new("2026-01-17.dump.gz")) == None);
}

#[test]
fn test_parse_dump() {
    let tasks = parse_dump(SAMPLE);
    assert!(tasks.len() == 2);

    let t1 = tasks.get(&1).unwrap();
    assert!(t1.state == "running");
    assert!(t1.parent == 0);
    assert!(t1.funcs.eq(&vec!["main.main".to_string()]));

    let t2 = tasks.get(&2).unwrap();
    assert!(t2.state == "IO wait");
    assert!(t2.parent == 1);
    assert!(t2.funcs.eq(&vec![
        "pkg.inner".to_string(),
        "pkg.middle".to_string(),
        "pkg.outer".to_string()
    ]));

    // Pointer values and frame offsets are gone; the created-by line has
    // lost its parent tail.
    assert!(t2.stack.contains("pkg.inner(...)"));
    assert!(t2.stack.contains("created by pkg.outer"));
    assert!(!t2.stack.contains("in task"));
    assert!(!t2.stack.contains("+0x"));
}

#[test]
fn test_parse_dump_no_headers() {
    assert!(parse_dump("").is_empty());
    assert!(parse_dump("some random text\nwith lines\n").is_empty());
}

#[test]
fn test_parse_dump_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("2026-01-17T14-33-01.dump.gz");

    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(SAMPLE.as_bytes()).unwrap();
    std::fs::write(&path, enc.finish().unwrap()).unwrap();

    let (ts, tasks) = parse_dump_file(&path).unwrap();
    assert!(ts == timestamp_from_name(&path).unwrap());
    assert!(tasks.len() == 2);

    // A name without a timestamp is an error, as is a corrupt stream.
    let bad = dir.path().join("bad-name.dump.gz");
    std::fs::write(&bad, b"not gzip").unwrap();
    assert!(parse_dump_file(&bad).is_err());

    let corrupt = dir.path().join("2026-01-17T14-34-01.dump.gz");
    std::fs::write(&corrupt, b"not gzip").unwrap();
    assert!(parse_dump_file(&corrupt).is_err());
}
