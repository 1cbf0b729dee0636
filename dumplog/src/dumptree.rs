// Enumerate host directories and dump files below the input root.
//
// The scraper writes one directory per monitored endpoint, named after the
// endpoint with ':' replaced by '_', and inside it one gzipped dump per
// scrape named <YYYY-MM-DDTHH-MM-SS>.dump.gz (colons in the timestamp
// replaced by dashes).  Each host's namespace is independent; there is no
// cross-host layout to consider.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

/// The file-name suffix of a compressed dump.

pub const DUMP_SUFFIX: &str = ".dump.gz";

/// Return the sorted list of host directory names below `input_root`.
///
/// This returns an error if `input_root` does not name a readable directory.
/// Entries that are not directories are ignored, as are names that are not
/// representable as UTF8 (host names are ASCII, so such names cannot be
/// hosts).

pub fn find_hosts(input_root: &str) -> Result<Vec<String>> {
    let root = Path::new(input_root);
    if !root.is_dir() {
        bail!("Not a viable input directory: {}", input_root);
    }

    let mut hosts = vec![];
    for entry in root.read_dir()? {
        if let Err(_) = entry {
            // Bad directory entries are ignored; forward progress is assumed,
            // as the read_dir iterator example in the rust docs does.
            continue;
        }
        let p = entry.unwrap().path();
        if !p.is_dir() {
            continue;
        }
        if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
            hosts.push(name.to_string());
        }
    }
    hosts.sort();
    Ok(hosts)
}

/// Return the sorted list of dump files directly inside `host_dir`.  The
/// names carry ISO-like timestamps, so lexicographic order is chronological
/// order.
///
/// This returns an error if `host_dir` cannot be read.  Files that do not
/// end in `.dump.gz` are ignored; whether they can be parsed is dealt with
/// later.

pub fn find_dump_files(host_dir: &Path) -> Result<Vec<PathBuf>> {
    if !host_dir.is_dir() {
        bail!("Not a viable host directory: {}", host_dir.display());
    }

    let mut files = vec![];
    for entry in host_dir.read_dir()? {
        if let Err(_) = entry {
            continue;
        }
        let p = entry.unwrap().path();
        if !p.is_file() {
            continue;
        }
        let name = p.file_name().and_then(|n| n.to_str());
        if name.is_none() || !name.unwrap().ends_with(DUMP_SUFFIX) {
            continue;
        }
        files.push(p);
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
use std::fs;

#[test]
fn test_find_hosts() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("10.0.0.2_8080")).unwrap();
    fs::create_dir(dir.path().join("10.0.0.1_8080")).unwrap();
    fs::write(dir.path().join("stray-file"), b"x").unwrap();

    let hosts = find_hosts(dir.path().to_str().unwrap()).unwrap();
    assert!(hosts.eq(&vec!["10.0.0.1_8080".to_string(), "10.0.0.2_8080".to_string()]));

    // Not a directory.
    assert!(find_hosts(dir.path().join("stray-file").to_str().unwrap()).is_err());
    assert!(find_hosts(dir.path().join("no-such-dir").to_str().unwrap()).is_err());
}

#[test]
fn test_find_dump_files() {
    let dir = tempfile::tempdir().unwrap();
    let host = dir.path().join("h_8080");
    fs::create_dir(&host).unwrap();
    fs::write(host.join("2026-01-17T14-33-01.dump.gz"), b"x").unwrap();
    fs::write(host.join("2026-01-17T14-32-01.dump.gz"), b"x").unwrap();
    fs::write(host.join("notes.txt"), b"x").unwrap();

    let files = find_dump_files(&host).unwrap();
    assert!(files.len() == 2);
    assert!(files[0].file_name().and_then(|n| n.to_str()) == Some("2026-01-17T14-32-01.dump.gz"));
    assert!(files[1].file_name().and_then(|n| n.to_str()) == Some("2026-01-17T14-33-01.dump.gz"));
}
