// End-to-end tests: build small dump trees on disk, rebuild the index, and
// check the stored values.

use dumplog::{rebuild, timestamp_from_name, Store};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::Write;
use std::path::Path;

fn write_dump(input_root: &Path, host: &str, name: &str, text: &str) {
    let dir = input_root.join(host);
    fs::create_dir_all(&dir).unwrap();
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(text.as_bytes()).unwrap();
    fs::write(dir.join(name), enc.finish().unwrap()).unwrap();
}

fn ts(name: &str) -> i64 {
    timestamp_from_name(Path::new(name)).unwrap()
}

#[test]
fn test_single_task_two_dumps() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    let db = dir.path().join("db");

    let text = "task 7 [running]:
main.work()
\t/src/app/main.go:10 +0x21
";
    write_dump(&input, "h_8080", "2026-01-17T14-00-00.dump.gz", text);
    write_dump(&input, "h_8080", "2026-01-17T14-01-00.dump.gz", text);

    rebuild(input.to_str().unwrap(), db.to_str().unwrap(), 2).unwrap();

    let store = Store::open(db.to_str().unwrap()).unwrap();

    let series = store.task_series("h_8080", 7).unwrap().unwrap();
    assert!(series.entries.len() == 2);
    assert!(series.entries[0].timestamp == ts("2026-01-17T14-00-00.dump.gz"));
    assert!(series.entries[1].timestamp == ts("2026-01-17T14-01-00.dump.gz"));
    assert!(series.entries[0].stack == series.entries[1].stack);
    assert!(series.entries[0].state == "running");

    let counts = store.snapshot_counts("h_8080").unwrap().unwrap();
    assert!(counts.timestamps.eq(&vec![
        ts("2026-01-17T14-00-00.dump.gz"),
        ts("2026-01-17T14-01-00.dump.gz")
    ]));
    assert!(counts.counts.eq(&vec![1, 1]));

    // No task carries a parent link, so there is no children record.
    assert!(store.children("h_8080", 7).unwrap() == None);

    assert!(store.hosts().unwrap().eq(&vec!["h_8080".to_string()]));
}

#[test]
fn test_parent_child_entry_point_label() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    let db = dir.path().join("db");

    let text = "task 1 [running]:
main.main()
\t/src/app/main.go:5 +0x19

task 2 [select]:
pkg.inner()
\t/src/app/pkg/a.go:10 +0x11
pkg.middle()
\t/src/app/pkg/b.go:20 +0x22
pkg.outer()
\t/src/app/pkg/c.go:30 +0x33
created by pkg.outer in task 1
\t/src/app/pkg/c.go:28 +0x44
";
    write_dump(&input, "h_8080", "2026-01-17T14-00-00.dump.gz", text);

    rebuild(input.to_str().unwrap(), db.to_str().unwrap(), 1).unwrap();

    let store = Store::open(db.to_str().unwrap()).unwrap();
    let t = ts("2026-01-17T14-00-00.dump.gz");

    let kids = store.children("h_8080", 1).unwrap().unwrap();
    assert!(kids.len() == 1);
    assert!(kids[0].id == 2);
    assert!(kids[0].funcs == "pkg.middle -> pkg.outer");
    assert!(kids[0].first_seen == t);
    assert!(kids[0].last_seen == t);

    // Children symmetry: the child's own series records the parent id.
    let child = store.task_series("h_8080", 2).unwrap().unwrap();
    assert!(child.entries.iter().any(|e| e.parent == 1));
}

#[test]
fn test_pointer_values_normalize_away() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    let db = dir.path().join("db");

    write_dump(
        &input,
        "h_8080",
        "2026-01-17T14-00-00.dump.gz",
        "task 5 [running]:\npkg.Do(0xc0001234)\n\t/src/app/d.go:4 +0x2f\n",
    );
    write_dump(
        &input,
        "h_8080",
        "2026-01-17T14-01-00.dump.gz",
        "task 5 [running]:\npkg.Do(0xc0009999)\n\t/src/app/d.go:4 +0x31\n",
    );

    rebuild(input.to_str().unwrap(), db.to_str().unwrap(), 2).unwrap();

    let store = Store::open(db.to_str().unwrap()).unwrap();
    let series = store.task_series("h_8080", 5).unwrap().unwrap();
    assert!(series.entries.len() == 2);
    assert!(series.entries[0].stack == series.entries[1].stack);
    assert!(series.entries[0].stack.contains("pkg.Do(...)"));
}

#[test]
fn test_rebuild_wipes_prior_state() {
    let dir = tempfile::tempdir().unwrap();
    let input1 = dir.path().join("input1");
    let input2 = dir.path().join("input2");
    let db = dir.path().join("db");

    let text = "task 1 [running]:\nmain.main()\n\t/src/app/main.go:5 +0x19\n";
    write_dump(&input1, "old_8080", "2026-01-17T14-00-00.dump.gz", text);
    write_dump(&input2, "new_8080", "2026-01-17T15-00-00.dump.gz", text);

    rebuild(input1.to_str().unwrap(), db.to_str().unwrap(), 1).unwrap();
    rebuild(input2.to_str().unwrap(), db.to_str().unwrap(), 1).unwrap();

    let store = Store::open(db.to_str().unwrap()).unwrap();
    assert!(store.hosts().unwrap().eq(&vec!["new_8080".to_string()]));
    assert!(store.task_series("old_8080", 1).unwrap() == None);
    assert!(store.snapshot_counts("old_8080").unwrap() == None);
    assert!(store.task_series("new_8080", 1).unwrap().is_some());
}

#[test]
fn test_worker_count_does_not_change_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    let db1 = dir.path().join("db1");
    let db8 = dir.path().join("db8");

    // Several dumps and tasks per host so the parse fan-out actually fans
    // out, plus a parent link to exercise the children index.
    for (host, base) in [("a_8080", 14), ("b_8080", 15)] {
        for minute in 0..6 {
            let name = format!("2026-01-17T{}-0{}-00.dump.gz", base, minute);
            let text = format!(
                "task 1 [running]:
main.main()
\t/src/app/main.go:5 +0x19

task 2 [IO wait]:
pkg.read(0xc000{:04x})
\t/src/app/r.go:12 +0x2e
pkg.serve()
\t/src/app/s.go:30 +0x11
created by pkg.serve in task 1
\t/src/app/s.go:28 +0x40

task 3 [select]:
pkg.tick()
\t/src/app/t.go:7 +0x1d
created by pkg.serve in task 1
\t/src/app/t.go:5 +0x2b
",
                minute * 37 + 1
            );
            write_dump(&input, host, &name, &text);
        }
    }

    rebuild(input.to_str().unwrap(), db1.to_str().unwrap(), 1).unwrap();
    rebuild(input.to_str().unwrap(), db8.to_str().unwrap(), 8).unwrap();

    let s1 = Store::open(db1.to_str().unwrap()).unwrap();
    let s8 = Store::open(db8.to_str().unwrap()).unwrap();

    assert!(s1.hosts().unwrap().eq(&s8.hosts().unwrap()));
    assert!(s1.func_names().unwrap().eq(&s8.func_names().unwrap()));

    for host in ["a_8080", "b_8080"] {
        for task in 1u64..=3 {
            assert!(s1.task_series(host, task).unwrap() == s8.task_series(host, task).unwrap());
            assert!(s1.children(host, task).unwrap() == s8.children(host, task).unwrap());
        }
        assert!(s1.snapshot_counts(host).unwrap() == s8.snapshot_counts(host).unwrap());
    }
}

#[test]
fn test_func_index_merges_across_hosts() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    let db = dir.path().join("db");

    let text = "task 1 [running]:\npkg.Handle()\n\t/src/app/h.go:3 +0x12\n";
    write_dump(&input, "a_8080", "2026-01-17T14-00-00.dump.gz", text);
    write_dump(&input, "b_8080", "2026-01-17T14-00-00.dump.gz", text);

    rebuild(input.to_str().unwrap(), db.to_str().unwrap(), 2).unwrap();

    let store = Store::open(db.to_str().unwrap()).unwrap();

    let index = store.func_index("pkg.Handle").unwrap().unwrap();
    assert!(index.occurrences.len() == 2);
    let mut hosts = index.occurrences.iter().map(|o| o.host.clone()).collect::<Vec<String>>();
    hosts.sort();
    assert!(hosts.eq(&vec!["a_8080".to_string(), "b_8080".to_string()]));
    for occ in &index.occurrences {
        assert!(occ.task == 1);
    }

    // The metadata function list is global and sorted.
    let funcs = store.func_names().unwrap();
    assert!(funcs.contains(&"pkg.Handle".to_string()));
    let mut sorted = funcs.clone();
    sorted.sort();
    assert!(funcs.eq(&sorted));
}
