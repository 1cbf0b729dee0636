// Read-only diagnostic commands against an existing index.

use anyhow::Result;
use chrono::DateTime;
use dumplog::{FuncOccurrence, Store};

/// Print every indexed function matching `pattern`, with a table of the
/// tasks it appeared in, ordered by first appearance.

pub fn run_query(db_path: &str, pattern: &str, host_filter: Option<&str>) -> Result<()> {
    let store = Store::open(db_path)?;
    let funcs = store.func_names()?;

    let pattern = pattern.to_lowercase();
    let matching = funcs
        .iter()
        .filter(|f| f.to_lowercase().contains(&pattern))
        .collect::<Vec<&String>>();

    if matching.is_empty() {
        println!("No matching functions found");
        return Ok(());
    }

    println!("Found {} matching functions:\n", matching.len());

    for name in matching {
        let index = match store.func_index(name)? {
            Some(index) => index,
            None => continue,
        };

        let mut occurrences = index
            .occurrences
            .into_iter()
            .filter(|o| host_filter.map_or(true, |h| o.host.contains(h)))
            .collect::<Vec<FuncOccurrence>>();
        if occurrences.is_empty() {
            continue;
        }
        occurrences.sort_by_key(|o| o.first_seen);

        println!("=== {} ===", name);
        println!("Tasks: {}\n", occurrences.len());

        println!(
            "{:<20} {:>12} {:>24} {:>24} {:>12}",
            "Host", "Task", "First Seen", "Last Seen", "Duration"
        );
        println!("{}", "-".repeat(96));
        for o in &occurrences {
            println!(
                "{:<20} {:>12} {:>24} {:>24} {:>11}s",
                o.host,
                o.task,
                format_time(o.first_seen),
                format_time(o.last_seen),
                o.last_seen - o.first_seen
            );
        }
        println!();
    }
    Ok(())
}

/// Print the indexed function names, one per line, with a trailing count.

pub fn run_list_funcs(db_path: &str, pattern: Option<&str>) -> Result<()> {
    let store = Store::open(db_path)?;
    let funcs = store.func_names()?;
    let pattern = pattern.map(|p| p.to_lowercase());

    let mut count = 0;
    for f in &funcs {
        if pattern.as_ref().map_or(true, |p| f.to_lowercase().contains(p)) {
            println!("{}", f);
            count += 1;
        }
    }
    println!("\n{} functions", count);
    Ok(())
}

fn format_time(t: i64) -> String {
    match DateTime::from_timestamp(t, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => t.to_string(),
    }
}
