// `dumpindex` -- build and query an index of periodic task dumps
//
// The `index` command rebuilds the database from a tree of scraped dumps,
// one directory per host.  `query` and `list-funcs` are read-only
// diagnostics against an existing database; the browser UI goes through the
// web server instead.  Run with --help for brief help.
//
// A rebuild is always a full rebuild: any database at --db is destroyed
// first.  Set RUST_LOG=info for per-host progress.

mod query;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use std::process;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Command to run
    #[arg(long, value_enum, default_value = "index")]
    cmd: Cmd,

    /// Input directory containing scraped task dumps
    #[arg(long, default_value = "output")]
    input: String,

    /// Path of the index database
    #[arg(long, default_value = "dumpindex.db")]
    db: String,

    /// Number of parser worker threads [default: number of cores]
    #[arg(long)]
    workers: Option<usize>,

    /// Function name pattern (case-insensitive substring), for query and
    /// list-funcs
    #[arg(long)]
    func: Option<String>,

    /// Host substring filter, for query
    #[arg(long)]
    host: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Cmd {
    /// Rebuild the index from the input tree
    Index,
    /// Show where a function appears, per host and task
    Query,
    /// List indexed function names
    ListFuncs,
}

fn main() {
    match dumpindex() {
        Ok(()) => {}
        Err(msg) => {
            eprintln!("ERROR: {:#}", msg);
            process::exit(1);
        }
    }
}

fn dumpindex() -> Result<()> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    match cli.cmd {
        Cmd::Index => {
            let workers = cli.workers.unwrap_or_else(num_cpus::get);
            dumplog::rebuild(&cli.input, &cli.db, workers)
        }
        Cmd::Query => {
            if cli.func.is_none() {
                bail!("--func is required for the query command");
            }
            query::run_query(&cli.db, cli.func.as_deref().unwrap(), cli.host.as_deref())
        }
        Cmd::ListFuncs => query::run_list_funcs(&cli.db, cli.func.as_deref()),
    }
}
