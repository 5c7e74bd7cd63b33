use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// usersnap CLI: in-memory user store with a shutdown snapshot
#[derive(Parser, Debug)]
#[command(name = "usersnap", version, about = "In-memory user store with atomic JSON snapshot")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Load the snapshot, serve HTTP, flush once on SIGINT/SIGTERM
    Serve {
        /// Snapshot file (default: US_SNAPSHOT_PATH or ./snapshot.users.json)
        #[arg(long)]
        snapshot: Option<PathBuf>,
        /// Listen address (default: US_HTTP_ADDR or 127.0.0.1:8080)
        #[arg(long)]
        addr: Option<String>,
        #[arg(long)]
        workers: Option<usize>,
        /// Max wait for in-flight mutations at shutdown
        #[arg(long)]
        drain_timeout_ms: Option<u64>,
        /// Write compact (single-line) JSON instead of indented
        #[arg(long)]
        compact_json: bool,
    },
    /// Load a snapshot and report what a startup would see
    Check {
        #[arg(long)]
        snapshot: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Print restored records as a JSON array
    Dump {
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Rewrite a snapshot in canonical form (legacy map -> array, bad entries dropped)
    Compact {
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
}
