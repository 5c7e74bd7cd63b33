//! Centralized configuration for usersnap.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - UsersConfig::from_env() reads US_* env vars; CLI flags override on top.
//!
//! Env:
//! - US_SNAPSHOT_PATH    (default "snapshot.users.json")
//! - US_DRAIN_TIMEOUT_MS (default 5000; 0 = do not wait for in-flight calls)
//! - US_HTTP_ADDR        (default "127.0.0.1:8080")
//! - US_HTTP_WORKERS     (default 4, min 1)
//! - US_SNAPSHOT_PRETTY  (default true)
//! - US_FSYNC_DIR        (default true)

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SNAPSHOT_FILE: &str = "snapshot.users.json";
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_HTTP_WORKERS: usize = 4;

/// Top-level configuration (server + snapshot writer).
#[derive(Clone, Debug)]
pub struct UsersConfig {
    /// Snapshot file location. Its parent directory holds the temp file during flush.
    pub snapshot_path: PathBuf,

    /// Upper bound for waiting on in-flight mutating calls at shutdown.
    pub drain_timeout_ms: u64,

    pub http_addr: String,
    pub http_workers: usize,

    /// Indented JSON with trailing newline (diff-friendly).
    pub snapshot_pretty: bool,

    /// fsync the parent directory after rename (best-effort; no-op off unix).
    pub fsync_dir: bool,
}

impl Default for UsersConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_FILE),
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            http_workers: DEFAULT_HTTP_WORKERS,
            snapshot_pretty: true,
            fsync_dir: true,
        }
    }
}

fn env_flag(s: &str) -> bool {
    let s = s.trim().to_ascii_lowercase();
    s == "1" || s == "true" || s == "yes" || s == "on"
}

impl UsersConfig {
    /// Load configuration from environment variables on top of defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("US_SNAPSHOT_PATH") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.snapshot_path = PathBuf::from(s);
            }
        }

        if let Ok(v) = std::env::var("US_DRAIN_TIMEOUT_MS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.drain_timeout_ms = n;
            }
        }

        if let Ok(v) = std::env::var("US_HTTP_ADDR") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.http_addr = s.to_string();
            }
        }

        if let Ok(v) = std::env::var("US_HTTP_WORKERS") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.http_workers = n.max(1);
            }
        }

        if let Ok(v) = std::env::var("US_SNAPSHOT_PRETTY") {
            cfg.snapshot_pretty = env_flag(&v);
        }

        if let Ok(v) = std::env::var("US_FSYNC_DIR") {
            cfg.fsync_dir = env_flag(&v);
        }

        cfg
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Fluent setters (builder-style) to override specific fields.

    pub fn with_snapshot_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.snapshot_path = path.into();
        self
    }

    pub fn with_drain_timeout_ms(mut self, ms: u64) -> Self {
        self.drain_timeout_ms = ms;
        self
    }

    pub fn with_http_addr<S: Into<String>>(mut self, addr: S) -> Self {
        self.http_addr = addr.into();
        self
    }

    pub fn with_http_workers(mut self, n: usize) -> Self {
        self.http_workers = n.max(1);
        self
    }

    pub fn with_snapshot_pretty(mut self, on: bool) -> Self {
        self.snapshot_pretty = on;
        self
    }

    pub fn with_fsync_dir(mut self, on: bool) -> Self {
        self.fsync_dir = on;
        self
    }
}

impl fmt::Display for UsersConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "UsersConfig {{ \
             snapshot_path: {}, \
             drain_timeout_ms: {}, \
             http_addr: {}, \
             http_workers: {}, \
             snapshot_pretty: {}, \
             fsync_dir: {} \
             }}",
            self.snapshot_path.display(),
            self.drain_timeout_ms,
            self.http_addr,
            self.http_workers,
            self.snapshot_pretty,
            self.fsync_dir,
        )
    }
}
