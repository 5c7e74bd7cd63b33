//! snapshot — on-disk JSON representation of the Store and its lifecycle.
//!
//! Формат файла (snapshot.users.json):
//!   [ {"id": 1, "first_name": "Ann", "last_name": "Lee", ...}, ... ]   (отсортировано по id)
//! Legacy-форма (принимается только на чтение):
//!   { "1": {"first_name": "Ann", "last_name": "Lee"}, ... }
//!
//! Политика:
//! - load толерантен: нет файла -> пустой набор; мусор/чужая форма -> пустой набор + warn;
//!   битые отдельные записи внутри валидного массива/объекта пропускаются.
//! - save строгий и атомарный: tmp в том же каталоге -> write + fsync -> rename -> fsync каталога.
//!   Любая ошибка до rename оставляет исходный файл нетронутым и возвращается наверх.
//!   Retry нет: упавший rename удаляет tmp и возвращает ошибку.
//!
//! Жизненный цикл менеджера:
//!   Uninitialized -> Loaded -> Serving -> Flushing -> Flushed | FlushFailed
//! Flushing входит ровно один раз.

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
#[cfg(unix)]
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::metrics;
use crate::store::{Dataset, Store};
use crate::user::{parse_user_id, valid_user_id, User, UserAttrs, UserId};

// ---------------- load ----------------

/// How a load ended. Every variant yields a usable dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No file at the path (first run).
    Missing,
    /// File parsed; `skipped` malformed entries were dropped.
    Restored { records: usize, skipped: usize },
    /// Unreadable, not JSON, or wrong top-level shape. Dataset is empty.
    Corrupt(String),
}

impl fmt::Display for LoadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadOutcome::Missing => write!(f, "missing"),
            LoadOutcome::Restored { records, skipped } => {
                write!(f, "restored {} record(s), skipped {}", records, skipped)
            }
            LoadOutcome::Corrupt(why) => write!(f, "corrupt ({})", why),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Loaded {
    pub dataset: Dataset,
    pub outcome: LoadOutcome,
}

impl Loaded {
    fn empty(outcome: LoadOutcome) -> Self {
        Self {
            dataset: Dataset::default(),
            outcome,
        }
    }
}

/// Read the snapshot at `path`. Never fails: problems are logged and mapped
/// onto an empty dataset.
pub fn load(path: &Path) -> Loaded {
    let raw = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("snapshot: {} not found, starting empty", path.display());
            metrics::record_load_missing();
            return Loaded::empty(LoadOutcome::Missing);
        }
        Err(e) => {
            return corrupt(path, format!("read failed: {}", e));
        }
    };

    let value: Value = match serde_json::from_slice(&raw) {
        Ok(v) => v,
        Err(e) => return corrupt(path, format!("invalid JSON: {}", e)),
    };

    let (dataset, skipped) = match parse_snapshot(value) {
        Ok(x) => x,
        Err(why) => return corrupt(path, why),
    };

    let records = dataset.users.len();
    metrics::record_load_restored(records as u64, skipped as u64);
    if skipped > 0 {
        warn!(
            "snapshot: {} restored {} record(s), skipped {} malformed entr(ies)",
            path.display(),
            records,
            skipped
        );
    } else {
        info!(
            "snapshot: {} restored {} record(s), next_id={}",
            path.display(),
            records,
            dataset.next_id
        );
    }
    Loaded {
        dataset,
        outcome: LoadOutcome::Restored { records, skipped },
    }
}

fn corrupt(path: &Path, why: String) -> Loaded {
    warn!(
        "snapshot: {} is unusable ({}), starting with an empty dataset",
        path.display(),
        why
    );
    metrics::record_load_corrupt();
    Loaded::empty(LoadOutcome::Corrupt(why))
}

/// Parse an already-decoded snapshot document.
/// Err(reason) only for a wrong top-level shape; bad entries are counted as skipped.
pub fn parse_snapshot(value: Value) -> std::result::Result<(Dataset, usize), String> {
    let mut users: BTreeMap<UserId, UserAttrs> = BTreeMap::new();
    let mut skipped = 0usize;

    match value {
        Value::Array(items) => {
            for item in items {
                let ok = match item {
                    Value::Object(mut obj) => {
                        let id = obj.remove("id").as_ref().and_then(parse_user_id);
                        accept_entry(&mut users, id, Value::Object(obj))
                    }
                    _ => false,
                };
                if !ok {
                    skipped += 1;
                }
            }
        }
        // Legacy: {"<id>": {attrs}}
        Value::Object(map) => {
            let id_keys = map
                .keys()
                .filter(|k| k.trim().parse::<u64>().is_ok())
                .count();
            if !map.is_empty() && id_keys == 0 {
                return Err("expected a JSON array of users, got an object without id keys".into());
            }
            for (key, attrs) in map {
                let id = key.trim().parse::<u64>().ok().and_then(valid_user_id);
                let ok = match attrs {
                    Value::Object(mut obj) => {
                        obj.remove("id");
                        accept_entry(&mut users, id, Value::Object(obj))
                    }
                    _ => false,
                };
                if !ok {
                    skipped += 1;
                }
            }
        }
        other => {
            return Err(format!(
                "expected a JSON array of users, got {}",
                json_kind(&other)
            ))
        }
    }

    // Все принятые id <= MAX_USER_ID, у каждого есть преемник.
    let next_id = users
        .keys()
        .next_back()
        .map(|m| m.saturating_add(1))
        .unwrap_or(1);
    let dataset = Dataset {
        users: users
            .into_iter()
            .map(|(id, attrs)| User::new(id, attrs))
            .collect(),
        next_id,
    };
    Ok((dataset, skipped))
}

fn accept_entry(users: &mut BTreeMap<UserId, UserAttrs>, id: Option<UserId>, attrs: Value) -> bool {
    let Some(id) = id else {
        return false;
    };
    if users.contains_key(&id) {
        warn!("snapshot: duplicate id {} ignored", id);
        return false;
    }
    match serde_json::from_value::<UserAttrs>(attrs) {
        Ok(a) => {
            users.insert(id, a);
            true
        }
        Err(e) => {
            debug!("snapshot: entry {} rejected: {}", id, e);
            false
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------- save ----------------

#[cfg(unix)]
fn fsync_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        let dir = File::open(parent)?;
        dir.sync_all()?;
    }
    Ok(())
}
#[cfg(not(unix))]
fn fsync_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// `<dir>/.<name>.tmp` — same directory as the destination, so rename stays on one filesystem.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}

/// Serialized snapshot bytes (array form, sorted by id, trailing newline).
pub fn encode(users: &[User], pretty: bool) -> Result<Vec<u8>> {
    let mut sorted: Vec<&User> = users.iter().collect();
    sorted.sort_by_key(|u| u.id);
    let mut buf = if pretty {
        serde_json::to_vec_pretty(&sorted)
    } else {
        serde_json::to_vec(&sorted)
    }
    .context("serialize snapshot")?;
    buf.push(b'\n');
    Ok(buf)
}

/// A fully written and fsynced temp file waiting to be renamed onto `dest`.
/// Dropping it without commit removes the temp file; `dest` is never touched.
pub struct StagedSnapshot {
    tmp: PathBuf,
    dest: PathBuf,
    bytes: u64,
    fsync_dir: bool,
    done: bool,
}

impl StagedSnapshot {
    pub fn temp_path(&self) -> &Path {
        &self.tmp
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Rename the temp file onto the destination (the atomicity boundary).
    pub fn commit(mut self) -> Result<u64> {
        self.done = true;
        if let Err(e) = fs::rename(&self.tmp, &self.dest) {
            let _ = fs::remove_file(&self.tmp);
            return Err(e).with_context(|| {
                format!("rename {} -> {}", self.tmp.display(), self.dest.display())
            });
        }
        if self.fsync_dir {
            if let Err(e) = fsync_dir(&self.dest) {
                // rename уже виден; потеря только durability каталога
                warn!(
                    "snapshot: fsync of parent dir of {} failed: {}",
                    self.dest.display(),
                    e
                );
            }
        }
        Ok(self.bytes)
    }

    /// Discard the staged file explicitly.
    pub fn abort(mut self) {
        self.done = true;
        let _ = fs::remove_file(&self.tmp);
    }
}

impl Drop for StagedSnapshot {
    fn drop(&mut self) {
        if !self.done {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

/// Write `users` to the temp file next to `path` and fsync it. Does not touch `path`.
pub fn stage(path: &Path, users: &[User], pretty: bool, fsync_dir: bool) -> Result<StagedSnapshot> {
    let bytes = encode(users, pretty)?;
    let tmp = temp_path_for(path);
    let _ = fs::remove_file(&tmp); // best-effort: stale tmp от прошлого падения

    let f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .with_context(|| format!("open snapshot tmp {}", tmp.display()))?;

    // С этого момента tmp удалится при любой ошибке (Drop).
    let staged = StagedSnapshot {
        tmp: tmp.clone(),
        dest: path.to_path_buf(),
        bytes: bytes.len() as u64,
        fsync_dir,
        done: false,
    };

    let mut w = BufWriter::new(f);
    w.write_all(&bytes)
        .with_context(|| format!("write snapshot tmp {}", tmp.display()))?;
    let f = w
        .into_inner()
        .map_err(|e| anyhow!("flush snapshot tmp {}: {}", tmp.display(), e.error()))?;
    f.sync_all()
        .with_context(|| format!("fsync snapshot tmp {}", tmp.display()))?;

    Ok(staged)
}

/// Atomically replace the snapshot at `path` with `users`. Returns bytes written.
pub fn save(path: &Path, users: &[User]) -> Result<u64> {
    save_with(path, users, true, true)
}

pub fn save_with(path: &Path, users: &[User], pretty: bool, fsync_dir: bool) -> Result<u64> {
    stage(path, users, pretty, fsync_dir)?.commit()
}

// ---------------- lifecycle ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized,
    Loaded,
    Serving,
    Flushing,
    Flushed,
    FlushFailed,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ManagerState::Uninitialized => "uninitialized",
            ManagerState::Loaded => "loaded",
            ManagerState::Serving => "serving",
            ManagerState::Flushing => "flushing",
            ManagerState::Flushed => "flushed",
            ManagerState::FlushFailed => "flush-failed",
        };
        f.write_str(s)
    }
}

/// What a successful shutdown wrote.
#[derive(Debug, Clone)]
pub struct FlushReport {
    pub records: usize,
    pub bytes: u64,
    pub next_id: UserId,
    pub drain_timed_out: bool,
}

/// Owns the snapshot path and drives load-at-start / flush-at-shutdown.
/// Holds no copy of the data between the two.
pub struct SnapshotManager {
    path: PathBuf,
    state: ManagerState,
    pretty: bool,
    fsync_dir: bool,
}

impl SnapshotManager {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            state: ManagerState::Uninitialized,
            pretty: true,
            fsync_dir: true,
        }
    }

    pub fn from_config(cfg: &crate::config::UsersConfig) -> Self {
        Self::new(cfg.snapshot_path.clone())
            .with_pretty(cfg.snapshot_pretty)
            .with_fsync_dir(cfg.fsync_dir)
    }

    pub fn with_pretty(mut self, on: bool) -> Self {
        self.pretty = on;
        self
    }

    pub fn with_fsync_dir(mut self, on: bool) -> Self {
        self.fsync_dir = on;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    fn expect_state(&self, want: ManagerState, op: &str) -> Result<()> {
        if self.state != want {
            return Err(anyhow!(
                "{}: snapshot manager is {}, expected {}",
                op,
                self.state,
                want
            ));
        }
        Ok(())
    }

    /// Startup hook: load the snapshot and feed it into a fresh store.
    pub fn load_into(&mut self, store: &Store) -> Result<LoadOutcome> {
        self.expect_state(ManagerState::Uninitialized, "load_into")?;
        let loaded = load(&self.path);
        store.replace_all(loaded.dataset);
        self.state = ManagerState::Loaded;
        Ok(loaded.outcome)
    }

    /// Mark the start of request traffic (no persistence activity until shutdown).
    pub fn serving(&mut self) -> Result<()> {
        self.expect_state(ManagerState::Loaded, "serving")?;
        self.state = ManagerState::Serving;
        Ok(())
    }

    /// Shutdown hook: drain the store, then atomically write the drained view.
    /// Entered at most once; a flush failure leaves any previous snapshot intact.
    pub fn shutdown(&mut self, store: &Store, drain_timeout: Duration) -> Result<FlushReport> {
        match self.state {
            ManagerState::Loaded | ManagerState::Serving => {}
            other => {
                return Err(anyhow!(
                    "shutdown: snapshot manager is {}, flush runs once after load",
                    other
                ))
            }
        }
        self.state = ManagerState::Flushing;

        let drained = store.drain(drain_timeout);
        // Store запечатан: view ниже окончательный.
        let view = store.snapshot_view();
        let records = view.users.len();
        let next_id = view.next_id;

        match save_with(&self.path, &view.users, self.pretty, self.fsync_dir) {
            Ok(bytes) => {
                self.state = ManagerState::Flushed;
                metrics::record_flush_ok(bytes);
                info!(
                    "snapshot: flushed {} record(s), {} B to {}",
                    records,
                    bytes,
                    self.path.display()
                );
                Ok(FlushReport {
                    records,
                    bytes,
                    next_id,
                    drain_timed_out: drained.timed_out,
                })
            }
            Err(e) => {
                self.state = ManagerState::FlushFailed;
                metrics::record_flush_failed();
                error!(
                    "snapshot: flush to {} failed, data NOT persisted: {:#}",
                    self.path.display(),
                    e
                );
                Err(e.context(format!("flush snapshot {}", self.path.display())))
            }
        }
    }
}

/// Canonical rewrite of an existing snapshot (legacy map -> array, bad entries dropped).
pub fn compact(path: &Path, pretty: bool) -> Result<(Loaded, u64)> {
    let loaded = load(path);
    match &loaded.outcome {
        LoadOutcome::Restored { .. } => {}
        LoadOutcome::Missing => {
            return Err(anyhow!("no snapshot at {}", path.display()));
        }
        LoadOutcome::Corrupt(why) => {
            return Err(anyhow!(
                "refusing to compact unusable snapshot {}: {}",
                path.display(),
                why
            ));
        }
    }
    let bytes = save_with(path, &loaded.dataset.users, pretty, true)?;
    Ok((loaded, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_array_with_extra_and_bad_entries() {
        let v = json!([
            {"id": 2, "first_name": "Bo", "email": "bo@x"},
            {"id": "1", "first_name": "Ann"},
            {"first_name": "no id"},
            {"id": 2, "first_name": "dup"},
            {"id": 3, "first_name": 42},
            "garbage"
        ]);
        let (ds, skipped) = parse_snapshot(v).unwrap();
        assert_eq!(skipped, 4);
        assert_eq!(ds.users.iter().map(|u| u.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(ds.users[1].attrs.extra.get("email"), Some(&json!("bo@x")));
        assert_eq!(ds.next_id, 3);
    }

    #[test]
    fn parse_legacy_map_form() {
        let v = json!({
            "1": {"first_name": "Ann", "last_name": "Lee"},
            "7": {"first_name": "Bo"},
            "x": {"first_name": "skip"}
        });
        let (ds, skipped) = parse_snapshot(v).unwrap();
        assert_eq!(skipped, 1);
        assert_eq!(ds.users.len(), 2);
        assert_eq!(ds.next_id, 8);
    }

    #[test]
    fn wrong_shape_is_rejected() {
        assert!(parse_snapshot(json!("not json")).is_err());
        assert!(parse_snapshot(json!(17)).is_err());
        assert!(parse_snapshot(json!(null)).is_err());
        assert!(parse_snapshot(json!({"wrong": "shape"})).is_err());
        // An empty legacy map is what an empty store used to write.
        let (ds, skipped) = parse_snapshot(json!({})).unwrap();
        assert!(ds.is_empty());
        assert_eq!(skipped, 0);
        assert_eq!(ds.next_id, 1);
    }

    #[test]
    fn encode_is_sorted_with_newline() {
        let users = vec![
            User::new(5, UserAttrs::new("E", "")),
            User::new(2, UserAttrs::new("B", "")),
        ];
        let bytes = encode(&users, false).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
        let v: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v[0]["id"], json!(2));
        assert_eq!(v[1]["id"], json!(5));
    }

    #[test]
    fn temp_path_is_sibling() {
        let p = Path::new("/data/snapshot.users.json");
        assert_eq!(temp_path_for(p), PathBuf::from("/data/.snapshot.users.json.tmp"));
        assert_eq!(
            temp_path_for(Path::new("s.json")),
            PathBuf::from(".s.json.tmp")
        );
    }

    #[test]
    fn manager_rejects_out_of_order_steps() {
        let mut m = SnapshotManager::new("/nonexistent-dir-usersnap/x.json");
        let store = Store::new();
        assert!(m.serving().is_err());
        assert!(m.shutdown(&store, Duration::ZERO).is_err());
        assert_eq!(m.state(), ManagerState::Uninitialized);
    }
}
