//! Lightweight global metrics for usersnap.
//!
//! Потокобезопасные атомарные счётчики для подсистем:
//! - Store (create/update/delete, not-found, отказы во время drain)
//! - Snapshot load (restored/missing/corrupt, пропущенные записи)
//! - Snapshot flush (ok/failed, байты, drain timeout)

use std::sync::atomic::{AtomicU64, Ordering};

// ----- Store -----
static USERS_CREATED: AtomicU64 = AtomicU64::new(0);
static USERS_UPDATED: AtomicU64 = AtomicU64::new(0);
static USERS_DELETED: AtomicU64 = AtomicU64::new(0);
static NOT_FOUND: AtomicU64 = AtomicU64::new(0);
static REJECTED_DRAINING: AtomicU64 = AtomicU64::new(0);

// ----- Snapshot load -----
static LOAD_RESTORED: AtomicU64 = AtomicU64::new(0);
static LOAD_MISSING: AtomicU64 = AtomicU64::new(0);
static LOAD_CORRUPT: AtomicU64 = AtomicU64::new(0);
static LOAD_RECORDS: AtomicU64 = AtomicU64::new(0);
static LOAD_SKIPPED: AtomicU64 = AtomicU64::new(0);

// ----- Snapshot flush -----
static FLUSH_OK: AtomicU64 = AtomicU64::new(0);
static FLUSH_FAILED: AtomicU64 = AtomicU64::new(0);
static FLUSH_BYTES: AtomicU64 = AtomicU64::new(0);
static DRAIN_TIMEOUTS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    // Store
    pub users_created: u64,
    pub users_updated: u64,
    pub users_deleted: u64,
    pub not_found: u64,
    pub rejected_draining: u64,

    // Load
    pub load_restored: u64,
    pub load_missing: u64,
    pub load_corrupt: u64,
    pub load_records: u64,
    pub load_skipped: u64,

    // Flush
    pub flush_ok: u64,
    pub flush_failed: u64,
    pub flush_bytes: u64,
    pub drain_timeouts: u64,
}

impl MetricsSnapshot {
    /// Prometheus text exposition (version 0.0.4).
    pub fn to_prometheus(&self) -> String {
        let rows: [(&str, &str, &str, u64); 14] = [
            ("usersnap_users_created_total", "counter", "Users created.", self.users_created),
            ("usersnap_users_updated_total", "counter", "Users updated.", self.users_updated),
            ("usersnap_users_deleted_total", "counter", "Users deleted.", self.users_deleted),
            ("usersnap_not_found_total", "counter", "Store calls that hit an unknown id.", self.not_found),
            ("usersnap_rejected_draining_total", "counter", "Mutations rejected after drain began.", self.rejected_draining),
            ("usersnap_snapshot_load_restored_total", "counter", "Snapshot loads that restored a dataset.", self.load_restored),
            ("usersnap_snapshot_load_missing_total", "counter", "Snapshot loads with no file (first run).", self.load_missing),
            ("usersnap_snapshot_load_corrupt_total", "counter", "Snapshot loads that fell back to empty.", self.load_corrupt),
            ("usersnap_snapshot_records_loaded_total", "counter", "Records restored from snapshots.", self.load_records),
            ("usersnap_snapshot_entries_skipped_total", "counter", "Malformed snapshot entries skipped.", self.load_skipped),
            ("usersnap_snapshot_flush_ok_total", "counter", "Successful snapshot flushes.", self.flush_ok),
            ("usersnap_snapshot_flush_failed_total", "counter", "Failed snapshot flushes.", self.flush_failed),
            ("usersnap_snapshot_bytes_written_total", "counter", "Snapshot bytes written.", self.flush_bytes),
            ("usersnap_drain_timeouts_total", "counter", "Drains that hit the timeout.", self.drain_timeouts),
        ];
        let mut out = String::new();
        for (name, kind, help, v) in rows {
            out.push_str(&format!("# HELP {} {}\n", name, help));
            out.push_str(&format!("# TYPE {} {}\n", name, kind));
            out.push_str(&format!("{} {}\n", name, v));
        }
        out
    }
}

// ----- Store -----

pub fn record_user_created() {
    USERS_CREATED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_user_updated() {
    USERS_UPDATED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_user_deleted() {
    USERS_DELETED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_not_found() {
    NOT_FOUND.fetch_add(1, Ordering::Relaxed);
}

pub fn record_rejected_draining() {
    REJECTED_DRAINING.fetch_add(1, Ordering::Relaxed);
}

// ----- Snapshot load -----

pub fn record_load_restored(records: u64, skipped: u64) {
    LOAD_RESTORED.fetch_add(1, Ordering::Relaxed);
    LOAD_RECORDS.fetch_add(records, Ordering::Relaxed);
    LOAD_SKIPPED.fetch_add(skipped, Ordering::Relaxed);
}

pub fn record_load_missing() {
    LOAD_MISSING.fetch_add(1, Ordering::Relaxed);
}

pub fn record_load_corrupt() {
    LOAD_CORRUPT.fetch_add(1, Ordering::Relaxed);
}

// ----- Snapshot flush -----

pub fn record_flush_ok(bytes: u64) {
    FLUSH_OK.fetch_add(1, Ordering::Relaxed);
    FLUSH_BYTES.fetch_add(bytes, Ordering::Relaxed);
}

pub fn record_flush_failed() {
    FLUSH_FAILED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_drain_timeout() {
    DRAIN_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
}

/// Снимок всех счётчиков.
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        users_created: USERS_CREATED.load(Ordering::Relaxed),
        users_updated: USERS_UPDATED.load(Ordering::Relaxed),
        users_deleted: USERS_DELETED.load(Ordering::Relaxed),
        not_found: NOT_FOUND.load(Ordering::Relaxed),
        rejected_draining: REJECTED_DRAINING.load(Ordering::Relaxed),

        load_restored: LOAD_RESTORED.load(Ordering::Relaxed),
        load_missing: LOAD_MISSING.load(Ordering::Relaxed),
        load_corrupt: LOAD_CORRUPT.load(Ordering::Relaxed),
        load_records: LOAD_RECORDS.load(Ordering::Relaxed),
        load_skipped: LOAD_SKIPPED.load(Ordering::Relaxed),

        flush_ok: FLUSH_OK.load(Ordering::Relaxed),
        flush_failed: FLUSH_FAILED.load(Ordering::Relaxed),
        flush_bytes: FLUSH_BYTES.load(Ordering::Relaxed),
        drain_timeouts: DRAIN_TIMEOUTS.load(Ordering::Relaxed),
    }
}

/// Сброс всех счётчиков (для тестов/бенчей).
pub fn reset() {
    for c in [
        &USERS_CREATED,
        &USERS_UPDATED,
        &USERS_DELETED,
        &NOT_FOUND,
        &REJECTED_DRAINING,
        &LOAD_RESTORED,
        &LOAD_MISSING,
        &LOAD_CORRUPT,
        &LOAD_RECORDS,
        &LOAD_SKIPPED,
        &FLUSH_OK,
        &FLUSH_FAILED,
        &FLUSH_BYTES,
        &DRAIN_TIMEOUTS,
    ] {
        c.store(0, Ordering::Relaxed);
    }
}
