//! store — каноничный in-memory набор пользователей.
//!
//! Layout:
//! - `inner: RwLock<Inner>` — map id -> attrs (BTreeMap: порядок по id == порядок создания,
//!   т.к. id монотонны) + счётчик next_id + флаг `sealed`.
//! - `gate: Mutex<Gate>` + `idle: Condvar` — учёт мутаций «в полёте» для drain.
//!
//! Правила:
//! - Мутации (create/update/delete) сериализуются write-локом; get/list идут под read-локом
//!   и никогда не видят «порванную» запись.
//! - id выдаются только счётчиком и не переиспользуются после delete.
//! - drain(): закрыть gate -> дождаться in-flight (с таймаутом) -> под write-локом выставить
//!   sealed. После этого snapshot_view() окончателен. Мутация, не успевшая взять лок до seal,
//!   получает ShuttingDown и в снапшот не попадает, но и не подтверждается вызывающему.

use log::{debug, error, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use crate::metrics;
use crate::user::{User, UserAttrs, UserId, MAX_USER_ID};

/// Ordinary negative outcomes of Store calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    NotFound(UserId),
    /// Drain has begun; the store no longer accepts mutations.
    ShuttingDown,
    /// The id counter reached MAX_USER_ID; nothing left to allocate.
    IdsExhausted,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "user {} not found", id),
            StoreError::ShuttingDown => write!(f, "store is shutting down"),
            StoreError::IdsExhausted => write!(f, "user id space exhausted"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Full dataset as exchanged with the snapshot layer: records ordered by id,
/// plus the next id to allocate.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub users: Vec<User>,
    pub next_id: UserId,
}

impl Default for Dataset {
    fn default() -> Self {
        Self {
            users: Vec::new(),
            next_id: 1,
        }
    }
}

impl Dataset {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn max_id(&self) -> Option<UserId> {
        self.users.iter().map(|u| u.id).max()
    }
}

/// Result of Store::drain. After it returns the store is sealed, so
/// `snapshot_view()` is final.
#[derive(Debug, Clone, Copy)]
pub struct Drained {
    /// The wait for in-flight calls hit the timeout.
    pub timed_out: bool,
    /// In-flight calls still outstanding at seal time (they will be rejected).
    pub abandoned: usize,
}

struct Inner {
    users: BTreeMap<UserId, UserAttrs>,
    next_id: UserId,
    sealed: bool,
}

impl Inner {
    fn view(&self) -> Dataset {
        Dataset {
            users: self
                .users
                .iter()
                .map(|(id, attrs)| User::new(*id, attrs.clone()))
                .collect(),
            next_id: self.next_id,
        }
    }
}

struct Gate {
    accepting: bool,
    in_flight: usize,
}

/// Учёт одной мутации «в полёте». Drop уменьшает счётчик и будит drain.
struct InFlight<'a> {
    store: &'a Store,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut g = self.store.gate_lock();
        g.in_flight = g.in_flight.saturating_sub(1);
        if g.in_flight == 0 {
            self.store.idle.notify_all();
        }
    }
}

pub struct Store {
    inner: RwLock<Inner>,
    gate: Mutex<Gate>,
    idle: Condvar,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Empty store; first allocated id is 1.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                users: BTreeMap::new(),
                next_id: 1,
                sealed: false,
            }),
            gate: Mutex::new(Gate {
                accepting: true,
                in_flight: 0,
            }),
            idle: Condvar::new(),
        }
    }

    // -------- lock helpers (poisoning is recovered: state is only mutated in whole steps) --------

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn gate_lock(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enter(&self) -> Result<InFlight<'_>, StoreError> {
        let mut g = self.gate_lock();
        if !g.accepting {
            metrics::record_rejected_draining();
            return Err(StoreError::ShuttingDown);
        }
        g.in_flight += 1;
        Ok(InFlight { store: self })
    }

    /// Run a mutation: gate ticket first, then the write lock.
    /// The write guard is released before the ticket (drop order), so drain
    /// observes in_flight == 0 only after the mutation is fully applied.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Inner) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _ticket = self.enter()?;
        let mut g = self.write();
        if g.sealed {
            metrics::record_rejected_draining();
            return Err(StoreError::ShuttingDown);
        }
        f(&mut g)
    }

    // -------- CRUD --------

    /// Reserved keys in `attrs` (a client-supplied "id") are dropped.
    pub fn create(&self, mut attrs: UserAttrs) -> Result<User, StoreError> {
        strip_reserved(&mut attrs);
        let user = self.mutate(|inner| {
            let mut id = inner.next_id;
            while inner.users.contains_key(&id) {
                // Счётчик — единственный источник id; сюда попасть нельзя.
                debug_assert!(false, "id {} already allocated (next_id out of sync)", id);
                error!("store: id {} already allocated, skipping", id);
                id = id.saturating_add(1);
            }
            if id > MAX_USER_ID {
                error!("store: id counter exhausted at {}", id);
                return Err(StoreError::IdsExhausted);
            }
            inner.next_id = id + 1;
            inner.users.insert(id, attrs.clone());
            Ok(User::new(id, attrs))
        })?;
        metrics::record_user_created();
        debug!("store: created user {}", user.id);
        Ok(user)
    }

    pub fn get(&self, id: UserId) -> Result<User, StoreError> {
        let g = self.read();
        match g.users.get(&id) {
            Some(attrs) => Ok(User::new(id, attrs.clone())),
            None => {
                metrics::record_not_found();
                Err(StoreError::NotFound(id))
            }
        }
    }

    /// Replace the attribute set of an existing record. Reserved keys are dropped.
    pub fn update(&self, id: UserId, mut attrs: UserAttrs) -> Result<User, StoreError> {
        strip_reserved(&mut attrs);
        let user = self.mutate(|inner| match inner.users.get_mut(&id) {
            Some(slot) => {
                *slot = attrs.clone();
                Ok(User::new(id, attrs))
            }
            None => {
                metrics::record_not_found();
                Err(StoreError::NotFound(id))
            }
        })?;
        metrics::record_user_updated();
        Ok(user)
    }

    pub fn delete(&self, id: UserId) -> Result<(), StoreError> {
        self.mutate(|inner| match inner.users.remove(&id) {
            Some(_) => Ok(()),
            None => {
                metrics::record_not_found();
                Err(StoreError::NotFound(id))
            }
        })?;
        metrics::record_user_deleted();
        debug!("store: deleted user {}", id);
        Ok(())
    }

    /// All current records ordered by id, as of the moment the read lock was taken.
    pub fn list(&self) -> Vec<User> {
        self.read().view().users
    }

    pub fn len(&self) -> usize {
        self.read().users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next id the store would allocate.
    pub fn next_id(&self) -> UserId {
        self.read().next_id
    }

    /// Whether new mutating calls are admitted (false once drain has begun).
    pub fn is_accepting(&self) -> bool {
        self.gate_lock().accepting
    }

    // -------- snapshot-layer hooks --------

    /// Bulk-populate before serving. The allocation counter never moves backwards:
    /// it ends at max(current, dataset.next_id, max restored id + 1).
    /// Records with id 0 or above MAX_USER_ID are dropped.
    pub(crate) fn replace_all(&self, dataset: Dataset) {
        let mut g = self.write();
        let mut users = BTreeMap::new();
        let mut max_id: UserId = 0;
        for u in dataset.users {
            if u.id == 0 || u.id > MAX_USER_ID {
                error!("store: replace_all got out-of-range id {}, dropped", u.id);
                continue;
            }
            max_id = max_id.max(u.id);
            let mut attrs = u.attrs;
            strip_reserved(&mut attrs);
            if users.insert(u.id, attrs).is_some() {
                warn!("store: replace_all got duplicate id {}, last one wins", u.id);
            }
        }
        // max_id <= MAX_USER_ID, поэтому +1 не переполняется.
        let floor = dataset.next_id.min(MAX_USER_ID + 1);
        g.next_id = g.next_id.max(floor).max(max_id + 1);
        g.users = users;
        debug!(
            "store: replaced dataset ({} users, next_id={})",
            g.users.len(),
            g.next_id
        );
    }

    /// Point-in-time copy of the whole dataset (taken under the read lock).
    pub(crate) fn snapshot_view(&self) -> Dataset {
        self.read().view()
    }

    /// Stop accepting mutations, wait up to `timeout` for in-flight ones, then seal
    /// the store. Idempotent.
    ///
    /// `timeout` bounds only the gate wait. Sealing takes the write lock, so a caller
    /// that already holds it (inside a mutation closure) is waited out unbounded.
    pub fn drain(&self, timeout: Duration) -> Drained {
        let deadline = Instant::now() + timeout;
        let mut gate = self.gate_lock();
        gate.accepting = false;

        let mut timed_out = false;
        while gate.in_flight > 0 {
            let now = Instant::now();
            if now >= deadline {
                timed_out = true;
                break;
            }
            let (g, _) = self
                .idle
                .wait_timeout(gate, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            gate = g;
        }
        let abandoned = gate.in_flight;
        drop(gate);

        if timed_out {
            metrics::record_drain_timeout();
            warn!(
                "store: drain timed out after {:?}, {} in-flight call(s) will be rejected",
                timeout, abandoned
            );
        }

        let mut g = self.write();
        g.sealed = true;
        debug!(
            "store: sealed with {} users (next_id={})",
            g.users.len(),
            g.next_id
        );
        Drained {
            timed_out,
            abandoned,
        }
    }
}

fn strip_reserved(attrs: &mut UserAttrs) {
    let n = attrs.strip_reserved();
    if n > 0 {
        debug!("store: dropped {} reserved key(s) from attributes", n);
    }
}
