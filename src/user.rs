//! user — явная форма записи, общая для Store и сериализации снапшота.
//!
//! Wire shape of one record (snapshot array element / HTTP body):
//!   { "id": 7, "first_name": "Ann", "last_name": "Lee", ...extra }
//!
//! Unknown fields are kept in `UserAttrs::extra` and written back verbatim,
//! so a snapshot produced by a newer API layer survives a round-trip.

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier assigned by the Store. Never reused within a process lifetime.
pub type UserId = u64;

/// Largest id that can be stored: the counter must still have a successor (max+1).
pub const MAX_USER_ID: UserId = UserId::MAX - 1;

/// Keys owned by the record itself; never kept among the pass-through attributes.
pub const RESERVED_KEYS: &[&str] = &["id"];

fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Attribute set owned by the API layer. The core treats it as opaque.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserAttrs {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    /// Pass-through for fields this build does not know about.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserAttrs {
    pub fn new<F: Into<String>, L: Into<String>>(first_name: F, last_name: L) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            extra: Map::new(),
        }
    }

    /// Attach an extra (unknown to this build) field. Reserved keys are ignored.
    pub fn with_extra<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        let key = key.into();
        if !is_reserved(&key) {
            self.extra.insert(key, value);
        }
        self
    }

    /// Drop reserved keys that slipped into `extra` (e.g. via Deserialize).
    /// Returns how many were removed.
    pub fn strip_reserved(&mut self) -> usize {
        let before = self.extra.len();
        self.extra.retain(|k, _| !is_reserved(k));
        before - self.extra.len()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(flatten)]
    pub attrs: UserAttrs,
}

// Ручной Serialize: ровно один "id" и ровно одно имя на запись,
// даже если extra содержит ключи с теми же именами.
impl Serialize for User {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut m = serializer.serialize_map(None)?;
        m.serialize_entry("id", &self.id)?;
        m.serialize_entry("first_name", &self.attrs.first_name)?;
        m.serialize_entry("last_name", &self.attrs.last_name)?;
        for (k, v) in &self.attrs.extra {
            if is_reserved(k) || k == "first_name" || k == "last_name" {
                continue;
            }
            m.serialize_entry(k, v)?;
        }
        m.end()
    }
}

impl User {
    pub fn new(id: UserId, attrs: UserAttrs) -> Self {
        Self { id, attrs }
    }
}

/// Range check for a raw id: 1..=MAX_USER_ID.
pub fn valid_user_id(id: u64) -> Option<UserId> {
    (1..=MAX_USER_ID).contains(&id).then_some(id)
}

/// Parse an id as found in a snapshot: positive integer or numeric string.
/// Returns None for anything else (0, negatives, floats, non-numeric strings,
/// u64::MAX which has no successor).
pub fn parse_user_id(v: &Value) -> Option<UserId> {
    let id = match v {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    valid_user_id(id)
}
