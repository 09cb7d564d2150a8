//! # Types
//!
//! Types shared across the store, blocking coordinator and dispatcher.
//!
//! Redis is originally a simple in-memory key-value data store. Unlike the
//! original prototype (which kept a side table mapping keys to expirations
//! only when one was set, to save space when values are plain strings),
//! every [`Record`] here carries its own `expires_at` directly: once values
//! can also be lists, sets or maps the payload itself is heap-allocated
//! anyway, so a side table buys nothing.
//!
//!   - From [EXPIRE](https://redis.io/docs/latest/commands/expire/):
//!     "Normally, Redis keys are created without an associated time to live."

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::RwLock;

/// Primary key. Keys are opaque byte-strings in principle, exposed as UTF-8
/// text to command handlers.
pub type StorageKey = String;

/// A list value: an ordered sequence of binary-safe elements.
pub type ListValue = Vec<Bytes>;

/// A set value: an ordered sequence of binary-safe members.
pub type SetValue = Vec<Bytes>;

/// A map value: an ordered sequence of canonical-string-keyed entries (see
/// [`crate::resp::canonical_map_key`]).
pub type MapValue = Vec<(String, RecordValue)>;

/// The payload carried by a [`Record`], shaped by its value-type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    String(Bytes),
    List(ListValue),
    Set(SetValue),
    Map(MapValue),
    Integer(i64),
    Boolean(bool),
    Null,
}

impl RecordValue {
    /// The name `TYPE` reports for this value. The "none" case (key
    /// absent) is the caller's responsibility, since it has no `Record` at
    /// all to ask.
    pub fn type_name(&self) -> &'static str {
        match self {
            RecordValue::String(_) | RecordValue::Integer(_) | RecordValue::Boolean(_) => {
                "string"
            }
            RecordValue::List(_) => "list",
            RecordValue::Set(_) => "set",
            RecordValue::Map(_) => "hash",
            RecordValue::Null => "none",
        }
    }
}

/// A per-key value bundle: a value-type-tagged payload plus an absolute
/// expiry instant. `expires_at: None` is the distinguished "never" sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub value: RecordValue,
    pub expires_at: Option<SystemTime>,
}

impl Record {
    pub fn new(value: RecordValue) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    pub fn with_expiry(value: RecordValue, expires_at: Option<SystemTime>) -> Self {
        Self { value, expires_at }
    }

    /// Whether this record's expiry has elapsed as of `now`.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// The concurrent in-memory keyspace mapping, shared across connection
/// tasks. See [`crate::store`] for the operations defined over it.
pub type SharedStore = Arc<RwLock<HashMap<StorageKey, Record>>>;
