//! # Store
//!
//! The keyspace: a concurrent mapping from key to a type-tagged [`Record`]
//! with lazy TTL expiry.
//!
//! Grounded on the teacher's `storage` module (a `Crud`-trait-guarded
//! `HashMap` behind an `RwLock`), generalized from string-only values to
//! the full tagged [`RecordValue`] set and switched to an async
//! [`tokio::sync::RwLock`] so a lazy-expiry upgrade never blocks the
//! runtime thread a sibling connection task is running on.

use crate::errors::CmdError;
use crate::types::{ListValue, Record, RecordValue, SharedStore, StorageKey};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::RwLock;

/// Constructs a fresh, empty [`SharedStore`].
pub fn new_store() -> SharedStore {
    Arc::new(RwLock::new(HashMap::new()))
}

/// Reads a key, honoring lazy expiry.
///
/// Under shared access, determines whether the entry is expired. If so,
/// releases shared access, re-acquires exclusive access, re-checks (because
/// a concurrent writer may have replaced the entry or extended its TTL in
/// the meantime), and removes it if and only if it is still expired.
/// Returns `None` either way in that case - the record is treated as absent
/// regardless of whether this call actually performed the removal.
pub async fn get(store: &SharedStore, key: &str) -> Option<Record> {
    let now = SystemTime::now();
    {
        let guard = store.read().await;
        match guard.get(key) {
            None => return None,
            Some(record) if !record.is_expired_at(now) => return Some(record.clone()),
            Some(_) => {}
        }
    }

    let mut guard = store.write().await;
    if let Some(record) = guard.get(key) {
        if record.is_expired_at(SystemTime::now()) {
            guard.remove(key);
        }
    }
    None
}

/// Unconditionally overwrites the record at `key`.
pub async fn set(store: &SharedStore, key: StorageKey, record: Record) {
    store.write().await.insert(key, record);
}

/// Removes `key` unconditionally. Returns whether a record was present.
pub async fn remove(store: &SharedStore, key: &str) -> bool {
    store.write().await.remove(key).is_some()
}

/// A snapshot of the keys currently present, taken at call time. May include
/// entries that have since expired but not yet been lazily removed.
pub async fn keys(store: &SharedStore) -> Vec<StorageKey> {
    store.read().await.keys().cloned().collect()
}

/// Looks up a key expecting it to hold a list, applying lazy expiry first.
/// Returns `Ok(None)` for an absent or expired key, `Ok(Some(list))` for a
/// present list, and [`CmdError::WrongType`] for a present non-list value.
pub async fn get_list(store: &SharedStore, key: &str) -> Result<Option<ListValue>, CmdError> {
    match get(store, key).await {
        None => Ok(None),
        Some(Record {
            value: RecordValue::List(items),
            ..
        }) => Ok(Some(items)),
        Some(_) => Err(CmdError::WrongType),
    }
}

/// Applies `f` to the list at `key` under exclusive access, creating an
/// empty list first if absent, honoring lazy expiry, and rejecting a
/// non-list value at that key. Returns whatever `f` returns.
pub async fn with_list_mut<T>(
    store: &SharedStore,
    key: &str,
    f: impl FnOnce(&mut ListValue) -> T,
) -> Result<T, CmdError> {
    let now = SystemTime::now();
    let mut guard = store.write().await;

    let needs_fresh = match guard.get(key) {
        None => true,
        Some(record) if record.is_expired_at(now) => true,
        Some(Record {
            value: RecordValue::List(_),
            ..
        }) => false,
        Some(_) => return Err(CmdError::WrongType),
    };

    if needs_fresh {
        guard.insert(
            key.to_string(),
            Record::new(RecordValue::List(ListValue::new())),
        );
    }

    let record = guard.get_mut(key).expect("just inserted or confirmed present");
    let RecordValue::List(items) = &mut record.value else {
        unreachable!("checked above");
    };
    Ok(f(items))
}

/// Pops up to `count` elements from the head of the list at `key`. Returns
/// an empty vector for an absent or expired key (no record is created as a
/// side effect, unlike [`with_list_mut`]). Removes the key entirely once
/// its list becomes empty. Rejects a present non-list value.
pub async fn pop_front(
    store: &SharedStore,
    key: &str,
    count: usize,
) -> Result<Vec<bytes::Bytes>, CmdError> {
    let now = SystemTime::now();
    let mut guard = store.write().await;

    let is_expired = matches!(guard.get(key), Some(record) if record.is_expired_at(now));
    if is_expired {
        guard.remove(key);
    }

    let Some(record) = guard.get_mut(key) else {
        return Ok(Vec::new());
    };
    let RecordValue::List(items) = &mut record.value else {
        return Err(CmdError::WrongType);
    };

    let n = count.min(items.len());
    let popped: Vec<_> = items.drain(0..n).collect();
    let now_empty = items.is_empty();
    if now_empty {
        guard.remove(key);
    }
    Ok(popped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = new_store();
        set(
            &store,
            "k".into(),
            Record::new(RecordValue::String(Bytes::from_static(b"v"))),
        )
        .await;
        let record = get(&store, "k").await.unwrap();
        assert_eq!(record.value, RecordValue::String(Bytes::from_static(b"v")));
    }

    #[tokio::test]
    async fn expired_key_reads_as_absent_and_is_removed() {
        let store = new_store();
        let expires_at = SystemTime::now() - Duration::from_secs(1);
        set(
            &store,
            "k".into(),
            Record::with_expiry(RecordValue::String(Bytes::from_static(b"v")), Some(expires_at)),
        )
        .await;

        assert!(get(&store, "k").await.is_none());
        assert!(!store.read().await.contains_key("k"));
    }

    #[tokio::test]
    async fn shorter_ttl_set_is_not_resurrected_by_stale_expiry_check() {
        let store = new_store();
        let long_lived = SystemTime::now() + Duration::from_secs(60);
        set(
            &store,
            "k".into(),
            Record::with_expiry(RecordValue::String(Bytes::from_static(b"old")), Some(long_lived)),
        )
        .await;

        // Overwrite with a record that is already expired.
        let already_expired = SystemTime::now() - Duration::from_millis(1);
        set(
            &store,
            "k".into(),
            Record::with_expiry(RecordValue::String(Bytes::from_static(b"new")), Some(already_expired)),
        )
        .await;

        assert!(get(&store, "k").await.is_none());
    }

    #[tokio::test]
    async fn with_list_mut_creates_list_lazily_and_rejects_wrong_type() {
        let store = new_store();
        with_list_mut(&store, "l", |list| list.push(Bytes::from_static(b"a")))
            .await
            .unwrap();
        assert_eq!(get_list(&store, "l").await.unwrap().unwrap().len(), 1);

        set(
            &store,
            "s".into(),
            Record::new(RecordValue::String(Bytes::from_static(b"x"))),
        )
        .await;
        assert!(matches!(
            with_list_mut(&store, "s", |_| ()).await,
            Err(CmdError::WrongType)
        ));
    }

    #[tokio::test]
    async fn keys_reports_current_snapshot() {
        let store = new_store();
        set(&store, "a".into(), Record::new(RecordValue::Integer(1))).await;
        set(&store, "b".into(), Record::new(RecordValue::Integer(2))).await;
        let mut ks = keys(&store).await;
        ks.sort();
        assert_eq!(ks, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn pop_front_removes_key_once_list_is_drained() {
        let store = new_store();
        with_list_mut(&store, "l", |list| {
            list.push(Bytes::from_static(b"a"));
            list.push(Bytes::from_static(b"b"));
        })
        .await
        .unwrap();

        let popped = pop_front(&store, "l", 5).await.unwrap();
        assert_eq!(popped, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        assert!(!store.read().await.contains_key("l"));
    }

    #[tokio::test]
    async fn pop_front_on_absent_key_returns_empty() {
        let store = new_store();
        assert_eq!(pop_front(&store, "missing", 3).await.unwrap(), Vec::new());
    }
}
