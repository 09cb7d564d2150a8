//! # Adapters
//!
//! Three pure conversions between the wire, snapshot, and store
//! representations: `rdb-entry -> store-record`, `resp-message ->
//! store-record` (recursive for arrays/sets/maps), and `store-record ->
//! resp-message` (recursive).
//!
//! Grounded on the original's ad-hoc inline conversions in
//! `examples/original_source/server/adapters.go`, which only ever handled
//! plain strings; generalized here to the full tagged value set.

use crate::errors::AdaptError;
use crate::rdb::{Entry, RdbValue, RdbValueType};
use crate::resp::Message;
use crate::types::{ListValue, Record, RecordValue};

/// Converts a decoded RDB entry into a store record. RDB strings and lists
/// map directly; the loader itself already rejects every value type this
/// function can't receive (set/sorted-set/hash/packed) by failing the load,
/// so those tags show up here only if a caller hand-builds an `Entry`.
pub fn rdb_entry_to_record(entry: Entry) -> Result<Record, AdaptError> {
    let value = match (entry.value_type, entry.value) {
        (RdbValueType::String, RdbValue::String(bytes)) => RecordValue::String(bytes),
        (RdbValueType::List, RdbValue::List(items)) => RecordValue::List(items),
        (other, _) => return Err(AdaptError::UnsupportedRdbType(other)),
    };
    Ok(Record::with_expiry(value, entry.expires_at))
}

/// Converts a RESP message into the value a store record would hold, for
/// commands that store a client-supplied payload verbatim. Recurses into
/// arrays, sets, and maps. A top-level or nested `Null`, `SimpleError`, or
/// null aggregate has no store representation.
pub fn resp_to_record_value(message: &Message) -> Result<RecordValue, AdaptError> {
    match message {
        Message::BulkString(Some(bytes)) => Ok(RecordValue::String(bytes.clone())),
        Message::SimpleString(bytes) => Ok(RecordValue::String(bytes.clone())),
        Message::Integer(n) => Ok(RecordValue::Integer(*n)),
        Message::Boolean(b) => Ok(RecordValue::Boolean(*b)),
        Message::Array(Some(items)) => {
            let list: Result<ListValue, AdaptError> = items
                .iter()
                .map(|item| match resp_to_record_value(item)? {
                    RecordValue::String(bytes) => Ok(bytes),
                    _ => Err(AdaptError::UnsupportedRespShape),
                })
                .collect();
            Ok(RecordValue::List(list?))
        }
        Message::Set(items) => {
            let members: Result<Vec<_>, AdaptError> = items
                .iter()
                .map(|item| match resp_to_record_value(item)? {
                    RecordValue::String(bytes) => Ok(bytes),
                    _ => Err(AdaptError::UnsupportedRespShape),
                })
                .collect();
            Ok(RecordValue::Set(members?))
        }
        Message::Map(pairs) => {
            let entries: Result<Vec<_>, AdaptError> = pairs
                .iter()
                .map(|(k, v)| {
                    let key = crate::resp::canonical_map_key(k)
                        .map_err(|_| AdaptError::UnsupportedRespShape)?;
                    Ok((key, resp_to_record_value(v)?))
                })
                .collect();
            Ok(RecordValue::Map(entries?))
        }
        Message::Null | Message::BulkString(None) | Message::Array(None) => {
            Ok(RecordValue::Null)
        }
        Message::SimpleError(_) => Err(AdaptError::UnsupportedRespShape),
    }
}

/// Converts a stored value into its wire reply. Recurses into lists, sets,
/// and maps. This is the inverse of [`resp_to_record_value`] up to the
/// string/integer/boolean canonicalization RESP itself performs.
pub fn record_to_resp(value: &RecordValue) -> Message {
    match value {
        RecordValue::String(bytes) => Message::BulkString(Some(bytes.clone())),
        RecordValue::Integer(n) => Message::Integer(*n),
        RecordValue::Boolean(b) => Message::Boolean(*b),
        RecordValue::List(items) => Message::Array(Some(
            items
                .iter()
                .map(|b| Message::BulkString(Some(b.clone())))
                .collect(),
        )),
        RecordValue::Set(members) => Message::Set(
            members
                .iter()
                .map(|b| Message::BulkString(Some(b.clone())))
                .collect(),
        ),
        RecordValue::Map(entries) => Message::Map(
            entries
                .iter()
                .map(|(k, v)| {
                    (
                        Message::BulkString(Some(bytes::Bytes::from(k.clone().into_bytes()))),
                        record_to_resp(v),
                    )
                })
                .collect(),
        ),
        RecordValue::Null => Message::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::SystemTime;

    #[test]
    fn rdb_string_entry_converts_to_string_record() {
        let entry = Entry {
            key: "foo".into(),
            value_type: RdbValueType::String,
            value: RdbValue::String(Bytes::from_static(b"bar")),
            expires_at: None,
        };
        let record = rdb_entry_to_record(entry).unwrap();
        assert_eq!(record.value, RecordValue::String(Bytes::from_static(b"bar")));
        assert_eq!(record.expires_at, None);
    }

    #[test]
    fn rdb_list_entry_preserves_order_and_expiry() {
        let at = SystemTime::UNIX_EPOCH;
        let entry = Entry {
            key: "l".into(),
            value_type: RdbValueType::List,
            value: RdbValue::List(vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]),
            expires_at: Some(at),
        };
        let record = rdb_entry_to_record(entry).unwrap();
        assert_eq!(
            record.value,
            RecordValue::List(vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")])
        );
        assert_eq!(record.expires_at, Some(at));
    }

    #[test]
    fn rdb_unsupported_type_is_an_error() {
        let entry = Entry {
            key: "h".into(),
            value_type: RdbValueType::Hash,
            value: RdbValue::String(Bytes::from_static(b"")),
            expires_at: None,
        };
        assert!(matches!(
            rdb_entry_to_record(entry),
            Err(AdaptError::UnsupportedRdbType(RdbValueType::Hash))
        ));
    }

    #[test]
    fn record_to_resp_round_trips_a_list() {
        let value = RecordValue::List(vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        let message = record_to_resp(&value);
        let back = resp_to_record_value(&message).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn bulk_string_converts_to_string_record() {
        let message = Message::BulkString(Some(Bytes::from_static(b"v")));
        assert_eq!(
            resp_to_record_value(&message).unwrap(),
            RecordValue::String(Bytes::from_static(b"v"))
        );
    }
}
