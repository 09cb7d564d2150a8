//! # RESP: Redis Serialization Protocol
//!
//! RESP can serialize different data types including integers, strings, and arrays.
//! It also features an error-specific type. A client sends a request to the Redis server as an array of strings.
//! The array's contents are the command and its arguments that the server should execute.
//! The server's reply type is command-specific.
//!
//! RESP is binary-safe and uses prefixed length to transfer bulk data so it does not require processing
//! bulk data transferred from one process to another.
//!
//! In RESP, the first byte of a message determines its type. Aggregates (arrays, maps, sets) nest
//! recursively, so a whole message is produced or a parse error is returned - there is no such thing
//! as a partially-decoded message.
//!
//! [Official documentation](https://redis.io/docs/latest/develop/reference/protocol-spec/)

use crate::errors::RespError;
use bytes::Bytes;

/// A fully-decoded RESP message.
///
/// Aggregates own their children directly (no back-references), so a
/// [`Message`] tree has the same shape whether it arrived over the wire or
/// was built in memory to be encoded back out.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `+OK\r\n` - a short, non-binary string. Never contains CR or LF.
    SimpleString(Bytes),
    /// `-ERR message\r\n` - a one-line error reply.
    SimpleError(Bytes),
    /// `:1000\r\n` - a signed 64-bit integer.
    Integer(i64),
    /// `$5\r\nhello\r\n`, or `$-1\r\n` for the null bulk string (`None`).
    BulkString(Option<Bytes>),
    /// `*2\r\n...` for `Some(children)`, or `*-1\r\n` for the null array (`None`).
    Array(Option<Vec<Message>>),
    /// `#t\r\n` / `#f\r\n`.
    Boolean(bool),
    /// `%2\r\n...` - an ordered sequence of key/value message pairs.
    Map(Vec<(Message, Message)>),
    /// `~2\r\n...` - an ordered sequence of messages, encoded the way an
    /// Array is but tagged distinctly on the wire.
    Set(Vec<Message>),
    /// `_\r\n`.
    Null,
}

impl Message {
    /// Convenience constructor for a command-name-bearing request array of
    /// bulk strings, used by callers assembling outgoing test fixtures.
    pub fn array_of_bulk_strings<I, S>(items: I) -> Message
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        Message::Array(Some(
            items
                .into_iter()
                .map(|s| Message::BulkString(Some(Bytes::copy_from_slice(s.as_ref()))))
                .collect(),
        ))
    }

    /// Deserializes (parses) a received byte stream into a [`Message`].
    ///
    /// Reads exactly one top-level message, recursing into nested
    /// aggregates. Returns a tuple of ([`Message`], the length of the
    /// complete raw value in bytes consumed from `bytes`).
    ///
    /// Returns [`RespError::Incomplete`] when `bytes` does not yet contain a
    /// whole message; the caller should read more bytes from the stream and
    /// retry. Any other error means the stream is desynchronized and the
    /// connection must be closed.
    pub fn deserialize(bytes: &Bytes) -> Result<(Message, usize), RespError> {
        Self::deserialize_at_depth(bytes, 0)
    }

    fn deserialize_at_depth(bytes: &Bytes, depth: usize) -> Result<(Message, usize), RespError> {
        let Some(&tag) = bytes.first() else {
            return Err(RespError::Incomplete);
        };

        match tag {
            b'+' => Self::parse_simple_string(bytes),
            b'-' => Self::parse_simple_error(bytes),
            b':' => Self::parse_integer(bytes),
            b'$' => Self::parse_bulk_string(bytes),
            b'*' => Self::parse_array(bytes, depth),
            b'%' => Self::parse_map(bytes, depth),
            b'~' => Self::parse_set(bytes, depth),
            b'#' => Self::parse_boolean(bytes),
            b'_' => Self::parse_null(bytes),
            other => Err(RespError::UnsupportedType(other)),
        }
    }

    /// Finds the byte offset, relative to `start`, of the line terminator
    /// (the `\r` of a CRLF pair) beginning at `start`.
    ///
    /// Returns `Err(Incomplete)` when `bytes[start..]` does not yet contain a
    /// full CRLF - the caller needs more bytes before it can make progress.
    fn read_line(bytes: &Bytes, start: usize) -> Result<(usize, usize), RespError> {
        let haystack = bytes.get(start..).ok_or(RespError::Incomplete)?;
        let mut scan_from = 0;
        loop {
            match memchr::memchr(b'\r', &haystack[scan_from..]) {
                None => return Err(RespError::Incomplete),
                Some(rel) => {
                    let cr = scan_from + rel;
                    match haystack.get(cr + 1) {
                        None => return Err(RespError::Incomplete),
                        Some(b'\n') => {
                            // (absolute CR offset, bytes consumed including CRLF)
                            return Ok((start + cr, cr + 2));
                        }
                        Some(_) => scan_from = cr + 1,
                    }
                }
            }
        }
    }

    /// Parses a length (or the `-1` null sentinel) starting right after the
    /// type byte at `start`. Returns `(length, bytes_consumed_from_start)`.
    fn parse_len(bytes: &Bytes, start: usize) -> Result<(Option<i64>, usize), RespError> {
        let (cr_abs, consumed) = Self::read_line(bytes, start)?;
        let text = std::str::from_utf8(&bytes[start..cr_abs])
            .map_err(|_| RespError::IntegerParseError(String::from_utf8_lossy(&bytes[start..cr_abs]).into_owned()))?;
        let value: i64 = text
            .parse()
            .map_err(|_| RespError::IntegerParseError(text.to_string()))?;
        if value == -1 {
            return Ok((None, consumed));
        }
        if value < 0 {
            return Err(RespError::NegativeLength);
        }
        Ok((Some(value), consumed))
    }

    /// `+OK\r\n` => `("OK", 5)`
    fn parse_simple_string(bytes: &Bytes) -> Result<(Message, usize), RespError> {
        let (cr_abs, consumed) = Self::read_line(bytes, 1)?;
        Ok((Message::SimpleString(bytes.slice(1..cr_abs)), 1 + consumed))
    }

    /// `-ERR bad thing\r\n` => `("ERR bad thing", ...)`
    fn parse_simple_error(bytes: &Bytes) -> Result<(Message, usize), RespError> {
        let (cr_abs, consumed) = Self::read_line(bytes, 1)?;
        Ok((Message::SimpleError(bytes.slice(1..cr_abs)), 1 + consumed))
    }

    /// `:[<+|->]<value>\r\n` => an [`i64`].
    fn parse_integer(bytes: &Bytes) -> Result<(Message, usize), RespError> {
        let (cr_abs, consumed) = Self::read_line(bytes, 1)?;
        let text = std::str::from_utf8(&bytes[1..cr_abs])?;
        let value: i64 = text
            .parse()
            .map_err(|_| RespError::IntegerParseError(text.to_string()))?;
        Ok((Message::Integer(value), 1 + consumed))
    }

    /// `$<length>\r\n<data>\r\n`, or `$-1\r\n` for the null bulk string.
    fn parse_bulk_string(bytes: &Bytes) -> Result<(Message, usize), RespError> {
        let (len, len_consumed) = Self::parse_len(bytes, 1)?;
        let Some(len) = len else {
            return Ok((Message::BulkString(None), 1 + len_consumed));
        };
        let data_start = 1 + len_consumed;
        let data_end = data_start + len as usize;
        let terminator = bytes
            .get(data_end..data_end + 2)
            .ok_or(RespError::Incomplete)?;
        if terminator != b"\r\n" {
            return Err(RespError::CrlfNotAtEnd);
        }
        Ok((
            Message::BulkString(Some(bytes.slice(data_start..data_end))),
            data_end + 2,
        ))
    }

    /// `*<count>\r\n<msg>...`, or `*-1\r\n` for the null array.
    fn parse_array(bytes: &Bytes, depth: usize) -> Result<(Message, usize), RespError> {
        let (count, len_consumed) = Self::parse_len(bytes, 1)?;
        let Some(count) = count else {
            return Ok((Message::Array(None), 1 + len_consumed));
        };
        if depth >= crate::constants::MAX_RESP_DEPTH {
            return Err(RespError::DepthExceeded(crate::constants::MAX_RESP_DEPTH));
        }
        let mut offset = 1 + len_consumed;
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (msg, consumed) = Self::deserialize_at_depth(&bytes.slice(offset..), depth + 1)?;
            items.push(msg);
            offset += consumed;
        }
        Ok((Message::Array(Some(items)), offset))
    }

    /// `%<pair-count>\r\n<key><value>...`
    fn parse_map(bytes: &Bytes, depth: usize) -> Result<(Message, usize), RespError> {
        let (count, len_consumed) = Self::parse_len(bytes, 1)?;
        let count = count.ok_or(RespError::NegativeLength)?;
        if depth >= crate::constants::MAX_RESP_DEPTH {
            return Err(RespError::DepthExceeded(crate::constants::MAX_RESP_DEPTH));
        }
        let mut offset = 1 + len_consumed;
        let mut pairs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (key, key_consumed) =
                Self::deserialize_at_depth(&bytes.slice(offset..), depth + 1)?;
            offset += key_consumed;
            let (value, value_consumed) =
                Self::deserialize_at_depth(&bytes.slice(offset..), depth + 1)?;
            offset += value_consumed;
            pairs.push((key, value));
        }
        Ok((Message::Map(pairs), offset))
    }

    /// `~<count>\r\n<msg>...`
    fn parse_set(bytes: &Bytes, depth: usize) -> Result<(Message, usize), RespError> {
        let (count, len_consumed) = Self::parse_len(bytes, 1)?;
        let count = count.ok_or(RespError::NegativeLength)?;
        if depth >= crate::constants::MAX_RESP_DEPTH {
            return Err(RespError::DepthExceeded(crate::constants::MAX_RESP_DEPTH));
        }
        let mut offset = 1 + len_consumed;
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (msg, consumed) = Self::deserialize_at_depth(&bytes.slice(offset..), depth + 1)?;
            items.push(msg);
            offset += consumed;
        }
        Ok((Message::Set(items), offset))
    }

    /// `#t\r\n` / `#f\r\n`
    fn parse_boolean(bytes: &Bytes) -> Result<(Message, usize), RespError> {
        let flag = *bytes.get(1).ok_or(RespError::Incomplete)?;
        let terminator = bytes.get(2..4).ok_or(RespError::Incomplete)?;
        if terminator != b"\r\n" {
            return Err(RespError::CrlfNotAtEnd);
        }
        match flag {
            b't' => Ok((Message::Boolean(true), 4)),
            b'f' => Ok((Message::Boolean(false), 4)),
            other => Err(RespError::InvalidBoolean(other)),
        }
    }

    /// `_\r\n`
    fn parse_null(bytes: &Bytes) -> Result<(Message, usize), RespError> {
        let terminator = bytes.get(1..3).ok_or(RespError::Incomplete)?;
        if terminator != b"\r\n" {
            return Err(RespError::CrlfNotAtEnd);
        }
        Ok((Message::Null, 3))
    }

    /// Encodes this message back into wire bytes. Used both for test
    /// round-trips and for replies assembled out of converted store records
    /// (see [`crate::adapt`]).
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Message::SimpleString(s) => encode_simple_string(s),
            Message::SimpleError(s) => encode_raw_simple_error(s),
            Message::Integer(n) => encode_integer(*n),
            Message::BulkString(Some(s)) => encode_bulk_string(s),
            Message::BulkString(None) => encode_null_bulk_string(),
            Message::Array(Some(items)) => {
                encode_array(&items.iter().map(Message::encode).collect::<Vec<_>>())
            }
            Message::Array(None) => encode_null_array(),
            Message::Boolean(b) => encode_boolean(*b),
            Message::Map(pairs) => encode_map(
                &pairs
                    .iter()
                    .map(|(k, v)| (k.encode(), v.encode()))
                    .collect::<Vec<_>>(),
            ),
            Message::Set(items) => {
                encode_set(&items.iter().map(Message::encode).collect::<Vec<_>>())
            }
            Message::Null => encode_null(),
        }
    }
}

/// Serializes a simple string: `+<text>\r\n`.
pub fn encode_simple_string(text: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 3);
    out.push(b'+');
    out.extend_from_slice(text);
    out.extend_from_slice(b"\r\n");
    out
}

/// Serializes a simple error, always prefixed with `ERR `: `-ERR <text>\r\n`.
pub fn encode_simple_error(text: &str) -> Vec<u8> {
    format!("-ERR {text}\r\n").into_bytes()
}

/// Serializes raw error bytes as-is, without adding the `ERR ` prefix -
/// used when re-encoding a [`Message::SimpleError`] that may already carry
/// its own error code (e.g. `WRONGTYPE`).
fn encode_raw_simple_error(text: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 3);
    out.push(b'-');
    out.extend_from_slice(text);
    out.extend_from_slice(b"\r\n");
    out
}

/// Serializes an integer: `:<value>\r\n`.
pub fn encode_integer(value: i64) -> Vec<u8> {
    format!(":{value}\r\n").into_bytes()
}

/// Serializes a bulk string. The length is the byte length of `data`, not a
/// codepoint count.
pub fn encode_bulk_string(data: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

/// `$-1\r\n`
pub fn encode_null_bulk_string() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

/// `*-1\r\n`
pub fn encode_null_array() -> Vec<u8> {
    b"*-1\r\n".to_vec()
}

/// `_\r\n`
pub fn encode_null() -> Vec<u8> {
    b"_\r\n".to_vec()
}

/// `#t\r\n` / `#f\r\n`
pub fn encode_boolean(value: bool) -> Vec<u8> {
    if value {
        b"#t\r\n".to_vec()
    } else {
        b"#f\r\n".to_vec()
    }
}

/// Serializes an array given its already-encoded children.
pub fn encode_array(children: &[Vec<u8>]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", children.len()).into_bytes();
    for child in children {
        out.extend_from_slice(child);
    }
    out
}

/// Serializes a map given its already-encoded key/value pairs.
pub fn encode_map(pairs: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
    let mut out = format!("%{}\r\n", pairs.len()).into_bytes();
    for (key, value) in pairs {
        out.extend_from_slice(key);
        out.extend_from_slice(value);
    }
    out
}

/// Serializes a set given its already-encoded members.
pub fn encode_set(children: &[Vec<u8>]) -> Vec<u8> {
    let mut out = format!("~{}\r\n", children.len()).into_bytes();
    for child in children {
        out.extend_from_slice(child);
    }
    out
}

/// Canonicalizes a RESP [`Message`] used as a map key into a plain string,
/// so it can be stored as a key in an ordinary associative structure.
///
/// - Integers: `int:<n>`
/// - Booleans: `bool:<t|f>`
/// - Strings (simple or bulk): themselves
/// - Null (or null bulk string): `null`
/// - Arrays/sets: `arr:[<comma-joined children>]`
/// - Nested maps as keys are unsupported.
pub fn canonical_map_key(message: &Message) -> Result<String, RespError> {
    match message {
        Message::Integer(n) => Ok(format!("int:{n}")),
        Message::Boolean(b) => Ok(format!("bool:{}", if *b { "t" } else { "f" })),
        Message::SimpleString(s) | Message::BulkString(Some(s)) => {
            Ok(String::from_utf8(s.to_vec())?)
        }
        Message::BulkString(None) | Message::Null => Ok("null".to_string()),
        Message::Array(Some(items)) | Message::Set(items) => {
            let parts = items
                .iter()
                .map(canonical_map_key)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(format!("arr:[{}]", parts.join(",")))
        }
        Message::Array(None) => Ok("arr:[]".to_string()),
        Message::Map(_) => Err(RespError::UnsupportedMapKey),
        Message::SimpleError(_) => Err(RespError::UnsupportedMapKey),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_len_123456() {
        let input = Bytes::copy_from_slice(b"$123456\r\n");
        let (value, consumed) = Message::parse_len(&input, 1).unwrap();
        assert_eq!((value, consumed), (Some(123456), 9));
    }

    #[test]
    fn parse_len_negative_one_is_null() {
        let input = Bytes::copy_from_slice(b"$-1\r\n");
        let (value, consumed) = Message::parse_len(&input, 1).unwrap();
        assert_eq!((value, consumed), (None, 4));
    }

    #[test]
    fn parse_len_other_negative_is_an_error() {
        let input = Bytes::copy_from_slice(b"$-12\r\n");
        assert!(matches!(
            Message::parse_len(&input, 1),
            Err(RespError::NegativeLength)
        ));
    }

    #[test]
    fn deserialize_simple_string_ok() {
        let input = Bytes::copy_from_slice(b"+OK\r\n");
        let (msg, consumed) = Message::deserialize(&input).unwrap();
        assert_eq!(msg, Message::SimpleString(Bytes::from_static(b"OK")));
        assert_eq!(consumed, 5);
    }

    #[test]
    fn deserialize_bulk_string_hello() {
        let input = Bytes::copy_from_slice(b"$5\r\nHello\r\n");
        let (msg, consumed) = Message::deserialize(&input).unwrap();
        assert_eq!(msg, Message::BulkString(Some(Bytes::from_static(b"Hello"))));
        assert_eq!(consumed, 11);
    }

    #[test]
    fn deserialize_bulk_string_null() {
        let input = Bytes::copy_from_slice(b"$-1\r\n");
        let (msg, consumed) = Message::deserialize(&input).unwrap();
        assert_eq!(msg, Message::BulkString(None));
        assert_eq!(consumed, 5);
    }

    #[test]
    fn deserialize_array_null() {
        let input = Bytes::copy_from_slice(b"*-1\r\n");
        let (msg, consumed) = Message::deserialize(&input).unwrap();
        assert_eq!(msg, Message::Array(None));
        assert_eq!(consumed, 5);
    }

    #[test]
    fn deserialize_array_ping_with_arg() {
        let input = Bytes::copy_from_slice(b"*2\r\n$4\r\nPING\r\n$5\r\nHello\r\n");
        let (msg, consumed) = Message::deserialize(&input).unwrap();
        let expected = Message::Array(Some(vec![
            Message::BulkString(Some(Bytes::from_static(b"PING"))),
            Message::BulkString(Some(Bytes::from_static(b"Hello"))),
        ]));
        assert_eq!(msg, expected);
        assert_eq!(consumed, 25);
    }

    #[test]
    fn deserialize_nested_array() {
        let input =
            Bytes::copy_from_slice(b"*2\r\n*3\r\n:1\r\n:2\r\n:3\r\n*2\r\n+Hello\r\n-World\r\n");
        let (msg, consumed) = Message::deserialize(&input).unwrap();
        let expected = Message::Array(Some(vec![
            Message::Array(Some(vec![
                Message::Integer(1),
                Message::Integer(2),
                Message::Integer(3),
            ])),
            Message::Array(Some(vec![
                Message::SimpleString(Bytes::from_static(b"Hello")),
                Message::SimpleError(Bytes::from_static(b"World")),
            ])),
        ]));
        assert_eq!(msg, expected);
        assert_eq!(consumed, 40);
    }

    #[test]
    fn deserialize_map() {
        let input = Bytes::copy_from_slice(b"%1\r\n+k\r\n:5\r\n");
        let (msg, consumed) = Message::deserialize(&input).unwrap();
        assert_eq!(
            msg,
            Message::Map(vec![(
                Message::SimpleString(Bytes::from_static(b"k")),
                Message::Integer(5)
            )])
        );
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn deserialize_boolean_and_null() {
        let (b, n1) = Message::deserialize(&Bytes::copy_from_slice(b"#t\r\n")).unwrap();
        assert_eq!(b, Message::Boolean(true));
        assert_eq!(n1, 4);

        let (n, n2) = Message::deserialize(&Bytes::copy_from_slice(b"_\r\n")).unwrap();
        assert_eq!(n, Message::Null);
        assert_eq!(n2, 3);
    }

    #[test]
    fn deserialize_incomplete_bulk_string_asks_for_more() {
        let input = Bytes::copy_from_slice(b"$5\r\nHel");
        assert!(matches!(
            Message::deserialize(&input),
            Err(RespError::Incomplete)
        ));
    }

    #[test]
    fn deserialize_unknown_tag_is_a_protocol_error() {
        let input = Bytes::copy_from_slice(b"@garbage\r\n");
        assert!(matches!(
            Message::deserialize(&input),
            Err(RespError::UnsupportedType(b'@'))
        ));
    }

    #[test]
    fn deserialize_refuses_excessive_nesting() {
        let mut buf = Vec::new();
        for _ in 0..40 {
            buf.extend_from_slice(b"*1\r\n");
        }
        buf.extend_from_slice(b":1\r\n");
        let input = Bytes::from(buf);
        assert!(matches!(
            Message::deserialize(&input),
            Err(RespError::DepthExceeded(_))
        ));
    }

    #[test]
    fn round_trip_ping_array() {
        let original = Message::array_of_bulk_strings(["PING"]);
        let encoded = original.encode();
        let (decoded, consumed) = Message::deserialize(&Bytes::from(encoded.clone())).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn round_trip_set_and_lpush() {
        for cmd in [
            Message::array_of_bulk_strings(["SET", "x", "1"]),
            Message::array_of_bulk_strings(["LPUSH", "l", "a", "b"]),
        ] {
            let encoded = cmd.encode();
            let (decoded, _) = Message::deserialize(&Bytes::from(encoded)).unwrap();
            assert_eq!(decoded, cmd);
        }
    }

    #[test]
    fn canonical_map_key_variants() {
        assert_eq!(canonical_map_key(&Message::Integer(5)).unwrap(), "int:5");
        assert_eq!(
            canonical_map_key(&Message::Boolean(true)).unwrap(),
            "bool:t"
        );
        assert_eq!(canonical_map_key(&Message::Null).unwrap(), "null");
        assert_eq!(
            canonical_map_key(&Message::BulkString(Some(Bytes::from_static(b"hi")))).unwrap(),
            "hi"
        );
        let arr = Message::Array(Some(vec![Message::Integer(1), Message::Integer(2)]));
        assert_eq!(canonical_map_key(&arr).unwrap(), "arr:[int:1,int:2]");
        assert!(matches!(
            canonical_map_key(&Message::Map(vec![])),
            Err(RespError::UnsupportedMapKey)
        ));
    }
}
