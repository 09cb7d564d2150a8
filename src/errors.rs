//! # Errors
//!
//! Error types and helper functions used in the library

use std::string::FromUtf8Error;
use thiserror::Error;

/// Top-level application errors, surfaced from `main`.
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    ServerError(#[from] ServerError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors related to starting and running [`crate::server::Server`].
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    RdbError(#[from] RdbError),

    #[error("snapshot bootstrap did not complete within {0} ms")]
    BootstrapTimedOut(u64),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors related to working with [`crate::conn`]
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    RespError(#[from] RespError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors related to working with [`crate::cmd`]
///
/// Every variant here is a *typed error*: it is replied to the client as a
/// simple error beginning `ERR ` and the connection stays open.
#[derive(Debug, Error)]
pub enum CmdError {
    #[error(transparent)]
    FromUtf8Error(#[from] FromUtf8Error),

    #[error(transparent)]
    RespError(#[from] RespError),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("value is not an integer or out of range")]
    NotAnInteger,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("unknown subcommand or wrong number of arguments for '{0}'")]
    UnknownSubcommand(String),

    #[error("syntax error")]
    SyntaxError,

    #[error("invalid expire time in '{0}' command")]
    InvalidExpire(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors related to working with [`crate::resp`]
#[derive(Debug, Error)]
pub enum RespError {
    #[error(transparent)]
    FromUtf8Error(#[from] FromUtf8Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("unsupported RESP type byte: {0:#x}")]
    UnsupportedType(u8),

    #[error("CRLF (\\r\\n) characters not present at end")]
    CrlfNotAtEnd,

    #[error("received a negative length other than -1")]
    NegativeLength,

    #[error("couldn't parse {0:?} as an integer")]
    IntegerParseError(String),

    #[error("nested aggregate depth exceeds the configured ceiling ({0})")]
    DepthExceeded(usize),

    #[error("boolean byte must be 't' or 'f', got {0:#x}")]
    InvalidBoolean(u8),

    #[error("nested maps cannot be used as map keys")]
    UnsupportedMapKey,

    #[error("need more bytes to complete this message")]
    Incomplete,
}

/// Errors related to working with [`crate::rdb`]
#[derive(Debug, Error)]
pub enum RdbError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    FromUtf8Error(#[from] FromUtf8Error),

    #[error("bad header: expected a 9-byte magic+version, got {0} bytes")]
    BadHeader(usize),

    #[error("expected opcode {expected:#04X}, got {got:#04X}")]
    UnexpectedOpcode { expected: u8, got: u8 },

    #[error("unsupported value type byte: {0}")]
    UnsupportedValueType(u8),

    #[error("compressed (LZF) string encoding is not supported")]
    UnsupportedCompressedString,
}

/// Errors produced while converting between RESP, store and RDB
/// representations (see [`crate::adapt`]).
#[derive(Debug, Error)]
pub enum AdaptError {
    #[error("RDB value type {0:?} has no RESP equivalent")]
    UnsupportedRdbType(crate::rdb::RdbValueType),

    #[error("this RESP message shape cannot become a store record")]
    UnsupportedRespShape,
}
