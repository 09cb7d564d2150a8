//! # Constants
//!
//! Constants and types used throughout the application

/// Listen address mandated by the wire protocol.
pub const LISTEN_ADDR_STR: &str = "0.0.0.0:6379";

/// Default snapshot directory.
pub const DEFAULT_DIR: &str = "/var/lib/redis";

/// Default snapshot file name.
pub const DEFAULT_DBFILENAME: &str = "dump.rdb";

/// Size of the per-connection read buffer growth step.
pub const READ_CHUNK_LEN: usize = 4096;

/// Maximum nesting depth the RESP decoder will recurse through before
/// refusing further aggregates.
pub const MAX_RESP_DEPTH: usize = 32;

/// Capacity of the bounded channel between the RDB loader task and the
/// store-initializer.
pub const RDB_CHANNEL_CAPACITY: usize = 16;

/// How long the server waits for snapshot bootstrap to complete before
/// treating it as fatal.
pub const RDB_LOAD_TIMEOUT_MS: u64 = 3_000;

/// `BLPOP` timeout of `0` means "effectively unbounded"; a large but finite
/// sentinel keeps the wait future resolvable.
pub const BLPOP_UNBOUNDED_TIMEOUT_SECS: u64 = 86_400 * 365;

/// Application exit codes
#[derive(Debug)]
pub enum ExitCode {
    Ok = 0,
    BindError = 1,
    SnapshotError = 2,
}
