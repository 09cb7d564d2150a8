//! # An In-Memory RESP Key-Value Server Library

pub mod adapt;
pub mod blocking;
pub mod cli;
pub mod cmd;
pub mod conn;
pub mod constants;
pub mod errors;
#[macro_use]
pub mod macros;
pub mod rdb;
pub mod resp;
pub mod server;
pub mod store;
pub mod types;
