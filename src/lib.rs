//! cacheprog - build cache helper for the Go toolchain
//!
//! Answers `get`/`put` requests from `GOCACHEPROG` over stdin/stdout,
//! backed by a local disk store and an optional remote (Cloud Storage or
//! another cacheprog's HTTP front-end).

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ids;
pub mod protocol;
pub mod remote;
pub mod server;
pub mod store;
pub mod util;

pub use error::{ProxyError, ProxyResult};
