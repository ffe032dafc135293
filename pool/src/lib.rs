//! Recycle byte buffers through size-classed, lock-free pools.
//!
//! Workloads that repeatedly allocate short-lived byte buffers (serializing requests, buffering
//! network responses) spend much of their time in the allocator and fragment the heap. A
//! [Manager] keeps returned buffers around and hands them out again:
//!
//! - **Blocks** are small, fixed-size buffers (`block_size` bytes) chained together by a
//!   [RecyclableStream] as it grows.
//! - **Large buffers** are sized in multiples of `large_buffer_multiple` (up to
//!   `maximum_buffer_size`) and used when a single contiguous region is needed.
//!
//! Every size class keeps byte counts of what is free (sitting in the pool) and what is in use
//! (owned by callers), so applications can monitor memory behavior and cap how much memory the
//! pool retains.
//!
//! # Example
//!
//! ```
//! use prometheus_client::registry::Registry;
//! use recycle_pool::{Config, Manager};
//! use std::io::{Read, Write};
//!
//! let mut registry = Registry::default();
//! let manager = Manager::new(Config::default(), &mut registry).unwrap();
//!
//! let mut stream = manager.get_stream_tagged("request");
//! stream.write_all(b"hello world").unwrap();
//! stream.set_position(0);
//!
//! let mut out = Vec::new();
//! stream.read_to_end(&mut out).unwrap();
//! assert_eq!(out, b"hello world");
//!
//! // Dropping the stream returns its blocks to the pool.
//! drop(stream);
//! assert_eq!(manager.small_pool_in_use_bytes(), 0);
//! assert_eq!(manager.small_blocks_free(), 1);
//! ```
//!
//! # Status
//!
//! `recycle-pool` is **ALPHA** software and is not yet recommended for production use. Developers
//! should expect breaking changes and occasional instability.

use thiserror::Error;

mod config;
pub use config::{
    Config, DEFAULT_BLOCK_SIZE, DEFAULT_LARGE_BUFFER_MULTIPLE, DEFAULT_MAXIMUM_BUFFER_SIZE,
};
mod large;
mod manager;
pub use manager::Manager;
mod metrics;
mod small;
mod stats;
pub use stats::Stats;
mod stream;
pub use stream::RecyclableStream;

/// Prefix for pool metrics.
const METRICS_PREFIX: &str = "recycle_pool";

/// Errors that can occur when interacting with the pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("invalid buffer: {0}")]
    InvalidBuffer(&'static str),
    #[error("capacity exceeded: {requested} > {maximum}")]
    CapacityExceeded { requested: usize, maximum: usize },
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        let kind = match err {
            Error::CapacityExceeded { .. } => std::io::ErrorKind::OutOfMemory,
            _ => std::io::ErrorKind::InvalidInput,
        };
        std::io::Error::new(kind, err)
    }
}
