//! Columnlet Cache - shared memory-mapped cache reader
//!
//! Query workers read columnlets (one column of one row group of one data
//! file) from a cache that a separate populator process maintains in two
//! memory-mapped regions:
//!
//! - an **index** region holding a reader/writer coordination header and a
//!   PATRICIA trie from 16-byte columnlet keys to content locations
//! - a **content** region holding the cached bytes, each entry prefixed by
//!   an access counter
//!
//! Misses are reported to the populator over a non-blocking miss channel.
//!
//! # Architecture
//!
//! ```text
//! query worker ─get(key)─▶ CacheReader ─┬─▶ index region  (trie lookup)
//!                                       ├─▶ content region (payload copy)
//!                                       └─▶ miss channel  ─▶ populator
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Regions, trie lookup, coordinator and the reader façade
//! - [`mq`] - Miss channel transports
//! - [`error`] - Error types

pub mod cache;
pub mod error;
pub mod mq;

// Re-export commonly used types
pub use cache::{CacheReader, CacheReaderBuilder, CacheReaderConfig, ColumnletKey, ReadOutcome};
pub use error::{Error, Result};
pub use mq::{BoundedMissChannel, MappedBusWriter, MissChannel};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
