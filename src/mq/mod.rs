//! Miss Channel
//!
//! Outbound, append-only notifications telling the background populator
//! which columnlets were requested but not cached.
//!
//! ```text
//! CacheReader ──miss──▶ MissChannel ──▶ populator (separate process/thread)
//! ```
//!
//! Sends are non-blocking and best-effort. A full or closed channel returns
//! an error, which the reader counts and drops: the caller already has its
//! "not cached" answer.
//!
//! Two transports ship with the crate:
//!
//! - [`MappedBusWriter`] - fixed-size records in a shared memory-mapped file,
//!   read by a populator in another process via [`MappedBusReader`]
//! - [`BoundedMissChannel`] - in-process bounded queue

mod bounded;
mod mapped_bus;

pub use bounded::BoundedMissChannel;
pub use mapped_bus::{
    MappedBusReader, MappedBusWriter, BUS_HEADER_SIZE, DEFAULT_ROLLBACK_TIMEOUT, RECORD_HEADER_SIZE,
};

use crate::cache::ColumnletKey;
use crate::error::Result;

/// Non-blocking outbound transport for miss reports
pub trait MissChannel: Send + Sync {
    /// Try to enqueue one message without blocking
    fn send(&self, payload: &[u8]) -> Result<()>;

    /// Report a missed key as its serialized bytes
    fn report(&self, key: &ColumnletKey) -> Result<()> {
        self.send(&key.to_bytes())
    }
}

/// Channel that drops every report.
///
/// For readers run without a populator.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMissChannel;

impl MissChannel for NullMissChannel {
    fn send(&self, _payload: &[u8]) -> Result<()> {
        Ok(())
    }
}
