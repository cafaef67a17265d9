//! Read Coordinator
//!
//! Multi-reader/single-writer handshake over the first four bytes of the
//! index region:
//!
//! ```text
//! offset 0: rw_flag       u16   0 = readable, nonzero = writer rebuilding
//! offset 2: reader_count  u16   in-flight readers, saturates at 32767
//! ```
//!
//! Readers never compare-and-swap. `enter` and `leave` are a plain atomic
//! load followed by a plain atomic store, so racing readers can lose updates
//! and the count drifts. The writer only uses the count as a conservative
//! drain signal before swapping in a rebuilt index, and bounds its wait with
//! a timeout, so drift costs at most a longer writer wait.
//!
//! Memory ordering: loads are `Acquire` and stores are `Release`, enough for
//! a writer's flag transition to become visible without further fencing.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::layout::{READER_COUNT_CEILING, READER_COUNT_OFFSET, RW_FLAG_OFFSET};
use super::region::MappedRegion;
use crate::error::{Error, Result};

/// Why a read was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    /// Writer flag is set
    WriterActive,
    /// Reader counter is at its ceiling
    Saturated,
}

impl std::fmt::Display for Unavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unavailable::WriterActive => write!(f, "writer active"),
            Unavailable::Saturated => write!(f, "reader count saturated"),
        }
    }
}

/// Snapshot of the coordinator header
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CoordinatorState {
    /// Writer flag value
    pub rw_flag: u16,
    /// In-flight reader count
    pub reader_count: u16,
}

/// Shared handle on the coordinator header of an index region
#[derive(Debug, Clone)]
pub struct ReadCoordinator {
    region: Arc<MappedRegion>,
}

impl ReadCoordinator {
    /// Wrap the header of an index region
    pub fn new(region: Arc<MappedRegion>) -> Result<Self> {
        region.ensure_len(READER_COUNT_OFFSET + 2)?;
        if region.atomic_u16(RW_FLAG_OFFSET).is_none()
            || region.atomic_u16(READER_COUNT_OFFSET).is_none()
        {
            return Err(Error::Config(format!(
                "index region {:?} is not aligned for header access",
                region.path()
            )));
        }
        Ok(Self { region })
    }

    fn field(&self, offset: u64) -> &AtomicU16 {
        // Alignment and range were verified in `new`.
        self.region
            .atomic_u16(offset)
            .unwrap_or_else(|| unreachable!("coordinator header checked at construction"))
    }

    fn rw_flag_field(&self) -> &AtomicU16 {
        self.field(RW_FLAG_OFFSET)
    }

    fn reader_count_field(&self) -> &AtomicU16 {
        self.field(READER_COUNT_OFFSET)
    }

    /// Admit one read; the returned guard calls [`leave`](Self::leave) on drop
    pub fn enter(&self) -> std::result::Result<ReadGuard<'_>, Unavailable> {
        if self.rw_flag_field().load(Ordering::Acquire) != 0 {
            return Err(Unavailable::WriterActive);
        }
        let count = self.reader_count_field();
        let readers = count.load(Ordering::Acquire);
        if readers >= READER_COUNT_CEILING {
            return Err(Unavailable::Saturated);
        }
        count.store(readers + 1, Ordering::Release);
        Ok(ReadGuard { coordinator: self })
    }

    /// Release one read. Never takes the count below zero.
    pub fn leave(&self) {
        let count = self.reader_count_field();
        let readers = count.load(Ordering::Acquire);
        count.store(readers.saturating_sub(1), Ordering::Release);
    }

    /// Current header values
    pub fn state(&self) -> CoordinatorState {
        CoordinatorState {
            rw_flag: self.rw_flag_field().load(Ordering::Acquire),
            reader_count: self.reader_count_field().load(Ordering::Acquire),
        }
    }

    /// Current writer flag
    pub fn rw_flag(&self) -> u16 {
        self.state().rw_flag
    }

    /// Current reader count
    pub fn reader_count(&self) -> u16 {
        self.state().reader_count
    }

    // =========================================================================
    // Writer side
    // =========================================================================

    /// Raise the writer flag so new reads are refused
    pub fn begin_rebuild(&self) {
        self.rw_flag_field().store(1, Ordering::Release);
    }

    /// Poll until the reader count reaches zero or `timeout` elapses.
    ///
    /// Returns `true` if the readers drained. Writers may proceed either way.
    pub fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.reader_count_field().load(Ordering::Acquire) == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::yield_now();
        }
    }

    /// Reset the reader count and clear the writer flag
    pub fn finish_rebuild(&self) {
        self.reader_count_field().store(0, Ordering::Release);
        self.rw_flag_field().store(0, Ordering::Release);
    }
}

/// Scoped admission; leaves the coordinator when dropped
#[derive(Debug)]
#[must_use = "dropping the guard immediately ends the read"]
pub struct ReadGuard<'a> {
    coordinator: &'a ReadCoordinator,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.leave();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> (tempfile::TempDir, ReadCoordinator) {
        let dir = tempfile::tempdir().unwrap();
        let region = Arc::new(MappedRegion::open(dir.path().join("index"), 64).unwrap());
        (dir, ReadCoordinator::new(region).unwrap())
    }

    fn set_reader_count(c: &ReadCoordinator, n: u16) {
        c.region
            .write_bytes(READER_COUNT_OFFSET, &n.to_ne_bytes())
            .unwrap();
    }

    #[test]
    fn test_enter_and_leave() {
        let (_dir, c) = coordinator();
        {
            let _g1 = c.enter().unwrap();
            let _g2 = c.enter().unwrap();
            assert_eq!(c.reader_count(), 2);
        }
        assert_eq!(c.reader_count(), 0);
    }

    #[test]
    fn test_writer_flag_refuses_readers() {
        let (_dir, c) = coordinator();
        c.begin_rebuild();
        assert_eq!(c.enter().unwrap_err(), Unavailable::WriterActive);
        assert_eq!(c.reader_count(), 0);

        c.finish_rebuild();
        assert!(c.enter().is_ok());
    }

    #[test]
    fn test_any_nonzero_flag_refuses() {
        let (_dir, c) = coordinator();
        c.region
            .write_bytes(RW_FLAG_OFFSET, &0x0100u16.to_ne_bytes())
            .unwrap();
        assert_eq!(c.enter().unwrap_err(), Unavailable::WriterActive);
    }

    #[test]
    fn test_saturation() {
        let (_dir, c) = coordinator();
        set_reader_count(&c, READER_COUNT_CEILING);
        assert_eq!(c.enter().unwrap_err(), Unavailable::Saturated);
        assert_eq!(c.reader_count(), READER_COUNT_CEILING);

        set_reader_count(&c, READER_COUNT_CEILING - 1);
        let g = c.enter().unwrap();
        assert_eq!(c.reader_count(), READER_COUNT_CEILING);
        drop(g);
        assert_eq!(c.reader_count(), READER_COUNT_CEILING - 1);
    }

    #[test]
    fn test_extra_leave_never_underflows() {
        let (_dir, c) = coordinator();
        drop(c.enter().unwrap());
        c.leave();
        c.leave();
        assert_eq!(c.reader_count(), 0);
    }

    #[test]
    fn test_wait_for_drain() {
        let (_dir, c) = coordinator();
        assert!(c.wait_for_drain(Duration::from_millis(1)));

        let g = c.enter().unwrap();
        c.begin_rebuild();
        assert!(!c.wait_for_drain(Duration::from_millis(5)));
        drop(g);
        assert!(c.wait_for_drain(Duration::from_millis(5)));
    }

    #[test]
    fn test_finish_rebuild_resets_count() {
        let (_dir, c) = coordinator();
        set_reader_count(&c, 9);
        c.begin_rebuild();
        c.finish_rebuild();
        assert_eq!(
            c.state(),
            CoordinatorState {
                rw_flag: 0,
                reader_count: 0
            }
        );
    }

    #[test]
    fn test_header_shared_between_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        let a = ReadCoordinator::new(Arc::new(MappedRegion::open(&path, 64).unwrap())).unwrap();
        let b = ReadCoordinator::new(Arc::new(MappedRegion::open(&path, 64).unwrap())).unwrap();

        a.begin_rebuild();
        assert_eq!(b.enter().unwrap_err(), Unavailable::WriterActive);
        a.finish_rebuild();
        assert!(b.enter().is_ok());
    }
}
