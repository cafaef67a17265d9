//! Memory-Mapped Miss Bus
//!
//! Fixed-size records appended to a shared file that a populator in another
//! process maps and drains.
//!
//! ```text
//! ┌──────────────┬───────────────────────────────────────────────┬─────┐
//! │ limit: u64   │ record 0                                      │ ... │
//! │ next free    │ commit u32 │ rollback u32 │ length u32 │ data  │     │
//! └──────────────┴───────────────────────────────────────────────┴─────┘
//! ```
//!
//! Records are padded to a multiple of 8 bytes so every commit word stays
//! aligned. A writer reserves a record by advancing `limit` with a CAS, fills
//! it, then publishes `commit = 1`. Header words are native-endian.
//!
//! A record is skipped by readers when `rollback` is set. Writers set it when
//! they fail after reserving; readers set it themselves on a slot left
//! uncommitted past the rollback timeout, so a producer that died mid-write
//! cannot hide the records reserved after it.

use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::MissChannel;
use crate::cache::MappedRegion;
use crate::error::{Error, Result};

/// Bytes before the first record
pub const BUS_HEADER_SIZE: u64 = 8;

/// Bytes of per-record framing before the payload
pub const RECORD_HEADER_SIZE: u64 = 12;

/// How long a reader waits on an uncommitted record before rolling it back
pub const DEFAULT_ROLLBACK_TIMEOUT: Duration = Duration::from_secs(2);

const LIMIT_OFFSET: u64 = 0;
const ROLLBACK_FIELD: u64 = 4;
const LENGTH_FIELD: u64 = 8;

fn stride_for(record_size: usize) -> u64 {
    (RECORD_HEADER_SIZE + record_size as u64).div_ceil(8) * 8
}

fn open_bus(path: &Path, file_size: u64, record_size: usize) -> Result<(MappedRegion, u64)> {
    if record_size == 0 {
        return Err(Error::Config(
            "message queue record size should be positive".into(),
        ));
    }
    let region = MappedRegion::open(path, file_size)?;
    let stride = stride_for(record_size);
    region.ensure_len(BUS_HEADER_SIZE + stride)?;
    if region.atomic_u64(LIMIT_OFFSET).is_none() {
        return Err(Error::Config(format!(
            "miss bus {:?} is not aligned for header access",
            path
        )));
    }
    Ok((region, stride))
}

fn limit_of(region: &MappedRegion) -> &AtomicU64 {
    region
        .atomic_u64(LIMIT_OFFSET)
        .unwrap_or_else(|| unreachable!("bus header checked at open"))
}

/// Producer side of the mapped miss bus
#[derive(Debug)]
pub struct MappedBusWriter {
    region: MappedRegion,
    record_size: usize,
    stride: u64,
}

impl MappedBusWriter {
    /// Open the bus file.
    ///
    /// With `append` the existing records are kept; otherwise the bus is
    /// truncated and every record slot cleared.
    pub fn open(
        path: impl AsRef<Path>,
        file_size: u64,
        record_size: usize,
        append: bool,
    ) -> Result<Self> {
        let path = path.as_ref();
        let (region, stride) = open_bus(path, file_size, record_size)?;
        let limit = limit_of(&region);

        if append {
            let current = limit.load(Ordering::Acquire);
            if current == 0 {
                limit.store(BUS_HEADER_SIZE, Ordering::Release);
            } else if current < BUS_HEADER_SIZE
                || current > region.len()
                || (current - BUS_HEADER_SIZE) % stride != 0
            {
                return Err(Error::Config(format!(
                    "miss bus {:?} has limit {} inconsistent with record size {}",
                    path, current, record_size
                )));
            }
        } else {
            let body = (region.len() - BUS_HEADER_SIZE) as usize;
            region
                .zero(BUS_HEADER_SIZE, body)
                .ok_or_else(|| Error::Config(format!("miss bus {:?} cannot be cleared", path)))?;
            limit.store(BUS_HEADER_SIZE, Ordering::Release);
        }

        info!(
            path = ?path,
            record_size,
            append,
            capacity = (region.len() - BUS_HEADER_SIZE) / stride,
            "opened miss bus writer"
        );
        Ok(Self {
            region,
            record_size,
            stride,
        })
    }

    /// Maximum payload per record
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Total records the file can hold
    pub fn capacity(&self) -> u64 {
        (self.region.len() - BUS_HEADER_SIZE) / self.stride
    }

    /// Records reserved so far
    pub fn len(&self) -> u64 {
        (limit_of(&self.region).load(Ordering::Acquire) - BUS_HEADER_SIZE) / self.stride
    }

    /// Check if no record was written
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn reserve(&self) -> Result<u64> {
        let limit = limit_of(&self.region);
        let mut current = limit.load(Ordering::Acquire);
        loop {
            let next = current.checked_add(self.stride).ok_or(Error::ChannelFull)?;
            if next > self.region.len() {
                return Err(Error::ChannelFull);
            }
            match limit.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(current),
                Err(actual) => current = actual,
            }
        }
    }

    fn commit_word(&self, record: u64) -> Result<&AtomicU32> {
        self.region
            .atomic_u32(record)
            .ok_or_else(|| Error::Config(format!("miss bus record at {} misaligned", record)))
    }

    fn fill(&self, record: u64, payload: &[u8]) -> Result<()> {
        let commit = self.commit_word(record)?;

        let mut frame = Vec::with_capacity((self.stride - 4) as usize);
        frame.extend_from_slice(&0u32.to_ne_bytes());
        frame.extend_from_slice(&(payload.len() as u32).to_ne_bytes());
        frame.extend_from_slice(payload);
        frame.resize((self.stride - 4) as usize, 0);
        self.region
            .write_bytes(record + ROLLBACK_FIELD, &frame)
            .ok_or(Error::ChannelFull)?;

        commit.store(1, Ordering::Release);
        Ok(())
    }

    /// Publish a reserved record as rolled back so readers step over it
    fn abandon(&self, record: u64) {
        let rolled_back = self
            .region
            .write_bytes(record + ROLLBACK_FIELD, &1u32.to_ne_bytes())
            .is_some();
        match self.region.atomic_u32(record) {
            Some(commit) if rolled_back => commit.store(1, Ordering::Release),
            _ => warn!(record, "reserved miss record could not be rolled back"),
        }
    }
}

impl MissChannel for MappedBusWriter {
    fn send(&self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.record_size {
            return Err(Error::RecordTooLarge {
                len: payload.len(),
                record_size: self.record_size,
            });
        }

        let record = self.reserve()?;
        self.fill(record, payload).inspect_err(|_| self.abandon(record))
    }
}

/// Consumer side of the mapped miss bus
#[derive(Debug)]
pub struct MappedBusReader {
    region: MappedRegion,
    stride: u64,
    position: u64,
    rollback_timeout: Duration,
    stalled: Option<(u64, Instant)>,
}

impl MappedBusReader {
    /// Open the bus file for draining, starting at the first record
    pub fn open(path: impl AsRef<Path>, file_size: u64, record_size: usize) -> Result<Self> {
        let (region, stride) = open_bus(path.as_ref(), file_size, record_size)?;
        Ok(Self {
            region,
            stride,
            position: BUS_HEADER_SIZE,
            rollback_timeout: DEFAULT_ROLLBACK_TIMEOUT,
            stalled: None,
        })
    }

    /// Change how long an uncommitted record may block the reader
    pub fn with_rollback_timeout(mut self, timeout: Duration) -> Self {
        self.rollback_timeout = timeout;
        self
    }

    /// Offset of the next record to read
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Next committed record, or `None` if the reader has caught up.
    ///
    /// A reserved but not yet committed record also yields `None`; calling
    /// again later resumes at the same record. Once that record has stayed
    /// uncommitted for the rollback timeout it is marked rolled back and
    /// skipped. Rolled-back records are never returned.
    pub fn next_record(&mut self) -> Option<Vec<u8>> {
        loop {
            let limit = limit_of(&self.region).load(Ordering::Acquire);
            if self.position + self.stride > limit {
                return None;
            }
            let commit = self.region.atomic_u32(self.position)?;
            if commit.load(Ordering::Acquire) != 1 {
                if !self.stalled_too_long() {
                    return None;
                }
                warn!(record = self.position, "rolling back uncommitted miss record");
                self.region
                    .write_bytes(self.position + ROLLBACK_FIELD, &1u32.to_ne_bytes())?;
                self.position += self.stride;
                self.stalled = None;
                continue;
            }
            self.stalled = None;

            let mut word = [0u8; 4];
            self.region
                .read_into(self.position + ROLLBACK_FIELD, &mut word)?;
            let rolled_back = u32::from_ne_bytes(word) != 0;
            self.region.read_into(self.position + LENGTH_FIELD, &mut word)?;
            let len = u32::from_ne_bytes(word) as usize;

            let record = self.position;
            self.position += self.stride;
            if rolled_back {
                continue;
            }
            let max = (self.stride - RECORD_HEADER_SIZE) as usize;
            return self
                .region
                .read_vec(record + RECORD_HEADER_SIZE, len.min(max));
        }
    }

    /// Track how long the current record has been uncommitted
    fn stalled_too_long(&mut self) -> bool {
        let now = Instant::now();
        let since = match self.stalled {
            Some((record, since)) if record == self.position => since,
            _ => {
                self.stalled = Some((self.position, now));
                now
            }
        };
        now.duration_since(since) >= self.rollback_timeout
    }

    /// Collect up to `max` committed records
    pub fn drain(&mut self, max: usize) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while out.len() < max {
            match self.next_record() {
                Some(r) => out.push(r),
                None => break,
            }
        }
        out
    }
}

// =============================================================================
// Tests
// =============================================================================
