//! Content Store
//!
//! Memory-mapped region holding cached columnlet bytes. Entries have no
//! framing of their own; the index supplies every offset and length.
//!
//! In the current layout each entry starts with a 4-byte access counter and
//! the payload follows it. The counter only feeds the external eviction
//! policy and is bumped with a relaxed fetch-and-add.

use std::sync::Arc;

use bytes::Bytes;

use super::entry::CacheEntryLocator;
use super::layout::IndexFormat;
use super::region::MappedRegion;
use crate::error::{Error, Result};

/// Cached payload bytes addressed by index locators
#[derive(Debug, Clone)]
pub struct ContentStore {
    region: Arc<MappedRegion>,
    format: IndexFormat,
}

impl ContentStore {
    /// Wrap a content region using the given entry layout
    pub fn new(region: Arc<MappedRegion>, format: IndexFormat) -> Self {
        Self { region, format }
    }

    /// Underlying region
    pub fn region(&self) -> &Arc<MappedRegion> {
        &self.region
    }

    /// Bump the entry's access counter and copy its payload out.
    ///
    /// Legacy-layout entries carry no counter prefix; their counter lives in
    /// the index slot and is bumped by the index store instead.
    pub fn read_and_touch(&self, locator: &CacheEntryLocator) -> Result<Bytes> {
        let prefix = self.format.content_prefix();
        let payload_at = self.payload_range(locator, prefix)?;

        if prefix > 0 {
            self.region
                .bump_u32(locator.offset())
                .ok_or_else(|| self.out_of_bounds(locator))?;
        }

        self.region
            .read_vec(payload_at, locator.length() as usize)
            .map(Bytes::from)
            .ok_or_else(|| self.out_of_bounds(locator))
    }

    /// Current access counter of the entry at `offset` (current layout)
    pub fn access_count(&self, offset: u64) -> Option<u32> {
        match self.format {
            IndexFormat::Current => self.region.load_u32(offset),
            IndexFormat::Legacy => None,
        }
    }

    /// Write an entry at `offset` with a zeroed counter.
    ///
    /// Writer-side helper; readers never call it.
    pub fn put(&self, offset: u64, payload: &[u8]) -> Result<()> {
        let prefix = self.format.content_prefix();
        let locator = CacheEntryLocator::new(offset, payload.len() as u32);
        let payload_at = self.payload_range(&locator, prefix)?;
        if prefix > 0 {
            self.region
                .write_bytes(offset, &0u32.to_ne_bytes())
                .ok_or_else(|| self.out_of_bounds(&locator))?;
        }
        self.region
            .write_bytes(payload_at, payload)
            .ok_or_else(|| self.out_of_bounds(&locator))
    }

    fn payload_range(&self, locator: &CacheEntryLocator, prefix: u64) -> Result<u64> {
        let payload_at = locator
            .offset()
            .checked_add(prefix)
            .ok_or_else(|| self.out_of_bounds(locator))?;
        if !self
            .region
            .contains(payload_at, locator.length() as usize)
        {
            return Err(self.out_of_bounds(locator));
        }
        Ok(payload_at)
    }

    fn out_of_bounds(&self, locator: &CacheEntryLocator) -> Error {
        Error::ContentOutOfBounds {
            offset: locator.offset(),
            length: locator.length(),
            region_len: self.region.len(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
