//! Radix Index Store
//!
//! Read side of the PATRICIA trie kept in the mapped index region.
//!
//! # Lookup
//!
//! Traversal is iterative and starts at the root (trie offset 0). Each node
//! first has its compressed edge compared against the unmatched key suffix;
//! then either the key is exhausted (terminal node) or the next key byte picks
//! a child. Every descent consumes one key byte, so a lookup touches at most
//! `key.len() + 1` nodes even if a corrupt child pointer forms a cycle.
//!
//! The hot path copies into fixed stack buffers only and never writes to the
//! index.

use std::sync::Arc;

use tracing::warn;

use super::entry::{CacheEntryLocator, LegacySlot};
use super::layout::{
    ChildSlot, IndexFormat, NodeHeader, CHILD_SLOT_SIZE, INDEX_HEADER_SIZE, MAX_EDGE_LEN,
    NODE_HEADER_SIZE,
};
use super::region::MappedRegion;
use crate::error::{Error, Result};

/// Read-only view of the radix trie in an index region
#[derive(Debug, Clone)]
pub struct RadixIndexStore {
    region: Arc<MappedRegion>,
    format: IndexFormat,
}

impl RadixIndexStore {
    /// Wrap an index region using the given value-slot layout
    pub fn new(region: Arc<MappedRegion>, format: IndexFormat) -> Result<Self> {
        // Header plus an empty root node.
        region.ensure_len(INDEX_HEADER_SIZE + NODE_HEADER_SIZE)?;
        Ok(Self { region, format })
    }

    /// Value-slot layout in use
    pub fn format(&self) -> IndexFormat {
        self.format
    }

    /// Underlying region
    pub fn region(&self) -> &Arc<MappedRegion> {
        &self.region
    }

    /// Find the value slot stored for `key`.
    ///
    /// Malformed index data is logged and reported as `None`.
    pub fn lookup(&self, key: &[u8]) -> Option<CacheEntryLocator> {
        match self.try_lookup(key) {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "index traversal aborted");
                None
            }
        }
    }

    /// Find the value slot stored for `key`, surfacing malformed index data
    pub fn try_lookup(&self, key: &[u8]) -> Result<Option<CacheEntryLocator>> {
        let mut node: u64 = 0;
        let mut matched: usize = 0;
        let mut edge = [0u8; MAX_EDGE_LEN];

        loop {
            let header = self.read_header(node)?;
            let children = header.children() as u64;
            let edge_len = header.edge_len();
            let edge_start = node + NODE_HEADER_SIZE + children * CHILD_SLOT_SIZE;

            if edge_len > 0 {
                let remaining = &key[matched..];
                if remaining.len() < edge_len {
                    return Ok(None);
                }
                let edge = &mut edge[..edge_len];
                self.read(edge_start, edge)?;
                if edge[..] != remaining[..edge_len] {
                    return Ok(None);
                }
                matched += edge_len;
            }

            if matched == key.len() {
                if !header.has_value() {
                    return Ok(None);
                }
                return self
                    .read_value(edge_start + edge_len as u64)
                    .map(Some);
            }

            let next = key[matched];
            match self.find_child(node + NODE_HEADER_SIZE, children, next)? {
                Some(child) => {
                    node = child.child_offset();
                    matched += 1;
                }
                None => return Ok(None),
            }
        }
    }

    /// Bump the inline access counter of a legacy-layout slot.
    ///
    /// Current-layout locators keep their counter in the content store, so
    /// this is a no-op for them.
    pub fn record_access(&self, locator: &CacheEntryLocator) -> Option<u32> {
        let legacy = locator.legacy()?;
        self.region
            .bump_u32(INDEX_HEADER_SIZE + legacy.counter_offset)
    }

    fn find_child(&self, slots_start: u64, children: u64, byte: u8) -> Result<Option<ChildSlot>> {
        for i in 0..children {
            let slot_offset = slots_start + i * CHILD_SLOT_SIZE;
            let mut raw = [0u8; 8];
            self.read(slot_offset, &mut raw)?;
            let slot = ChildSlot::from_raw(u64::from_be_bytes(raw));
            if slot.branch_byte() == byte {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    fn read_header(&self, node: u64) -> Result<NodeHeader> {
        let mut raw = [0u8; 2];
        self.read(node, &mut raw)?;
        Ok(NodeHeader::from_bytes(raw))
    }

    fn read_value(&self, slot: u64) -> Result<CacheEntryLocator> {
        let offset = self.read_u64(slot)?;
        match self.format {
            IndexFormat::Current => {
                let length = self.read_u32(slot + 8)?;
                Ok(CacheEntryLocator::new(offset, length))
            }
            IndexFormat::Legacy => {
                let inserted_at_millis = self.read_u64(slot + 8)?;
                let length = self.read_u32(slot + 16)?;
                let counter_offset = slot + 20;
                let access_count = self
                    .region
                    .load_u32(INDEX_HEADER_SIZE + counter_offset)
                    .ok_or_else(|| Error::malformed(counter_offset, "counter out of range"))?;
                Ok(CacheEntryLocator::with_legacy(
                    offset,
                    length,
                    LegacySlot {
                        inserted_at_millis,
                        access_count,
                        counter_offset,
                    },
                ))
            }
        }
    }

    /// Copy trie bytes at trie offset `at` into `buf`
    fn read(&self, at: u64, buf: &mut [u8]) -> Result<()> {
        let abs = at
            .checked_add(INDEX_HEADER_SIZE)
            .ok_or_else(|| Error::malformed(at, "offset overflow"))?;
        self.region
            .read_into(abs, buf)
            .ok_or_else(|| Error::malformed(at, format!("{} bytes past end of region", buf.len())))
    }

    fn read_u64(&self, at: u64) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read(at, &mut b)?;
        Ok(u64::from_be_bytes(b))
    }

    fn read_u32(&self, at: u64) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read(at, &mut b)?;
        Ok(u32::from_be_bytes(b))
    }
}

// =============================================================================
// Tests
// =============================================================================
