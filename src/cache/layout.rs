//! Index Region Layout
//!
//! Byte-level records shared by every process that maps the index.
//!
//! ```text
//! index region
//! ┌──────────┬─────────────┬──────────┬───────────────────────────────┐
//! │ rw_flag  │ reader_count│ reserved │ trie area (root at offset 0)  │
//! │ u16      │ u16         │ 12 bytes │                               │
//! └──────────┴─────────────┴──────────┴───────────────────────────────┘
//!
//! trie node
//! ┌────────┬──────────────────────────┬──────────────┬──────────────┐
//! │ header │ children[n] (8 bytes BE) │ edge[len]    │ value slot?  │
//! │ 2 bytes│ branch:8 | offset:56     │              │              │
//! └────────┴──────────────────────────┴──────────────┴──────────────┘
//! ```

use serde::{Deserialize, Serialize};

/// Bytes reserved at the head of the index region before the trie area
pub const INDEX_HEADER_SIZE: u64 = 16;

/// Offset of the writer flag in the index region
pub const RW_FLAG_OFFSET: u64 = 0;

/// Offset of the in-flight reader counter in the index region
pub const READER_COUNT_OFFSET: u64 = 2;

/// Reader counter ceiling. Matches a signed 16-bit maximum so writers that
/// treat the field as signed agree on saturation.
pub const READER_COUNT_CEILING: u16 = i16::MAX as u16;

/// Size of a node header
pub const NODE_HEADER_SIZE: u64 = 2;

/// Size of one child slot
pub const CHILD_SLOT_SIZE: u64 = 8;

/// Longest edge one node can carry
pub const MAX_EDGE_LEN: usize = 0x7F;

/// Most children one node can carry
pub const MAX_CHILDREN: usize = 255;

/// Mask selecting the child offset bits of a child slot
pub const CHILD_OFFSET_MASK: u64 = 0x00FF_FFFF_FFFF_FFFF;

/// Size of the access counter prefixed to each content entry (current layout)
pub const CONTENT_COUNTER_SIZE: u64 = 4;

const HAS_VALUE_BIT: u8 = 0x80;
const EDGE_LEN_MASK: u8 = 0x7F;

/// Value-slot layout used by a deployment.
///
/// Nothing in the index header identifies the layout, so it is fixed by
/// configuration when the region is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexFormat {
    /// `{offset: u64, length: u32}`; access counter lives in the content store
    #[default]
    Current,
    /// `{offset: u64, timestamp: u64, length: u32, counter: u32}`; counter inline
    Legacy,
}

impl IndexFormat {
    /// Bytes occupied by one value slot
    #[inline]
    pub const fn value_slot_size(self) -> u64 {
        match self {
            IndexFormat::Current => 12,
            IndexFormat::Legacy => 24,
        }
    }

    /// Bytes preceding the payload of a content entry
    #[inline]
    pub const fn content_prefix(self) -> u64 {
        match self {
            IndexFormat::Current => CONTENT_COUNTER_SIZE,
            IndexFormat::Legacy => 0,
        }
    }
}

impl std::fmt::Display for IndexFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexFormat::Current => write!(f, "current"),
            IndexFormat::Legacy => write!(f, "legacy"),
        }
    }
}

/// Decoded 2-byte node header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    raw: [u8; 2],
}

impl NodeHeader {
    /// Wrap raw header bytes
    #[inline]
    pub const fn from_bytes(raw: [u8; 2]) -> Self {
        Self { raw }
    }

    /// Build a header; caller guarantees `edge_len <= 127` and `children <= 255`
    pub fn new(has_value: bool, edge_len: usize, children: usize) -> Self {
        debug_assert!(edge_len <= MAX_EDGE_LEN);
        debug_assert!(children <= MAX_CHILDREN);
        let mut b0 = (edge_len as u8) & EDGE_LEN_MASK;
        if has_value {
            b0 |= HAS_VALUE_BIT;
        }
        // Stored as a signed byte holding `children - 128`.
        let b1 = ((children as i16) - 128) as i8 as u8;
        Self { raw: [b0, b1] }
    }

    /// Raw header bytes
    #[inline]
    pub const fn to_bytes(self) -> [u8; 2] {
        self.raw
    }

    /// Whether a value slot follows the edge
    #[inline]
    pub const fn has_value(self) -> bool {
        self.raw[0] & HAS_VALUE_BIT != 0
    }

    /// Edge length in bytes.
    ///
    /// Decoded with `& 0x7F`. One historical writer decoded with `| 0x7F`,
    /// which makes every edge 127 bytes long; indexes relying on that are
    /// not readable here.
    #[inline]
    pub const fn edge_len(self) -> usize {
        (self.raw[0] & EDGE_LEN_MASK) as usize
    }

    /// Number of child slots
    #[inline]
    pub const fn children(self) -> usize {
        (self.raw[1] as i8 as i16 + 128) as usize
    }

    /// Total node size for the given value-slot layout
    #[inline]
    pub const fn node_size(self, format: IndexFormat) -> u64 {
        let mut size = NODE_HEADER_SIZE
            + self.children() as u64 * CHILD_SLOT_SIZE
            + self.edge_len() as u64;
        if self.has_value() {
            size += format.value_slot_size();
        }
        size
    }
}

/// One 8-byte child pointer: branch byte in the top 8 bits, offset in the low 56
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildSlot(u64);

impl ChildSlot {
    /// Decode from the big-endian on-disk value
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Pack a branch byte and child offset; `None` if the offset needs more than 56 bits
    pub fn new(branch: u8, child_offset: u64) -> Option<Self> {
        if child_offset & !CHILD_OFFSET_MASK != 0 {
            return None;
        }
        Some(Self(((branch as u64) << 56) | child_offset))
    }

    /// Raw packed value
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Key byte selecting this child
    #[inline]
    pub const fn branch_byte(self) -> u8 {
        (self.0 >> 56) as u8
    }

    /// Trie offset of the child node
    #[inline]
    pub const fn child_offset(self) -> u64 {
        self.0 & CHILD_OFFSET_MASK
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_empty_sentinel() {
        let h = NodeHeader::new(false, 0, 0);
        assert_eq!(h.to_bytes(), [0x00, 0x80]);
        assert!(!h.has_value());
        assert_eq!(h.edge_len(), 0);
        assert_eq!(h.children(), 0);
    }

    #[test]
    fn test_header_children_signed_encoding() {
        assert_eq!(NodeHeader::from_bytes([0, 0x00]).children(), 128);
        assert_eq!(NodeHeader::from_bytes([0, 0x7F]).children(), 255);
        assert_eq!(NodeHeader::from_bytes([0, 0x81]).children(), 1);
        for n in 0..=MAX_CHILDREN {
            assert_eq!(NodeHeader::new(false, 0, n).children(), n);
        }
    }

    #[test]
    fn test_header_value_flag_and_edge() {
        let h = NodeHeader::new(true, 127, 3);
        assert!(h.has_value());
        assert_eq!(h.edge_len(), 127);
        assert_eq!(h.children(), 3);

        let h = NodeHeader::from_bytes([0x85, 0x80]);
        assert!(h.has_value());
        assert_eq!(h.edge_len(), 5);
    }

    #[test]
    fn test_node_size() {
        let h = NodeHeader::new(true, 4, 2);
        assert_eq!(h.node_size(IndexFormat::Current), 2 + 16 + 4 + 12);
        assert_eq!(h.node_size(IndexFormat::Legacy), 2 + 16 + 4 + 24);
        assert_eq!(NodeHeader::new(false, 0, 0).node_size(IndexFormat::Current), 2);
    }

    #[test]
    fn test_child_slot_packing() {
        let slot = ChildSlot::new(0xAB, 0x0012_3456_789A_BCDE).unwrap();
        assert_eq!(slot.branch_byte(), 0xAB);
        assert_eq!(slot.child_offset(), 0x0012_3456_789A_BCDE);
        assert_eq!(slot.raw().to_be_bytes()[0], 0xAB);

        assert!(ChildSlot::new(1, 1 << 56).is_none());
        assert!(ChildSlot::new(1, CHILD_OFFSET_MASK).is_some());
    }

    #[test]
    fn test_child_slot_from_raw_masks_offset() {
        let slot = ChildSlot::from_raw(0xFF00_0000_0000_0040);
        assert_eq!(slot.branch_byte(), 0xFF);
        assert_eq!(slot.child_offset(), 0x40);
    }

    #[test]
    fn test_format_sizes() {
        assert_eq!(IndexFormat::Current.value_slot_size(), 12);
        assert_eq!(IndexFormat::Legacy.value_slot_size(), 24);
        assert_eq!(IndexFormat::Current.content_prefix(), 4);
        assert_eq!(IndexFormat::Legacy.content_prefix(), 0);
        assert_eq!(IndexFormat::default(), IndexFormat::Current);
    }

    #[test]
    fn test_reader_ceiling() {
        assert_eq!(READER_COUNT_CEILING, 32767);
    }
}
