//! Cache Key and Locator Types
//!
//! Fixed-width search keys for the radix index and the resolved content
//! locations a successful lookup produces.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};

/// Serialized key width in bytes
pub const KEY_SIZE: usize = 16;

/// Identifier of one columnlet: a column chunk of one row group in one data file
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnletKey {
    /// Data file (block) id
    file_id: u64,
    /// Row group within the file
    row_group_id: u16,
    /// Column within the row group
    column_id: u16,
}

impl ColumnletKey {
    /// Create a new columnlet key
    pub fn new(file_id: u64, row_group_id: u16, column_id: u16) -> Self {
        Self {
            file_id,
            row_group_id,
            column_id,
        }
    }

    /// Get the file id
    #[inline]
    pub fn file_id(&self) -> u64 {
        self.file_id
    }

    /// Get the row group id
    #[inline]
    pub fn row_group_id(&self) -> u16 {
        self.row_group_id
    }

    /// Get the column id
    #[inline]
    pub fn column_id(&self) -> u16 {
        self.column_id
    }

    /// Canonical big-endian encoding used as the trie search key.
    ///
    /// The two narrow ids are zero-extended to 32 bits so the key fills
    /// exactly [`KEY_SIZE`] bytes.
    #[inline]
    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        let mut out = [0u8; KEY_SIZE];
        out[0..8].copy_from_slice(&self.file_id.to_be_bytes());
        out[8..12].copy_from_slice(&u32::from(self.row_group_id).to_be_bytes());
        out[12..16].copy_from_slice(&u32::from(self.column_id).to_be_bytes());
        out
    }

    /// Decode a key produced by [`ColumnletKey::to_bytes`].
    ///
    /// Returns `None` when the slice has the wrong width or the narrow ids
    /// overflow 16 bits.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; KEY_SIZE] = bytes.try_into().ok()?;
        let file_id = u64::from_be_bytes(bytes[0..8].try_into().ok()?);
        let row_group = u32::from_be_bytes(bytes[8..12].try_into().ok()?);
        let column = u32::from_be_bytes(bytes[12..16].try_into().ok()?);
        Some(Self {
            file_id,
            row_group_id: u16::try_from(row_group).ok()?,
            column_id: u16::try_from(column).ok()?,
        })
    }
}

impl fmt::Display for ColumnletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.file_id, self.row_group_id, self.column_id
        )
    }
}

/// Extra slot fields carried by the legacy index layout
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LegacySlot {
    /// Insertion time, milliseconds since the Unix epoch
    pub inserted_at_millis: u64,
    /// Access counter as read from the slot
    pub access_count: u32,
    /// Index-region offset of the inline counter
    pub(crate) counter_offset: u64,
}

impl LegacySlot {
    /// Insertion time as a UTC timestamp
    pub fn inserted_at(&self) -> Option<DateTime<Utc>> {
        let millis = i64::try_from(self.inserted_at_millis).ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }
}

/// Location of one cached payload inside the content region.
///
/// Only meaningful for the read that produced it: the next index rebuild may
/// reuse the bytes it points to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheEntryLocator {
    offset: u64,
    length: u32,
    legacy: Option<LegacySlot>,
}

impl CacheEntryLocator {
    /// Create a locator for the current layout
    pub fn new(offset: u64, length: u32) -> Self {
        Self {
            offset,
            length,
            legacy: None,
        }
    }

    pub(crate) fn with_legacy(offset: u64, length: u32, legacy: LegacySlot) -> Self {
        Self {
            offset,
            length,
            legacy: Some(legacy),
        }
    }

    /// Entry offset in the content region
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Payload length in bytes
    #[inline]
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Access counter stored in the index (legacy layout only)
    #[inline]
    pub fn access_count(&self) -> Option<u32> {
        self.legacy.map(|l| l.access_count)
    }

    /// Legacy slot details, if the index uses the legacy layout
    #[inline]
    pub fn legacy(&self) -> Option<&LegacySlot> {
        self.legacy.as_ref()
    }
}

// =============================================================================
// Tests
// =============================================================================
