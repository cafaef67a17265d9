//! Error types for the columnlet cache reader

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while opening or reading the columnlet cache
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid construction parameter
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    // =========================================================================
    // Mapped Region Errors
    // =========================================================================
    /// Mapped region is smaller than its layout requires
    #[error("Region {path:?} too small: need {required} bytes, have {actual}")]
    RegionTooSmall {
        path: PathBuf,
        required: u64,
        actual: u64,
    },

    /// Corrupt or out-of-range data met while walking the index
    #[error("Malformed index at offset {offset}: {reason}")]
    MalformedIndex { offset: u64, reason: String },

    /// Locator points outside the content region
    #[error("Content entry at offset {offset} (length {length}) exceeds region of {region_len} bytes")]
    ContentOutOfBounds {
        offset: u64,
        length: u32,
        region_len: u64,
    },

    /// Key set cannot be expressed in the node layout
    #[error("Index build failed: {0}")]
    IndexBuild(String),

    // =========================================================================
    // Miss Channel Errors
    // =========================================================================
    /// Channel has no room for another record
    #[error("Miss channel is full")]
    ChannelFull,

    /// Consumer side of the channel is gone
    #[error("Miss channel is closed")]
    ChannelClosed,

    /// Payload does not fit in one record
    #[error("Record of {len} bytes exceeds record size {record_size}")]
    RecordTooLarge { len: usize, record_size: usize },

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    /// Metric registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl Error {
    pub(crate) fn malformed(offset: u64, reason: impl Into<String>) -> Self {
        Error::MalformedIndex {
            offset,
            reason: reason.into(),
        }
    }
}
