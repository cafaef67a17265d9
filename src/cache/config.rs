//! Reader Configuration
//!
//! Locations and sizes of the mapped regions plus miss-channel parameters.
//! Typically loaded from YAML:
//!
//! ```yaml
//! index:
//!   path: /dev/shm/columnlet.index
//!   size: 104857600
//! content:
//!   path: /dev/shm/columnlet.cache
//!   size: 10737418240
//! miss_channel:
//!   path: /dev/shm/columnlet.mq
//!   file_size: 16777216
//!   record_size: 16
//!   append: true
//! format: current
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::entry::KEY_SIZE;
use super::layout::{IndexFormat, INDEX_HEADER_SIZE, NODE_HEADER_SIZE};
use crate::error::{Error, Result};

/// Default miss record size: one serialized key
pub const DEFAULT_MQ_RECORD_SIZE: usize = KEY_SIZE;

fn default_record_size() -> usize {
    DEFAULT_MQ_RECORD_SIZE
}

/// One memory-mapped file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Backing file
    pub path: PathBuf,
    /// Bytes to map
    pub size: u64,
}

/// Mapped miss bus parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissChannelConfig {
    /// Bus file
    pub path: PathBuf,
    /// Bytes to map
    pub file_size: u64,
    /// Payload bytes per record
    #[serde(default = "default_record_size")]
    pub record_size: usize,
    /// Keep existing records instead of truncating the bus.
    ///
    /// Defaults to truncating, which suits the long-lived reader that owns
    /// the bus. The `colcache` CLI always appends.
    #[serde(default)]
    pub append: bool,
}

/// Everything needed to open a [`CacheReader`](super::CacheReader)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheReaderConfig {
    /// Index region
    pub index: RegionConfig,
    /// Content region
    pub content: RegionConfig,
    /// Miss bus; misses are dropped when absent
    #[serde(default)]
    pub miss_channel: Option<MissChannelConfig>,
    /// Value-slot layout of the index
    #[serde(default)]
    pub format: IndexFormat,
}

impl CacheReaderConfig {
    /// Parse a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Check every parameter before anything is mapped
    pub fn validate(&self) -> Result<()> {
        check(!self.content.path.as_os_str().is_empty(), "location should not be empty")?;
        check(self.content.size > 0, "size should be positive")?;
        check(
            !self.index.path.as_os_str().is_empty(),
            "index location should not be empty",
        )?;
        check(self.index.size > 0, "index size should be positive")?;
        check(
            self.index.size >= INDEX_HEADER_SIZE + NODE_HEADER_SIZE,
            "index size should hold the header and a root node",
        )?;
        if let Some(mq) = &self.miss_channel {
            check(!mq.path.as_os_str().is_empty(), "location should not be empty")?;
            check(mq.file_size > 0, "message queue file size should be positive")?;
            check(
                mq.record_size > 0,
                "message queue record size should be positive",
            )?;
        }
        Ok(())
    }
}

fn check(condition: bool, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::Config(message.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================
