//! Cache Reader
//!
//! The façade query workers call to fetch one columnlet.
//!
//! ```text
//! get(key)
//!   └─ coordinator.enter() ── refused ──▶ empty
//!        └─ index.lookup(key bytes)
//!             ├─ hit  ─▶ content.read_and_touch(locator) ─▶ bytes
//!             └─ miss ─▶ miss_channel.report(key)         ─▶ empty
//!   └─ coordinator.leave()   (guard drop, every path)
//! ```
//!
//! Every failure after admission resolves to a miss; nothing is retried here.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::config::{CacheReaderConfig, MissChannelConfig, RegionConfig, DEFAULT_MQ_RECORD_SIZE};
use super::content::ContentStore;
use super::coordinator::{ReadCoordinator, Unavailable};
use super::entry::ColumnletKey;
use super::index::RadixIndexStore;
use super::layout::IndexFormat;
use super::metrics::ReaderMetrics;
use super::region::MappedRegion;
use crate::error::Result;
use crate::mq::{MappedBusWriter, MissChannel, NullMissChannel};

/// Result of one read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Payload served from the content store
    Hit(Bytes),
    /// Key not cached (or index/content data was unusable)
    Miss,
    /// Read refused by the coordinator
    Unavailable(Unavailable),
}

impl ReadOutcome {
    /// Payload on a hit, empty otherwise
    pub fn into_bytes(self) -> Bytes {
        match self {
            ReadOutcome::Hit(bytes) => bytes,
            ReadOutcome::Miss | ReadOutcome::Unavailable(_) => Bytes::new(),
        }
    }

    /// Check if the read was served from the cache
    pub fn is_hit(&self) -> bool {
        matches!(self, ReadOutcome::Hit(_))
    }
}

/// Reader over a shared columnlet cache
pub struct CacheReader {
    index: RadixIndexStore,
    content: ContentStore,
    coordinator: ReadCoordinator,
    miss_channel: Arc<dyn MissChannel>,
    metrics: ReaderMetrics,
}

impl std::fmt::Debug for CacheReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheReader")
            .field("index", &self.index.region().path())
            .field("content", &self.content.region().path())
            .field("format", &self.index.format())
            .finish()
    }
}

impl CacheReader {
    /// Start building a reader
    pub fn builder() -> CacheReaderBuilder {
        CacheReaderBuilder::default()
    }

    /// Open every region named by `config`
    pub fn open(config: &CacheReaderConfig) -> Result<Self> {
        Self::open_with(config, None, ReaderMetrics::new())
    }

    fn open_with(
        config: &CacheReaderConfig,
        channel: Option<Arc<dyn MissChannel>>,
        metrics: ReaderMetrics,
    ) -> Result<Self> {
        config.validate()?;

        let miss_channel: Arc<dyn MissChannel> = match (channel, &config.miss_channel) {
            (Some(channel), _) => channel,
            (None, Some(mq)) => Arc::new(MappedBusWriter::open(
                &mq.path,
                mq.file_size,
                mq.record_size,
                mq.append,
            )?),
            (None, None) => {
                warn!("no miss channel configured, misses will not reach the populator");
                Arc::new(NullMissChannel)
            }
        };

        let content_region = Arc::new(MappedRegion::open(&config.content.path, config.content.size)?);
        let index_region = Arc::new(MappedRegion::open(&config.index.path, config.index.size)?);

        let reader = Self::new(
            RadixIndexStore::new(index_region, config.format)?,
            ContentStore::new(content_region, config.format),
            miss_channel,
        )?
        .with_metrics(metrics);

        info!(
            index = ?config.index.path,
            content = ?config.content.path,
            format = %config.format,
            "cache reader ready"
        );
        Ok(reader)
    }

    /// Assemble a reader from already opened parts.
    ///
    /// The coordinator is taken from the head of the index region.
    pub fn new(
        index: RadixIndexStore,
        content: ContentStore,
        miss_channel: Arc<dyn MissChannel>,
    ) -> Result<Self> {
        let coordinator = ReadCoordinator::new(index.region().clone())?;
        Ok(Self {
            index,
            content,
            coordinator,
            miss_channel,
            metrics: ReaderMetrics::new(),
        })
    }

    /// Replace the metrics handle
    pub fn with_metrics(mut self, metrics: ReaderMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Fetch one columnlet; empty when not cached or temporarily unavailable
    pub fn get(&self, key: &ColumnletKey) -> Bytes {
        self.read(key).into_bytes()
    }

    /// Fetch one columnlet and report how the read went
    pub fn read(&self, key: &ColumnletKey) -> ReadOutcome {
        let _guard = match self.coordinator.enter() {
            Ok(guard) => guard,
            Err(reason) => {
                self.metrics.record_unavailable(reason);
                debug!(key = %key, %reason, "index unavailable");
                return ReadOutcome::Unavailable(reason);
            }
        };

        let locator = match self.index.try_lookup(&key.to_bytes()) {
            Ok(Some(locator)) => locator,
            Ok(None) => {
                self.report_miss(key);
                return ReadOutcome::Miss;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "index lookup aborted");
                self.metrics.record_malformed();
                self.report_miss(key);
                return ReadOutcome::Miss;
            }
        };

        match self.content.read_and_touch(&locator) {
            Ok(bytes) => {
                // Legacy counters live in the index; only served reads count.
                self.index.record_access(&locator);
                self.metrics.record_hit(bytes.len());
                ReadOutcome::Hit(bytes)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "content read aborted");
                self.metrics.record_malformed();
                self.report_miss(key);
                ReadOutcome::Miss
            }
        }
    }

    fn report_miss(&self, key: &ColumnletKey) {
        self.metrics.record_miss();
        debug!(key = %key, "cache miss");
        if let Err(e) = self.miss_channel.report(key) {
            self.metrics.record_miss_report_failure();
            debug!(key = %key, error = %e, "miss report dropped");
        }
    }

    /// Read-path counters
    pub fn metrics(&self) -> &ReaderMetrics {
        &self.metrics
    }

    /// Coordinator over the index header
    pub fn coordinator(&self) -> &ReadCoordinator {
        &self.coordinator
    }

    /// Index store
    pub fn index(&self) -> &RadixIndexStore {
        &self.index
    }

    /// Content store
    pub fn content(&self) -> &ContentStore {
        &self.content
    }
}

/// Fluent construction of a [`CacheReader`]
#[derive(Default)]
pub struct CacheReaderBuilder {
    cache_location: PathBuf,
    cache_size: u64,
    index_location: PathBuf,
    index_size: u64,
    mq_location: Option<PathBuf>,
    mq_file_size: u64,
    mq_record_size: Option<usize>,
    mq_append: bool,
    format: IndexFormat,
    miss_channel: Option<Arc<dyn MissChannel>>,
    metrics: Option<ReaderMetrics>,
}

impl CacheReaderBuilder {
    /// Start from a loaded configuration
    pub fn from_config(config: &CacheReaderConfig) -> Self {
        let mut builder = Self::default()
            .cache_location(&config.content.path)
            .cache_size(config.content.size)
            .index_location(&config.index.path)
            .index_size(config.index.size)
            .format(config.format);
        if let Some(mq) = &config.miss_channel {
            builder = builder
                .mq_location(&mq.path)
                .mq_file_size(mq.file_size)
                .mq_record_size(mq.record_size)
                .mq_append(mq.append);
        }
        builder
    }

    /// Content region file
    pub fn cache_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_location = path.into();
        self
    }

    /// Content region size in bytes
    pub fn cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }

    /// Index region file
    pub fn index_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_location = path.into();
        self
    }

    /// Index region size in bytes
    pub fn index_size(mut self, size: u64) -> Self {
        self.index_size = size;
        self
    }

    /// Mapped miss bus file
    pub fn mq_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.mq_location = Some(path.into());
        self
    }

    /// Mapped miss bus size in bytes
    pub fn mq_file_size(mut self, size: u64) -> Self {
        self.mq_file_size = size;
        self
    }

    /// Payload bytes per miss record
    pub fn mq_record_size(mut self, size: usize) -> Self {
        self.mq_record_size = Some(size);
        self
    }

    /// Keep existing miss records instead of truncating
    pub fn mq_append(mut self, append: bool) -> Self {
        self.mq_append = append;
        self
    }

    /// Value-slot layout of the index
    pub fn format(mut self, format: IndexFormat) -> Self {
        self.format = format;
        self
    }

    /// Use this channel instead of a mapped miss bus
    pub fn miss_channel(mut self, channel: Arc<dyn MissChannel>) -> Self {
        self.miss_channel = Some(channel);
        self
    }

    /// Share an existing metrics handle
    pub fn metrics(mut self, metrics: ReaderMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Configuration equivalent to the builder's mapped-file settings
    pub fn to_config(&self) -> CacheReaderConfig {
        CacheReaderConfig {
            index: RegionConfig {
                path: self.index_location.clone(),
                size: self.index_size,
            },
            content: RegionConfig {
                path: self.cache_location.clone(),
                size: self.cache_size,
            },
            miss_channel: self.mq_location.as_ref().map(|path| MissChannelConfig {
                path: path.clone(),
                file_size: self.mq_file_size,
                record_size: self.mq_record_size.unwrap_or(DEFAULT_MQ_RECORD_SIZE),
                append: self.mq_append,
            }),
            format: self.format,
        }
    }

    /// Validate the settings and open the reader
    pub fn build(self) -> Result<CacheReader> {
        let config = self.to_config();
        CacheReader::open_with(
            &config,
            self.miss_channel,
            self.metrics.unwrap_or_default(),
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
