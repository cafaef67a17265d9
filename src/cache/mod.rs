//! Columnlet Cache
//!
//! Read side of a shared, memory-mapped columnlet cache. A writer process
//! populates two regions; any number of reader threads or processes map them
//! and serve lookups without locks.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           CacheReader                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                   │
//! │  ┌────────────────┐  ┌──────────────────┐  ┌──────────────────┐  │
//! │  │ ReadCoordinator│  │ RadixIndexStore  │  │  ContentStore    │  │
//! │  │ (index header) │  │ (trie, index     │  │  (payload bytes) │  │
//! │  │                │  │  region)         │  │                  │  │
//! │  └────────────────┘  └──────────────────┘  └──────────────────┘  │
//! │          │                    │                      │            │
//! │          └────────────────────┼──────────────────────┘            │
//! │                               │                                   │
//! │                        ┌──────┴──────┐                            │
//! │                        │ MappedRegion│                            │
//! │                        └─────────────┘                            │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Index region layout
//!
//! ```text
//! [0..2)   rw_flag       u16 native, atomic
//! [2..4)   reader_count  u16 native, atomic
//! [4..16)  reserved
//! [16..)   trie area; node offsets are relative to byte 16, root at 0
//!
//! node := header(2) children(8 * n) edge(e) [value slot]
//! ```
//!
//! # Components
//!
//! - **Keys** (`entry.rs`): 16-byte columnlet keys and decoded value slots
//! - **Regions** (`region.rs`): bounds-checked mapped files via `memmap2`
//! - **Layout** (`layout.rs`): node header, child slot and value-slot formats
//! - **Index** (`index.rs`): iterative trie lookup
//! - **Builder** (`builder.rs`): trie encoder for writers and fixtures
//! - **Content** (`content.rs`): payload reads and access counters
//! - **Coordinator** (`coordinator.rs`): reader admission handshake
//! - **Reader** (`reader.rs`): the `get(key)` façade
//! - **Config** (`config.rs`) and **Metrics** (`metrics.rs`)

mod builder;
mod config;
mod content;
mod coordinator;
mod entry;
mod index;
mod layout;
mod metrics;
mod reader;
mod region;

#[cfg(test)]
mod proptest;

pub use builder::IndexBuilder;
pub use config::{CacheReaderConfig, MissChannelConfig, RegionConfig, DEFAULT_MQ_RECORD_SIZE};
pub use content::ContentStore;
pub use coordinator::{CoordinatorState, ReadCoordinator, ReadGuard, Unavailable};
pub use entry::{CacheEntryLocator, ColumnletKey, LegacySlot, KEY_SIZE};
pub use index::RadixIndexStore;
pub use layout::{
    ChildSlot, IndexFormat, NodeHeader, CHILD_SLOT_SIZE, INDEX_HEADER_SIZE, MAX_CHILDREN,
    MAX_EDGE_LEN, NODE_HEADER_SIZE, READER_COUNT_CEILING, READER_COUNT_OFFSET, RW_FLAG_OFFSET,
};
pub use metrics::{encode_text, ReaderMetrics};
pub use reader::{CacheReader, CacheReaderBuilder, ReadOutcome};
pub use region::MappedRegion;
