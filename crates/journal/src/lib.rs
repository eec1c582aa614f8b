//! Alopex Journal - append-only columnar storage for time-ordered records
//!
//! A journal stores records column by column in memory-mapped files, split
//! into time partitions. Selected columns carry an inverted key index that
//! maps a key to the rows holding it, newest first. Queries are built from
//! small composable sources that walk partitions lazily.
//!
//! # Components
//!
//! - [`Journal`]: partition routing, commit and rollback
//! - [`Partition`]: one time slice of columns, nulls and indexes
//! - [`KvIndex`]: append-only key to row-id index
//! - [`query`]: partition sources, row sources, key sources and filters
//! - [`LastRecordMap`]: latest slave record per key for as-of joins
//! - [`JournalEventBridge`]: fan-out of commit notifications
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_journal::{Journal, JournalMetadata, ColumnMetadata, ColumnType, JournalConfig};
//! use alopex_journal::query::{for_each_partition, JournalPartitionSource, KvIndexRowSource, PartialSymbolKeySource};
//!
//! let metadata = JournalMetadata::new(
//!     "/data/quotes",
//!     vec![
//!         ColumnMetadata::new("ts", ColumnType::Date),
//!         ColumnMetadata::new("sym", ColumnType::Symbol).with_index(128),
//!         ColumnMetadata::new("bid", ColumnType::Double),
//!     ],
//!     Some("ts"),
//!     JournalConfig::default().with_partition_type(PartitionType::Day),
//! )?;
//! let mut journal = Journal::open(metadata, quote_binding())?;
//! journal.append(&quote)?;
//! journal.commit()?;
//!
//! let view = journal.view()?;
//! let rows = for_each_partition(
//!     JournalPartitionSource::desc(view),
//!     KvIndexRowSource::new("sym", PartialSymbolKeySource::new("sym", ["BP.L"])),
//! )
//! .top(10)?;
//! ```

#![deny(missing_docs)]

pub mod error;
pub mod events;
pub mod hash;
pub mod index;
pub mod join;
pub mod journal;
pub mod metadata;
pub mod partition;
pub mod query;
pub mod record;
pub mod storage;

pub use error::{JournalError, Result};
pub use events::{
    BridgeConfig, BridgeEvent, CommitEvent, CommitPublisher, EventSubscriber, JournalEventBridge,
};
pub use index::{IndexCursor, KvIndex, KvIndexConfig};
pub use join::{LastRecordMap, LastRecordMapConfig};
pub use journal::{Journal, JournalView};
pub use metadata::{ColumnMetadata, ColumnType, JournalConfig, JournalMetadata};
pub use partition::{Interval, Partition, PartitionType, SearchType};
pub use record::{Record, RecordBinding, Value};
pub use storage::AccessMode;
