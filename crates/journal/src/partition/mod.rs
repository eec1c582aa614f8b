//! Partitions: one time interval of a journal on disk.
//!
//! - [`Partition`]: columns, null bitmap and key indexes of one interval
//! - [`PartitionLayout`]: maps intervals to directories and back
//! - [`search`]: binary search over the timestamp column
//! - [`rows`]: global row id packing

pub mod core;
pub mod layout;
pub mod rows;
pub mod search;

pub use self::core::{Partition, PartitionRecord, DEFAULT_SCAN_CHUNK, TX_LIMIT_EVAL};
pub use layout::{Interval, PartitionLayout, PartitionType};
pub use search::SearchType;
