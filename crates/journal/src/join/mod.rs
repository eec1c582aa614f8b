//! Support structures for as-of joins between a master and a slave journal.

pub mod last_record_map;

pub use last_record_map::{LastRecordMap, LastRecordMapConfig, StoredRecord, DEFAULT_PAGE_SIZE};
