//! Error and Result types for journal storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A convenience `Result` type for journal operations.
pub type Result<T> = std::result::Result<T, JournalError>;

/// The error type for journal storage, index and query operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A mapped file could not be grown to the requested size.
    #[error("Cannot grow {path:?} to {requested} bytes: {source}")]
    StorageGrowth {
        /// File being grown.
        path: PathBuf,
        /// Requested physical size in bytes.
        requested: u64,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A write was attempted on storage opened for reading.
    #[error("Storage is read-only: {0:?}")]
    ReadOnly(PathBuf),

    /// A read fell outside the mapped or committed region.
    #[error("Offset {offset} (+{len}) is outside of {path:?} (size {size})")]
    OutOfBounds {
        /// File being read.
        path: PathBuf,
        /// Logical offset of the read.
        offset: u64,
        /// Length of the read.
        len: usize,
        /// Logical size of the addressable region.
        size: u64,
    },

    /// Row block chain of an index does not match its row count.
    #[error("Corrupt index {path:?}: {reason}")]
    CorruptIndex {
        /// Base path of the index.
        path: PathBuf,
        /// What was inconsistent.
        reason: String,
    },

    /// Key is not present in the index.
    #[error("Key doesn't exist: {0}")]
    KeyNotFound(i32),

    /// Key is below the smallest key an index can store.
    #[error("Invalid index key: {0}")]
    InvalidKey(i32),

    /// Value position is outside of `[0, count)` for a key.
    #[error("Index out of bounds: {index}, max: {max}")]
    ValueIndexOutOfBounds {
        /// Requested position.
        index: i64,
        /// Largest valid position (`count - 1`).
        max: i64,
    },

    /// Operation on a closed partition.
    #[error("Partition is closed: {0}")]
    PartitionClosed(String),

    /// Index handle was expired and has not been reopened.
    #[error("Index for column {0} is closed")]
    IndexClosed(usize),

    /// Column position is not part of the journal metadata.
    #[error("Invalid column index: {index} (column count {count})")]
    ColumnIndexOutOfBounds {
        /// Requested column position.
        index: usize,
        /// Number of columns.
        count: usize,
    },

    /// Row id is beyond the partition size.
    #[error("Row {row} is outside of partition of size {size}")]
    RowOutOfBounds {
        /// Requested local row id.
        row: i64,
        /// Partition size.
        size: i64,
    },

    /// Column name is not part of the journal metadata.
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    /// Column has no key index.
    #[error("There is no index for column '{0}'")]
    NoIndexForColumn(String),

    /// Column was accessed through an accessor for a different type.
    #[error("Column '{column}' has type {actual}, expected {expected}")]
    ColumnTypeMismatch {
        /// Column name.
        column: String,
        /// Type the caller asked for.
        expected: &'static str,
        /// Type declared in metadata.
        actual: &'static str,
    },

    /// Journal has no designated timestamp column.
    #[error("There is no timestamp column in: {0}")]
    NoTimestampColumn(String),

    /// Record is older than the last partition of the journal.
    #[error("Timestamp {timestamp} is older than the last partition start {partition_start}")]
    OutOfOrderTimestamp {
        /// Timestamp of the rejected record.
        timestamp: i64,
        /// Start of the last partition.
        partition_start: i64,
    },

    /// A single record exceeds the configured maximum size.
    #[error("Record size {size} is too large (max {max})")]
    RecordTooLarge {
        /// Serialized record size.
        size: usize,
        /// Largest size accepted.
        max: usize,
    },

    /// Metadata is inconsistent.
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),
}
