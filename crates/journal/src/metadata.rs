//! Column types, column metadata and journal-wide configuration.
//!
//! The storage core never invents types: it consumes the ordered column list
//! described here and a [`RecordBinding`](crate::record::RecordBinding) that
//! knows how to move field values in and out of caller records.

use crate::error::{JournalError, Result};
use crate::partition::layout::PartitionType;
use crate::storage::AccessMode;
use bitvec::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default expected record count per partition.
pub const DEFAULT_RECORD_HINT: u64 = 1_000_000;

/// Default expected number of transactions per partition.
pub const DEFAULT_TX_COUNT_HINT: u64 = 1_000;

/// Default time an idle index mapping stays open.
pub const DEFAULT_OPEN_FILE_TTL: Duration = Duration::from_secs(3 * 60);

/// Default average size in bytes of a variable-length value.
pub const DEFAULT_AVG_SIZE: usize = 16;

/// Default number of distinct keys an indexed column is expected to hold.
pub const DEFAULT_DISTINCT_COUNT_HINT: i32 = 255;

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// 1-byte boolean.
    Boolean,
    /// Signed 8-bit integer.
    Byte,
    /// Signed 16-bit integer.
    Short,
    /// Signed 32-bit integer.
    Int,
    /// Signed 64-bit integer.
    Long,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// Epoch milliseconds stored as `i64`.
    Date,
    /// Dictionary-encoded string stored as an `i32` key.
    Symbol,
    /// Variable-length UTF-8 string.
    String,
    /// Variable-length byte buffer.
    Binary,
}

impl ColumnType {
    /// Returns the fixed width in bytes, or 0 for variable-length types.
    pub fn size(self) -> usize {
        match self {
            Self::Boolean | Self::Byte => 1,
            Self::Short => 2,
            Self::Int | Self::Float | Self::Symbol => 4,
            Self::Long | Self::Double | Self::Date => 8,
            Self::String | Self::Binary => 0,
        }
    }

    /// Returns true for types stored in a data + index file pair.
    pub fn is_variable(self) -> bool {
        self.size() == 0
    }

    /// Returns the type name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::Byte => "BYTE",
            Self::Short => "SHORT",
            Self::Int => "INT",
            Self::Long => "LONG",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::Date => "DATE",
            Self::Symbol => "SYMBOL",
            Self::String => "STRING",
            Self::Binary => "BINARY",
        }
    }

    /// Little-endian bytes written for a null value of a fixed-width type.
    pub fn null_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        match self {
            Self::Short => out[..2].copy_from_slice(&i16::MIN.to_le_bytes()),
            Self::Int => out[..4].copy_from_slice(&i32::MIN.to_le_bytes()),
            Self::Symbol => out[..4].copy_from_slice(&crate::storage::VALUE_IS_NULL.to_le_bytes()),
            Self::Long | Self::Date => out.copy_from_slice(&i64::MIN.to_le_bytes()),
            Self::Float => out[..4].copy_from_slice(&f32::NAN.to_le_bytes()),
            Self::Double => out.copy_from_slice(&f64::NAN.to_le_bytes()),
            Self::Boolean | Self::Byte | Self::String | Self::Binary => {}
        }
        out
    }

    /// Returns true if a key index can be built over this type.
    pub fn is_indexable(self) -> bool {
        matches!(self, Self::Int | Self::Long | Self::Symbol | Self::String)
    }
}

/// Metadata of a single column.
///
/// # Examples
/// ```rust,ignore
/// use alopex_journal::metadata::{ColumnMetadata, ColumnType};
///
/// let sym = ColumnMetadata::new("sym", ColumnType::Symbol).with_index(64);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMetadata {
    /// Column name, also the stem of its file names.
    pub name: String,
    /// Storage type.
    pub column_type: ColumnType,
    /// Whether a key index is maintained.
    pub indexed: bool,
    /// Bucket count for index keys.
    pub distinct_count_hint: i32,
    /// Average size of variable-length values, used to size data files.
    pub avg_size: usize,
    /// Logically dropped column; always reads back as null.
    pub inactive: bool,
}

impl ColumnMetadata {
    /// Creates metadata for a non-indexed column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            indexed: false,
            distinct_count_hint: DEFAULT_DISTINCT_COUNT_HINT,
            avg_size: DEFAULT_AVG_SIZE,
            inactive: false,
        }
    }

    /// Marks the column as indexed with the given bucket count.
    pub fn with_index(mut self, distinct_count_hint: i32) -> Self {
        self.indexed = true;
        self.distinct_count_hint = distinct_count_hint;
        self
    }

    /// Sets the average size of variable-length values.
    pub fn with_avg_size(mut self, avg_size: usize) -> Self {
        self.avg_size = avg_size;
        self
    }

    /// Marks the column as logically dropped.
    pub fn with_inactive(mut self) -> Self {
        self.inactive = true;
        self
    }

    /// Fixed width in bytes, 0 for variable columns.
    pub fn size(&self) -> usize {
        self.column_type.size()
    }
}

/// Journal-wide configuration.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Partition granularity.
    pub partition_type: PartitionType,
    /// Expected records per partition, used to size files.
    pub record_hint: u64,
    /// Expected transactions per partition, used to size index key files.
    pub tx_count_hint: u64,
    /// Idle time after which index mappings are closed.
    pub open_file_ttl: Duration,
    /// How partition files are opened.
    pub access_mode: AccessMode,
    /// Index reported to the commit publisher.
    pub journal_index: i32,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            partition_type: PartitionType::Day,
            record_hint: DEFAULT_RECORD_HINT,
            tx_count_hint: DEFAULT_TX_COUNT_HINT,
            open_file_ttl: DEFAULT_OPEN_FILE_TTL,
            access_mode: AccessMode::Append,
            journal_index: 0,
        }
    }
}

impl JournalConfig {
    /// Sets the partition granularity.
    pub fn with_partition_type(mut self, partition_type: PartitionType) -> Self {
        self.partition_type = partition_type;
        self
    }

    /// Sets the record count hint.
    pub fn with_record_hint(mut self, record_hint: u64) -> Self {
        self.record_hint = record_hint;
        self
    }

    /// Sets the transaction count hint.
    pub fn with_tx_count_hint(mut self, tx_count_hint: u64) -> Self {
        self.tx_count_hint = tx_count_hint;
        self
    }

    /// Sets the idle TTL of index mappings.
    pub fn with_open_file_ttl(mut self, ttl: Duration) -> Self {
        self.open_file_ttl = ttl;
        self
    }

    /// Sets the access mode.
    pub fn with_access_mode(mut self, mode: AccessMode) -> Self {
        self.access_mode = mode;
        self
    }

    /// Sets the journal index reported with commit events.
    pub fn with_journal_index(mut self, journal_index: i32) -> Self {
        self.journal_index = journal_index;
        self
    }
}

/// Validated, immutable description of a journal.
#[derive(Debug, Clone)]
pub struct JournalMetadata {
    location: PathBuf,
    columns: Vec<ColumnMetadata>,
    timestamp_column: Option<usize>,
    config: JournalConfig,
    inactive_columns: BitVec<u64, Lsb0>,
}

impl JournalMetadata {
    /// Builds metadata, validating column names, index settings and the
    /// timestamp column.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidMetadata`] for duplicate names,
    /// non-indexable indexed columns, non-positive bucket counts or a
    /// timestamp column that is not `DATE`/`LONG`.
    pub fn new(
        location: impl AsRef<Path>,
        columns: Vec<ColumnMetadata>,
        timestamp_column: Option<&str>,
        config: JournalConfig,
    ) -> Result<Self> {
        if columns.is_empty() {
            return Err(JournalError::InvalidMetadata(
                "journal must have at least one column".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for column in &columns {
            if !names.insert(column.name.as_str()) {
                return Err(JournalError::InvalidMetadata(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
            if column.indexed {
                if !column.column_type.is_indexable() {
                    return Err(JournalError::InvalidMetadata(format!(
                        "column '{}' of type {} cannot be indexed",
                        column.name,
                        column.column_type.name()
                    )));
                }
                if column.distinct_count_hint <= 0 {
                    return Err(JournalError::InvalidMetadata(format!(
                        "column '{}' needs a positive distinct count hint",
                        column.name
                    )));
                }
            }
        }

        let timestamp_column = match timestamp_column {
            Some(name) => {
                let index = columns
                    .iter()
                    .position(|c| c.name == name)
                    .ok_or_else(|| JournalError::UnknownColumn(name.to_string()))?;
                if !matches!(columns[index].column_type, ColumnType::Date | ColumnType::Long) {
                    return Err(JournalError::InvalidMetadata(format!(
                        "timestamp column '{}' must be DATE or LONG",
                        name
                    )));
                }
                Some(index)
            }
            None => None,
        };

        let mut inactive_columns = bitvec![u64, Lsb0; 0; columns.len()];
        for (i, column) in columns.iter().enumerate() {
            inactive_columns.set(i, column.inactive);
        }

        Ok(Self {
            location: location.as_ref().to_path_buf(),
            columns,
            timestamp_column,
            config,
            inactive_columns,
        })
    }

    /// Root directory of the journal.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// All columns in storage order.
    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    /// Column at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::ColumnIndexOutOfBounds`] for an invalid position.
    pub fn column(&self, index: usize) -> Result<&ColumnMetadata> {
        self.columns
            .get(index)
            .ok_or(JournalError::ColumnIndexOutOfBounds {
                index,
                count: self.columns.len(),
            })
    }

    /// Position of the column called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::UnknownColumn`] if no column has that name.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| JournalError::UnknownColumn(name.to_string()))
    }

    /// Position of the designated timestamp column.
    pub fn timestamp_column_index(&self) -> Option<usize> {
        self.timestamp_column
    }

    /// Journal configuration.
    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Partition granularity.
    pub fn partition_type(&self) -> PartitionType {
        self.config.partition_type
    }

    /// Columns logically dropped from the schema.
    pub fn inactive_columns(&self) -> &BitSlice<u64, Lsb0> {
        &self.inactive_columns
    }

    /// Base path (without extension) of the key index of a column.
    pub fn index_base(&self, partition_dir: &Path, column_index: usize) -> Result<PathBuf> {
        Ok(partition_dir.join(&self.column(column_index)?.name))
    }
}
