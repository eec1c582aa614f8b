//! Lazy query composition over journal partitions.
//!
//! Queries are pipelines of pull-based sources:
//!
//! - [`PartitionSource`] yields [`PartitionSlice`]s, a row range of one
//!   partition
//! - [`RowSource`] yields local row ids of the slice it was prepared with
//! - [`KeySource`] yields index keys to look up in a [`KvIndex`](crate::index::KvIndex)
//! - [`RowFilter`] decides [`Choice::Pick`] or [`Choice::Skip`] per row
//!
//! Every source is prepared once per slice. Preparing restarts iteration
//! but keeps state cached across partitions (resolved column positions, the
//! dedup set of [`SkipSymbolRowSource`], the budget of [`TopRowSource`]);
//! [`RowSource::reset`] drops it.
//!
//! # Examples
//!
//! ```rust,ignore
//! use alopex_journal::query::*;
//!
//! // Latest row per symbol, for two symbols, newest partition first.
//! let view = journal.view()?;
//! let rows = KvIndexRowSource::new("sym", PartialSymbolKeySource::new("sym", ["EURUSD", "GBPUSD"]));
//! let latest = SkipSymbolRowSource::new(ReverseRowSource::new(rows), "sym");
//! let ids = for_each_partition(JournalPartitionSource::desc(view), latest).collect_rows()?;
//! ```

use crate::error::{JournalError, Result};
use crate::metadata::{ColumnType, JournalMetadata};
use crate::partition::Partition;
use crate::storage::SymbolTables;

pub mod executor;
pub mod filter;
pub mod key_source;
pub mod partition_source;
pub mod row_source;

pub use executor::{for_each_partition, parallel_scan, PartitionRows};
pub use filter::{
    AllFilter, AnyFilter, DoubleGreaterThanFilter, IntEqualsFilter, LongEqualsFilter, NotFilter,
    SymbolEqualsFilter,
};
pub use key_source::{
    PartialSymbolKeySource, SingleIntHashKeySource, SingleKeySource, SingleLongHashKeySource,
    StringHashKeySource, SymbolTableKeySource,
};
pub use partition_source::{IntervalPartitionSource, JournalPartitionSource};
pub use row_source::{
    AllRowSource, FilteredRowSource, KvIndexRowSource, KvIndexTopRowSource, MergeSortedRowSource,
    ReverseRowSource, SkipSymbolRowSource, TopRowSource, UnionRowSource,
};

/// A row range `[lo, hi]` (inclusive) of one partition.
#[derive(Debug, Clone, Copy)]
pub struct PartitionSlice<'a> {
    /// Partition being read.
    pub partition: &'a Partition,
    /// Symbol tables of the owning journal.
    pub symbols: &'a SymbolTables,
    /// First row.
    pub lo: i64,
    /// Last row; `hi < lo` means empty.
    pub hi: i64,
}

impl<'a> PartitionSlice<'a> {
    /// Slice over every row of `partition`.
    pub fn whole(partition: &'a Partition, symbols: &'a SymbolTables) -> Result<Self> {
        Ok(Self {
            partition,
            symbols,
            lo: 0,
            hi: partition.size()? - 1,
        })
    }

    /// Returns true if the slice has no rows.
    pub fn is_empty(&self) -> bool {
        self.hi < self.lo
    }

    /// Returns true if `row` is inside the slice.
    pub fn contains(&self, row: i64) -> bool {
        row >= self.lo && row <= self.hi
    }

    /// Metadata of the partition's journal.
    pub fn metadata(&self) -> &'a JournalMetadata {
        self.partition.metadata()
    }
}

/// Outcome of a [`RowFilter`] for one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    /// Keep the row.
    Pick,
    /// Drop the row.
    Skip,
}

impl Choice {
    /// `Pick` for true, `Skip` for false.
    pub fn from_bool(pick: bool) -> Self {
        if pick {
            Choice::Pick
        } else {
            Choice::Skip
        }
    }
}

/// Stream of local row ids.
pub trait RowSource<'a> {
    /// Binds the source to `slice` and restarts iteration.
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()>;

    /// Next row id, `None` when the slice is exhausted.
    fn next_row(&mut self) -> Result<Option<i64>>;

    /// Drops state cached across partitions.
    fn reset(&mut self);
}

/// Stream of index keys.
pub trait KeySource<'a> {
    /// Binds the source to `slice` and restarts iteration.
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()>;

    /// Next key, `None` when exhausted.
    fn next_key(&mut self) -> Option<i32>;

    /// Number of keys produced for the current slice.
    fn size(&self) -> usize;

    /// Drops state cached across partitions.
    fn reset(&mut self);
}

/// Per-row predicate.
pub trait RowFilter<'a> {
    /// Binds the filter to `slice`.
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()>;

    /// Decides whether `row` of the bound slice is kept.
    fn accept(&self, row: i64) -> Result<Choice>;

    /// Drops state cached across partitions, such as resolved columns.
    fn reset(&mut self);
}

/// Stream of partition slices.
pub trait PartitionSource<'a> {
    /// Next slice, `None` when exhausted.
    fn next_slice(&mut self) -> Result<Option<PartitionSlice<'a>>>;

    /// Restarts from the first slice.
    fn reset(&mut self);
}

/// Owned row source of a query.
pub type BoxedRowSource<'a> = Box<dyn RowSource<'a> + 'a>;
/// Owned key source of a query.
pub type BoxedKeySource<'a> = Box<dyn KeySource<'a> + 'a>;
/// Owned filter of a query.
pub type BoxedRowFilter<'a> = Box<dyn RowFilter<'a> + 'a>;
/// Owned partition source of a query.
pub type BoxedPartitionSource<'a> = Box<dyn PartitionSource<'a> + 'a>;

impl<'a, S: RowSource<'a> + ?Sized> RowSource<'a> for Box<S> {
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
        (**self).prepare(slice)
    }

    fn next_row(&mut self) -> Result<Option<i64>> {
        (**self).next_row()
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

impl<'a, S: KeySource<'a> + ?Sized> KeySource<'a> for Box<S> {
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
        (**self).prepare(slice)
    }

    fn next_key(&mut self) -> Option<i32> {
        (**self).next_key()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

impl<'a, F: RowFilter<'a> + ?Sized> RowFilter<'a> for Box<F> {
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
        (**self).prepare(slice)
    }

    fn accept(&self, row: i64) -> Result<Choice> {
        (**self).accept(row)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

impl<'a, P: PartitionSource<'a> + ?Sized> PartitionSource<'a> for Box<P> {
    fn next_slice(&mut self) -> Result<Option<PartitionSlice<'a>>> {
        (**self).next_slice()
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// Column referenced by name, resolved to a position on first use.
#[derive(Debug, Clone)]
pub struct ColumnRef {
    name: String,
    index: Option<usize>,
}

impl ColumnRef {
    /// Reference to the column called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: None,
        }
    }

    /// Column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position of the column in `metadata`, cached after the first call.
    pub fn resolve(&mut self, metadata: &JournalMetadata) -> Result<usize> {
        if let Some(index) = self.index {
            return Ok(index);
        }
        let index = metadata.column_index(&self.name)?;
        self.index = Some(index);
        Ok(index)
    }

    /// Forgets the cached position.
    pub fn reset(&mut self) {
        self.index = None;
    }
}

/// Integer value of `column` at `row`: the symbol key of a `SYMBOL`, the
/// value of an `INT`.
pub(crate) fn int_value(partition: &Partition, row: i64, column: usize) -> Result<i32> {
    let meta = partition.metadata().column(column)?;
    match meta.column_type {
        ColumnType::Symbol => partition.get_symbol_key(row, column),
        ColumnType::Int => partition.get_int(row, column),
        other => Err(JournalError::ColumnTypeMismatch {
            column: meta.name.clone(),
            expected: ColumnType::Symbol.name(),
            actual: other.name(),
        }),
    }
}
