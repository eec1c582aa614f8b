//! Row sources.

use super::{int_value, Choice, ColumnRef, KeySource, PartitionSlice, RowFilter, RowSource};
use crate::error::Result;
use crate::index::{IndexCursor, KvIndex};
use std::collections::HashSet;

/// Every row of the slice in ascending order.
#[derive(Debug, Default)]
pub struct AllRowSource {
    next: i64,
    hi: i64,
}

impl AllRowSource {
    /// Creates the source.
    pub fn new() -> Self {
        Self { next: 0, hi: -1 }
    }
}

impl<'a> RowSource<'a> for AllRowSource {
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
        self.next = slice.lo;
        self.hi = slice.hi;
        Ok(())
    }

    fn next_row(&mut self) -> Result<Option<i64>> {
        if self.next > self.hi {
            return Ok(None);
        }
        self.next += 1;
        Ok(Some(self.next - 1))
    }

    fn reset(&mut self) {
        self.next = 0;
        self.hi = -1;
    }
}

/// Every value of every key produced by a key source, read from the key
/// index of one column. Rows of one key come out ascending; keys come out in
/// key source order.
pub struct KvIndexRowSource<'a, K> {
    column: ColumnRef,
    keys: K,
    filter: Option<Box<dyn RowFilter<'a> + 'a>>,
    slice: Option<PartitionSlice<'a>>,
    index: Option<&'a KvIndex>,
    buffer: Vec<i64>,
    position: usize,
}

impl<'a, K: KeySource<'a>> KvIndexRowSource<'a, K> {
    /// Reads the index of `column` for the keys of `keys`.
    pub fn new(column: impl Into<String>, keys: K) -> Self {
        Self {
            column: ColumnRef::new(column),
            keys,
            filter: None,
            slice: None,
            index: None,
            buffer: Vec::new(),
            position: 0,
        }
    }

    /// Keeps only rows `filter` picks.
    pub fn with_filter(mut self, filter: impl RowFilter<'a> + 'a) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

impl<'a, K: KeySource<'a>> RowSource<'a> for KvIndexRowSource<'a, K> {
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
        let column = self.column.resolve(slice.metadata())?;
        self.index = Some(slice.partition.index_for_column(column)?);
        self.keys.prepare(slice)?;
        if let Some(filter) = self.filter.as_mut() {
            filter.prepare(slice)?;
        }
        self.slice = Some(slice);
        self.buffer.clear();
        self.position = 0;
        Ok(())
    }

    fn next_row(&mut self) -> Result<Option<i64>> {
        let (Some(index), Some(slice)) = (self.index, self.slice) else {
            return Ok(None);
        };
        loop {
            while self.position < self.buffer.len() {
                let row = self.buffer[self.position];
                self.position += 1;
                if !slice.contains(row) {
                    continue;
                }
                match &self.filter {
                    Some(filter) if filter.accept(row)? == Choice::Skip => continue,
                    _ => return Ok(Some(row)),
                }
            }
            let Some(key) = self.keys.next_key() else {
                return Ok(None);
            };
            index.values(key, &mut self.buffer)?;
            self.position = 0;
        }
    }

    fn reset(&mut self) {
        self.column.reset();
        self.keys.reset();
        if let Some(filter) = self.filter.as_mut() {
            filter.reset();
        }
        self.slice = None;
        self.index = None;
    }
}

/// Newest `count` rows of each key, newest first. With `count == 1` this is
/// the latest row per key.
pub struct KvIndexTopRowSource<'a, K> {
    column: ColumnRef,
    keys: K,
    count: usize,
    filter: Option<Box<dyn RowFilter<'a> + 'a>>,
    slice: Option<PartitionSlice<'a>>,
    cursor: Option<IndexCursor<'a>>,
    taken: usize,
}

impl<'a, K: KeySource<'a>> KvIndexTopRowSource<'a, K> {
    /// Reads at most `count` rows per key from the index of `column`.
    pub fn new(column: impl Into<String>, keys: K, count: usize) -> Self {
        Self {
            column: ColumnRef::new(column),
            keys,
            count,
            filter: None,
            slice: None,
            cursor: None,
            taken: 0,
        }
    }

    /// Latest row per key.
    pub fn head(column: impl Into<String>, keys: K) -> Self {
        Self::new(column, keys, 1)
    }

    /// Counts only rows `filter` picks.
    pub fn with_filter(mut self, filter: impl RowFilter<'a> + 'a) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

impl<'a, K: KeySource<'a>> RowSource<'a> for KvIndexTopRowSource<'a, K> {
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
        let column = self.column.resolve(slice.metadata())?;
        let index = slice.partition.index_for_column(column)?;
        self.keys.prepare(slice)?;
        if let Some(filter) = self.filter.as_mut() {
            filter.prepare(slice)?;
        }
        self.slice = Some(slice);
        // A spent budget makes the first pull move to the first key.
        self.cursor = Some(index.cursor(-1)?);
        self.taken = self.count;
        Ok(())
    }

    fn next_row(&mut self) -> Result<Option<i64>> {
        let (Some(cursor), Some(slice)) = (self.cursor.as_mut(), self.slice) else {
            return Ok(None);
        };
        loop {
            if self.taken < self.count {
                match cursor.next().transpose()? {
                    Some(row) if row > slice.hi => continue,
                    Some(row) if row >= slice.lo => {
                        if let Some(filter) = &self.filter {
                            if filter.accept(row)? == Choice::Skip {
                                continue;
                            }
                        }
                        self.taken += 1;
                        return Ok(Some(row));
                    }
                    // Older than the slice or exhausted.
                    _ => self.taken = self.count,
                }
            }
            let Some(key) = self.keys.next_key() else {
                return Ok(None);
            };
            cursor.set_key(key)?;
            self.taken = 0;
        }
    }

    fn reset(&mut self) {
        self.column.reset();
        self.keys.reset();
        if let Some(filter) = self.filter.as_mut() {
            filter.reset();
        }
        self.slice = None;
        self.cursor = None;
    }
}

/// Rows of a delegate that a filter picks.
pub struct FilteredRowSource<S, F> {
    delegate: S,
    filter: F,
}

impl<S, F> FilteredRowSource<S, F> {
    /// Filters `delegate` with `filter`.
    pub fn new(delegate: S, filter: F) -> Self {
        Self { delegate, filter }
    }
}

impl<'a, S: RowSource<'a>, F: RowFilter<'a>> RowSource<'a> for FilteredRowSource<S, F> {
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
        self.filter.prepare(slice)?;
        self.delegate.prepare(slice)
    }

    fn next_row(&mut self) -> Result<Option<i64>> {
        while let Some(row) = self.delegate.next_row()? {
            if self.filter.accept(row)? == Choice::Pick {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn reset(&mut self) {
        self.delegate.reset();
        self.filter.reset();
    }
}

/// First `count` rows of a delegate across all slices it is prepared with.
pub struct TopRowSource<S> {
    delegate: S,
    count: usize,
    remaining: usize,
}

impl<S> TopRowSource<S> {
    /// Limits `delegate` to `count` rows.
    pub fn new(count: usize, delegate: S) -> Self {
        Self {
            delegate,
            count,
            remaining: count,
        }
    }
}

impl<'a, S: RowSource<'a>> RowSource<'a> for TopRowSource<S> {
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
        self.delegate.prepare(slice)
    }

    fn next_row(&mut self) -> Result<Option<i64>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let row = self.delegate.next_row()?;
        if row.is_some() {
            self.remaining -= 1;
        }
        Ok(row)
    }

    fn reset(&mut self) {
        self.remaining = self.count;
        self.delegate.reset();
    }
}

/// Rows of each source in turn.
pub struct UnionRowSource<'a> {
    sources: Vec<Box<dyn RowSource<'a> + 'a>>,
    current: usize,
}

impl<'a> UnionRowSource<'a> {
    /// Concatenates `sources`.
    pub fn new(sources: Vec<Box<dyn RowSource<'a> + 'a>>) -> Self {
        Self {
            sources,
            current: 0,
        }
    }
}

impl<'a> RowSource<'a> for UnionRowSource<'a> {
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
        for source in &mut self.sources {
            source.prepare(slice)?;
        }
        self.current = 0;
        Ok(())
    }

    fn next_row(&mut self) -> Result<Option<i64>> {
        while let Some(source) = self.sources.get_mut(self.current) {
            if let Some(row) = source.next_row()? {
                return Ok(Some(row));
            }
            self.current += 1;
        }
        Ok(None)
    }

    fn reset(&mut self) {
        for source in &mut self.sources {
            source.reset();
        }
        self.current = 0;
    }
}

/// Merge of two ascending sources into one ascending stream.
pub struct MergeSortedRowSource<A, B> {
    a: A,
    b: B,
    head_a: Option<i64>,
    head_b: Option<i64>,
}

impl<A, B> MergeSortedRowSource<A, B> {
    /// Merges `a` and `b`.
    pub fn new(a: A, b: B) -> Self {
        Self {
            a,
            b,
            head_a: None,
            head_b: None,
        }
    }
}

impl<'a, A: RowSource<'a>, B: RowSource<'a>> RowSource<'a> for MergeSortedRowSource<A, B> {
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
        self.a.prepare(slice)?;
        self.b.prepare(slice)?;
        self.head_a = self.a.next_row()?;
        self.head_b = self.b.next_row()?;
        Ok(())
    }

    fn next_row(&mut self) -> Result<Option<i64>> {
        match (self.head_a, self.head_b) {
            (Some(a), Some(b)) if a <= b => {
                self.head_a = self.a.next_row()?;
                Ok(Some(a))
            }
            (_, Some(b)) => {
                self.head_b = self.b.next_row()?;
                Ok(Some(b))
            }
            (Some(a), None) => {
                self.head_a = self.a.next_row()?;
                Ok(Some(a))
            }
            (None, None) => Ok(None),
        }
    }

    fn reset(&mut self) {
        self.a.reset();
        self.b.reset();
        self.head_a = None;
        self.head_b = None;
    }
}

/// Rows of a delegate in reverse order. Buffers one slice.
pub struct ReverseRowSource<S> {
    delegate: S,
    rows: Vec<i64>,
}

impl<S> ReverseRowSource<S> {
    /// Reverses `delegate`.
    pub fn new(delegate: S) -> Self {
        Self {
            delegate,
            rows: Vec::new(),
        }
    }
}

impl<'a, S: RowSource<'a>> RowSource<'a> for ReverseRowSource<S> {
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
        self.delegate.prepare(slice)?;
        self.rows.clear();
        while let Some(row) = self.delegate.next_row()? {
            self.rows.push(row);
        }
        Ok(())
    }

    fn next_row(&mut self) -> Result<Option<i64>> {
        Ok(self.rows.pop())
    }

    fn reset(&mut self) {
        self.rows.clear();
        self.delegate.reset();
    }
}

/// Rows of a delegate whose symbol (or int) value was not seen before.
///
/// Over a newest-first delegate this is the latest row per value. The seen
/// set spans partitions until [`RowSource::reset`].
pub struct SkipSymbolRowSource<'a, S> {
    delegate: S,
    column: ColumnRef,
    slice: Option<PartitionSlice<'a>>,
    resolved: usize,
    seen: HashSet<i32>,
}

impl<'a, S: RowSource<'a>> SkipSymbolRowSource<'a, S> {
    /// Deduplicates `delegate` on `column`.
    pub fn new(delegate: S, column: impl Into<String>) -> Self {
        Self {
            delegate,
            column: ColumnRef::new(column),
            slice: None,
            resolved: 0,
            seen: HashSet::new(),
        }
    }
}

impl<'a, S: RowSource<'a>> RowSource<'a> for SkipSymbolRowSource<'a, S> {
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
        self.resolved = self.column.resolve(slice.metadata())?;
        self.slice = Some(slice);
        self.delegate.prepare(slice)
    }

    fn next_row(&mut self) -> Result<Option<i64>> {
        let Some(slice) = self.slice else {
            return Ok(None);
        };
        while let Some(row) = self.delegate.next_row()? {
            let key = int_value(slice.partition, row, self.resolved)?;
            if self.seen.insert(key) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn reset(&mut self) {
        self.column.reset();
        self.delegate.reset();
        self.seen.clear();
        self.slice = None;
    }
}
