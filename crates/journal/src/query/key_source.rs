//! Key sources: index keys to look up, derived with the same policy appends
//! use to index values.

use super::{ColumnRef, KeySource, PartitionSlice};
use crate::error::Result;
use crate::hash;

/// One literal key.
#[derive(Debug, Clone)]
pub struct SingleKeySource {
    key: i32,
    pending: bool,
}

impl SingleKeySource {
    /// Yields `key` once per slice.
    pub fn new(key: i32) -> Self {
        Self {
            key,
            pending: false,
        }
    }
}

impl<'a> KeySource<'a> for SingleKeySource {
    fn prepare(&mut self, _slice: PartitionSlice<'a>) -> Result<()> {
        self.pending = true;
        Ok(())
    }

    fn next_key(&mut self) -> Option<i32> {
        std::mem::take(&mut self.pending).then_some(self.key)
    }

    fn size(&self) -> usize {
        1
    }

    fn reset(&mut self) {
        self.pending = false;
    }
}

/// Bucket of one `LONG`/`DATE` value.
#[derive(Debug, Clone)]
pub struct SingleLongHashKeySource {
    column: ColumnRef,
    value: i64,
    key: Option<i32>,
    pending: bool,
}

impl SingleLongHashKeySource {
    /// Bucket of `value` in the index of `column`.
    pub fn new(column: impl Into<String>, value: i64) -> Self {
        Self {
            column: ColumnRef::new(column),
            value,
            key: None,
            pending: false,
        }
    }
}

impl<'a> KeySource<'a> for SingleLongHashKeySource {
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
        if self.key.is_none() {
            let metadata = slice.metadata();
            let column = self.column.resolve(metadata)?;
            let buckets = metadata.column(column)?.distinct_count_hint;
            self.key = Some(hash::long_bucket(self.value, buckets));
        }
        self.pending = true;
        Ok(())
    }

    fn next_key(&mut self) -> Option<i32> {
        if std::mem::take(&mut self.pending) {
            self.key
        } else {
            None
        }
    }

    fn size(&self) -> usize {
        1
    }

    fn reset(&mut self) {
        self.column.reset();
        self.key = None;
        self.pending = false;
    }
}

/// Bucket of one `INT` value.
#[derive(Debug, Clone)]
pub struct SingleIntHashKeySource(SingleLongHashKeySource);

impl SingleIntHashKeySource {
    /// Bucket of `value` in the index of `column`.
    pub fn new(column: impl Into<String>, value: i32) -> Self {
        Self(SingleLongHashKeySource::new(column, value as i64))
    }
}

impl<'a> KeySource<'a> for SingleIntHashKeySource {
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
        self.0.prepare(slice)
    }

    fn next_key(&mut self) -> Option<i32> {
        KeySource::next_key(&mut self.0)
    }

    fn size(&self) -> usize {
        1
    }

    fn reset(&mut self) {
        KeySource::reset(&mut self.0)
    }
}

/// Buckets of one or more `STRING` values. Values sharing a bucket yield
/// its key once.
#[derive(Debug, Clone)]
pub struct StringHashKeySource {
    column: ColumnRef,
    values: Vec<String>,
    keys: Vec<i32>,
    resolved: bool,
    position: usize,
}

impl StringHashKeySource {
    /// Buckets of `values` in the index of `column`.
    pub fn new<I, S>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            column: ColumnRef::new(column),
            values: values.into_iter().map(Into::into).collect(),
            keys: Vec::new(),
            resolved: false,
            position: 0,
        }
    }
}

impl<'a> KeySource<'a> for StringHashKeySource {
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
        if !self.resolved {
            let metadata = slice.metadata();
            let column = self.column.resolve(metadata)?;
            let buckets = metadata.column(column)?.distinct_count_hint;
            self.keys.clear();
            for value in &self.values {
                let key = hash::bounded_hash(Some(value.as_str()), buckets);
                if !self.keys.contains(&key) {
                    self.keys.push(key);
                }
            }
            self.resolved = true;
        }
        self.position = 0;
        Ok(())
    }

    fn next_key(&mut self) -> Option<i32> {
        let key = self.keys.get(self.position).copied();
        self.position += 1;
        key
    }

    fn size(&self) -> usize {
        self.keys.len()
    }

    fn reset(&mut self) {
        self.column.reset();
        self.keys.clear();
        self.resolved = false;
        self.position = 0;
    }
}

/// Every key of a symbol column's table.
#[derive(Debug, Clone)]
pub struct SymbolTableKeySource {
    column: ColumnRef,
    next: i32,
    size: i32,
}

impl SymbolTableKeySource {
    /// All keys of the symbol table of `column`.
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: ColumnRef::new(column),
            next: 0,
            size: 0,
        }
    }
}

impl<'a> KeySource<'a> for SymbolTableKeySource {
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
        let column = self.column.resolve(slice.metadata())?;
        self.size = slice.symbols.get(column)?.size();
        self.next = 0;
        Ok(())
    }

    fn next_key(&mut self) -> Option<i32> {
        if self.next >= self.size {
            return None;
        }
        self.next += 1;
        Some(self.next - 1)
    }

    fn size(&self) -> usize {
        self.size as usize
    }

    fn reset(&mut self) {
        self.column.reset();
        self.next = 0;
        self.size = 0;
    }
}

/// Keys of the listed symbol values present in the table; absent values are
/// skipped.
#[derive(Debug, Clone)]
pub struct PartialSymbolKeySource {
    column: ColumnRef,
    values: Vec<String>,
    keys: Vec<i32>,
    position: usize,
}

impl PartialSymbolKeySource {
    /// Keys of `values` in the symbol table of `column`.
    pub fn new<I, S>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            column: ColumnRef::new(column),
            values: values.into_iter().map(Into::into).collect(),
            keys: Vec::new(),
            position: 0,
        }
    }
}

impl<'a> KeySource<'a> for PartialSymbolKeySource {
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
        let column = self.column.resolve(slice.metadata())?;
        let table = slice.symbols.get(column)?;
        self.keys.clear();
        self.keys
            .extend(self.values.iter().filter_map(|v| table.get_quick(v)));
        self.position = 0;
        Ok(())
    }

    fn next_key(&mut self) -> Option<i32> {
        let key = self.keys.get(self.position).copied();
        self.position += 1;
        key
    }

    fn size(&self) -> usize {
        self.keys.len()
    }

    fn reset(&mut self) {
        self.column.reset();
        self.keys.clear();
        self.position = 0;
    }
}
