//! One time interval of a journal: columns, null bitmap and key indexes.
//!
//! A [`Partition`] is created closed; [`Partition::open`] maps its files and
//! [`Partition::close`] unmaps them. Both are idempotent.
//!
//! Appends write every column, then the null bitmap row, then commit the
//! columns first to last. The partition size is derived from the last
//! column, so a crash in the middle of a commit never reports more rows than
//! every column holds. Index updates are staged per column and applied after
//! the columns are committed; they become visible on [`Partition::commit`].

use crate::error::{JournalError, Result};
use crate::hash;
use crate::index::{KvIndex, KvIndexConfig};
use crate::metadata::{ColumnMetadata, ColumnType, JournalMetadata};
use crate::partition::layout::{Interval, PartitionLayout};
use crate::partition::search::{self, SearchType};
use crate::record::{Record, RecordBinding, Value};
use crate::storage::mapped::{bit_hint, AccessMode};
use crate::storage::nulls::{NullsColumn, NULLS_FILE};
use crate::storage::{Column, FixedColumn, SymbolTables, VariableColumn, VALUE_IS_NULL};
use bitvec::prelude::*;
use rayon::prelude::*;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// Cached size sentinel meaning "derive from the columns".
pub const TX_LIMIT_EVAL: i64 = -1;

/// Default number of rows handed to one worker by parallel scans.
pub const DEFAULT_SCAN_CHUNK: i64 = 1024;

#[derive(Debug)]
struct IndexProxy {
    column: usize,
    index: Option<KvIndex>,
    tx_address: u64,
    last_accessed: AtomicU64,
}

fn closed(dir: &Path) -> JournalError {
    JournalError::PartitionClosed(dir.display().to_string())
}

fn mismatch(meta: &ColumnMetadata, actual: &'static str) -> JournalError {
    JournalError::ColumnTypeMismatch {
        column: meta.name.clone(),
        expected: meta.column_type.name(),
        actual,
    }
}

fn accepts(column_type: ColumnType, value: &Value<'_>) -> bool {
    matches!(
        (column_type, value),
        (_, Value::Null)
            | (ColumnType::Boolean, Value::Bool(_))
            | (ColumnType::Byte, Value::Byte(_))
            | (ColumnType::Short, Value::Short(_))
            | (ColumnType::Int, Value::Int(_))
            | (ColumnType::Long | ColumnType::Date, Value::Long(_) | Value::Date(_))
            | (ColumnType::Float, Value::Float(_))
            | (ColumnType::Double, Value::Double(_))
            | (ColumnType::Symbol | ColumnType::String, Value::Symbol(_) | Value::Str(_))
            | (ColumnType::Binary, Value::Binary(_))
    )
}

fn index_config(metadata: &JournalMetadata, column: &ColumnMetadata) -> KvIndexConfig {
    let config = metadata.config();
    KvIndexConfig::default()
        .with_key_count_hint(column.distinct_count_hint as u64)
        .with_record_count_hint(config.record_hint)
        .with_tx_count_hint(config.tx_count_hint)
        .with_access_mode(config.access_mode)
}

/// Writes `value` and returns `(row id, index key)`.
fn write_value(
    column: &mut Column,
    meta: &ColumnMetadata,
    column_index: usize,
    value: Value<'_>,
    symbols: &mut SymbolTables,
) -> Result<(i64, i32)> {
    let hint = meta.distinct_count_hint;
    match column {
        Column::Fixed(c) => match (meta.column_type, value) {
            (_, Value::Null) => Ok((c.put_null()?, VALUE_IS_NULL)),
            (ColumnType::Boolean, Value::Bool(v)) => Ok((c.put_bool(v)?, 0)),
            (ColumnType::Byte, Value::Byte(v)) => Ok((c.put_byte(v)?, 0)),
            (ColumnType::Short, Value::Short(v)) => Ok((c.put_short(v)?, 0)),
            (ColumnType::Int, Value::Int(v)) => {
                Ok((c.put_int(v)?, hash::long_bucket(v as i64, hint)))
            }
            (ColumnType::Long | ColumnType::Date, Value::Long(v) | Value::Date(v)) => {
                Ok((c.put_long(v)?, hash::long_bucket(v, hint)))
            }
            (ColumnType::Float, Value::Float(v)) => Ok((c.put_float(v)?, 0)),
            (ColumnType::Double, Value::Double(v)) => Ok((c.put_double(v)?, 0)),
            (ColumnType::Symbol, Value::Symbol(s) | Value::Str(s)) => {
                let key = symbols.get_mut(column_index)?.put(s)?;
                Ok((c.put_int(key)?, key))
            }
            (_, v) => Err(mismatch(meta, v.type_name())),
        },
        Column::Variable(c) => match (meta.column_type, value) {
            (_, Value::Null) => Ok((c.put_null()?, VALUE_IS_NULL)),
            (ColumnType::String, Value::Str(s) | Value::Symbol(s)) => {
                Ok((c.put_str(s)?, hash::bounded_hash(Some(s), hint)))
            }
            (ColumnType::Binary, Value::Binary(b)) => Ok((c.put_bin(b)?, 0)),
            (_, v) => Err(mismatch(meta, v.type_name())),
        },
    }
}

/// A time-bucketed set of columns with a null bitmap and key indexes.
#[derive(Debug)]
pub struct Partition {
    metadata: Arc<JournalMetadata>,
    interval: Interval,
    partition_index: usize,
    dir: PathBuf,
    columns: Option<Vec<Option<Column>>>,
    nulls: Option<NullsColumn>,
    indexes: Vec<Option<IndexProxy>>,
    tx_limit: AtomicI64,
    clock: Instant,
    last_accessed: Instant,
    append_keys: Vec<Option<(i32, i64)>>,
    null_bits: BitVec<u64, Lsb0>,
}

impl Partition {
    /// Creates a closed partition for `interval`. No file is touched.
    ///
    /// `index_tx_addresses`, indexed by column position, binds each index
    /// to a committed key block; `None` binds to the latest.
    pub fn new(
        metadata: Arc<JournalMetadata>,
        interval: Interval,
        partition_index: usize,
        tx_limit: i64,
        index_tx_addresses: Option<&[u64]>,
    ) -> Self {
        let layout = PartitionLayout::new(metadata.location(), metadata.partition_type());
        let dir = layout.partition_dir(&interval);
        let count = metadata.column_count();
        let indexes = metadata
            .columns()
            .iter()
            .enumerate()
            .map(|(column, meta)| {
                meta.indexed.then(|| IndexProxy {
                    column,
                    index: None,
                    tx_address: index_tx_addresses
                        .and_then(|addresses| addresses.get(column).copied())
                        .unwrap_or(0),
                    last_accessed: AtomicU64::new(0),
                })
            })
            .collect();
        let now = Instant::now();

        Self {
            metadata,
            interval,
            partition_index,
            dir,
            columns: None,
            nulls: None,
            indexes,
            tx_limit: AtomicI64::new(tx_limit),
            clock: now,
            last_accessed: now,
            append_keys: vec![None; count],
            null_bits: bitvec![u64, Lsb0; 0; count],
        }
    }

    /// Journal metadata.
    pub fn metadata(&self) -> &JournalMetadata {
        &self.metadata
    }

    /// Time interval covered.
    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// Ordinal within the owning journal.
    pub fn partition_index(&self) -> usize {
        self.partition_index
    }

    /// Changes the ordinal within the owning journal.
    pub fn set_partition_index(&mut self, partition_index: usize) {
        self.partition_index = partition_index;
    }

    /// Directory holding the partition files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory name of the partition.
    pub fn name(&self) -> String {
        self.dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Returns true while the column files are mapped.
    pub fn is_open(&self) -> bool {
        self.columns.is_some()
    }

    /// Last time [`Self::open`] was called.
    pub fn last_accessed(&self) -> Instant {
        self.last_accessed
    }

    fn now(&self) -> u64 {
        self.clock.elapsed().as_nanos() as u64
    }

    /// Maps all column, bitmap and index files. Reopens indexes closed by
    /// [`Self::expire_open_indices`]; otherwise only refreshes the access time.
    pub fn open(&mut self) -> Result<&mut Self> {
        self.last_accessed = Instant::now();
        if self.columns.is_none() {
            let metadata = Arc::clone(&self.metadata);
            let config = metadata.config();
            if config.access_mode == AccessMode::Append {
                fs::create_dir_all(&self.dir)?;
            }

            let count = metadata.column_count();
            let nulls = NullsColumn::open(
                self.dir.join(NULLS_FILE),
                count,
                bit_hint(NullsColumn::record_size(count), config.record_hint),
                config.access_mode,
            )?;
            let columns = metadata
                .columns()
                .iter()
                .map(|meta| self.open_column(meta))
                .collect::<Result<Vec<_>>>()?;

            self.nulls = Some(nulls);
            self.columns = Some(columns);
            debug!("Opened partition {} [rows={}]", self.dir.display(), self.size()?);
        }
        self.open_indexes()?;
        Ok(self)
    }

    fn open_column(&self, meta: &ColumnMetadata) -> Result<Option<Column>> {
        if meta.inactive {
            return Ok(None);
        }
        let config = self.metadata.config();
        let mode = config.access_mode;
        let data = self.dir.join(format!("{}.d", meta.name));

        if meta.column_type.is_variable() {
            let index = self.dir.join(format!("{}.i", meta.name));
            // Older partitions may predate the column.
            if mode == AccessMode::Read && !index.exists() {
                return Ok(None);
            }
            let column = VariableColumn::open(
                data,
                index,
                bit_hint(meta.avg_size, config.record_hint),
                bit_hint(12, config.record_hint),
                mode,
            )?;
            Ok(Some(Column::Variable(column)))
        } else {
            if mode == AccessMode::Read && !data.exists() {
                return Ok(None);
            }
            let column = FixedColumn::open(
                data,
                meta.column_type,
                bit_hint(meta.size(), config.record_hint),
                mode,
            )?;
            Ok(Some(Column::Fixed(column)))
        }
    }

    fn open_indexes(&mut self) -> Result<()> {
        let metadata = Arc::clone(&self.metadata);
        let now = self.now();
        for proxy in self.indexes.iter_mut().flatten() {
            if proxy.index.is_none() {
                let column = metadata.column(proxy.column)?;
                let base = metadata.index_base(&self.dir, proxy.column)?;
                let config = index_config(&metadata, column).with_tx_address(proxy.tx_address);
                proxy.index = Some(KvIndex::open(base, &config)?);
            }
            proxy.last_accessed.store(now, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Unmaps every file. Closing a closed partition does nothing.
    pub fn close(&mut self) {
        if self.columns.take().is_some() {
            self.nulls = None;
            trace!("Partition {} closed", self.dir.display());
        }
        for proxy in self.indexes.iter_mut().flatten() {
            proxy.index = None;
        }
    }

    fn columns(&self) -> Result<&[Option<Column>]> {
        self.columns.as_deref().ok_or_else(|| closed(&self.dir))
    }

    fn nulls(&self) -> Result<&NullsColumn> {
        self.nulls.as_ref().ok_or_else(|| closed(&self.dir))
    }

    fn column(&self, column: usize) -> Result<Option<&Column>> {
        let columns = self.columns()?;
        columns
            .get(column)
            .map(Option::as_ref)
            .ok_or(JournalError::ColumnIndexOutOfBounds {
                index: column,
                count: columns.len(),
            })
    }

    fn fixed(&self, column: usize, expected: &[ColumnType]) -> Result<Option<&FixedColumn>> {
        let col = self.column(column)?;
        let meta = self.metadata.column(column)?;
        if !expected.contains(&meta.column_type) {
            return Err(JournalError::ColumnTypeMismatch {
                column: meta.name.clone(),
                expected: expected[0].name(),
                actual: meta.column_type.name(),
            });
        }
        Ok(col.and_then(Column::as_fixed))
    }

    fn variable(&self, column: usize, expected: ColumnType) -> Result<Option<&VariableColumn>> {
        let col = self.column(column)?;
        let meta = self.metadata.column(column)?;
        if meta.column_type != expected {
            return Err(JournalError::ColumnTypeMismatch {
                column: meta.name.clone(),
                expected: expected.name(),
                actual: meta.column_type.name(),
            });
        }
        Ok(col.and_then(Column::as_variable))
    }

    /// Number of rows.
    ///
    /// Returns the cached transaction limit unless it is [`TX_LIMIT_EVAL`],
    /// in which case the size of the last column is cached and returned.
    pub fn size(&self) -> Result<i64> {
        let columns = self.columns()?;
        let limit = self.tx_limit.load(Ordering::Acquire);
        if limit != TX_LIMIT_EVAL {
            return Ok(limit);
        }
        let size = match columns.iter().rev().flatten().next() {
            Some(column) => column.size(),
            None => self.nulls()?.size(),
        };
        self.tx_limit.store(size, Ordering::Release);
        Ok(size)
    }

    /// Invalidates the cached size.
    pub fn clear_tx(&self) {
        self.tx_limit.store(TX_LIMIT_EVAL, Ordering::Release);
    }

    /// Binds the partition to a transaction: a size limit and, per column,
    /// the key block of each index (`None` or 0 means latest).
    pub fn apply_tx(&mut self, tx_limit: i64, index_tx_addresses: Option<&[u64]>) -> Result<()> {
        if self.tx_limit.load(Ordering::Acquire) == tx_limit {
            return Ok(());
        }
        self.tx_limit.store(tx_limit, Ordering::Release);
        for proxy in self.indexes.iter_mut().flatten() {
            let address = index_tx_addresses
                .and_then(|addresses| addresses.get(proxy.column).copied())
                .unwrap_or(0);
            proxy.tx_address = address;
            if let Some(index) = proxy.index.as_mut() {
                index.set_tx_address(address)?;
            }
        }
        Ok(())
    }

    /// Key block addresses of every index by column position, 0 for
    /// non-indexed columns.
    pub fn index_tx_addresses(&self) -> Vec<u64> {
        self.indexes
            .iter()
            .map(|proxy| match proxy {
                Some(IndexProxy {
                    index: Some(index), ..
                }) => index.tx_address(),
                Some(proxy) => proxy.tx_address,
                None => 0,
            })
            .collect()
    }

    /// Appends one record and returns its local row id.
    ///
    /// Field values come from `binding`; [`Value::Null`] marks a null
    /// field. All values are type-checked before anything is written.
    /// Nothing is visible to other readers until [`Self::commit`].
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::PartitionClosed`] on a closed partition and
    /// [`JournalError::ColumnTypeMismatch`] if a value does not fit its
    /// column.
    pub fn append<T>(
        &mut self,
        record: &T,
        binding: &RecordBinding<T>,
        symbols: &mut SymbolTables,
    ) -> Result<i64> {
        let metadata = Arc::clone(&self.metadata);
        let metas = metadata.columns();
        binding.validate(metas)?;
        for (i, meta) in metas.iter().enumerate() {
            let value = binding.get(record, i);
            if !accepts(meta.column_type, &value) {
                return Err(mismatch(meta, value.type_name()));
            }
        }

        let Some(columns) = self.columns.as_mut() else {
            return Err(closed(&self.dir));
        };
        self.null_bits.fill(false);
        for (i, meta) in metas.iter().enumerate() {
            self.append_keys[i] = None;
            let value = binding.get(record, i);
            if value.is_null() {
                self.null_bits.set(i, true);
            }
            let Some(column) = columns[i].as_mut() else {
                self.null_bits.set(i, true);
                continue;
            };
            let (row, key) = write_value(column, meta, i, value, symbols)?;
            if meta.indexed {
                self.append_keys[i] = Some((key, row));
            }
        }

        let row = match self.nulls.as_mut() {
            Some(nulls) => nulls.put(&self.null_bits)?,
            None => return Err(closed(&self.dir)),
        };

        for i in 0..self.append_keys.len() {
            if let Some((key, row)) = self.append_keys[i].take() {
                self.index_mut(i)?.add(key, row)?;
            }
        }
        self.clear_tx();
        Ok(row)
    }

    /// Commits the null bitmap, then every column from first to last.
    pub fn commit_columns(&mut self) -> Result<()> {
        let Some(nulls) = self.nulls.as_mut() else {
            return Err(closed(&self.dir));
        };
        nulls.commit()?;
        if let Some(columns) = self.columns.as_mut() {
            for column in columns.iter_mut().flatten() {
                column.commit()?;
            }
        }
        Ok(())
    }

    /// Publishes appended rows: the columns first, then the indexes. A
    /// crash in between leaves rows the indexes miss, which
    /// [`Self::update_indexes`] recovers. Closed partitions have nothing
    /// pending.
    pub fn commit(&mut self) -> Result<()> {
        if self.is_open() {
            self.commit_columns()?;
        }
        for proxy in self.indexes.iter_mut().flatten() {
            if let Some(index) = proxy.index.as_mut() {
                index.commit()?;
            }
        }
        Ok(())
    }

    /// Discards index updates not yet committed.
    pub fn rollback_indexes(&mut self) -> Result<()> {
        for proxy in self.indexes.iter_mut().flatten() {
            if let Some(index) = proxy.index.as_mut() {
                index.rollback()?;
            }
        }
        Ok(())
    }

    fn index_mut(&mut self, column: usize) -> Result<&mut KvIndex> {
        let reopen = matches!(self.indexes.get(column), Some(Some(proxy)) if proxy.index.is_none());
        if reopen {
            self.open_indexes()?;
        }
        let name = &self.metadata.column(column)?.name;
        self.indexes
            .get_mut(column)
            .and_then(Option::as_mut)
            .and_then(|proxy| proxy.index.as_mut())
            .ok_or_else(|| JournalError::NoIndexForColumn(name.clone()))
    }

    /// Key index of the column at `column`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::NoIndexForColumn`] if the column is not
    /// indexed and [`JournalError::IndexClosed`] if the index was expired and
    /// the partition has not been reopened since.
    pub fn index_for_column(&self, column: usize) -> Result<&KvIndex> {
        self.columns()?;
        let meta = self.metadata.column(column)?;
        let proxy = self
            .indexes
            .get(column)
            .and_then(Option::as_ref)
            .ok_or_else(|| JournalError::NoIndexForColumn(meta.name.clone()))?;
        proxy.last_accessed.store(self.now(), Ordering::Relaxed);
        proxy.index.as_ref().ok_or(JournalError::IndexClosed(column))
    }

    /// Key index of the column called `name`.
    pub fn index_for_column_name(&self, name: &str) -> Result<&KvIndex> {
        self.index_for_column(self.metadata.column_index(name)?)
    }

    /// Closes index mappings idle for longer than the configured TTL.
    /// Indexes with uncommitted updates stay open.
    pub fn expire_open_indices(&mut self) {
        let ttl = self.metadata.config().open_file_ttl.as_nanos() as u64;
        let now = self.now();
        for proxy in self.indexes.iter_mut().flatten() {
            let idle = now.saturating_sub(proxy.last_accessed.load(Ordering::Relaxed));
            let expired =
                matches!(&proxy.index, Some(index) if !index.in_transaction() && idle > ttl);
            if expired {
                proxy.index = None;
                debug!(
                    "Closed idle index of column {} in {}",
                    proxy.column,
                    self.dir.display()
                );
            }
        }
    }

    /// Returns true if `column` of `row` is null, including columns that
    /// are inactive or absent from this partition.
    pub fn is_null(&self, row: i64, column: usize) -> Result<bool> {
        if self.column(column)?.is_none() || self.metadata.inactive_columns()[column] {
            return Ok(true);
        }
        self.nulls()?.is_set(row, column)
    }

    /// Reads a `BOOLEAN`.
    pub fn get_bool(&self, row: i64, column: usize) -> Result<bool> {
        match self.fixed(column, &[ColumnType::Boolean])? {
            Some(c) => c.get_bool(row),
            None => Ok(false),
        }
    }

    /// Reads a `BYTE`.
    pub fn get_byte(&self, row: i64, column: usize) -> Result<i8> {
        match self.fixed(column, &[ColumnType::Byte])? {
            Some(c) => c.get_byte(row),
            None => Ok(0),
        }
    }

    /// Reads a `SHORT`; nulls read as `i16::MIN`.
    pub fn get_short(&self, row: i64, column: usize) -> Result<i16> {
        match self.fixed(column, &[ColumnType::Short])? {
            Some(c) => c.get_short(row),
            None => Ok(i16::MIN),
        }
    }

    /// Reads an `INT`; nulls read as `i32::MIN`.
    pub fn get_int(&self, row: i64, column: usize) -> Result<i32> {
        match self.fixed(column, &[ColumnType::Int])? {
            Some(c) => c.get_int(row),
            None => Ok(i32::MIN),
        }
    }

    /// Reads a `LONG` or `DATE`; nulls read as `i64::MIN`.
    pub fn get_long(&self, row: i64, column: usize) -> Result<i64> {
        match self.fixed(column, &[ColumnType::Long, ColumnType::Date])? {
            Some(c) => c.get_long(row),
            None => Ok(i64::MIN),
        }
    }

    /// Reads a `FLOAT`; nulls read as NaN.
    pub fn get_float(&self, row: i64, column: usize) -> Result<f32> {
        match self.fixed(column, &[ColumnType::Float])? {
            Some(c) => c.get_float(row),
            None => Ok(f32::NAN),
        }
    }

    /// Reads a `DOUBLE`; nulls read as NaN.
    pub fn get_double(&self, row: i64, column: usize) -> Result<f64> {
        match self.fixed(column, &[ColumnType::Double])? {
            Some(c) => c.get_double(row),
            None => Ok(f64::NAN),
        }
    }

    /// Reads the symbol key of a `SYMBOL`; nulls read as [`VALUE_IS_NULL`].
    pub fn get_symbol_key(&self, row: i64, column: usize) -> Result<i32> {
        match self.fixed(column, &[ColumnType::Symbol])? {
            Some(c) => c.get_int(row),
            None => Ok(VALUE_IS_NULL),
        }
    }

    /// Reads a `SYMBOL` as its string.
    pub fn get_symbol<'a>(
        &self,
        row: i64,
        column: usize,
        symbols: &'a SymbolTables,
    ) -> Result<Option<&'a str>> {
        let key = self.get_symbol_key(row, column)?;
        if key < 0 {
            return Ok(None);
        }
        symbols.get(column)?.value(key)
    }

    /// Reads a `STRING`.
    pub fn get_str(&self, row: i64, column: usize) -> Result<Option<&str>> {
        match self.variable(column, ColumnType::String)? {
            Some(c) => c.get_str(row),
            None => Ok(None),
        }
    }

    /// Reads a `BINARY`.
    pub fn get_binary(&self, row: i64, column: usize) -> Result<Option<&[u8]>> {
        match self.variable(column, ColumnType::Binary)? {
            Some(c) => c.get_bin(row),
            None => Ok(None),
        }
    }

    /// Value of `column` at `row`, honouring the null bitmap.
    pub fn get<'a>(
        &'a self,
        symbols: &'a SymbolTables,
        row: i64,
        column: usize,
    ) -> Result<Value<'a>> {
        if self.is_null(row, column)? {
            return Ok(Value::Null);
        }
        self.value_at(symbols, row, column)
    }

    fn value_at<'a>(
        &'a self,
        symbols: &'a SymbolTables,
        row: i64,
        column: usize,
    ) -> Result<Value<'a>> {
        let meta = self.metadata.column(column)?;
        Ok(match meta.column_type {
            ColumnType::Boolean => Value::Bool(self.get_bool(row, column)?),
            ColumnType::Byte => Value::Byte(self.get_byte(row, column)?),
            ColumnType::Short => Value::Short(self.get_short(row, column)?),
            ColumnType::Int => Value::Int(self.get_int(row, column)?),
            ColumnType::Long => Value::Long(self.get_long(row, column)?),
            ColumnType::Date => Value::Date(self.get_long(row, column)?),
            ColumnType::Float => Value::Float(self.get_float(row, column)?),
            ColumnType::Double => Value::Double(self.get_double(row, column)?),
            ColumnType::Symbol => self
                .get_symbol(row, column, symbols)?
                .map_or(Value::Null, Value::Symbol),
            ColumnType::String => self.get_str(row, column)?.map_or(Value::Null, Value::Str),
            ColumnType::Binary => self
                .get_binary(row, column)?
                .map_or(Value::Null, Value::Binary),
        })
    }

    /// Reads row `row` into `out`. Null fields, including columns that are
    /// inactive or absent from this partition, are set to [`Value::Null`].
    pub fn read<T>(
        &self,
        row: i64,
        out: &mut T,
        binding: &RecordBinding<T>,
        symbols: &SymbolTables,
    ) -> Result<()> {
        let columns = self.columns()?;
        let mut nulls = BitVec::<u64, Lsb0>::new();
        self.nulls()?.get(row, &mut nulls)?;
        if nulls.len() < columns.len() {
            nulls.resize(columns.len(), false);
        }
        for i in self.metadata.inactive_columns().iter_ones() {
            nulls.set(i, true);
        }

        for (i, column) in columns.iter().enumerate() {
            let value = if nulls[i] || column.is_none() {
                Value::Null
            } else {
                self.value_at(symbols, row, i)?
            };
            binding.set(out, i, value);
        }
        Ok(())
    }

    /// Row view for [`Record`] consumers.
    pub fn record<'a>(&'a self, symbols: &'a SymbolTables, row: i64) -> PartitionRecord<'a> {
        PartitionRecord {
            partition: self,
            symbols,
            row,
        }
    }

    /// Position of `timestamp` in the timestamp column over the whole
    /// partition.
    pub fn index_of(&self, timestamp: i64, search_type: SearchType) -> Result<Option<i64>> {
        let hi = self.size()? - 1;
        self.index_of_range(timestamp, search_type, 0, hi)
    }

    /// Position of `timestamp` in the timestamp column within `[lo, hi]`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::NoTimestampColumn`] if the journal has no
    /// timestamp column.
    pub fn index_of_range(
        &self,
        timestamp: i64,
        search_type: SearchType,
        lo: i64,
        hi: i64,
    ) -> Result<Option<i64>> {
        let no_timestamp = || JournalError::NoTimestampColumn(self.dir.display().to_string());
        let column = self.metadata.timestamp_column_index().ok_or_else(no_timestamp)?;
        let timestamps = self
            .fixed(column, &[ColumnType::Date, ColumnType::Long])?
            .ok_or_else(no_timestamp)?;
        search::index_of(|row| timestamps.get_long(row), timestamp, search_type, lo, hi)
    }

    /// Key the index of `column` holds for `row`.
    fn index_key(&self, row: i64, column: usize) -> Result<i32> {
        if self.is_null(row, column)? {
            return Ok(VALUE_IS_NULL);
        }
        let meta = self.metadata.column(column)?;
        let hint = meta.distinct_count_hint;
        match meta.column_type {
            ColumnType::Int => Ok(hash::long_bucket(self.get_int(row, column)? as i64, hint)),
            ColumnType::Long | ColumnType::Date => {
                Ok(hash::long_bucket(self.get_long(row, column)?, hint))
            }
            ColumnType::Symbol => self.get_symbol_key(row, column),
            ColumnType::String => Ok(hash::bounded_hash(self.get_str(row, column)?, hint)),
            _ => Err(JournalError::NoIndexForColumn(meta.name.clone())),
        }
    }

    /// Deletes and rebuilds the index of `column` from the column data.
    pub fn rebuild_index(&mut self, column: usize) -> Result<()> {
        let start = Instant::now();
        self.columns()?;
        let metadata = Arc::clone(&self.metadata);
        let meta = metadata.column(column)?;
        if !matches!(self.indexes.get(column), Some(Some(_))) {
            return Err(JournalError::NoIndexForColumn(meta.name.clone()));
        }

        let base = metadata.index_base(&self.dir, column)?;
        if let Some(Some(proxy)) = self.indexes.get_mut(column) {
            proxy.index = None;
            proxy.tx_address = 0;
        }
        KvIndex::delete(&base)?;

        let mut index = KvIndex::open(&base, &index_config(&metadata, meta))?;
        let size = self.size()?;
        for row in 0..size {
            index.add(self.index_key(row, column)?, row)?;
        }
        index.commit()?;

        let now = self.now();
        if let Some(Some(proxy)) = self.indexes.get_mut(column) {
            proxy.index = Some(index);
            proxy.last_accessed.store(now, Ordering::Relaxed);
        }
        debug!(
            "Rebuilt index {} [{} rows, {}ms]",
            base.display(),
            size,
            start.elapsed().as_millis()
        );
        Ok(())
    }

    /// Rebuilds every index of the partition.
    pub fn rebuild_indexes(&mut self) -> Result<()> {
        self.columns()?;
        let indexed: Vec<usize> = self.indexes.iter().flatten().map(|p| p.column).collect();
        for column in indexed {
            self.rebuild_index(column)?;
        }
        Ok(())
    }

    /// Indexes rows `[old_size, new_size)` and commits the indexes.
    pub fn update_indexes(&mut self, old_size: i64, new_size: i64) -> Result<()> {
        if old_size >= new_size {
            return Ok(());
        }
        let indexed: Vec<usize> = self.indexes.iter().flatten().map(|p| p.column).collect();
        for column in indexed {
            let keys = (old_size..new_size)
                .map(|row| self.index_key(row, column).map(|key| (key, row)))
                .collect::<Result<Vec<_>>>()?;
            let index = self.index_mut(column)?;
            for (key, row) in keys {
                index.add(key, row)?;
            }
            index.commit()?;
        }
        Ok(())
    }

    /// Shrinks the partition to `new_size` rows: indexes first, then every
    /// column. Truncating to a size at or above the current one does nothing.
    pub fn truncate(&mut self, new_size: i64) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        let size = self.size()?;
        if size <= new_size {
            return Ok(());
        }
        let new_size = new_size.max(0);

        self.open_indexes()?;
        for proxy in self.indexes.iter_mut().flatten() {
            if let Some(index) = proxy.index.as_mut() {
                index.truncate(new_size)?;
            }
        }
        if let Some(columns) = self.columns.as_mut() {
            for column in columns.iter_mut().flatten() {
                column.truncate(new_size)?;
            }
        }
        if let Some(nulls) = self.nulls.as_mut() {
            nulls.truncate(new_size);
        }
        self.commit_columns()?;
        self.clear_tx();
        debug!("Truncated partition {} from {} to {}", self.dir.display(), size, new_size);
        Ok(())
    }

    /// Re-reads committed state written by another process and rebinds
    /// indexes to their latest commit.
    pub fn refresh(&mut self) -> Result<()> {
        if let Some(columns) = self.columns.as_mut() {
            for column in columns.iter_mut().flatten() {
                column.refresh()?;
            }
        }
        if let Some(nulls) = self.nulls.as_mut() {
            nulls.refresh()?;
        }
        for proxy in self.indexes.iter_mut().flatten() {
            proxy.tx_address = 0;
            if let Some(index) = proxy.index.as_mut() {
                index.refresh()?;
            }
        }
        self.clear_tx();
        Ok(())
    }

    /// Flushes every mapping to disk.
    pub fn force(&self) -> Result<()> {
        for proxy in self.indexes.iter().flatten() {
            if let Some(index) = proxy.index.as_ref() {
                index.force()?;
            }
        }
        if let Some(columns) = self.columns.as_ref() {
            for column in columns.iter().flatten() {
                column.force()?;
            }
        }
        if let Some(nulls) = self.nulls.as_ref() {
            nulls.force()?;
        }
        Ok(())
    }

    /// Releases unused capacity of every file. Logical content is unchanged.
    pub fn compact(&mut self) -> Result<()> {
        let Some(columns) = self.columns.as_mut() else {
            return Err(closed(&self.dir));
        };
        for column in columns.iter_mut().flatten() {
            column.compact()?;
        }
        if let Some(nulls) = self.nulls.as_mut() {
            nulls.compact()?;
        }
        for proxy in self.indexes.iter_mut().flatten() {
            if let Some(index) = proxy.index.as_mut() {
                index.compact()?;
            }
        }
        Ok(())
    }

    /// Evaluates `predicate` over rows `[lo, hi]` on the rayon pool in
    /// chunks of `chunk` rows and returns the accepted rows in ascending
    /// order.
    ///
    /// # Examples
    /// ```rust,ignore
    /// let expensive = partition.parallel_filter(0, partition.size()? - 1, 4096, |p, row| {
    ///     Ok(p.get_double(row, price)? > 100.0)
    /// })?;
    /// ```
    pub fn parallel_filter<F>(&self, lo: i64, hi: i64, chunk: i64, predicate: F) -> Result<Vec<i64>>
    where
        F: Fn(&Partition, i64) -> Result<bool> + Sync,
    {
        self.columns()?;
        if lo > hi {
            return Ok(Vec::new());
        }
        let chunk = chunk.max(1);
        let starts: Vec<i64> = (lo..=hi).step_by(chunk as usize).collect();
        let parts = starts
            .into_par_iter()
            .map(|start| -> Result<Vec<i64>> {
                let end = start.saturating_add(chunk - 1).min(hi);
                let mut accepted = Vec::new();
                for row in start..=end {
                    if predicate(self, row)? {
                        accepted.push(row);
                    }
                }
                Ok(accepted)
            })
            .collect::<Result<Vec<Vec<i64>>>>()?;
        Ok(parts.into_iter().flatten().collect())
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Partition{{index={}, open={}, dir={}, interval=[{}, {})}}",
            self.partition_index,
            self.is_open(),
            self.dir.display(),
            self.interval.lo,
            self.interval.hi
        )
    }
}

/// One row of a partition seen through the [`Record`] trait.
#[derive(Debug, Clone, Copy)]
pub struct PartitionRecord<'a> {
    partition: &'a Partition,
    symbols: &'a SymbolTables,
    row: i64,
}

impl<'a> PartitionRecord<'a> {
    /// Local row id.
    pub fn row(&self) -> i64 {
        self.row
    }

    /// Partition the row belongs to.
    pub fn partition(&self) -> &'a Partition {
        self.partition
    }
}

impl Record for PartitionRecord<'_> {
    fn column_count(&self) -> usize {
        self.partition.metadata().column_count()
    }

    fn get(&self, column: usize) -> Result<Value<'_>> {
        self.partition.get(self.symbols, self.row, column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::JournalConfig;
    use crate::partition::layout::PartitionType;
    use tempfile::TempDir;

    struct Row {
        id: i32,
        price: f64,
    }

    fn binding() -> RecordBinding<Row> {
        RecordBinding::<Row>::new()
            .field(
                |r| if r.id == i32::MIN { Value::Null } else { Value::Int(r.id) },
                |r, v| r.id = v.as_i64().map_or(i32::MIN, |v| v as i32),
            )
            .field(|r| Value::Double(r.price), |r, v| r.price = v.as_f64().unwrap_or(f64::NAN))
    }

    fn partition(dir: &TempDir) -> (Partition, SymbolTables) {
        let metadata = JournalMetadata::new(
            dir.path(),
            vec![
                ColumnMetadata::new("id", ColumnType::Int).with_index(4),
                ColumnMetadata::new("price", ColumnType::Double),
            ],
            None,
            JournalConfig::default()
                .with_partition_type(PartitionType::None)
                .with_record_hint(64),
        )
        .unwrap();
        let metadata = Arc::new(metadata);
        let symbols = SymbolTables::open(&metadata).unwrap();
        let interval = metadata.partition_type().interval_for(0);
        (Partition::new(metadata, interval, 0, TX_LIMIT_EVAL, None), symbols)
    }

    #[test]
    fn test_closed_partition_fails_fast() {
        let temp_dir = TempDir::new().unwrap();
        let (mut p, mut symbols) = partition(&temp_dir);
        assert!(matches!(p.size(), Err(JournalError::PartitionClosed(_))));
        let row = Row { id: 1, price: 1.0 };
        assert!(matches!(
            p.append(&row, &binding(), &mut symbols),
            Err(JournalError::PartitionClosed(_))
        ));
    }

    #[test]
    fn test_append_read_and_nulls() {
        let temp_dir = TempDir::new().unwrap();
        let (mut p, mut symbols) = partition(&temp_dir);
        let binding = binding();
        p.open().unwrap();
        p.append(&Row { id: 7, price: 2.5 }, &binding, &mut symbols).unwrap();
        p.append(&Row { id: i32::MIN, price: 3.5 }, &binding, &mut symbols).unwrap();

        assert_eq!(p.size().unwrap(), 2);
        assert!(!p.is_null(0, 0).unwrap());
        assert!(p.is_null(1, 0).unwrap());

        let mut out = Row { id: 0, price: 0.0 };
        p.read(1, &mut out, &binding, &symbols).unwrap();
        assert_eq!(out.id, i32::MIN);
        assert_eq!(out.price, 3.5);
        assert!(matches!(
            p.get_int(0, 5),
            Err(JournalError::ColumnIndexOutOfBounds { index: 5, count: 2 })
        ));
        assert!(matches!(
            p.get_long(0, 0),
            Err(JournalError::ColumnTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_congruent_ids_share_index_key() {
        let temp_dir = TempDir::new().unwrap();
        let (mut p, mut symbols) = partition(&temp_dir);
        let binding = binding();
        p.open().unwrap();
        for id in [1, 5, 9] {
            p.append(&Row { id, price: 1.0 }, &binding, &mut symbols).unwrap();
        }
        p.commit().unwrap();

        let index = p.index_for_column(0).unwrap();
        let mut rows = Vec::new();
        index.values(1, &mut rows).unwrap();
        assert_eq!(rows, vec![0, 1, 2]);
        assert_eq!(index.value_count(0).unwrap(), 0);
    }

    #[test]
    fn test_rows_are_published_by_commit_only() {
        let temp_dir = TempDir::new().unwrap();
        let (mut p, mut symbols) = partition(&temp_dir);
        let binding = binding();
        p.open().unwrap();
        p.append(&Row { id: 1, price: 1.0 }, &binding, &mut symbols).unwrap();
        p.close();
        assert_eq!(p.open().unwrap().size().unwrap(), 0);

        p.append(&Row { id: 2, price: 2.0 }, &binding, &mut symbols).unwrap();
        p.commit().unwrap();
        p.append(&Row { id: 3, price: 3.0 }, &binding, &mut symbols).unwrap();
        p.close();

        let p = p.open().unwrap();
        assert_eq!(p.size().unwrap(), 1);
        assert_eq!(p.get_int(0, 0).unwrap(), 2);
        assert_eq!(p.index_for_column(0).unwrap().size(), 1);
    }

    #[test]
    fn test_index_of_without_timestamp_column() {
        let temp_dir = TempDir::new().unwrap();
        let (mut p, _) = partition(&temp_dir);
        p.open().unwrap();
        assert!(matches!(
            p.index_of(0, SearchType::NewerOrSame),
            Err(JournalError::NoTimestampColumn(_))
        ));
    }

    #[test]
    fn test_parallel_filter_keeps_order() {
        let temp_dir = TempDir::new().unwrap();
        let (mut p, mut symbols) = partition(&temp_dir);
        let binding = binding();
        p.open().unwrap();
        for i in 0..100 {
            p.append(&Row { id: i, price: i as f64 }, &binding, &mut symbols).unwrap();
        }
        let rows = p
            .parallel_filter(0, 99, 7, |p, row| Ok(p.get_double(row, 1)? >= 90.0))
            .unwrap();
        assert_eq!(rows, (90..100).collect::<Vec<i64>>());
    }

    #[test]
    fn test_expired_index_reopens_on_open() {
        let temp_dir = TempDir::new().unwrap();
        let (p, mut symbols) = partition(&temp_dir);
        let config = p
            .metadata()
            .config()
            .clone()
            .with_open_file_ttl(std::time::Duration::from_millis(1));
        let columns = p.metadata().columns().to_vec();
        let metadata = JournalMetadata::new(temp_dir.path(), columns, None, config).unwrap();
        let mut p = Partition::new(Arc::new(metadata), p.interval(), 0, TX_LIMIT_EVAL, None);
        let binding = binding();

        p.open().unwrap();
        p.append(&Row { id: 3, price: 1.0 }, &binding, &mut symbols).unwrap();
        p.commit().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        p.expire_open_indices();
        assert!(matches!(p.index_for_column(0), Err(JournalError::IndexClosed(0))));

        p.open().unwrap();
        assert_eq!(p.index_for_column(0).unwrap().value_count(3).unwrap(), 1);
    }
}
