//! Journal: the owner of a set of time partitions.
//!
//! A [`Journal`] routes appends to the partition covering the record's
//! timestamp, creating partitions lazily, and keeps the committed state of
//! the last [`Journal::commit`] so [`Journal::rollback`] can return to it.
//! Readers borrow a [`JournalView`] and compose query sources over it.
//!
//! # Examples
//!
//! ```rust,ignore
//! use alopex_journal::journal::Journal;
//!
//! let mut journal = Journal::open(metadata, binding)?;
//! let row_id = journal.append(&Quote { ts, sym: "EURUSD".into(), bid: 1.08 })?;
//! journal.commit()?;
//!
//! let view = journal.view()?;
//! let bid = view.record(row_id)?.get(2)?;
//! ```

use crate::error::{JournalError, Result};
use crate::events::CommitPublisher;
use crate::metadata::JournalMetadata;
use crate::partition::layout::{Interval, PartitionLayout, PartitionType};
use crate::partition::rows;
use crate::partition::{Partition, PartitionRecord, TX_LIMIT_EVAL};
use crate::record::RecordBinding;
use crate::storage::{AccessMode, SymbolTables};
use std::fs;
use std::sync::Arc;
use tracing::{debug, warn};

/// A single-writer columnar journal.
pub struct Journal<T> {
    metadata: Arc<JournalMetadata>,
    layout: PartitionLayout,
    partitions: Vec<Partition>,
    symbols: SymbolTables,
    binding: RecordBinding<T>,
    publisher: Option<Arc<dyn CommitPublisher>>,
    committed_sizes: Vec<i64>,
    committed_symbols: Vec<i32>,
    last_timestamp: i64,
}

impl<T> std::fmt::Debug for Journal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("location", &self.metadata.location())
            .field("partitions", &self.partitions.len())
            .field("last_timestamp", &self.last_timestamp)
            .finish()
    }
}

impl<T> Journal<T> {
    /// Opens the journal at the metadata location, discovering partitions
    /// on disk.
    ///
    /// Rows appended but never committed are not on disk as far as a reopen
    /// is concerned. In append mode, rows committed to the columns but
    /// missing from the indexes (a crash between the two) are indexed before
    /// returning.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidMetadata`] if `binding` does not cover
    /// every column, or if the journal is time-partitioned without a
    /// timestamp column.
    pub fn open(metadata: JournalMetadata, binding: RecordBinding<T>) -> Result<Self> {
        binding.validate(metadata.columns())?;
        if metadata.partition_type() != PartitionType::None
            && metadata.timestamp_column_index().is_none()
        {
            return Err(JournalError::InvalidMetadata(format!(
                "{:?} partitioning needs a timestamp column",
                metadata.partition_type()
            )));
        }

        let append = metadata.config().access_mode == AccessMode::Append;
        if append {
            fs::create_dir_all(metadata.location())?;
        }

        let metadata = Arc::new(metadata);
        let layout = PartitionLayout::new(metadata.location(), metadata.partition_type());
        let symbols = SymbolTables::open(&metadata)?;
        let intervals = layout.list_partitions()?;
        let last = intervals.len().saturating_sub(1);

        let mut partitions = Vec::with_capacity(intervals.len());
        let mut committed_sizes = Vec::with_capacity(intervals.len());
        for (i, interval) in intervals.into_iter().enumerate() {
            let mut partition =
                Partition::new(Arc::clone(&metadata), interval, i, TX_LIMIT_EVAL, None);
            partition.open()?;
            if append {
                catch_up_indexes(&mut partition)?;
            }
            committed_sizes.push(partition.size()?);
            if i != last {
                partition.close();
            }
            partitions.push(partition);
        }

        let mut journal = Self {
            committed_symbols: symbols.sizes(),
            metadata,
            layout,
            partitions,
            symbols,
            binding,
            publisher: None,
            committed_sizes,
            last_timestamp: i64::MIN,
        };
        journal.last_timestamp = journal.read_last_timestamp()?;
        debug!(
            "Opened journal {} [partitions={}, mode={:?}]",
            journal.metadata.location().display(),
            journal.partitions.len(),
            journal.metadata.config().access_mode
        );
        Ok(journal)
    }

    /// Publishes every commit to `publisher`.
    pub fn with_publisher(mut self, publisher: Arc<dyn CommitPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Journal metadata.
    pub fn metadata(&self) -> &JournalMetadata {
        &self.metadata
    }

    /// Symbol tables of the journal.
    pub fn symbols(&self) -> &SymbolTables {
        &self.symbols
    }

    /// Record binding used for appends and reads.
    pub fn binding(&self) -> &RecordBinding<T> {
        &self.binding
    }

    /// Number of partitions.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Partition at `index`, open or not.
    pub fn partition(&self, index: usize) -> Option<&Partition> {
        self.partitions.get(index)
    }

    /// Opens and returns the partition at `index`.
    pub fn open_partition(&mut self, index: usize) -> Result<&mut Partition> {
        let count = self.partitions.len();
        let partition = self
            .partitions
            .get_mut(index)
            .ok_or_else(|| JournalError::PartitionClosed(format!("#{} of {}", index, count)))?;
        partition.open()
    }

    /// Timestamp of the last appended record, `i64::MIN` if none.
    pub fn last_timestamp(&self) -> i64 {
        self.last_timestamp
    }

    /// Total number of rows, including rows not committed yet.
    pub fn size(&self) -> Result<i64> {
        let mut total = 0;
        for (partition, committed) in self.partitions.iter().zip(&self.committed_sizes) {
            total += if partition.is_open() {
                partition.size()?
            } else {
                *committed
            };
        }
        Ok(total)
    }

    /// Appends a record and returns its global row id.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::ReadOnly`] in read mode and
    /// [`JournalError::OutOfOrderTimestamp`] for a timestamp older than the
    /// start of the last partition.
    pub fn append(&mut self, record: &T) -> Result<i64> {
        if self.metadata.config().access_mode != AccessMode::Append {
            return Err(JournalError::ReadOnly(self.metadata.location().to_path_buf()));
        }
        let timestamp = self.timestamp_of(record)?;
        let index = self.partition_for_append(timestamp)?;
        let partition = &mut self.partitions[index];
        partition.open()?;
        let row = partition.append(record, &self.binding, &mut self.symbols)?;
        if self.metadata.timestamp_column_index().is_some() {
            self.last_timestamp = timestamp;
        }
        Ok(rows::to_row_id(index, row))
    }

    fn timestamp_of(&self, record: &T) -> Result<i64> {
        let Some(column) = self.metadata.timestamp_column_index() else {
            return Ok(0);
        };
        let value = self.binding.get(record, column);
        value.as_i64().ok_or_else(|| {
            let meta = &self.metadata.columns()[column];
            JournalError::ColumnTypeMismatch {
                column: meta.name.clone(),
                expected: meta.column_type.name(),
                actual: value.type_name(),
            }
        })
    }

    fn partition_for_append(&mut self, timestamp: i64) -> Result<usize> {
        if let Some(last) = self.partitions.last() {
            let interval = last.interval();
            if interval.contains(timestamp) {
                return Ok(self.partitions.len() - 1);
            }
            if timestamp < interval.lo {
                return Err(JournalError::OutOfOrderTimestamp {
                    timestamp,
                    partition_start: interval.lo,
                });
            }
        }

        let interval = self.metadata.partition_type().interval_for(timestamp);
        let index = self.partitions.len();
        let partition = Partition::new(
            Arc::clone(&self.metadata),
            interval,
            index,
            TX_LIMIT_EVAL,
            None,
        );
        debug!("Created partition {} for timestamp {}", partition.dir().display(), timestamp);
        self.partitions.push(partition);
        Ok(index)
    }

    /// Reads the record at `row_id` into `out`.
    pub fn read(&mut self, row_id: i64, out: &mut T) -> Result<()> {
        let index = rows::to_partition_index(row_id);
        self.open_partition(index)?;
        self.partitions[index].read(
            rows::to_local_row_id(row_id),
            out,
            &self.binding,
            &self.symbols,
        )
    }

    /// Makes every append since the last commit durable and visible to
    /// index readers, then notifies the publisher.
    pub fn commit(&mut self) -> Result<()> {
        for partition in self.partitions.iter_mut().filter(|p| p.is_open()) {
            partition.commit()?;
        }
        self.symbols.commit()?;

        self.committed_sizes.resize(self.partitions.len(), 0);
        for (partition, committed) in self.partitions.iter().zip(self.committed_sizes.iter_mut()) {
            if partition.is_open() {
                *committed = partition.size()?;
            }
        }
        self.committed_symbols = self.symbols.sizes();

        if let Some(publisher) = &self.publisher {
            publisher.publish(self.metadata.config().journal_index, self.last_timestamp);
        }
        debug!(
            "Committed journal {} [partitions={}, last_timestamp={}]",
            self.metadata.location().display(),
            self.partitions.len(),
            self.last_timestamp
        );
        Ok(())
    }

    /// Discards every append since the last commit. Partitions created since
    /// then are removed from disk.
    pub fn rollback(&mut self) -> Result<()> {
        let committed = self.committed_sizes.len();
        while self.partitions.len() > committed {
            let Some(mut partition) = self.partitions.pop() else {
                break;
            };
            self.remove_partition(&mut partition)?;
        }

        for (partition, &size) in self.partitions.iter_mut().zip(&self.committed_sizes) {
            if partition.is_open() {
                partition.rollback_indexes()?;
                partition.truncate(size)?;
            }
        }
        self.symbols.truncate(&self.committed_symbols)?;
        self.last_timestamp = self.read_last_timestamp()?;
        warn!(
            "Rolled back journal {} to {} partitions",
            self.metadata.location().display(),
            self.partitions.len()
        );
        Ok(())
    }

    fn remove_partition(&self, partition: &mut Partition) -> Result<()> {
        if partition.is_open() {
            partition.rollback_indexes()?;
            partition.truncate(0)?;
        }
        partition.close();
        let dir = partition.dir();
        if dir != self.layout.root() && dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    /// Truncates the partition at `index` to `size` rows.
    pub fn truncate_partition(&mut self, index: usize, size: i64) -> Result<()> {
        let partition = self.open_partition(index)?;
        partition.rollback_indexes()?;
        partition.truncate(size)?;
        let new_size = partition.size()?;
        if let Some(committed) = self.committed_sizes.get_mut(index) {
            *committed = (*committed).min(new_size);
        }
        self.last_timestamp = self.read_last_timestamp()?;
        Ok(())
    }

    /// Picks up partitions and rows committed by another process.
    pub fn refresh(&mut self) -> Result<()> {
        self.symbols.refresh()?;
        for partition in self.partitions.iter_mut().filter(|p| p.is_open()) {
            partition.refresh()?;
        }

        let intervals = self.layout.list_partitions()?;
        for interval in intervals.into_iter().skip(self.partitions.len()) {
            let index = self.partitions.len();
            self.partitions.push(Partition::new(
                Arc::clone(&self.metadata),
                interval,
                index,
                TX_LIMIT_EVAL,
                None,
            ));
        }

        let mut sizes = Vec::with_capacity(self.partitions.len());
        for partition in &mut self.partitions {
            sizes.push(partition.open()?.size()?);
        }
        self.committed_sizes = sizes;
        self.committed_symbols = self.symbols.sizes();
        self.last_timestamp = self.read_last_timestamp()?;
        Ok(())
    }

    /// Closes idle partitions (except the append target and partitions
    /// holding uncommitted rows) and idle indexes.
    pub fn expire_open_files(&mut self) {
        let ttl = self.metadata.config().open_file_ttl;
        let last = self.partitions.len().saturating_sub(1);
        for (i, partition) in self.partitions.iter_mut().enumerate() {
            if !partition.is_open() {
                continue;
            }
            let committed = self.committed_sizes.get(i).copied();
            let pending = committed != partition.size().ok();
            if i != last && !pending && partition.last_accessed().elapsed() > ttl {
                debug!("Closing idle partition {}", partition.dir().display());
                partition.close();
            } else {
                partition.expire_open_indices();
            }
        }
    }

    /// Opens every partition and borrows the journal for reading.
    pub fn view(&mut self) -> Result<JournalView<'_>> {
        for partition in &mut self.partitions {
            partition.open()?;
        }
        Ok(JournalView {
            metadata: &self.metadata,
            partitions: &self.partitions,
            symbols: &self.symbols,
        })
    }

    /// Flushes every open partition and symbol table.
    pub fn force(&self) -> Result<()> {
        for partition in self.partitions.iter().filter(|p| p.is_open()) {
            partition.force()?;
        }
        self.symbols.force()
    }

    /// Closes every partition.
    pub fn close(&mut self) {
        for partition in &mut self.partitions {
            partition.close();
        }
    }

    fn read_last_timestamp(&mut self) -> Result<i64> {
        let Some(column) = self.metadata.timestamp_column_index() else {
            return Ok(i64::MIN);
        };
        for partition in self.partitions.iter_mut().rev() {
            let partition = partition.open()?;
            let size = partition.size()?;
            if size > 0 {
                return partition.get_long(size - 1, column);
            }
        }
        Ok(i64::MIN)
    }
}

/// Indexes rows the columns hold but the indexes miss. Rebuilds when the
/// indexes disagree with each other.
fn catch_up_indexes(partition: &mut Partition) -> Result<()> {
    let size = partition.size()?;
    let indexed: Vec<usize> = partition
        .metadata()
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, c)| c.indexed)
        .map(|(i, _)| i)
        .collect();
    let sizes = indexed
        .iter()
        .map(|&column| partition.index_for_column(column).map(|index| index.size()))
        .collect::<Result<Vec<_>>>()?;

    let Some(&indexed_size) = sizes.iter().min() else {
        return Ok(());
    };
    if sizes.iter().any(|&s| s != indexed_size) || indexed_size > size {
        warn!(
            "Indexes of {} are inconsistent, rebuilding",
            partition.dir().display()
        );
        return partition.rebuild_indexes();
    }
    if indexed_size < size {
        debug!(
            "Indexing {} rows missing from {}",
            size - indexed_size,
            partition.dir().display()
        );
        partition.update_indexes(indexed_size, size)?;
    }
    Ok(())
}

/// A read-only borrow of a journal with every partition open.
#[derive(Debug, Clone, Copy)]
pub struct JournalView<'a> {
    metadata: &'a JournalMetadata,
    partitions: &'a [Partition],
    symbols: &'a SymbolTables,
}

impl<'a> JournalView<'a> {
    /// Journal metadata.
    pub fn metadata(&self) -> &'a JournalMetadata {
        self.metadata
    }

    /// Every partition, oldest first.
    pub fn partitions(&self) -> &'a [Partition] {
        self.partitions
    }

    /// Partition at `index`.
    pub fn partition(&self, index: usize) -> Option<&'a Partition> {
        self.partitions.get(index)
    }

    /// Number of partitions.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Symbol tables of the journal.
    pub fn symbols(&self) -> &'a SymbolTables {
        self.symbols
    }

    /// Total number of rows.
    pub fn size(&self) -> Result<i64> {
        self.partitions.iter().map(Partition::size).sum()
    }

    /// Partitions whose interval overlaps `interval`.
    pub fn partitions_in(&self, interval: Interval) -> impl Iterator<Item = &'a Partition> + 'a {
        self.partitions
            .iter()
            .filter(move |p| p.interval().overlaps(&interval))
    }

    /// Row view at a global row id.
    pub fn record(&self, row_id: i64) -> Result<PartitionRecord<'a>> {
        let index = rows::to_partition_index(row_id);
        let partition = self.partitions.get(index).ok_or_else(|| {
            JournalError::PartitionClosed(format!("#{} of {}", index, self.partitions.len()))
        })?;
        let row = rows::to_local_row_id(row_id);
        let size = partition.size()?;
        if row >= size {
            return Err(JournalError::RowOutOfBounds { row, size });
        }
        Ok(partition.record(self.symbols, row))
    }
}
