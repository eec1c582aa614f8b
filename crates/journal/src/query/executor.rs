//! Drives a row source over the slices of a partition source.

use super::{PartitionSource, RowSource};
use crate::error::Result;
use crate::journal::JournalView;
use crate::partition::{rows, Partition};

/// Global row ids produced by a row source over every slice of a partition
/// source. Created by [`for_each_partition`].
pub struct PartitionRows<P, S> {
    partitions: P,
    rows: S,
    current: Option<usize>,
    done: bool,
}

/// Runs `rows` over every slice of `partitions`, yielding global row ids.
///
/// # Examples
///
/// ```rust,ignore
/// let view = journal.view()?;
/// let expensive = for_each_partition(
///     JournalPartitionSource::asc(view),
///     FilteredRowSource::new(AllRowSource::new(), DoubleGreaterThanFilter::new("px", 100.0)),
/// )
/// .top(10)?;
/// ```
pub fn for_each_partition<'a, P, S>(partitions: P, rows: S) -> PartitionRows<P, S>
where
    P: PartitionSource<'a>,
    S: RowSource<'a>,
{
    PartitionRows {
        partitions,
        rows,
        current: None,
        done: false,
    }
}

impl<'a, P: PartitionSource<'a>, S: RowSource<'a>> PartitionRows<P, S> {
    fn advance(&mut self) -> Result<Option<i64>> {
        loop {
            if let Some(partition) = self.current {
                if let Some(row) = self.rows.next_row()? {
                    return Ok(Some(rows::to_row_id(partition, row)));
                }
            }
            match self.partitions.next_slice()? {
                Some(slice) => {
                    self.rows.prepare(slice)?;
                    self.current = Some(slice.partition.partition_index());
                }
                None => return Ok(None),
            }
        }
    }

    /// Collects every row id.
    pub fn collect_rows(self) -> Result<Vec<i64>> {
        self.collect()
    }

    /// Collects at most `count` row ids.
    pub fn top(self, count: usize) -> Result<Vec<i64>> {
        self.take(count).collect()
    }

    /// Restarts the query, dropping state the sources cached.
    pub fn reset(&mut self) {
        self.partitions.reset();
        self.rows.reset();
        self.current = None;
        self.done = false;
    }
}

impl<'a, P: PartitionSource<'a>, S: RowSource<'a>> Iterator for PartitionRows<P, S> {
    type Item = Result<i64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Evaluates `predicate` over every row of every partition of `view` on the
/// rayon pool and returns the accepted global row ids in ascending order.
pub fn parallel_scan<F>(view: JournalView<'_>, chunk: i64, predicate: F) -> Result<Vec<i64>>
where
    F: Fn(&Partition, i64) -> Result<bool> + Sync,
{
    let mut accepted = Vec::new();
    for partition in view.partitions() {
        let index = partition.partition_index();
        let found = partition.parallel_filter(0, partition.size()? - 1, chunk, &predicate)?;
        accepted.extend(found.into_iter().map(|row| rows::to_row_id(index, row)));
    }
    Ok(accepted)
}
