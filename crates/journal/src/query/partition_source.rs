//! Partition sources.

use super::{PartitionSlice, PartitionSource};
use crate::error::Result;
use crate::journal::JournalView;
use crate::partition::layout::Interval;
use crate::partition::{rows, SearchType};

/// Partitions of a journal view, oldest or newest first. Empty partitions
/// are skipped.
#[derive(Debug, Clone)]
pub struct JournalPartitionSource<'a> {
    view: JournalView<'a>,
    descending: bool,
    start_row: i64,
    position: usize,
}

impl<'a> JournalPartitionSource<'a> {
    /// Oldest partition first.
    pub fn asc(view: JournalView<'a>) -> Self {
        Self {
            view,
            descending: false,
            start_row: 0,
            position: 0,
        }
    }

    /// Newest partition first.
    pub fn desc(view: JournalView<'a>) -> Self {
        Self {
            descending: true,
            ..Self::asc(view)
        }
    }

    /// Oldest first, starting at the global row id `row_id`.
    pub fn from_row(view: JournalView<'a>, row_id: i64) -> Self {
        Self {
            start_row: row_id,
            position: rows::to_partition_index(row_id),
            ..Self::asc(view)
        }
    }

    fn first_position(&self) -> usize {
        if self.descending {
            0
        } else {
            rows::to_partition_index(self.start_row)
        }
    }
}

impl<'a> PartitionSource<'a> for JournalPartitionSource<'a> {
    fn next_slice(&mut self) -> Result<Option<PartitionSlice<'a>>> {
        let count = self.view.partition_count();
        while self.position < count {
            let index = if self.descending {
                count - 1 - self.position
            } else {
                self.position
            };
            self.position += 1;

            let Some(partition) = self.view.partition(index) else {
                continue;
            };
            let mut slice = PartitionSlice::whole(partition, self.view.symbols())?;
            if !self.descending && index == rows::to_partition_index(self.start_row) {
                slice.lo = rows::to_local_row_id(self.start_row);
            }
            if !slice.is_empty() {
                return Ok(Some(slice));
            }
        }
        Ok(None)
    }

    fn reset(&mut self) {
        self.position = self.first_position();
    }
}

/// Narrows each slice of a delegate to the rows whose timestamp falls in
/// `[interval.lo, interval.hi)`. Partitions outside the interval are
/// skipped without a search.
pub struct IntervalPartitionSource<P> {
    delegate: P,
    interval: Interval,
}

impl<P> IntervalPartitionSource<P> {
    /// Restricts `delegate` to `interval`.
    pub fn new(delegate: P, interval: Interval) -> Self {
        Self { delegate, interval }
    }
}

impl<'a, P: PartitionSource<'a>> PartitionSource<'a> for IntervalPartitionSource<P> {
    fn next_slice(&mut self) -> Result<Option<PartitionSlice<'a>>> {
        while let Some(mut slice) = self.delegate.next_slice()? {
            if !slice.partition.interval().overlaps(&self.interval) {
                continue;
            }
            let partition = slice.partition;
            let lo = partition.index_of_range(
                self.interval.lo,
                SearchType::NewerOrSame,
                slice.lo,
                slice.hi,
            )?;
            let hi = partition.index_of_range(
                self.interval.hi.saturating_sub(1),
                SearchType::OlderOrSame,
                slice.lo,
                slice.hi,
            )?;
            if let (Some(lo), Some(hi)) = (lo, hi) {
                if lo <= hi {
                    slice.lo = lo;
                    slice.hi = hi;
                    return Ok(Some(slice));
                }
            }
        }
        Ok(None)
    }

    fn reset(&mut self) {
        self.delegate.reset();
    }
}
