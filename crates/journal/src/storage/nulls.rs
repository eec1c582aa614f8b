//! Per-row null bitmap stored in `_nulls.d`.

use crate::error::{JournalError, Result};
use crate::storage::mapped::{AccessMode, MappedStorage};
use bitvec::prelude::*;
use std::path::Path;

/// File name of the null bitmap column inside a partition directory.
pub const NULLS_FILE: &str = "_nulls.d";

/// Fixed-width column holding one bit per column per row.
///
/// Each record is `ceil(column_count / 64)` little-endian `u64` words; bit
/// `i` set means column `i` of that row is null.
#[derive(Debug)]
pub struct NullsColumn {
    storage: MappedStorage,
    words: usize,
    tx_append_offset: u64,
}

impl NullsColumn {
    /// Record width in bytes for `column_count` columns.
    pub fn record_size(column_count: usize) -> usize {
        column_count.div_ceil(64) * 8
    }

    /// Opens the bitmap file at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        column_count: usize,
        bit_hint: u32,
        mode: AccessMode,
    ) -> Result<Self> {
        let storage = MappedStorage::open(path, bit_hint, mode)?;
        let words = column_count.div_ceil(64).max(1);
        let width = (words * 8) as u64;
        let tx_append_offset = storage.append_offset() / width * width;
        Ok(Self {
            storage,
            words,
            tx_append_offset,
        })
    }

    fn width(&self) -> u64 {
        (self.words * 8) as u64
    }

    /// Number of rows including uncommitted ones.
    pub fn size(&self) -> i64 {
        (self.tx_append_offset / self.width()) as i64
    }

    /// Appends one bitmap row, returning its row id.
    pub fn put(&mut self, bits: &BitSlice<u64, Lsb0>) -> Result<i64> {
        let width = self.width();
        let slot = self.storage.bytes_mut(self.tx_append_offset, width as usize)?;
        slot.fill(0);
        for (i, word) in bits.chunks(64).take(self.words).enumerate() {
            let value: u64 = word.load_le();
            slot[i * 8..i * 8 + 8].copy_from_slice(&value.to_le_bytes());
        }
        self.tx_append_offset += width;
        Ok(self.size() - 1)
    }

    /// Reads the bitmap of `row` into `out`, resizing it to the word count.
    pub fn get(&self, row: i64, out: &mut BitVec<u64, Lsb0>) -> Result<()> {
        if row < 0 || row >= self.size() {
            return Err(JournalError::RowOutOfBounds {
                row,
                size: self.size(),
            });
        }
        let offset = row as u64 * self.width();
        out.clear();
        for i in 0..self.words {
            let word = self.storage.read_i64(offset + (i * 8) as u64)? as u64;
            out.extend_from_bitslice(word.view_bits::<Lsb0>());
        }
        Ok(())
    }

    /// Returns true if bit `column` of `row` is set.
    pub fn is_set(&self, row: i64, column: usize) -> Result<bool> {
        if row < 0 || row >= self.size() {
            return Err(JournalError::RowOutOfBounds {
                row,
                size: self.size(),
            });
        }
        if column >= self.words * 64 {
            return Ok(false);
        }
        let offset = row as u64 * self.width() + (column / 64 * 8) as u64;
        let word = self.storage.read_i64(offset)? as u64;
        Ok(word & (1 << (column % 64)) != 0)
    }

    /// Publishes appended rows.
    pub fn commit(&mut self) -> Result<()> {
        self.storage.set_append_offset(self.tx_append_offset)
    }

    /// Drops rows at and after `size`.
    pub fn truncate(&mut self, size: i64) {
        let offset = size.max(0) as u64 * self.width();
        if offset < self.tx_append_offset {
            self.tx_append_offset = offset;
        }
    }

    /// Re-reads committed state.
    pub fn refresh(&mut self) -> Result<()> {
        self.storage.refresh()?;
        self.tx_append_offset = self.storage.append_offset() / self.width() * self.width();
        Ok(())
    }

    /// Flushes the mapping.
    pub fn force(&self) -> Result<()> {
        self.storage.force()
    }

    /// Releases unused file capacity.
    pub fn compact(&mut self) -> Result<()> {
        self.storage.compact_to(self.tx_append_offset)
    }
}
