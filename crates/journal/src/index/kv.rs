//! Multi-value inverted index: `i32` key to an insertion-ordered list of
//! `i64` row ids.
//!
//! ## File format
//!
//! Key file `<base>.k` (offsets are logical, see [`MappedStorage`]):
//!
//! ```text
//! 0   row block length (i64)
//! 8   active pointer: offset of the committed key block (i64)
//! P   key block size in bytes (i64)
//! P+8 max value (i64)
//! P+16.. entries { tail block offset: i64, row count: i64 }, key k at (k+1)*16
//! ```
//!
//! Row file `<base>.r` is a sequence of blocks of `row_block_len` row ids
//! followed by the offset of the previous block of the same key. A block
//! offset points one past its end; 0 means "no block".
//!
//! The first `add` of a transaction copies the committed key block to the end
//! of the key file. `commit` writes the new block size and max value, then
//! flips the active pointer with a single release store, so readers see
//! either the old or the new directory.

use crate::error::{JournalError, Result};
use crate::metadata::{DEFAULT_DISTINCT_COUNT_HINT, DEFAULT_RECORD_HINT, DEFAULT_TX_COUNT_HINT};
use crate::storage::mapped::{bit_hint, AccessMode, MappedStorage};
use crate::storage::VALUE_IS_NULL;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Size of one key directory entry.
pub const ENTRY_SIZE: u64 = 16;

/// Upper bound of the row block length.
pub const MAX_ROW_BLOCK_LEN: i64 = 134_217_728;

const ROW_BLOCK_LEN_OFFSET: u64 = 0;
const ACTIVE_POINTER_OFFSET: u64 = 8;
const INITIAL_KEY_BLOCK_OFFSET: u64 = 16;
const KEY_BLOCK_HEADER: u64 = 16;

/// Sizing and opening options of a [`KvIndex`].
///
/// # Examples
/// ```rust,ignore
/// use alopex_journal::index::KvIndexConfig;
///
/// let config = KvIndexConfig::default()
///     .with_key_count_hint(16)
///     .with_record_count_hint(1_000);
/// assert_eq!(config.row_block_len(), 62);
/// ```
#[derive(Debug, Clone)]
pub struct KvIndexConfig {
    /// Expected number of distinct keys.
    pub key_count_hint: u64,
    /// Expected number of values over all keys.
    pub record_count_hint: u64,
    /// Expected number of commits, used to size the key file.
    pub tx_count_hint: u64,
    /// How the index files are opened.
    pub access_mode: AccessMode,
    /// Key block to bind to, 0 for the committed one.
    pub tx_address: u64,
}

impl Default for KvIndexConfig {
    fn default() -> Self {
        Self {
            key_count_hint: DEFAULT_DISTINCT_COUNT_HINT as u64,
            record_count_hint: DEFAULT_RECORD_HINT,
            tx_count_hint: DEFAULT_TX_COUNT_HINT,
            access_mode: AccessMode::Append,
            tx_address: 0,
        }
    }
}

impl KvIndexConfig {
    /// Sets the expected number of distinct keys.
    pub fn with_key_count_hint(mut self, hint: u64) -> Self {
        self.key_count_hint = hint;
        self
    }

    /// Sets the expected number of values.
    pub fn with_record_count_hint(mut self, hint: u64) -> Self {
        self.record_count_hint = hint;
        self
    }

    /// Sets the expected number of commits.
    pub fn with_tx_count_hint(mut self, hint: u64) -> Self {
        self.tx_count_hint = hint;
        self
    }

    /// Sets the access mode.
    pub fn with_access_mode(mut self, mode: AccessMode) -> Self {
        self.access_mode = mode;
        self
    }

    /// Binds the index to a specific committed key block.
    pub fn with_tx_address(mut self, tx_address: u64) -> Self {
        self.tx_address = tx_address;
        self
    }

    fn key_hint(&self) -> u64 {
        self.key_count_hint.clamp(1, i32::MAX as u64)
    }

    /// Row ids per block for a new index: `record / key`, clamped to
    /// `[1, MAX_ROW_BLOCK_LEN]`.
    pub fn row_block_len(&self) -> i64 {
        ((self.record_count_hint / self.key_hint()) as i64).clamp(1, MAX_ROW_BLOCK_LEN)
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn le_i64(bytes: &[u8], at: usize) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    i64::from_le_bytes(buf)
}

/// Key index over a pair of mapped files.
#[derive(Debug)]
pub struct KvIndex {
    base: PathBuf,
    key_data: MappedStorage,
    row_data: MappedStorage,
    row_block_len: i64,
    row_block_size: u64,
    key_block_size_offset: u64,
    first_entry_offset: u64,
    key_block_size: u64,
    max_value: i64,
    row_append_offset: u64,
    in_transaction: bool,
}

impl KvIndex {
    /// Opens or creates the index files `<base>.k` and `<base>.r`.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be mapped or the stored row block
    /// length is invalid.
    pub fn open(base: impl AsRef<Path>, config: &KvIndexConfig) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        let key_hint = config.key_hint();
        let mode = config.access_mode;

        let mut key_data = MappedStorage::open(
            with_suffix(&base, ".k"),
            bit_hint(8, key_hint.saturating_mul(config.tx_count_hint.max(1))),
            mode,
        )?;

        let mut row_block_len = config.row_block_len();
        if key_data.append_offset() > 0 {
            row_block_len = key_data.read_i64(ROW_BLOCK_LEN_OFFSET)?;
            if !(1..=MAX_ROW_BLOCK_LEN).contains(&row_block_len) {
                return Err(JournalError::CorruptIndex {
                    path: base,
                    reason: format!("invalid row block length {}", row_block_len),
                });
            }
        } else if mode == AccessMode::Append {
            key_data.write_i64(ROW_BLOCK_LEN_OFFSET, row_block_len)?;
            key_data.write_i64(ACTIVE_POINTER_OFFSET, INITIAL_KEY_BLOCK_OFFSET as i64)?;
            key_data.write_i64(INITIAL_KEY_BLOCK_OFFSET, 0)?;
            key_data.write_i64(INITIAL_KEY_BLOCK_OFFSET + 8, 0)?;
            key_data.set_append_offset(INITIAL_KEY_BLOCK_OFFSET + KEY_BLOCK_HEADER)?;
        }

        let row_block_size = row_block_len as u64 * 8 + 8;
        let row_data = MappedStorage::open(
            with_suffix(&base, ".r"),
            bit_hint(row_block_size as usize, key_hint),
            mode,
        )?;

        let mut index = Self {
            base,
            row_append_offset: row_data.append_offset(),
            key_data,
            row_data,
            row_block_len,
            row_block_size,
            key_block_size_offset: INITIAL_KEY_BLOCK_OFFSET,
            first_entry_offset: INITIAL_KEY_BLOCK_OFFSET + KEY_BLOCK_HEADER,
            key_block_size: 0,
            max_value: 0,
            in_transaction: false,
        };

        if index.key_data.append_offset() > 0 {
            let address = match config.tx_address {
                0 => index.active_address()?,
                address => address,
            };
            index.load_snapshot(address)?;
        }

        trace!(
            "Opened index {} [row_block_len={}, keys={}, max_value={}]",
            index.base.display(),
            index.row_block_len,
            index.key_count(),
            index.max_value
        );
        Ok(index)
    }

    /// Removes both index files of `base`. Missing files are ignored.
    pub fn delete(base: impl AsRef<Path>) -> Result<()> {
        for suffix in [".k", ".r"] {
            match std::fs::remove_file(with_suffix(base.as_ref(), suffix)) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Base path of the index files.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Row ids per block.
    pub fn row_block_len(&self) -> i64 {
        self.row_block_len
    }

    /// Returns true between the first `add` and the next commit or rollback.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Number of directory slots, including the null key slot.
    pub fn key_count(&self) -> u64 {
        self.key_block_size / ENTRY_SIZE
    }

    fn active_address(&self) -> Result<u64> {
        Ok(self.key_data.load_i64(ACTIVE_POINTER_OFFSET)? as u64)
    }

    fn load_snapshot(&mut self, address: u64) -> Result<()> {
        self.key_block_size = self.key_data.read_i64(address)? as u64;
        self.max_value = self.key_data.read_i64(address + 8)?;
        self.key_block_size_offset = address;
        self.first_entry_offset = address + KEY_BLOCK_HEADER;
        Ok(())
    }

    fn key_offset(&self, key: i32) -> u64 {
        self.first_entry_offset + (key as i64 + 1) as u64 * ENTRY_SIZE
    }

    fn entry_offset(&self, key: i32) -> Option<u64> {
        if key < VALUE_IS_NULL {
            return None;
        }
        let offset = self.key_offset(key);
        (offset < self.first_entry_offset + self.key_block_size).then_some(offset)
    }

    fn entry(&self, offset: u64) -> Result<(i64, i64)> {
        Ok((
            self.key_data.read_i64(offset)?,
            self.key_data.read_i64(offset + 8)?,
        ))
    }

    fn corrupt(&self, reason: impl Into<String>) -> JournalError {
        JournalError::CorruptIndex {
            path: self.base.clone(),
            reason: reason.into(),
        }
    }

    fn block_bytes(&self, block: i64) -> Result<&[u8]> {
        if block < self.row_block_size as i64 {
            return Err(self.corrupt(format!("invalid row block offset {}", block)));
        }
        self.row_data
            .bytes(block as u64 - self.row_block_size, self.row_block_size as usize)
    }

    fn cell(&self, block: i64, cell: i64) -> Result<i64> {
        Ok(le_i64(self.block_bytes(block)?, cell as usize * 8))
    }

    fn previous_block(&self, block: i64) -> Result<i64> {
        let previous = le_i64(self.block_bytes(block)?, self.row_block_len as usize * 8);
        if previous == 0 {
            return Err(self.corrupt("count doesn't match number of row blocks"));
        }
        Ok(previous)
    }

    fn begin_tx(&mut self) -> Result<()> {
        let source = self.active_address()?;
        let size = self.key_data.read_i64(source)? as u64;
        let target = self.key_data.append_offset();
        self.key_data
            .copy_within(source, target, size + KEY_BLOCK_HEADER)?;
        self.load_snapshot(target)?;
        self.in_transaction = true;
        Ok(())
    }

    /// Appends `value` to the values of `key`, starting a transaction if
    /// none is open.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidKey`] for keys below `-1`.
    pub fn add(&mut self, key: i32, value: i64) -> Result<()> {
        if key < VALUE_IS_NULL {
            return Err(JournalError::InvalidKey(key));
        }
        if !self.in_transaction {
            self.begin_tx()?;
        }

        let key_offset = self.key_offset(key);
        let end = self.first_entry_offset + self.key_block_size;
        if key_offset >= end {
            self.key_block_size = key_offset + ENTRY_SIZE - self.first_entry_offset;
            // Keys skipped over must read as empty.
            self.key_data.fill_zero(end, key_offset + ENTRY_SIZE - end)?;
        }

        let (mut block, count) = self.entry(key_offset)?;
        let cell = count % self.row_block_len;
        if block == 0 || cell == 0 {
            let previous = block;
            block = (self.row_append_offset + self.row_block_size) as i64;
            self.row_append_offset = block as u64;
            self.row_data.write_i64(block as u64 - 8, previous)?;
            self.key_data.write_i64(key_offset, block)?;
        }
        self.row_data.write_i64(
            block as u64 - self.row_block_size + cell as u64 * 8,
            value,
        )?;
        self.key_data.write_i64(key_offset + 8, count + 1)?;

        if self.max_value <= value {
            self.max_value = value + 1;
        }
        Ok(())
    }

    /// Makes every `add` since the last commit visible. No-op without an
    /// open transaction.
    pub fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.row_data.set_append_offset(self.row_append_offset)?;
        self.key_data
            .write_i64(self.key_block_size_offset, self.key_block_size as i64)?;
        self.key_data
            .write_i64(self.key_block_size_offset + 8, self.max_value)?;
        self.key_data
            .set_append_offset(self.first_entry_offset + self.key_block_size)?;
        self.key_data
            .publish_i64(ACTIVE_POINTER_OFFSET, self.key_block_size_offset as i64)?;
        self.in_transaction = false;
        trace!(
            "Committed index {} at {}",
            self.base.display(),
            self.key_block_size_offset
        );
        Ok(())
    }

    /// Discards every `add` since the last commit.
    pub fn rollback(&mut self) -> Result<()> {
        self.in_transaction = false;
        self.row_append_offset = self.row_data.append_offset();
        if self.key_data.append_offset() > 0 {
            let address = self.active_address()?;
            self.load_snapshot(address)?;
        }
        Ok(())
    }

    /// Number of values stored for `key`; 0 for absent keys.
    pub fn value_count(&self, key: i32) -> Result<i64> {
        match self.entry_offset(key) {
            Some(offset) => self.key_data.read_i64(offset + 8),
            None => Ok(0),
        }
    }

    /// Returns true if `key` has at least one value.
    pub fn contains(&self, key: i32) -> Result<bool> {
        Ok(self.value_count(key)? > 0)
    }

    /// Returns the `i`-th value (insertion order) of `key`. Cheapest for the
    /// most recent values.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::KeyNotFound`] for absent keys,
    /// [`JournalError::ValueIndexOutOfBounds`] if `i` is outside
    /// `[0, count)` and [`JournalError::CorruptIndex`] if the block chain is
    /// shorter than the count.
    pub fn value_quick(&self, key: i32, i: i64) -> Result<i64> {
        let offset = self.entry_offset(key).ok_or(JournalError::KeyNotFound(key))?;
        let (mut block, count) = self.entry(offset)?;
        if i < 0 || i >= count {
            return Err(JournalError::ValueIndexOutOfBounds {
                index: i,
                max: count - 1,
            });
        }

        let mut block_count = (count as u64).div_ceil(self.row_block_len as u64) as i64;
        let target = i / self.row_block_len;
        while target < block_count - 1 {
            block_count -= 1;
            block = self.previous_block(block)?;
        }
        self.cell(block, i % self.row_block_len)
    }

    /// Copies all values of `key` into `out` in insertion order. `out` is
    /// cleared first; absent keys leave it empty, and so does an error.
    pub fn values(&self, key: i32, out: &mut Vec<i64>) -> Result<()> {
        out.clear();
        let result = self.copy_values(key, out);
        if result.is_err() {
            out.clear();
        }
        result
    }

    fn copy_values(&self, key: i32, out: &mut Vec<i64>) -> Result<()> {
        let Some(offset) = self.entry_offset(key) else {
            return Ok(());
        };
        let (mut block, count) = self.entry(offset)?;
        if count <= 0 {
            return Ok(());
        }
        out.resize(count as usize, 0);

        let mut block_count = count / self.row_block_len + 1;
        let mut len = count % self.row_block_len;
        if len == 0 {
            block_count -= 1;
            len = self.row_block_len;
        }

        for i in (0..block_count).rev() {
            let bytes = self.block_bytes(block)?;
            let start = (i * self.row_block_len) as usize;
            for k in 0..len as usize {
                out[start + k] = le_i64(bytes, k * 8);
            }
            if i > 0 {
                block = le_i64(bytes, self.row_block_len as usize * 8);
            }
            len = self.row_block_len;
        }
        Ok(())
    }

    /// Most recent value of `key`. Check [`Self::contains`] first.
    pub fn last_value(&self, key: i32) -> Result<i64> {
        let offset = self.entry_offset(key).ok_or(JournalError::KeyNotFound(key))?;
        let (block, count) = self.entry(offset)?;
        if count <= 0 {
            return Err(JournalError::ValueIndexOutOfBounds { index: 0, max: -1 });
        }
        self.cell(block, (count - 1) % self.row_block_len)
    }

    /// Cursor over the values of `key`, newest first.
    pub fn cursor(&self, key: i32) -> Result<IndexCursor<'_>> {
        let mut cursor = IndexCursor {
            index: self,
            block: 0,
            remaining_rows: 0,
            remaining_blocks: 0,
            size: 0,
        };
        cursor.set_key(key)?;
        Ok(cursor)
    }

    /// One past the largest value stored.
    pub fn size(&self) -> i64 {
        self.max_value
    }

    /// Offset of the key block this index is bound to.
    pub fn tx_address(&self) -> u64 {
        self.key_block_size_offset
    }

    /// Binds to the key block at `address`; 0 rebinds to the latest commit.
    pub fn set_tx_address(&mut self, address: u64) -> Result<()> {
        if address == 0 {
            self.refresh()
        } else {
            self.load_snapshot(address)
        }
    }

    /// Commits any open transaction and rebinds to the latest commit,
    /// remapping files grown by another writer.
    pub fn refresh(&mut self) -> Result<()> {
        self.commit()?;
        self.key_data.refresh()?;
        self.row_data.refresh()?;
        self.row_append_offset = self.row_data.append_offset();
        if self.key_data.append_offset() == 0 {
            return Ok(());
        }
        let row_block_len = self.key_data.read_i64(ROW_BLOCK_LEN_OFFSET)?;
        if row_block_len != self.row_block_len {
            if !(1..=MAX_ROW_BLOCK_LEN).contains(&row_block_len) {
                return Err(self.corrupt(format!("invalid row block length {}", row_block_len)));
            }
            self.row_block_len = row_block_len;
            self.row_block_size = row_block_len as u64 * 8 + 8;
        }
        let address = self.active_address()?;
        self.load_snapshot(address)
    }

    /// Removes every value `>= size`, keeping older ones, and commits.
    pub fn truncate(&mut self, size: i64) -> Result<()> {
        if !self.in_transaction {
            self.begin_tx()?;
        }

        let mut new_max = 0;
        let end = self.first_entry_offset + self.key_block_size;
        let mut offset = self.first_entry_offset;
        while offset < end {
            let (mut block, mut count) = self.entry(offset)?;
            let mut len = count % self.row_block_len;
            if len == 0 {
                len = self.row_block_len;
            }

            while block > 0 {
                let bytes = self.block_bytes(block)?;
                let mut kept = 0;
                let mut max = -1;
                while kept < len {
                    let value = le_i64(bytes, kept as usize * 8);
                    if value >= size {
                        break;
                    }
                    kept += 1;
                    max = value;
                }
                if max >= new_max {
                    new_max = max + 1;
                }

                if kept == 0 {
                    block = le_i64(bytes, self.row_block_len as usize * 8);
                    count -= len;
                    len = self.row_block_len;
                } else {
                    count -= len - kept;
                    break;
                }
            }

            self.key_data.write_i64(offset, block)?;
            self.key_data.write_i64(offset + 8, count.max(0))?;
            offset += ENTRY_SIZE;
        }

        debug!(
            "Truncated index {} to {} [max_value {} -> {}]",
            self.base.display(),
            size,
            self.max_value,
            new_max
        );
        self.max_value = new_max;
        self.commit()
    }

    /// Flushes both mappings.
    pub fn force(&self) -> Result<()> {
        self.key_data.force()?;
        self.row_data.force()
    }

    /// Releases unused file capacity. Key and row blocks written by an open
    /// transaction are kept.
    pub fn compact(&mut self) -> Result<()> {
        let key_end = if self.in_transaction {
            self.first_entry_offset + self.key_block_size
        } else {
            0
        };
        self.key_data.compact_to(key_end)?;
        self.row_data.compact_to(self.row_append_offset)
    }
}

/// Restartable cursor over the values of one key, newest to oldest.
///
/// Yields `Err` once if the block chain is broken, then stops.
#[derive(Debug)]
pub struct IndexCursor<'a> {
    index: &'a KvIndex,
    block: i64,
    remaining_rows: i64,
    remaining_blocks: i64,
    size: i64,
}

impl<'a> IndexCursor<'a> {
    /// Rewinds the cursor onto `key`. Absent keys yield nothing.
    pub fn set_key(&mut self, key: i32) -> Result<()> {
        self.remaining_rows = 0;
        self.remaining_blocks = 0;
        self.size = 0;

        let Some(offset) = self.index.entry_offset(key) else {
            return Ok(());
        };
        let (block, size) = self.index.entry(offset)?;
        self.block = block;
        self.size = size;
        if size <= 0 {
            self.size = 0;
            return Ok(());
        }

        let len = self.index.row_block_len;
        self.remaining_blocks = size / len;
        self.remaining_rows = size % len;
        if self.remaining_rows == 0 {
            self.remaining_blocks -= 1;
            self.remaining_rows = len;
        }
        Ok(())
    }

    /// Number of values of the current key.
    pub fn size(&self) -> i64 {
        self.size
    }
}

impl Iterator for IndexCursor<'_> {
    type Item = Result<i64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining_rows == 0 {
            if self.remaining_blocks <= 0 {
                return None;
            }
            self.remaining_blocks -= 1;
            match self.index.previous_block(self.block) {
                Ok(block) => {
                    self.block = block;
                    self.remaining_rows = self.index.row_block_len;
                }
                Err(err) => {
                    self.remaining_blocks = 0;
                    return Some(Err(err));
                }
            }
        }
        self.remaining_rows -= 1;
        Some(self.index.cell(self.block, self.remaining_rows))
    }
}
