//! Fixed- and variable-width column encodings over [`MappedStorage`].
//!
//! ## File formats
//!
//! ```text
//! fixed    <name>.d : [value; width] * rows
//! variable <name>.i : [data offset: i64][length: i32] * rows   (12 bytes/row)
//!          <name>.d : concatenated payload bytes
//! ```
//!
//! A variable null is stored as length `-1`, distinct from an empty value.
//! Columns buffer their append cursor in memory; [`FixedColumn::commit`] and
//! [`VariableColumn::commit`] publish it to the file header.

use crate::error::{JournalError, Result};
use crate::metadata::ColumnType;
use crate::storage::mapped::{AccessMode, MappedStorage};
use std::io;
use std::path::Path;

/// Width of one record in the index file of a variable column.
pub const VAR_INDEX_RECORD_SIZE: u64 = 12;

/// Length sentinel marking a null variable-length value.
pub const NULL_LENGTH: i32 = -1;

/// A column of fixed-width values addressed by `row * width`.
#[derive(Debug)]
pub struct FixedColumn {
    storage: MappedStorage,
    column_type: ColumnType,
    width: u64,
    tx_append_offset: u64,
}

impl FixedColumn {
    /// Opens the column file at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        column_type: ColumnType,
        bit_hint: u32,
        mode: AccessMode,
    ) -> Result<Self> {
        let width = column_type.size() as u64;
        if width == 0 {
            return Err(JournalError::InvalidMetadata(format!(
                "{} is not a fixed-width type",
                column_type.name()
            )));
        }
        let storage = MappedStorage::open(path, bit_hint, mode)?;
        let tx_append_offset = storage.append_offset() / width * width;
        Ok(Self {
            storage,
            column_type,
            width,
            tx_append_offset,
        })
    }

    /// Column type.
    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    /// Number of rows including uncommitted ones.
    pub fn size(&self) -> i64 {
        (self.tx_append_offset / self.width) as i64
    }

    /// Number of rows visible after the last commit.
    pub fn committed_size(&self) -> i64 {
        (self.storage.append_offset() / self.width) as i64
    }

    /// Publishes appended rows.
    pub fn commit(&mut self) -> Result<()> {
        self.storage.set_append_offset(self.tx_append_offset)
    }

    /// Drops rows at and after `size`. Growing is a no-op.
    pub fn truncate(&mut self, size: i64) {
        let offset = size.max(0) as u64 * self.width;
        if offset < self.tx_append_offset {
            self.tx_append_offset = offset;
        }
    }

    /// Re-reads the committed size from disk, discarding uncommitted rows.
    pub fn refresh(&mut self) -> Result<()> {
        self.storage.refresh()?;
        self.tx_append_offset = self.storage.append_offset() / self.width * self.width;
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> Result<i64> {
        debug_assert_eq!(bytes.len() as u64, self.width);
        self.storage.write_bytes(self.tx_append_offset, bytes)?;
        self.tx_append_offset += self.width;
        Ok(self.size() - 1)
    }

    fn offset(&self, row: i64) -> Result<u64> {
        if row < 0 || row >= self.size() {
            return Err(JournalError::RowOutOfBounds {
                row,
                size: self.size(),
            });
        }
        Ok(row as u64 * self.width)
    }

    /// Appends a boolean, returning its row id.
    pub fn put_bool(&mut self, value: bool) -> Result<i64> {
        self.append(&[value as u8])
    }

    /// Appends a byte, returning its row id.
    pub fn put_byte(&mut self, value: i8) -> Result<i64> {
        self.append(&value.to_le_bytes())
    }

    /// Appends a short, returning its row id.
    pub fn put_short(&mut self, value: i16) -> Result<i64> {
        self.append(&value.to_le_bytes())
    }

    /// Appends an int, returning its row id.
    pub fn put_int(&mut self, value: i32) -> Result<i64> {
        self.append(&value.to_le_bytes())
    }

    /// Appends a long, returning its row id.
    pub fn put_long(&mut self, value: i64) -> Result<i64> {
        self.append(&value.to_le_bytes())
    }

    /// Appends a float, returning its row id.
    pub fn put_float(&mut self, value: f32) -> Result<i64> {
        self.append(&value.to_le_bytes())
    }

    /// Appends a double, returning its row id.
    pub fn put_double(&mut self, value: f64) -> Result<i64> {
        self.append(&value.to_le_bytes())
    }

    /// Appends the type-specific null sentinel, returning its row id.
    pub fn put_null(&mut self) -> Result<i64> {
        let bytes = self.column_type.null_bytes();
        let width = self.width as usize;
        self.append(&bytes[..width])
    }

    /// Reads a boolean.
    pub fn get_bool(&self, row: i64) -> Result<bool> {
        Ok(self.storage.read_u8(self.offset(row)?)? != 0)
    }

    /// Reads a byte.
    pub fn get_byte(&self, row: i64) -> Result<i8> {
        Ok(self.storage.read_u8(self.offset(row)?)? as i8)
    }

    /// Reads a short.
    pub fn get_short(&self, row: i64) -> Result<i16> {
        self.storage.read_i16(self.offset(row)?)
    }

    /// Reads an int.
    pub fn get_int(&self, row: i64) -> Result<i32> {
        self.storage.read_i32(self.offset(row)?)
    }

    /// Reads a long.
    pub fn get_long(&self, row: i64) -> Result<i64> {
        self.storage.read_i64(self.offset(row)?)
    }

    /// Reads a float.
    pub fn get_float(&self, row: i64) -> Result<f32> {
        self.storage.read_f32(self.offset(row)?)
    }

    /// Reads a double.
    pub fn get_double(&self, row: i64) -> Result<f64> {
        self.storage.read_f64(self.offset(row)?)
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

/// A column of variable-length values: payload file plus fixed-width index.
#[derive(Debug)]
pub struct VariableColumn {
    data: MappedStorage,
    index: MappedStorage,
    data_tx_offset: u64,
    index_tx_offset: u64,
}

impl VariableColumn {
    /// Opens the payload file `data_path` and index file `index_path`.
    pub fn open(
        data_path: impl AsRef<Path>,
        index_path: impl AsRef<Path>,
        bit_hint: u32,
        index_bit_hint: u32,
        mode: AccessMode,
    ) -> Result<Self> {
        let data = MappedStorage::open(data_path, bit_hint, mode)?;
        let index = MappedStorage::open(index_path, index_bit_hint, mode)?;
        let mut column = Self {
            data_tx_offset: data.append_offset(),
            index_tx_offset: index.append_offset() / VAR_INDEX_RECORD_SIZE * VAR_INDEX_RECORD_SIZE,
            data,
            index,
        };
        column.data_tx_offset = column.data_end(column.size())?;
        Ok(column)
    }

    /// Number of rows including uncommitted ones.
    pub fn size(&self) -> i64 {
        (self.index_tx_offset / VAR_INDEX_RECORD_SIZE) as i64
    }

    /// Publishes appended rows. Payload is committed before the index that
    /// exposes it.
    pub fn commit(&mut self) -> Result<()> {
        self.data.set_append_offset(self.data_tx_offset)?;
        self.index.set_append_offset(self.index_tx_offset)
    }

    /// Drops rows at and after `size`. Growing is a no-op.
    pub fn truncate(&mut self, size: i64) -> Result<()> {
        let size = size.max(0);
        if size >= self.size() {
            return Ok(());
        }
        self.data_tx_offset = self.data_end(size)?;
        self.index_tx_offset = size as u64 * VAR_INDEX_RECORD_SIZE;
        Ok(())
    }

    /// Re-reads the committed size from disk, discarding uncommitted rows.
    pub fn refresh(&mut self) -> Result<()> {
        self.data.refresh()?;
        self.index.refresh()?;
        self.index_tx_offset =
            self.index.append_offset() / VAR_INDEX_RECORD_SIZE * VAR_INDEX_RECORD_SIZE;
        self.data_tx_offset = self.data_end(self.size())?;
        Ok(())
    }

    fn data_end(&self, rows: i64) -> Result<u64> {
        if rows <= 0 {
            return Ok(0);
        }
        let (offset, len) = self.entry(rows - 1)?;
        Ok(offset + len.max(0) as u64)
    }

    fn entry(&self, row: i64) -> Result<(u64, i32)> {
        let at = row as u64 * VAR_INDEX_RECORD_SIZE;
        let offset = self.index.read_i64(at)?;
        let len = self.index.read_i32(at + 8)?;
        Ok((offset as u64, len))
    }

    fn checked_entry(&self, row: i64) -> Result<(u64, i32)> {
        if row < 0 || row >= self.size() {
            return Err(JournalError::RowOutOfBounds {
                row,
                size: self.size(),
            });
        }
        self.entry(row)
    }

    fn append_entry(&mut self, len: i32) -> Result<i64> {
        let mut record = [0u8; VAR_INDEX_RECORD_SIZE as usize];
        record[..8].copy_from_slice(&(self.data_tx_offset as i64).to_le_bytes());
        record[8..].copy_from_slice(&len.to_le_bytes());
        self.index.write_bytes(self.index_tx_offset, &record)?;
        self.index_tx_offset += VAR_INDEX_RECORD_SIZE;
        self.data_tx_offset += len.max(0) as u64;
        Ok(self.size() - 1)
    }

    /// Appends raw bytes, returning the row id.
    pub fn put_bin(&mut self, value: &[u8]) -> Result<i64> {
        let len = i32::try_from(value.len()).map_err(|_| JournalError::RecordTooLarge {
            size: value.len(),
            max: i32::MAX as usize,
        })?;
        self.data.write_bytes(self.data_tx_offset, value)?;
        self.append_entry(len)
    }

    /// Appends a UTF-8 string, returning the row id.
    pub fn put_str(&mut self, value: &str) -> Result<i64> {
        self.put_bin(value.as_bytes())
    }

    /// Appends a null, returning the row id.
    pub fn put_null(&mut self) -> Result<i64> {
        self.append_entry(NULL_LENGTH)
    }

    /// Stored length of a row, [`NULL_LENGTH`] for nulls.
    pub fn get_len(&self, row: i64) -> Result<i32> {
        Ok(self.checked_entry(row)?.1)
    }

    /// Returns the payload of a row, `None` for nulls.
    pub fn get_bin(&self, row: i64) -> Result<Option<&[u8]>> {
        let (offset, len) = self.checked_entry(row)?;
        if len == NULL_LENGTH {
            return Ok(None);
        }
        Ok(Some(self.data.bytes(offset, len.max(0) as usize)?))
    }

    /// Returns the string of a row, `None` for nulls.
    pub fn get_str(&self, row: i64) -> Result<Option<&str>> {
        match self.get_bin(row)? {
            Some(bytes) => std::str::from_utf8(bytes)
                .map(Some)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err).into()),
            None => Ok(None),
        }
    }

    /// Flushes both mappings.
    pub fn force(&self) -> Result<()> {
        self.data.force()?;
        self.index.force()
    }

    /// Releases unused file capacity.
    pub fn compact(&mut self) -> Result<()> {
        self.data.compact_to(self.data_tx_offset)?;
        self.index.compact_to(self.index_tx_offset)
    }
}

/// A partition column of either encoding.
#[derive(Debug)]
pub enum Column {
    /// Fixed-width column.
    Fixed(FixedColumn),
    /// Variable-length column.
    Variable(VariableColumn),
}

impl Column {
    /// Number of rows including uncommitted ones.
    pub fn size(&self) -> i64 {
        match self {
            Column::Fixed(c) => c.size(),
            Column::Variable(c) => c.size(),
        }
    }

    /// Publishes appended rows.
    pub fn commit(&mut self) -> Result<()> {
        match self {
            Column::Fixed(c) => c.commit(),
            Column::Variable(c) => c.commit(),
        }
    }

    /// Drops rows at and after `size`.
    pub fn truncate(&mut self, size: i64) -> Result<()> {
        match self {
            Column::Fixed(c) => {
                c.truncate(size);
                Ok(())
            }
            Column::Variable(c) => c.truncate(size),
        }
    }

    /// Re-reads committed state.
    pub fn refresh(&mut self) -> Result<()> {
        match self {
            Column::Fixed(c) => c.refresh(),
            Column::Variable(c) => c.refresh(),
        }
    }

    /// Flushes the mapping(s).
    pub fn force(&self) -> Result<()> {
        match self {
            Column::Fixed(c) => c.force(),
            Column::Variable(c) => c.force(),
        }
    }

    /// Releases unused file capacity.
    pub fn compact(&mut self) -> Result<()> {
        match self {
            Column::Fixed(c) => c.compact(),
            Column::Variable(c) => c.compact(),
        }
    }

    /// Fixed-width view, if this is a fixed column.
    pub fn as_fixed(&self) -> Option<&FixedColumn> {
        match self {
            Column::Fixed(c) => Some(c),
            Column::Variable(_) => None,
        }
    }

    /// Variable-length view, if this is a variable column.
    pub fn as_variable(&self) -> Option<&VariableColumn> {
        match self {
            Column::Fixed(_) => None,
            Column::Variable(c) => Some(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mapped::MIN_BIT_HINT;
    use tempfile::TempDir;

    #[test]
    fn test_fixed_put_get_and_commit() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("price.d");

        {
            let mut col =
                FixedColumn::open(&path, ColumnType::Double, MIN_BIT_HINT, AccessMode::Append)
                    .unwrap();
            assert_eq!(col.put_double(1.5).unwrap(), 0);
            assert_eq!(col.put_null().unwrap(), 1);
            assert_eq!(col.put_double(-2.0).unwrap(), 2);
            assert_eq!(col.size(), 3);
            assert_eq!(col.committed_size(), 0);
            col.commit().unwrap();
        }

        let col =
            FixedColumn::open(&path, ColumnType::Double, MIN_BIT_HINT, AccessMode::Read).unwrap();
        assert_eq!(col.size(), 3);
        assert_eq!(col.get_double(0).unwrap(), 1.5);
        assert!(col.get_double(1).unwrap().is_nan());
        assert_eq!(col.get_double(2).unwrap(), -2.0);
        assert!(matches!(
            col.get_double(3),
            Err(JournalError::RowOutOfBounds { row: 3, size: 3 })
        ));
    }

    #[test]
    fn test_fixed_uncommitted_rows_are_lost_on_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("id.d");
        {
            let mut col =
                FixedColumn::open(&path, ColumnType::Int, MIN_BIT_HINT, AccessMode::Append)
                    .unwrap();
            col.put_int(1).unwrap();
            col.commit().unwrap();
            col.put_int(2).unwrap();
        }
        let col =
            FixedColumn::open(&path, ColumnType::Int, MIN_BIT_HINT, AccessMode::Append).unwrap();
        assert_eq!(col.size(), 1);
    }

    #[test]
    fn test_fixed_truncate() {
        let temp_dir = TempDir::new().unwrap();
        let mut col = FixedColumn::open(
            temp_dir.path().join("v.d"),
            ColumnType::Long,
            MIN_BIT_HINT,
            AccessMode::Append,
        )
        .unwrap();
        for i in 0..10 {
            col.put_long(i).unwrap();
        }
        col.truncate(4);
        assert_eq!(col.size(), 4);
        col.truncate(8);
        assert_eq!(col.size(), 4);
        assert_eq!(col.put_long(99).unwrap(), 4);
        assert_eq!(col.get_long(4).unwrap(), 99);
    }

    #[test]
    fn test_variable_null_vs_empty() {
        let temp_dir = TempDir::new().unwrap();
        let mut col = VariableColumn::open(
            temp_dir.path().join("s.d"),
            temp_dir.path().join("s.i"),
            MIN_BIT_HINT,
            MIN_BIT_HINT,
            AccessMode::Append,
        )
        .unwrap();

        assert_eq!(col.put_str("hello").unwrap(), 0);
        assert_eq!(col.put_null().unwrap(), 1);
        assert_eq!(col.put_str("").unwrap(), 2);
        assert_eq!(col.put_bin(&[1, 2, 3]).unwrap(), 3);

        assert_eq!(col.get_str(0).unwrap(), Some("hello"));
        assert_eq!(col.get_str(1).unwrap(), None);
        assert_eq!(col.get_len(1).unwrap(), NULL_LENGTH);
        assert_eq!(col.get_str(2).unwrap(), Some(""));
        assert_eq!(col.get_bin(3).unwrap(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_variable_truncate_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let data = temp_dir.path().join("s.d");
        let index = temp_dir.path().join("s.i");
        {
            let mut col =
                VariableColumn::open(&data, &index, MIN_BIT_HINT, MIN_BIT_HINT, AccessMode::Append)
                    .unwrap();
            col.put_str("aa").unwrap();
            col.put_null().unwrap();
            col.put_str("bbbb").unwrap();
            col.truncate(2).unwrap();
            col.put_str("c").unwrap();
            col.commit().unwrap();
        }

        let col =
            VariableColumn::open(&data, &index, MIN_BIT_HINT, MIN_BIT_HINT, AccessMode::Read)
                .unwrap();
        assert_eq!(col.size(), 3);
        assert_eq!(col.get_str(0).unwrap(), Some("aa"));
        assert_eq!(col.get_str(1).unwrap(), None);
        assert_eq!(col.get_str(2).unwrap(), Some("c"));
    }
}
