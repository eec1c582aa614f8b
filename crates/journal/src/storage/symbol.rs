//! Journal-scoped symbol dictionaries.
//!
//! A symbol column stores `i32` keys; the strings live once per journal in a
//! [`SymbolTable`] persisted as a variable column (`<col>.sym.d`,
//! `<col>.sym.i`). Keys are dense and assigned in insertion order.

use crate::error::{JournalError, Result};
use crate::metadata::{ColumnType, JournalMetadata};
use crate::storage::column::VariableColumn;
use crate::storage::mapped::{bit_hint, AccessMode};
use crate::storage::{VALUE_IS_NULL, VALUE_NOT_FOUND};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Dictionary of distinct strings for one symbol column.
#[derive(Debug)]
pub struct SymbolTable {
    column: String,
    values: VariableColumn,
    keys: HashMap<String, i32>,
}

impl SymbolTable {
    /// Opens the table files for `column` under `dir`, loading every
    /// committed value.
    pub fn open(
        dir: impl AsRef<Path>,
        column: &str,
        distinct_count_hint: i32,
        avg_size: usize,
        mode: AccessMode,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let hint = distinct_count_hint.max(1) as u64;
        let values = VariableColumn::open(
            dir.join(format!("{}.sym.d", column)),
            dir.join(format!("{}.sym.i", column)),
            bit_hint(avg_size, hint),
            bit_hint(12, hint),
            mode,
        )?;
        let mut table = Self {
            column: column.to_string(),
            values,
            keys: HashMap::new(),
        };
        table.reload()?;
        debug!("Opened symbol table '{}' with {} values", column, table.size());
        Ok(table)
    }

    fn reload(&mut self) -> Result<()> {
        self.keys.clear();
        for key in 0..self.values.size() {
            if let Some(value) = self.values.get_str(key)? {
                self.keys.insert(value.to_string(), key as i32);
            }
        }
        Ok(())
    }

    /// Column this table belongs to.
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Returns the key of `value`, adding it if absent.
    pub fn put(&mut self, value: &str) -> Result<i32> {
        if let Some(&key) = self.keys.get(value) {
            return Ok(key);
        }
        let key = self.values.put_str(value)? as i32;
        self.keys.insert(value.to_string(), key);
        Ok(key)
    }

    /// Key of `value`, or `None` if it was never added.
    pub fn get_quick(&self, value: &str) -> Option<i32> {
        self.keys.get(value).copied()
    }

    /// Key of `value`, or [`VALUE_NOT_FOUND`].
    pub fn get(&self, value: &str) -> i32 {
        self.get_quick(value).unwrap_or(VALUE_NOT_FOUND)
    }

    /// String for `key`; [`VALUE_IS_NULL`] maps to `None`.
    pub fn value(&self, key: i32) -> Result<Option<&str>> {
        if key == VALUE_IS_NULL {
            return Ok(None);
        }
        self.values.get_str(key as i64)
    }

    /// Number of distinct values.
    pub fn size(&self) -> i32 {
        self.values.size() as i32
    }

    /// Iterates over all keys in insertion order.
    pub fn keys(&self) -> std::ops::Range<i32> {
        0..self.size()
    }

    /// Publishes added values.
    pub fn commit(&mut self) -> Result<()> {
        self.values.commit()
    }

    /// Drops values whose key is `>= size`.
    pub fn truncate(&mut self, size: i32) -> Result<()> {
        if size >= self.size() {
            return Ok(());
        }
        self.values.truncate(size as i64)?;
        self.keys.retain(|_, key| *key < size);
        Ok(())
    }

    /// Re-reads committed values from disk.
    pub fn refresh(&mut self) -> Result<()> {
        self.values.refresh()?;
        self.reload()
    }

    /// Flushes the mapping.
    pub fn force(&self) -> Result<()> {
        self.values.force()
    }
}

/// Symbol tables of all symbol columns of a journal, addressed by column
/// position.
#[derive(Debug, Default)]
pub struct SymbolTables {
    tables: Vec<Option<SymbolTable>>,
}

impl SymbolTables {
    /// Opens a table for every symbol column of `metadata`.
    pub fn open(metadata: &JournalMetadata) -> Result<Self> {
        let mode = metadata.config().access_mode;
        let tables = metadata
            .columns()
            .iter()
            .map(|column| match column.column_type {
                ColumnType::Symbol => SymbolTable::open(
                    metadata.location(),
                    &column.name,
                    column.distinct_count_hint,
                    column.avg_size,
                    mode,
                )
                .map(Some),
                _ => Ok(None),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { tables })
    }

    /// Table of the symbol column at `column`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::ColumnTypeMismatch`] for non-symbol columns.
    pub fn get(&self, column: usize) -> Result<&SymbolTable> {
        self.tables
            .get(column)
            .and_then(Option::as_ref)
            .ok_or_else(|| Self::not_symbol(column))
    }

    /// Mutable table of the symbol column at `column`.
    pub fn get_mut(&mut self, column: usize) -> Result<&mut SymbolTable> {
        self.tables
            .get_mut(column)
            .and_then(Option::as_mut)
            .ok_or_else(|| Self::not_symbol(column))
    }

    fn not_symbol(column: usize) -> JournalError {
        JournalError::ColumnTypeMismatch {
            column: column.to_string(),
            expected: ColumnType::Symbol.name(),
            actual: "non-symbol",
        }
    }

    fn each_mut(&mut self) -> impl Iterator<Item = &mut SymbolTable> {
        self.tables.iter_mut().flatten()
    }

    /// Commits every table.
    pub fn commit(&mut self) -> Result<()> {
        self.each_mut().try_for_each(SymbolTable::commit)
    }

    /// Sizes of every table, `-1` for non-symbol columns.
    pub fn sizes(&self) -> Vec<i32> {
        self.tables
            .iter()
            .map(|t| t.as_ref().map_or(-1, SymbolTable::size))
            .collect()
    }

    /// Truncates each table back to a size returned by [`Self::sizes`].
    pub fn truncate(&mut self, sizes: &[i32]) -> Result<()> {
        for (table, &size) in self.tables.iter_mut().zip(sizes) {
            if let Some(table) = table {
                table.truncate(size)?;
            }
        }
        Ok(())
    }

    /// Re-reads every table.
    pub fn refresh(&mut self) -> Result<()> {
        self.each_mut().try_for_each(SymbolTable::refresh)
    }

    /// Flushes every table.
    pub fn force(&self) -> Result<()> {
        self.tables.iter().flatten().try_for_each(SymbolTable::force)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_is_idempotent_and_dense() {
        let temp_dir = TempDir::new().unwrap();
        let mut table =
            SymbolTable::open(temp_dir.path(), "sym", 16, 8, AccessMode::Append).unwrap();

        assert_eq!(table.put("AAPL").unwrap(), 0);
        assert_eq!(table.put("MSFT").unwrap(), 1);
        assert_eq!(table.put("AAPL").unwrap(), 0);
        assert_eq!(table.size(), 2);
        assert_eq!(table.get_quick("MSFT"), Some(1));
        assert_eq!(table.get_quick("IBM"), None);
        assert_eq!(table.get("IBM"), VALUE_NOT_FOUND);
        assert_eq!(table.value(1).unwrap(), Some("MSFT"));
        assert_eq!(table.value(VALUE_IS_NULL).unwrap(), None);
    }

    #[test]
    fn test_commit_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut table =
                SymbolTable::open(temp_dir.path(), "sym", 16, 8, AccessMode::Append).unwrap();
            table.put("A").unwrap();
            table.put("B").unwrap();
            table.commit().unwrap();
            table.put("C").unwrap();
        }
        let table = SymbolTable::open(temp_dir.path(), "sym", 16, 8, AccessMode::Read).unwrap();
        assert_eq!(table.size(), 2);
        assert_eq!(table.get_quick("B"), Some(1));
        assert_eq!(table.get_quick("C"), None);
    }

    #[test]
    fn test_truncate_forgets_values() {
        let temp_dir = TempDir::new().unwrap();
        let mut table =
            SymbolTable::open(temp_dir.path(), "sym", 16, 8, AccessMode::Append).unwrap();
        table.put("A").unwrap();
        table.put("B").unwrap();
        table.truncate(1).unwrap();
        assert_eq!(table.size(), 1);
        assert_eq!(table.get_quick("B"), None);
        assert_eq!(table.put("C").unwrap(), 1);
    }
}
