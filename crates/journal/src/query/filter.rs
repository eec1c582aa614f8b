//! Row filters.
//!
//! Column filters resolve their column by name on the first slice and keep
//! the position until `reset`; the partition itself is rebound on every
//! slice.

use super::{Choice, ColumnRef, PartitionSlice, RowFilter};
use crate::error::Result;
use crate::partition::Partition;
use crate::storage::VALUE_NOT_FOUND;

macro_rules! equals_filter {
    ($(#[$doc:meta])* $name:ident, $ty:ty, $getter:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name<'a> {
            column: ColumnRef,
            value: $ty,
            resolved: usize,
            partition: Option<&'a Partition>,
        }

        impl<'a> $name<'a> {
            /// Picks rows where `column` equals `value`.
            pub fn new(column: impl Into<String>, value: $ty) -> Self {
                Self {
                    column: ColumnRef::new(column),
                    value,
                    resolved: 0,
                    partition: None,
                }
            }
        }

        impl<'a> RowFilter<'a> for $name<'a> {
            fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
                self.resolved = self.column.resolve(slice.metadata())?;
                self.partition = Some(slice.partition);
                Ok(())
            }

            fn accept(&self, row: i64) -> Result<Choice> {
                match self.partition {
                    Some(p) => Ok(Choice::from_bool(p.$getter(row, self.resolved)? == self.value)),
                    None => Ok(Choice::Skip),
                }
            }

            fn reset(&mut self) {
                self.column.reset();
                self.partition = None;
            }
        }
    };
}

equals_filter!(
    /// `INT` column equal to a constant.
    IntEqualsFilter,
    i32,
    get_int
);

equals_filter!(
    /// `LONG`/`DATE` column equal to a constant.
    LongEqualsFilter,
    i64,
    get_long
);

/// `SYMBOL` column equal to a string. Values absent from the symbol table
/// match nothing.
#[derive(Debug, Clone)]
pub struct SymbolEqualsFilter<'a> {
    column: ColumnRef,
    value: String,
    resolved: usize,
    key: i32,
    partition: Option<&'a Partition>,
}

impl<'a> SymbolEqualsFilter<'a> {
    /// Picks rows where `column` is `value`.
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: ColumnRef::new(column),
            value: value.into(),
            resolved: 0,
            key: VALUE_NOT_FOUND,
            partition: None,
        }
    }
}

impl<'a> RowFilter<'a> for SymbolEqualsFilter<'a> {
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
        self.resolved = self.column.resolve(slice.metadata())?;
        self.key = slice.symbols.get(self.resolved)?.get(&self.value);
        self.partition = Some(slice.partition);
        Ok(())
    }

    fn accept(&self, row: i64) -> Result<Choice> {
        match self.partition {
            Some(p) if self.key != VALUE_NOT_FOUND => Ok(Choice::from_bool(
                p.get_symbol_key(row, self.resolved)? == self.key,
            )),
            _ => Ok(Choice::Skip),
        }
    }

    fn reset(&mut self) {
        self.column.reset();
        self.key = VALUE_NOT_FOUND;
        self.partition = None;
    }
}

/// `DOUBLE` column strictly greater than a constant. NaN never matches.
#[derive(Debug, Clone)]
pub struct DoubleGreaterThanFilter<'a> {
    column: ColumnRef,
    value: f64,
    resolved: usize,
    partition: Option<&'a Partition>,
}

impl<'a> DoubleGreaterThanFilter<'a> {
    /// Picks rows where `column > value`.
    pub fn new(column: impl Into<String>, value: f64) -> Self {
        Self {
            column: ColumnRef::new(column),
            value,
            resolved: 0,
            partition: None,
        }
    }
}

impl<'a> RowFilter<'a> for DoubleGreaterThanFilter<'a> {
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
        self.resolved = self.column.resolve(slice.metadata())?;
        self.partition = Some(slice.partition);
        Ok(())
    }

    fn accept(&self, row: i64) -> Result<Choice> {
        match self.partition {
            Some(p) => Ok(Choice::from_bool(p.get_double(row, self.resolved)? > self.value)),
            None => Ok(Choice::Skip),
        }
    }

    fn reset(&mut self) {
        self.column.reset();
        self.partition = None;
    }
}

/// Picks a row only if every filter picks it.
pub struct AllFilter<'a> {
    filters: Vec<Box<dyn RowFilter<'a> + 'a>>,
}

impl<'a> AllFilter<'a> {
    /// Conjunction of `filters`; empty picks everything.
    pub fn new(filters: Vec<Box<dyn RowFilter<'a> + 'a>>) -> Self {
        Self { filters }
    }
}

impl<'a> RowFilter<'a> for AllFilter<'a> {
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
        self.filters.iter_mut().try_for_each(|f| f.prepare(slice))
    }

    fn accept(&self, row: i64) -> Result<Choice> {
        for filter in &self.filters {
            if filter.accept(row)? == Choice::Skip {
                return Ok(Choice::Skip);
            }
        }
        Ok(Choice::Pick)
    }

    fn reset(&mut self) {
        self.filters.iter_mut().for_each(|f| f.reset());
    }
}

/// Picks a row if any filter picks it.
pub struct AnyFilter<'a> {
    filters: Vec<Box<dyn RowFilter<'a> + 'a>>,
}

impl<'a> AnyFilter<'a> {
    /// Disjunction of `filters`; empty picks nothing.
    pub fn new(filters: Vec<Box<dyn RowFilter<'a> + 'a>>) -> Self {
        Self { filters }
    }
}

impl<'a> RowFilter<'a> for AnyFilter<'a> {
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
        self.filters.iter_mut().try_for_each(|f| f.prepare(slice))
    }

    fn accept(&self, row: i64) -> Result<Choice> {
        for filter in &self.filters {
            if filter.accept(row)? == Choice::Pick {
                return Ok(Choice::Pick);
            }
        }
        Ok(Choice::Skip)
    }

    fn reset(&mut self) {
        self.filters.iter_mut().for_each(|f| f.reset());
    }
}

/// Inverts a filter.
pub struct NotFilter<F> {
    filter: F,
}

impl<F> NotFilter<F> {
    /// Negation of `filter`.
    pub fn new(filter: F) -> Self {
        Self { filter }
    }
}

impl<'a, F: RowFilter<'a>> RowFilter<'a> for NotFilter<F> {
    fn prepare(&mut self, slice: PartitionSlice<'a>) -> Result<()> {
        self.filter.prepare(slice)
    }

    fn accept(&self, row: i64) -> Result<Choice> {
        Ok(match self.filter.accept(row)? {
            Choice::Pick => Choice::Skip,
            Choice::Skip => Choice::Pick,
        })
    }

    fn reset(&mut self) {
        self.filter.reset()
    }
}
