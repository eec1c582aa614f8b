//! Field values and the accessor table that moves them in and out of records.
//!
//! A [`RecordBinding`] holds one getter and one setter per column, in column
//! order. Getters returning [`Value::Null`] mark the column null for that row.

use crate::error::{JournalError, Result};
use crate::metadata::ColumnMetadata;

/// A borrowed field value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed byte.
    Byte(i8),
    /// Signed short.
    Short(i16),
    /// Signed int.
    Int(i32),
    /// Signed long.
    Long(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// Epoch milliseconds.
    Date(i64),
    /// String value.
    Str(&'a str),
    /// Symbol value (dictionary-encoded on disk).
    Symbol(&'a str),
    /// Byte buffer.
    Binary(&'a [u8]),
}

impl<'a> Value<'a> {
    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of integral and date values.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Byte(v) => Some(v as i64),
            Value::Short(v) => Some(v as i64),
            Value::Int(v) => Some(v as i64),
            Value::Long(v) | Value::Date(v) => Some(v),
            _ => None,
        }
    }

    /// Floating point view of numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(v) => Some(v as f64),
            Value::Double(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// String view of string and symbol values.
    pub fn as_str(&self) -> Option<&'a str> {
        match *self {
            Value::Str(s) | Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Byte(_) => "BYTE",
            Value::Short(_) => "SHORT",
            Value::Int(_) => "INT",
            Value::Long(_) => "LONG",
            Value::Float(_) => "FLOAT",
            Value::Double(_) => "DOUBLE",
            Value::Date(_) => "DATE",
            Value::Str(_) => "STRING",
            Value::Symbol(_) => "SYMBOL",
            Value::Binary(_) => "BINARY",
        }
    }
}

/// Reads one field of `T`.
pub type FieldGetter<T> = fn(&T) -> Value<'_>;

/// Writes one field of `T`. Receives [`Value::Null`] for null fields.
pub type FieldSetter<T> = fn(&mut T, Value<'_>);

/// Per-column accessor table for a record type.
///
/// # Examples
/// ```rust,ignore
/// use alopex_journal::record::{RecordBinding, Value};
///
/// struct Quote { ts: i64, bid: f64 }
///
/// let binding = RecordBinding::<Quote>::new()
///     .field(|q| Value::Date(q.ts), |q, v| q.ts = v.as_i64().unwrap_or(0))
///     .field(|q| Value::Double(q.bid), |q, v| q.bid = v.as_f64().unwrap_or(f64::NAN));
/// ```
pub struct RecordBinding<T> {
    getters: Vec<FieldGetter<T>>,
    setters: Vec<FieldSetter<T>>,
}

impl<T> Default for RecordBinding<T> {
    fn default() -> Self {
        Self {
            getters: Vec::new(),
            setters: Vec::new(),
        }
    }
}

impl<T> std::fmt::Debug for RecordBinding<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordBinding")
            .field("fields", &self.getters.len())
            .finish()
    }
}

impl<T> RecordBinding<T> {
    /// Creates an empty binding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends accessors for the next column.
    pub fn field(mut self, getter: FieldGetter<T>, setter: FieldSetter<T>) -> Self {
        self.getters.push(getter);
        self.setters.push(setter);
        self
    }

    /// Number of bound columns.
    pub fn len(&self) -> usize {
        self.getters.len()
    }

    /// Returns true if no column is bound.
    pub fn is_empty(&self) -> bool {
        self.getters.is_empty()
    }

    /// Reads column `column` of `record`.
    pub fn get<'a>(&self, record: &'a T, column: usize) -> Value<'a> {
        (self.getters[column])(record)
    }

    /// Writes column `column` of `record`.
    pub fn set(&self, record: &mut T, column: usize, value: Value<'_>) {
        (self.setters[column])(record, value)
    }

    /// Checks that the binding covers every column.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidMetadata`] on a column count mismatch.
    pub fn validate(&self, columns: &[ColumnMetadata]) -> Result<()> {
        if self.getters.len() != columns.len() {
            return Err(JournalError::InvalidMetadata(format!(
                "binding has {} fields, metadata has {} columns",
                self.getters.len(),
                columns.len()
            )));
        }
        Ok(())
    }
}

/// Random access to the fields of one row.
pub trait Record {
    /// Number of columns.
    fn column_count(&self) -> usize;

    /// Value of column `column`.
    fn get(&self, column: usize) -> Result<Value<'_>>;
}
