//! Memory-mapped column storage.
//!
//! - [`mapped`]: growable mapped file with a persisted append cursor
//! - [`column`]: fixed- and variable-width column encodings
//! - [`nulls`]: per-row null bitmap
//! - [`symbol`]: journal-scoped symbol dictionaries

pub mod column;
pub mod mapped;
pub mod nulls;
pub mod symbol;

pub use column::{Column, FixedColumn, VariableColumn};
pub use mapped::{AccessMode, MappedStorage};
pub use nulls::NullsColumn;
pub use symbol::{SymbolTable, SymbolTables};

/// Symbol key of a null value; also the smallest key an index accepts.
pub const VALUE_IS_NULL: i32 = -1;

/// Symbol key returned for values absent from a symbol table.
pub const VALUE_NOT_FOUND: i32 = -2;
