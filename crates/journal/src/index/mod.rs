//! On-disk key index mapping `i32` keys to append-ordered row ids.

pub mod kv;

pub use kv::{IndexCursor, KvIndex, KvIndexConfig};
