//! Latest slave record per join key, for as-of joins.
//!
//! Records are serialized into fixed-size pages owned by the map. Each slot
//! starts with a 4-byte capacity; the payload is a null bitmap, one
//! fixed-width cell per column (variable columns hold an offset) and the
//! variable-length data. A slot that is too small for a new version of its
//! key is moved to a free list; free slots are reused once the list holds at
//! least a record's worth of bytes.

use crate::error::{JournalError, Result};
use crate::metadata::{ColumnType, JournalMetadata};
use crate::record::{Record, Value};
use std::collections::{BTreeMap, HashMap};

/// Default page size in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Marks a slot as consumed by [`LastRecordMap::get`].
const SET_BIT: u64 = 1 << 63;
const CLR_BIT: u64 = !SET_BIT;
const SLOT_HEADER: usize = 4;

/// Map configuration.
#[derive(Debug, Clone)]
pub struct LastRecordMapConfig {
    /// Page size; rounded up to a power of two.
    pub page_size: usize,
}

impl Default for LastRecordMapConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl LastRecordMapConfig {
    /// Sets the page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyPart {
    Null,
    Int(i64),
    Float(u64),
    Str(String),
    Bytes(Vec<u8>),
}

impl KeyPart {
    fn of(value: Value<'_>) -> Self {
        match value {
            Value::Null => KeyPart::Null,
            Value::Bool(v) => KeyPart::Int(v as i64),
            Value::Float(v) => KeyPart::Float((v as f64).to_bits()),
            Value::Double(v) => KeyPart::Float(v.to_bits()),
            Value::Str(s) | Value::Symbol(s) => KeyPart::Str(s.to_string()),
            Value::Binary(b) => KeyPart::Bytes(b.to_vec()),
            other => KeyPart::Int(other.as_i64().unwrap_or_default()),
        }
    }
}

/// Free slots bucketed by capacity.
#[derive(Debug, Default)]
struct FreeList {
    slots: BTreeMap<usize, Vec<u64>>,
    total: usize,
}

impl FreeList {
    fn add(&mut self, offset: u64, capacity: usize) {
        self.slots.entry(capacity).or_default().push(offset);
        self.total += capacity;
    }

    /// Removes the smallest slot holding at least `size` bytes.
    fn take(&mut self, size: usize) -> Option<(u64, usize)> {
        let (&capacity, offsets) = self.slots.range_mut(size..).next()?;
        let offset = offsets.pop()?;
        if offsets.is_empty() {
            self.slots.remove(&capacity);
        }
        self.total -= capacity;
        Some((offset, capacity))
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.total = 0;
    }
}

fn cell_size(column_type: ColumnType) -> usize {
    match column_type {
        ColumnType::Boolean | ColumnType::Byte => 1,
        ColumnType::Short => 2,
        ColumnType::Int | ColumnType::Float => 4,
        ColumnType::Long | ColumnType::Date | ColumnType::Double => 8,
        ColumnType::Symbol | ColumnType::String | ColumnType::Binary => 4,
    }
}

fn is_var(column_type: ColumnType) -> bool {
    matches!(
        column_type,
        ColumnType::Symbol | ColumnType::String | ColumnType::Binary
    )
}

fn var_bytes<'v>(value: &Value<'v>) -> &'v [u8] {
    match *value {
        Value::Str(s) | Value::Symbol(s) => s.as_bytes(),
        Value::Binary(b) => b,
        _ => &[],
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

/// Latest slave record per key, consumed at most once per `put`.
///
/// # Examples
///
/// ```rust,ignore
/// let mut map = LastRecordMap::new(&quotes, &trades, &["sym"], &["sym"], LastRecordMapConfig::default())?;
/// for row in slave_rows {
///     map.put(&slave_partition.record(symbols, row))?;
/// }
/// if let Some(quote) = map.get(&master_record)? {
///     let bid = quote.get(bid_column)?;
/// }
/// ```
#[derive(Debug)]
pub struct LastRecordMap {
    master_keys: Vec<usize>,
    slave_keys: Vec<usize>,
    types: Vec<ColumnType>,
    names: Vec<String>,
    fixed_offsets: Vec<usize>,
    var_offset: usize,
    page_size: usize,
    bits: u32,
    mask: u64,
    max_record_size: usize,
    pages: Vec<Box<[u8]>>,
    append_offset: u64,
    slots: HashMap<Vec<KeyPart>, u64>,
    free_list: FreeList,
}

impl LastRecordMap {
    /// Creates a map joining `master_keys` columns of `master` to
    /// `slave_keys` columns of `slave`. Stored records have the slave's
    /// columns.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidMetadata`] if the key lists differ in
    /// length, [`JournalError::UnknownColumn`] for an unknown key and
    /// [`JournalError::RecordTooLarge`] if the fixed part of a slave record
    /// does not fit a page.
    pub fn new(
        master: &JournalMetadata,
        slave: &JournalMetadata,
        master_keys: &[&str],
        slave_keys: &[&str],
        config: LastRecordMapConfig,
    ) -> Result<Self> {
        if master_keys.len() != slave_keys.len() || master_keys.is_empty() {
            return Err(JournalError::InvalidMetadata(format!(
                "join needs matching key columns, got {} master and {} slave",
                master_keys.len(),
                slave_keys.len()
            )));
        }
        let master_keys = master_keys
            .iter()
            .map(|name| master.column_index(name))
            .collect::<Result<Vec<_>>>()?;
        let slave_keys = slave_keys
            .iter()
            .map(|name| slave.column_index(name))
            .collect::<Result<Vec<_>>>()?;

        let page_size = config.page_size.max(64).next_power_of_two();
        let max_record_size = page_size - SLOT_HEADER;

        let types: Vec<ColumnType> = slave.columns().iter().map(|c| c.column_type).collect();
        let names = slave.columns().iter().map(|c| c.name.clone()).collect();
        let mut offset = types.len().div_ceil(8);
        let mut fixed_offsets = Vec::with_capacity(types.len());
        for &column_type in &types {
            fixed_offsets.push(offset);
            offset += cell_size(column_type);
        }
        if offset > max_record_size {
            return Err(JournalError::RecordTooLarge {
                size: offset,
                max: max_record_size,
            });
        }

        Ok(Self {
            master_keys,
            slave_keys,
            types,
            names,
            fixed_offsets,
            var_offset: offset,
            page_size,
            bits: page_size.trailing_zeros(),
            mask: page_size as u64 - 1,
            max_record_size,
            pages: Vec::new(),
            append_offset: 0,
            slots: HashMap::new(),
            free_list: FreeList::default(),
        })
    }

    /// Bytes held by pages.
    pub fn allocated_bytes(&self) -> usize {
        self.pages.len() * self.page_size
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if no record was put since the last reset.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn key_of(record: &dyn Record, columns: &[usize]) -> Result<Vec<KeyPart>> {
        columns
            .iter()
            .map(|&column| record.get(column).map(KeyPart::of))
            .collect()
    }

    /// Stores `record` as the latest slave record of its key.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::RecordTooLarge`] if the serialized record
    /// does not fit a page and [`JournalError::ColumnTypeMismatch`] if a
    /// field does not match its column type.
    pub fn put(&mut self, record: &dyn Record) -> Result<()> {
        let values = (0..self.types.len())
            .map(|column| record.get(column))
            .collect::<Result<Vec<_>>>()?;
        let mut size = self.var_offset;
        for (i, value) in values.iter().enumerate() {
            self.check_type(i, value)?;
            if is_var(self.types[i]) && !value.is_null() {
                size += 4 + var_bytes(value).len();
            }
        }
        if size > self.max_record_size {
            return Err(JournalError::RecordTooLarge {
                size,
                max: self.max_record_size,
            });
        }

        let key = Self::key_of(record, &self.slave_keys)?;
        let offset = match self.slots.get(&key) {
            None => self.append_slot(size),
            Some(&stored) => {
                let offset = stored & CLR_BIT;
                let capacity = self.capacity(offset) as usize;
                if size <= capacity {
                    offset
                } else {
                    self.free_list.add(offset, capacity);
                    if self.free_list.total < self.max_record_size {
                        self.append_slot(size)
                    } else {
                        match self.free_list.take(size) {
                            Some((free, _)) => free,
                            None => self.append_slot(size),
                        }
                    }
                }
            }
        };
        self.write_record(offset, &values);
        self.slots.insert(key, offset);
        Ok(())
    }

    /// Latest slave record whose key matches `master`'s key columns, or
    /// `None` if there is none or it was already returned since its last
    /// `put`.
    pub fn get(&mut self, master: &dyn Record) -> Result<Option<StoredRecord<'_>>> {
        let key = Self::key_of(master, &self.master_keys)?;
        let Some(stored) = self.slots.get_mut(&key) else {
            return Ok(None);
        };
        if *stored & SET_BIT != 0 {
            return Ok(None);
        }
        let offset = *stored;
        *stored |= SET_BIT;

        let page = &self.pages[self.page_index(offset)];
        let start = self.page_offset(offset) + SLOT_HEADER;
        Ok(Some(StoredRecord {
            map: self,
            bytes: &page[start..],
        }))
    }

    /// Forgets every record. Pages are kept for reuse.
    pub fn reset(&mut self) {
        self.append_offset = 0;
        self.slots.clear();
        self.free_list.clear();
    }

    fn page_index(&self, offset: u64) -> usize {
        (offset >> self.bits) as usize
    }

    fn page_offset(&self, offset: u64) -> usize {
        (offset & self.mask) as usize
    }

    fn capacity(&self, offset: u64) -> u32 {
        read_u32(&self.pages[self.page_index(offset)], self.page_offset(offset))
    }

    /// Allocates a slot for `size` payload bytes plus 10% slack.
    fn append_slot(&mut self, size: usize) -> u64 {
        let slot = (size + SLOT_HEADER + size / 10).min(self.page_size);
        let mut page = self.page_index(self.append_offset);
        let mut page_offset = self.page_offset(self.append_offset);
        if page_offset + slot > self.page_size {
            page += 1;
            page_offset = 0;
            self.append_offset = (page as u64) << self.bits;
        }
        let offset = self.append_offset;
        self.append_offset += slot as u64;

        if page == self.pages.len() {
            self.pages.push(vec![0u8; self.page_size].into_boxed_slice());
        }
        let capacity = (slot - SLOT_HEADER) as u32;
        self.pages[page][page_offset..page_offset + SLOT_HEADER]
            .copy_from_slice(&capacity.to_le_bytes());
        offset
    }

    fn check_type(&self, column: usize, value: &Value<'_>) -> Result<()> {
        let ok = matches!(
            (self.types[column], value),
            (_, Value::Null)
                | (ColumnType::Boolean, Value::Bool(_))
                | (ColumnType::Byte, Value::Byte(_))
                | (ColumnType::Short, Value::Short(_))
                | (ColumnType::Int, Value::Int(_))
                | (ColumnType::Long | ColumnType::Date, Value::Long(_) | Value::Date(_))
                | (ColumnType::Float, Value::Float(_))
                | (ColumnType::Double, Value::Double(_))
                | (ColumnType::Symbol | ColumnType::String, Value::Str(_) | Value::Symbol(_))
                | (ColumnType::Binary, Value::Binary(_))
        );
        if ok {
            Ok(())
        } else {
            Err(JournalError::ColumnTypeMismatch {
                column: self.names[column].clone(),
                expected: self.types[column].name(),
                actual: value.type_name(),
            })
        }
    }

    fn write_record(&mut self, offset: u64, values: &[Value<'_>]) {
        let page = self.page_index(offset);
        let start = self.page_offset(offset) + SLOT_HEADER;
        let var_start = self.var_offset;
        let out = &mut self.pages[page][start..];

        out[..var_start].fill(0);
        let mut var_offset = var_start;
        for (i, value) in values.iter().enumerate() {
            if value.is_null() {
                out[i / 8] |= 1 << (i % 8);
                continue;
            }
            let at = self.fixed_offsets[i];
            match *value {
                Value::Bool(v) => out[at] = v as u8,
                Value::Byte(v) => out[at] = v as u8,
                Value::Short(v) => out[at..at + 2].copy_from_slice(&v.to_le_bytes()),
                Value::Int(v) => out[at..at + 4].copy_from_slice(&v.to_le_bytes()),
                Value::Long(v) | Value::Date(v) => {
                    out[at..at + 8].copy_from_slice(&v.to_le_bytes())
                }
                Value::Float(v) => out[at..at + 4].copy_from_slice(&v.to_le_bytes()),
                Value::Double(v) => out[at..at + 8].copy_from_slice(&v.to_le_bytes()),
                Value::Str(_) | Value::Symbol(_) | Value::Binary(_) => {
                    let bytes = var_bytes(value);
                    out[at..at + 4].copy_from_slice(&(var_offset as u32).to_le_bytes());
                    out[var_offset..var_offset + 4]
                        .copy_from_slice(&(bytes.len() as u32).to_le_bytes());
                    out[var_offset + 4..var_offset + 4 + bytes.len()].copy_from_slice(bytes);
                    var_offset += 4 + bytes.len();
                }
                Value::Null => {}
            }
        }
    }
}

/// A record stored in a [`LastRecordMap`], with the slave's columns.
#[derive(Debug, Clone, Copy)]
pub struct StoredRecord<'a> {
    map: &'a LastRecordMap,
    bytes: &'a [u8],
}

impl StoredRecord<'_> {
    fn is_null(&self, column: usize) -> bool {
        self.bytes[column / 8] & (1 << (column % 8)) != 0
    }

    fn var(&self, at: usize) -> &[u8] {
        let offset = read_u32(self.bytes, at) as usize;
        let len = read_u32(self.bytes, offset) as usize;
        &self.bytes[offset + 4..offset + 4 + len]
    }
}

impl Record for StoredRecord<'_> {
    fn column_count(&self) -> usize {
        self.map.types.len()
    }

    fn get(&self, column: usize) -> Result<Value<'_>> {
        let column_type = *self
            .map
            .types
            .get(column)
            .ok_or(JournalError::ColumnIndexOutOfBounds {
                index: column,
                count: self.map.types.len(),
            })?;
        if self.is_null(column) {
            return Ok(Value::Null);
        }
        let at = self.map.fixed_offsets[column];
        let b = self.bytes;
        Ok(match column_type {
            ColumnType::Boolean => Value::Bool(b[at] != 0),
            ColumnType::Byte => Value::Byte(b[at] as i8),
            ColumnType::Short => Value::Short(i16::from_le_bytes([b[at], b[at + 1]])),
            ColumnType::Int => Value::Int(read_u32(b, at) as i32),
            ColumnType::Float => Value::Float(f32::from_bits(read_u32(b, at))),
            ColumnType::Long => Value::Long(read_u64(b, at) as i64),
            ColumnType::Date => Value::Date(read_u64(b, at) as i64),
            ColumnType::Double => Value::Double(f64::from_bits(read_u64(b, at))),
            ColumnType::Binary => Value::Binary(self.var(at)),
            ColumnType::String | ColumnType::Symbol => {
                let s = std::str::from_utf8(self.var(at)).map_err(|e| {
                    JournalError::InvalidMetadata(format!("stored string is not UTF-8: {}", e))
                })?;
                if column_type == ColumnType::Symbol {
                    Value::Symbol(s)
                } else {
                    Value::Str(s)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ColumnMetadata, JournalConfig};

    struct Row(Vec<Value<'static>>);

    impl Record for Row {
        fn column_count(&self) -> usize {
            self.0.len()
        }

        fn get(&self, column: usize) -> Result<Value<'_>> {
            Ok(self.0[column])
        }
    }

    fn map(page_size: usize) -> LastRecordMap {
        let master = JournalMetadata::new(
            "master",
            vec![
                ColumnMetadata::new("ts", ColumnType::Date),
                ColumnMetadata::new("sym", ColumnType::Symbol),
            ],
            Some("ts"),
            JournalConfig::default(),
        )
        .unwrap();
        let slave = JournalMetadata::new(
            "slave",
            vec![
                ColumnMetadata::new("ccy", ColumnType::String),
                ColumnMetadata::new("rate", ColumnType::Double),
                ColumnMetadata::new("note", ColumnType::String),
            ],
            None,
            JournalConfig::default(),
        )
        .unwrap();
        LastRecordMap::new(
            &master,
            &slave,
            &["sym"],
            &["ccy"],
            LastRecordMapConfig::default().with_page_size(page_size),
        )
        .unwrap()
    }

    fn master(sym: &'static str) -> Row {
        Row(vec![Value::Date(0), Value::Symbol(sym)])
    }

    #[test]
    fn test_growth_relocates_and_get_consumes() {
        let mut map = map(256);
        // 17 fixed bytes, 4 + 1 for the key, 4 + 24 for the note: 50 bytes
        let short_note: &'static str = "abcdefghijklmnopqrstuvwx";
        let a = Row(vec![Value::Str("K"), Value::Double(1.0), Value::Str(short_note)]);
        map.put(&a).unwrap();
        let first = map.slots[&vec![KeyPart::Str("K".to_string())]];

        // 17 + 5 + 4 + 54 = 80 bytes, more than the 55 allocated for A
        let long_note: &'static str = "012345678901234567890123456789012345678901234567890123";
        let b = Row(vec![Value::Str("K"), Value::Double(2.0), Value::Str(long_note)]);
        map.put(&b).unwrap();
        let second = map.slots[&vec![KeyPart::Str("K".to_string())]];
        assert_ne!(first, second);
        assert_eq!(map.free_list.total, map.capacity(first) as usize);

        let found = map.get(&master("K")).unwrap().unwrap();
        assert_eq!(found.get(1).unwrap(), Value::Double(2.0));
        assert_eq!(found.get(2).unwrap(), Value::Str(long_note));
        assert!(map.get(&master("K")).unwrap().is_none());

        map.put(&a).unwrap();
        let found = map.get(&master("K")).unwrap().unwrap();
        assert_eq!(found.get(2).unwrap(), Value::Str(short_note));
    }

    #[test]
    fn test_smaller_record_overwrites_in_place() {
        let mut map = map(256);
        map.put(&Row(vec![Value::Str("K"), Value::Double(1.0), Value::Str("abcdef")]))
            .unwrap();
        let first = map.slots[&vec![KeyPart::Str("K".to_string())]];
        map.put(&Row(vec![Value::Str("K"), Value::Double(3.0), Value::Null]))
            .unwrap();
        assert_eq!(map.slots[&vec![KeyPart::Str("K".to_string())]], first);

        let found = map.get(&master("K")).unwrap().unwrap();
        assert_eq!(found.get(1).unwrap(), Value::Double(3.0));
        assert_eq!(found.get(2).unwrap(), Value::Null);
    }

    #[test]
    fn test_unknown_key_and_reset() {
        let mut map = map(256);
        assert!(map.get(&master("X")).unwrap().is_none());
        map.put(&Row(vec![Value::Str("X"), Value::Double(1.0), Value::Null]))
            .unwrap();
        assert_eq!(map.len(), 1);
        map.reset();
        assert!(map.is_empty());
        assert!(map.get(&master("X")).unwrap().is_none());
        assert_eq!(map.allocated_bytes(), 256);
    }

    #[test]
    fn test_records_roll_to_next_page() {
        let mut map = map(64);
        for key in ["A", "B", "C", "D"] {
            map.put(&Row(vec![Value::Str(key), Value::Double(1.0), Value::Null]))
                .unwrap();
        }
        assert!(map.allocated_bytes() > 64);
        for key in ["A", "B", "C", "D"] {
            assert!(map.get(&master(key)).unwrap().is_some());
        }
    }

    #[test]
    fn test_oversized_record_rejected() {
        let mut map = map(64);
        let big: &'static str = "0123456789012345678901234567890123456789012345678901234567890123";
        assert!(matches!(
            map.put(&Row(vec![Value::Str("K"), Value::Double(1.0), Value::Str(big)])),
            Err(JournalError::RecordTooLarge { max: 60, .. })
        ));
        assert!(map.is_empty());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let mut map = map(256);
        assert!(matches!(
            map.put(&Row(vec![Value::Str("K"), Value::Int(1), Value::Null])),
            Err(JournalError::ColumnTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_free_list_takes_smallest_fit() {
        let mut free = FreeList::default();
        free.add(0, 40);
        free.add(100, 90);
        free.add(300, 60);
        assert_eq!(free.total, 190);
        assert_eq!(free.take(50), Some((300, 60)));
        assert_eq!(free.take(100), None);
        assert_eq!(free.take(10), Some((0, 40)));
        assert_eq!(free.total, 90);
    }

    #[test]
    fn test_key_parts_unify_string_kinds() {
        assert_eq!(KeyPart::of(Value::Symbol("A")), KeyPart::of(Value::Str("A")));
        assert_eq!(KeyPart::of(Value::Int(7)), KeyPart::of(Value::Long(7)));
        assert_ne!(KeyPart::of(Value::Null), KeyPart::of(Value::Int(0)));
    }
}
