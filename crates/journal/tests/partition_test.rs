//! Partition round trips over every column type, null handling, index
//! maintenance and truncation.

use alopex_journal::hash;
use alopex_journal::partition::TX_LIMIT_EVAL;
use alopex_journal::storage::SymbolTables;
use alopex_journal::{
    AccessMode, ColumnMetadata, ColumnType, JournalConfig, JournalError, JournalMetadata, Partition,
    PartitionType, Record, RecordBinding, SearchType, Value,
};
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Debug, Clone, Default, PartialEq)]
struct Trade {
    ts: i64,
    sym: String,
    id: i32,
    qty: i64,
    px: f64,
    size: f32,
    lot: i16,
    venue: i8,
    flag: bool,
    note: Option<String>,
    blob: Option<Vec<u8>>,
}

impl Trade {
    fn new(ts: i64, sym: &str, id: i32) -> Self {
        Self {
            ts,
            sym: sym.to_string(),
            id,
            qty: ts * 10,
            px: id as f64 + 0.5,
            size: 1.25,
            lot: 100,
            venue: 3,
            flag: id % 2 == 0,
            note: Some(format!("note-{}", id)),
            blob: Some(vec![id as u8; 3]),
        }
    }
}

fn binding() -> RecordBinding<Trade> {
    RecordBinding::<Trade>::new()
        .field(|t| Value::Date(t.ts), |t, v| t.ts = v.as_i64().unwrap_or(i64::MIN))
        .field(
            |t| Value::Symbol(&t.sym),
            |t, v| t.sym = v.as_str().unwrap_or_default().to_string(),
        )
        .field(
            |t| if t.id == i32::MIN { Value::Null } else { Value::Int(t.id) },
            |t, v| t.id = v.as_i64().map_or(i32::MIN, |v| v as i32),
        )
        .field(|t| Value::Long(t.qty), |t, v| t.qty = v.as_i64().unwrap_or(i64::MIN))
        .field(|t| Value::Double(t.px), |t, v| t.px = v.as_f64().unwrap_or(f64::NAN))
        .field(
            |t| Value::Float(t.size),
            |t, v| t.size = v.as_f64().map_or(f32::NAN, |v| v as f32),
        )
        .field(|t| Value::Short(t.lot), |t, v| t.lot = v.as_i64().unwrap_or(0) as i16)
        .field(|t| Value::Byte(t.venue), |t, v| t.venue = v.as_i64().unwrap_or(0) as i8)
        .field(
            |t| Value::Bool(t.flag),
            |t, v| t.flag = matches!(v, Value::Bool(true)),
        )
        .field(
            |t| t.note.as_deref().map_or(Value::Null, Value::Str),
            |t, v| t.note = v.as_str().map(str::to_string),
        )
        .field(
            |t| t.blob.as_deref().map_or(Value::Null, Value::Binary),
            |t, v| {
                t.blob = match v {
                    Value::Binary(b) => Some(b.to_vec()),
                    _ => None,
                }
            },
        )
}

fn columns() -> Vec<ColumnMetadata> {
    vec![
        ColumnMetadata::new("ts", ColumnType::Date),
        ColumnMetadata::new("sym", ColumnType::Symbol).with_index(8),
        ColumnMetadata::new("id", ColumnType::Int).with_index(4),
        ColumnMetadata::new("qty", ColumnType::Long),
        ColumnMetadata::new("px", ColumnType::Double),
        ColumnMetadata::new("size", ColumnType::Float),
        ColumnMetadata::new("lot", ColumnType::Short),
        ColumnMetadata::new("venue", ColumnType::Byte),
        ColumnMetadata::new("flag", ColumnType::Boolean),
        ColumnMetadata::new("note", ColumnType::String).with_index(8),
        ColumnMetadata::new("blob", ColumnType::Binary),
    ]
}

fn metadata(dir: &TempDir, columns: Vec<ColumnMetadata>, mode: AccessMode) -> Arc<JournalMetadata> {
    let metadata = JournalMetadata::new(
        dir.path(),
        columns,
        Some("ts"),
        JournalConfig::default()
            .with_partition_type(PartitionType::None)
            .with_record_hint(64)
            .with_access_mode(mode),
    )
    .unwrap();
    Arc::new(metadata)
}

fn open(metadata: Arc<JournalMetadata>) -> (Partition, SymbolTables) {
    let symbols = SymbolTables::open(&metadata).unwrap();
    let interval = metadata.partition_type().interval_for(0);
    let mut partition = Partition::new(metadata, interval, 0, TX_LIMIT_EVAL, None);
    partition.open().unwrap();
    (partition, symbols)
}

#[test]
fn test_round_trip_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let binding = binding();
    let mut trades: Vec<Trade> = (0..20)
        .map(|i| Trade::new(i * 1000, ["A", "B", "C"][i as usize % 3], i as i32))
        .collect();
    trades[4].note = None;
    trades[5].blob = None;
    trades[6].id = i32::MIN;
    {
        let (mut partition, mut symbols) = open(metadata(&temp_dir, columns(), AccessMode::Append));
        for (row, trade) in trades.iter().enumerate() {
            assert_eq!(partition.append(trade, &binding, &mut symbols).unwrap(), row as i64);
        }
        partition.commit().unwrap();
        symbols.commit().unwrap();
        partition.close();
    }

    let (partition, symbols) = open(metadata(&temp_dir, columns(), AccessMode::Read));
    assert_eq!(partition.size().unwrap(), 20);
    for (row, expected) in trades.iter().enumerate() {
        let mut out = Trade::default();
        partition.read(row as i64, &mut out, &binding, &symbols).unwrap();
        assert_eq!(&out, expected);
    }

    assert!(partition.is_null(4, 9).unwrap());
    assert_eq!(partition.get_str(4, 9).unwrap(), None);
    assert_eq!(partition.get_binary(5, 10).unwrap(), None);
    assert_eq!(partition.get_int(6, 2).unwrap(), i32::MIN);
    assert_eq!(partition.get_symbol(1, 1, &symbols).unwrap(), Some("B"));
    assert_eq!(partition.get_symbol_key(2, 1).unwrap(), 2);

    let record = partition.record(&symbols, 3);
    assert_eq!(record.column_count(), 11);
    assert_eq!(record.get(1).unwrap(), Value::Symbol("A"));
    assert_eq!(record.get(9).unwrap(), Value::Str("note-3"));
}

#[test]
fn test_int_keys_share_a_bucket() {
    let temp_dir = TempDir::new().unwrap();
    let binding = binding();
    let (mut partition, mut symbols) = open(metadata(&temp_dir, columns(), AccessMode::Append));
    for (i, id) in [1, 5, 9, 2].into_iter().enumerate() {
        partition
            .append(&Trade::new(i as i64, "A", id), &binding, &mut symbols)
            .unwrap();
    }
    partition.commit().unwrap();

    let index = partition.index_for_column_name("id").unwrap();
    let mut rows = Vec::new();
    index.values(1, &mut rows).unwrap();
    assert_eq!(rows, vec![0, 1, 2]);
    index.values(2, &mut rows).unwrap();
    assert_eq!(rows, vec![3]);
    assert_eq!(index.size(), 4);

    let notes = partition.index_for_column_name("note").unwrap();
    let key = hash::bounded_hash(Some("note-5"), 8);
    assert!(notes.cursor(key).unwrap().any(|row| row.unwrap() == 1));
}

#[test]
fn test_null_values_are_indexed_under_null_key() {
    let temp_dir = TempDir::new().unwrap();
    let binding = binding();
    let (mut partition, mut symbols) = open(metadata(&temp_dir, columns(), AccessMode::Append));
    let mut trade = Trade::new(0, "A", 1);
    trade.id = i32::MIN;
    trade.note = None;
    partition.append(&trade, &binding, &mut symbols).unwrap();
    partition.commit().unwrap();

    assert_eq!(partition.index_for_column(2).unwrap().last_value(-1).unwrap(), 0);
    assert_eq!(partition.index_for_column(9).unwrap().last_value(-1).unwrap(), 0);
}

#[test]
fn test_type_mismatch_writes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let (mut partition, mut symbols) = open(metadata(&temp_dir, columns(), AccessMode::Append));
    let bad = RecordBinding::<Trade>::new()
        .field(|t| Value::Date(t.ts), |_, _| {})
        .field(|t| Value::Symbol(&t.sym), |_, _| {})
        .field(|_| Value::Double(1.0), |_, _| {})
        .field(|t| Value::Long(t.qty), |_, _| {})
        .field(|t| Value::Double(t.px), |_, _| {})
        .field(|t| Value::Float(t.size), |_, _| {})
        .field(|t| Value::Short(t.lot), |_, _| {})
        .field(|t| Value::Byte(t.venue), |_, _| {})
        .field(|t| Value::Bool(t.flag), |_, _| {})
        .field(|_| Value::Null, |_, _| {})
        .field(|_| Value::Null, |_, _| {});

    assert!(matches!(
        partition.append(&Trade::new(0, "A", 1), &bad, &mut symbols),
        Err(JournalError::ColumnTypeMismatch { ref column, .. }) if column == "id"
    ));
    assert_eq!(partition.size().unwrap(), 0);
}

#[test]
fn test_open_and_close_are_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let binding = binding();
    let (mut partition, mut symbols) = open(metadata(&temp_dir, columns(), AccessMode::Append));
    partition.append(&Trade::new(0, "A", 1), &binding, &mut symbols).unwrap();
    partition.commit().unwrap();

    partition.open().unwrap().open().unwrap();
    assert_eq!(partition.size().unwrap(), 1);

    partition.close();
    partition.close();
    assert!(!partition.is_open());
    assert!(matches!(partition.size(), Err(JournalError::PartitionClosed(_))));

    partition.open().unwrap();
    assert_eq!(partition.size().unwrap(), 1);
}

#[test]
fn test_truncate_shrinks_columns_and_indexes() {
    let temp_dir = TempDir::new().unwrap();
    let binding = binding();
    let (mut partition, mut symbols) = open(metadata(&temp_dir, columns(), AccessMode::Append));
    for i in 0..10 {
        partition
            .append(&Trade::new(i, "A", i as i32), &binding, &mut symbols)
            .unwrap();
    }
    partition.commit().unwrap();

    partition.truncate(4).unwrap();
    assert_eq!(partition.size().unwrap(), 4);
    let index = partition.index_for_column_name("sym").unwrap();
    let mut rows = Vec::new();
    index.values(0, &mut rows).unwrap();
    assert_eq!(rows, vec![0, 1, 2, 3]);

    // growing is a no-op
    partition.truncate(8).unwrap();
    assert_eq!(partition.size().unwrap(), 4);

    let row = partition
        .append(&Trade::new(4, "B", 40), &binding, &mut symbols)
        .unwrap();
    assert_eq!(row, 4);
    assert_eq!(partition.get_int(4, 2).unwrap(), 40);
}

#[test]
fn test_rebuild_index_matches_incremental_index() {
    let temp_dir = TempDir::new().unwrap();
    let binding = binding();
    let (mut partition, mut symbols) = open(metadata(&temp_dir, columns(), AccessMode::Append));
    for i in 0..30 {
        partition
            .append(&Trade::new(i, ["X", "Y"][i as usize % 2], i as i32), &binding, &mut symbols)
            .unwrap();
    }
    partition.commit().unwrap();

    let collect = |p: &Partition, column: usize, key: i32| {
        let mut rows = Vec::new();
        p.index_for_column(column).unwrap().values(key, &mut rows).unwrap();
        rows
    };
    let before: Vec<Vec<i64>> = (0..4).map(|key| collect(&partition, 2, key)).collect();
    let symbols_before = collect(&partition, 1, 1);

    partition.rebuild_indexes().unwrap();
    let after: Vec<Vec<i64>> = (0..4).map(|key| collect(&partition, 2, key)).collect();
    assert_eq!(before, after);
    assert_eq!(symbols_before, collect(&partition, 1, 1));
}

#[test]
fn test_inactive_column_reads_null() {
    let temp_dir = TempDir::new().unwrap();
    let binding = binding();
    let mut cols = columns();
    cols[4] = ColumnMetadata::new("px", ColumnType::Double).with_inactive();
    let (mut partition, mut symbols) = open(metadata(&temp_dir, cols, AccessMode::Append));
    partition.append(&Trade::new(0, "A", 1), &binding, &mut symbols).unwrap();

    assert!(partition.is_null(0, 4).unwrap());
    assert!(partition.get_double(0, 4).unwrap().is_nan());
    let mut out = Trade::default();
    partition.read(0, &mut out, &binding, &symbols).unwrap();
    assert!(out.px.is_nan());
    assert_eq!(out.id, 1);
    assert!(!temp_dir.path().join("px.d").exists());
}

#[test]
fn test_index_of_timestamps() {
    let temp_dir = TempDir::new().unwrap();
    let binding = binding();
    let (mut partition, mut symbols) = open(metadata(&temp_dir, columns(), AccessMode::Append));
    for ts in [10, 20, 20, 30] {
        partition.append(&Trade::new(ts, "A", 1), &binding, &mut symbols).unwrap();
    }
    assert_eq!(partition.index_of(20, SearchType::NewerOrSame).unwrap(), Some(1));
    assert_eq!(partition.index_of(20, SearchType::OlderOrSame).unwrap(), Some(2));
    assert_eq!(partition.index_of(25, SearchType::NewerOrSame).unwrap(), Some(3));
    assert_eq!(partition.index_of(5, SearchType::OlderOrSame).unwrap(), None);
    assert_eq!(partition.index_of(35, SearchType::NewerOrSame).unwrap(), None);
}
