//! Key index behaviour: insertion order, newest-first cursors, block
//! chaining, truncation and persistence across reopen.

use alopex_journal::{JournalError, KvIndex, KvIndexConfig};
use proptest::prelude::*;
use std::collections::BTreeMap;
use tempfile::TempDir;

fn small_blocks() -> KvIndexConfig {
    // 4 values per row block
    KvIndexConfig::default()
        .with_key_count_hint(1)
        .with_record_count_hint(4)
}

fn expected(keys: &[i32]) -> BTreeMap<i32, Vec<i64>> {
    let mut map: BTreeMap<i32, Vec<i64>> = BTreeMap::new();
    for (row, &key) in keys.iter().enumerate() {
        map.entry(key).or_default().push(row as i64);
    }
    map
}

#[test]
fn test_block_chain_of_four() {
    let temp_dir = TempDir::new().unwrap();
    let config = small_blocks();
    assert_eq!(config.row_block_len(), 4);

    let mut index = KvIndex::open(temp_dir.path().join("sym"), &config).unwrap();
    for row in 0..10 {
        index.add(0, row).unwrap();
    }
    index.commit().unwrap();

    let mut values = Vec::new();
    index.values(0, &mut values).unwrap();
    assert_eq!(values, (0..10).collect::<Vec<_>>());

    let newest_first: Vec<i64> = index.cursor(0).unwrap().map(|r| r.unwrap()).collect();
    assert_eq!(newest_first, (0..10).rev().collect::<Vec<_>>());

    assert_eq!(index.value_count(0).unwrap(), 10);
    assert_eq!(index.value_quick(0, 0).unwrap(), 0);
    assert_eq!(index.value_quick(0, 5).unwrap(), 5);
    assert_eq!(index.last_value(0).unwrap(), 9);
    assert!(matches!(
        index.value_quick(0, 10),
        Err(JournalError::ValueIndexOutOfBounds { index: 10, max: 9 })
    ));
    assert_eq!(index.size(), 10);
}

#[test]
fn test_fifth_value_opens_second_block() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("sym");
    let mut index = KvIndex::open(&base, &small_blocks()).unwrap();
    for value in [10, 20, 30, 40, 50] {
        index.add(0, value).unwrap();
    }
    index.commit().unwrap();

    assert_eq!(index.value_count(0).unwrap(), 5);
    assert_eq!(index.value_quick(0, 4).unwrap(), 50);
    assert_eq!(index.value_quick(0, 0).unwrap(), 10);
    assert_eq!(index.size(), 51);

    // two blocks of 4 row ids plus a back pointer each
    let row_file = std::fs::read(base.with_extension("r")).unwrap();
    let header = 8;
    let used = u64::from_le_bytes(row_file[..8].try_into().unwrap()) as usize;
    assert_eq!(used, 2 * (4 * 8 + 8));
    assert!(row_file.len() >= header + used);
}

#[test]
fn test_skipped_keys_read_empty() {
    let temp_dir = TempDir::new().unwrap();
    let mut index = KvIndex::open(temp_dir.path().join("sym"), &small_blocks()).unwrap();
    index.add(5, 0).unwrap();
    index.commit().unwrap();

    for key in 0..5 {
        assert_eq!(index.value_count(key).unwrap(), 0);
        assert!(!index.contains(key).unwrap());
        assert_eq!(index.cursor(key).unwrap().count(), 0);
    }
    assert!(index.contains(5).unwrap());
    assert_eq!(index.value_count(100).unwrap(), 0);
    assert!(matches!(index.last_value(100), Err(JournalError::KeyNotFound(100))));
}

#[test]
fn test_null_key_and_invalid_key() {
    let temp_dir = TempDir::new().unwrap();
    let mut index = KvIndex::open(temp_dir.path().join("sym"), &small_blocks()).unwrap();
    index.add(-1, 0).unwrap();
    index.add(-1, 1).unwrap();
    assert!(matches!(index.add(-2, 2), Err(JournalError::InvalidKey(-2))));
    index.commit().unwrap();

    let mut values = Vec::new();
    index.values(-1, &mut values).unwrap();
    assert_eq!(values, vec![0, 1]);
}

#[test]
fn test_rollback_discards_uncommitted_values() {
    let temp_dir = TempDir::new().unwrap();
    let mut index = KvIndex::open(temp_dir.path().join("sym"), &small_blocks()).unwrap();
    index.add(1, 0).unwrap();
    index.commit().unwrap();

    index.add(1, 1).unwrap();
    index.add(3, 2).unwrap();
    assert!(index.in_transaction());
    index.rollback().unwrap();

    assert_eq!(index.value_count(1).unwrap(), 1);
    assert_eq!(index.value_count(3).unwrap(), 0);
    assert_eq!(index.size(), 1);
}

#[test]
fn test_reopen_sees_committed_values_only() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("sym");
    {
        let mut index = KvIndex::open(&base, &small_blocks()).unwrap();
        for row in 0..6 {
            index.add((row % 2) as i32, row).unwrap();
        }
        index.commit().unwrap();
        index.add(0, 6).unwrap();
    }

    let index = KvIndex::open(&base, &small_blocks()).unwrap();
    let mut values = Vec::new();
    index.values(0, &mut values).unwrap();
    assert_eq!(values, vec![0, 2, 4]);
    index.values(1, &mut values).unwrap();
    assert_eq!(values, vec![1, 3, 5]);
    assert_eq!(index.size(), 6);
}

#[test]
fn test_truncate_drops_tail_across_blocks() {
    let temp_dir = TempDir::new().unwrap();
    let mut index = KvIndex::open(temp_dir.path().join("sym"), &small_blocks()).unwrap();
    for row in 0..10 {
        index.add(0, row).unwrap();
    }
    index.add(1, 10).unwrap();
    index.commit().unwrap();

    index.truncate(3).unwrap();
    let mut values = Vec::new();
    index.values(0, &mut values).unwrap();
    assert_eq!(values, vec![0, 1, 2]);
    assert_eq!(index.value_count(1).unwrap(), 0);
    assert_eq!(index.size(), 3);

    index.add(0, 3).unwrap();
    index.commit().unwrap();
    index.values(0, &mut values).unwrap();
    assert_eq!(values, vec![0, 1, 2, 3]);
}

proptest! {
    /// Values come back in insertion order, cursors reverse them, and the
    /// size is one past the largest value.
    #[test]
    fn test_values_follow_insertion_order(keys in prop::collection::vec(0i32..8, 1..200)) {
        let temp_dir = TempDir::new().unwrap();
        let mut index = KvIndex::open(temp_dir.path().join("k"), &small_blocks()).unwrap();
        for (row, &key) in keys.iter().enumerate() {
            index.add(key, row as i64).unwrap();
        }
        index.commit().unwrap();

        let mut values = Vec::new();
        for (key, rows) in expected(&keys) {
            index.values(key, &mut values).unwrap();
            prop_assert_eq!(&values, &rows);
            prop_assert_eq!(index.value_count(key).unwrap(), rows.len() as i64);

            let reversed: Vec<i64> = index.cursor(key).unwrap().map(|r| r.unwrap()).collect();
            let mut newest_first = rows.clone();
            newest_first.reverse();
            prop_assert_eq!(reversed, newest_first);
        }
        prop_assert_eq!(index.size(), keys.len() as i64);
    }

    /// Truncation keeps exactly the values below the cut.
    #[test]
    fn test_truncate_keeps_prefix(
        keys in prop::collection::vec(0i32..6, 1..120),
        cut in 0usize..130,
    ) {
        let temp_dir = TempDir::new().unwrap();
        let mut index = KvIndex::open(temp_dir.path().join("k"), &small_blocks()).unwrap();
        for (row, &key) in keys.iter().enumerate() {
            index.add(key, row as i64).unwrap();
        }
        index.commit().unwrap();

        let cut = cut as i64;
        index.truncate(cut).unwrap();

        let mut values = Vec::new();
        for (key, rows) in expected(&keys) {
            index.values(key, &mut values).unwrap();
            let kept: Vec<i64> = rows.into_iter().filter(|&r| r < cut).collect();
            prop_assert_eq!(&values, &kept);
        }
        prop_assert_eq!(index.size(), cut.min(keys.len() as i64));
    }
}
