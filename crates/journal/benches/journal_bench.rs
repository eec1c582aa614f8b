//! Benchmarks for journal components.
//!
//! Run with: cargo bench --package alopex-journal
//!
//! ## Benchmark Categories
//!
//! - **Key Index**: add/commit, newest-first cursor, value copy
//! - **Journal**: append with commit batches
//! - **Queries**: index lookups and latest-per-symbol scans

use alopex_journal::query::{
    for_each_partition, JournalPartitionSource, KvIndexRowSource, PartialSymbolKeySource,
    ReverseRowSource, SkipSymbolRowSource,
};
use alopex_journal::{
    ColumnMetadata, ColumnType, Journal, JournalConfig, JournalMetadata, KvIndex, KvIndexConfig,
    PartitionType, RecordBinding, Value,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;

const SYMBOLS: [&str; 8] = ["AAPL", "MSFT", "GOOG", "AMZN", "META", "NFLX", "TSLA", "NVDA"];

struct Quote {
    ts: i64,
    sym: &'static str,
    bid: f64,
}

fn binding() -> RecordBinding<Quote> {
    RecordBinding::<Quote>::new()
        .field(|q| Value::Date(q.ts), |q, v| q.ts = v.as_i64().unwrap_or(0))
        // Reads are not benchmarked through the binding.
        .field(|q| Value::Symbol(q.sym), |_, _| {})
        .field(|q| Value::Double(q.bid), |q, v| q.bid = v.as_f64().unwrap_or(f64::NAN))
}

fn open_journal(dir: &TempDir) -> Journal<Quote> {
    let metadata = JournalMetadata::new(
        dir.path(),
        vec![
            ColumnMetadata::new("ts", ColumnType::Date),
            ColumnMetadata::new("sym", ColumnType::Symbol).with_index(16),
            ColumnMetadata::new("bid", ColumnType::Double),
        ],
        Some("ts"),
        JournalConfig::default()
            .with_partition_type(PartitionType::Day)
            .with_record_hint(100_000),
    )
    .unwrap();
    Journal::open(metadata, binding()).unwrap()
}

fn quote(i: usize) -> Quote {
    Quote {
        ts: i as i64 * 1_000,
        sym: SYMBOLS[i % SYMBOLS.len()],
        bid: 100.0 + (i as f64 * 0.01).sin(),
    }
}

fn filled_journal(dir: &TempDir, count: usize) -> Journal<Quote> {
    let mut journal = open_journal(dir);
    for i in 0..count {
        journal.append(&quote(i)).unwrap();
    }
    journal.commit().unwrap();
    journal
}

fn bench_index_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("kv_index_add");
    for count in [1_000usize, 10_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_batched(
                || TempDir::new().unwrap(),
                |dir| {
                    let config = KvIndexConfig::default()
                        .with_key_count_hint(16)
                        .with_record_count_hint(count as u64);
                    let mut index = KvIndex::open(dir.path().join("sym"), &config).unwrap();
                    for row in 0..count as i64 {
                        index.add((row % 16) as i32, row).unwrap();
                    }
                    index.commit().unwrap();
                    black_box(index.size())
                },
                criterion::BatchSize::PerIteration,
            )
        });
    }
    group.finish();
}

fn bench_index_read(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let config = KvIndexConfig::default()
        .with_key_count_hint(16)
        .with_record_count_hint(100_000);
    let mut index = KvIndex::open(dir.path().join("sym"), &config).unwrap();
    for row in 0..100_000i64 {
        index.add((row % 16) as i32, row).unwrap();
    }
    index.commit().unwrap();

    c.bench_function("kv_index_cursor_100k", |b| {
        b.iter(|| {
            let cursor = index.cursor(black_box(3)).unwrap();
            black_box(cursor.map(|r| r.unwrap()).sum::<i64>())
        })
    });

    let mut values = Vec::new();
    c.bench_function("kv_index_values_100k", |b| {
        b.iter(|| {
            index.values(black_box(3), &mut values).unwrap();
            black_box(values.len())
        })
    });

    c.bench_function("kv_index_last_value", |b| {
        b.iter(|| black_box(index.last_value(black_box(7)).unwrap()))
    });
}

fn bench_journal_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("journal_append");
    for batch in [1usize, 100, 10_000] {
        group.throughput(Throughput::Elements(10_000));
        group.bench_with_input(BenchmarkId::new("commit_every", batch), &batch, |b, &batch| {
            b.iter_batched(
                || TempDir::new().unwrap(),
                |dir| {
                    let mut journal = open_journal(&dir);
                    for i in 0..10_000 {
                        journal.append(&quote(i)).unwrap();
                        if (i + 1) % batch == 0 {
                            journal.commit().unwrap();
                        }
                    }
                    journal.commit().unwrap();
                },
                criterion::BatchSize::PerIteration,
            )
        });
    }
    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let mut journal = filled_journal(&dir, 200_000);
    let view = journal.view().unwrap();

    c.bench_function("query_symbol_rows_200k", |b| {
        b.iter(|| {
            let rows = for_each_partition(
                JournalPartitionSource::asc(view),
                KvIndexRowSource::new("sym", PartialSymbolKeySource::new("sym", ["MSFT", "TSLA"])),
            )
            .collect_rows()
            .unwrap();
            black_box(rows.len())
        })
    });

    c.bench_function("query_latest_per_symbol_200k", |b| {
        b.iter(|| {
            let rows = for_each_partition(
                JournalPartitionSource::desc(view),
                SkipSymbolRowSource::new(
                    ReverseRowSource::new(KvIndexRowSource::new(
                        "sym",
                        PartialSymbolKeySource::new("sym", SYMBOLS),
                    )),
                    "sym",
                ),
            )
            .top(SYMBOLS.len())
            .unwrap();
            black_box(rows)
        })
    });
}

criterion_group!(
    benches,
    bench_index_add,
    bench_index_read,
    bench_journal_append,
    bench_queries,
);

criterion_main!(benches);
