//! Throughput Benchmark for spillkv
//!
//! Measures the synchronous in-memory operation paths of the engine.
//! The memory limit is set high enough that eviction never triggers, and the
//! save debounce is long enough that snapshot writes stay off the hot path.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use spillkv::{Engine, EngineConfig};
use std::time::Duration;
use tempfile::TempDir;
use tokio::runtime::Runtime;

fn open_engine(rt: &Runtime, dir: &TempDir) -> Engine {
    let config = EngineConfig::new(
        dir.path().join("data.db"),
        dir.path().join("overflow.db"),
        1 << 30,
    )
    .with_save_debounce(Duration::from_secs(5));
    rt.block_on(Engine::open(config)).expect("engine open")
}

/// Benchmark SET operations
fn bench_set(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&rt, &dir);

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            engine.set(format!("key:{}", i), "small_value");
            i += 1;
        });
    });

    group.bench_function("set_medium", |b| {
        let mut i = 0u64;
        let value = "x".repeat(1024); // 1KB value
        b.iter(|| {
            engine.set(format!("key:{}", i), value.clone());
            i += 1;
        });
    });

    group.bench_function("set_overwrite", |b| {
        b.iter(|| {
            engine.set("hot_key", "hot_value");
        });
    });

    group.finish();
}

/// Benchmark GET operations
fn bench_get(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&rt, &dir);

    // Pre-populate with data
    for i in 0..100_000 {
        engine.set(format!("key:{}", i), format!("value:{}", i));
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_hit", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            let _ = black_box(engine.get(&key));
            i += 1;
        });
    });

    group.bench_function("get_miss", |b| {
        b.iter(|| {
            let _ = black_box(engine.get("missing_key"));
        });
    });

    group.finish();
}

/// Benchmark a mixed read-heavy workload (90% GET, 10% SET)
fn bench_mixed(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&rt, &dir);

    for i in 0..10_000 {
        engine.set(format!("key:{}", i), format!("value:{}", i));
    }

    let mut group = c.benchmark_group("mixed");
    group.throughput(Throughput::Elements(1));

    group.bench_function("read_heavy_90_10", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 10_000);
            if i % 10 == 0 {
                engine.set(key, "updated");
            } else {
                let _ = black_box(engine.get(&key));
            }
            i += 1;
        });
    });

    group.finish();
}

criterion_group!(benches, bench_set, bench_get, bench_mixed);
criterion_main!(benches);
