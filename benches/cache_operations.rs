//! Benchmarks for the hot read/write path
//!
//! Measures local-hit reads against read-through, and tiered writes across
//! payload sizes. Requires a Redis at `REDIS_URL` (default localhost).

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hybrid_cache::{EntryOptions, HybridCache, HybridCacheOptions};
use serde_json::json;
use std::time::Duration;
use tokio::runtime::Runtime;

fn setup() -> (HybridCache, Runtime) {
    let rt = Runtime::new().expect("failed to create runtime");
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let cache = rt
        .block_on(HybridCache::connect(HybridCacheOptions::new("bench", url)))
        .expect("failed to connect; is Redis running?");
    (cache, rt)
}

fn payload(size_bytes: usize) -> serde_json::Value {
    json!({
        "data": "x".repeat(size_bytes),
        "size": size_bytes,
    })
}

fn bench_set(c: &mut Criterion) {
    let (cache, rt) = setup();
    let mut group = c.benchmark_group("set");
    group.measurement_time(Duration::from_secs(10));

    for size in &[100usize, 1024, 10_240] {
        let value = payload(*size);
        group.bench_with_input(BenchmarkId::new("both_tiers", size), size, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    cache
                        .set("bench:set", black_box(&value), &EntryOptions::new())
                        .await
                        .unwrap()
                })
            });
        });
    }
    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let (cache, rt) = setup();
    let value = payload(1024);
    rt.block_on(async {
        cache
            .set("bench:get", &value, &EntryOptions::new())
            .await
            .unwrap();
    });

    let mut group = c.benchmark_group("get");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("local_hit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let got: Option<serde_json::Value> =
                    cache.get(black_box("bench:get")).await.unwrap();
                got
            })
        });
    });

    group.bench_function("read_through", |b| {
        b.iter(|| {
            rt.block_on(async {
                // force the remote path by dropping the local copy first
                cache.clear_local();
                let got: Option<serde_json::Value> =
                    cache.get(black_box("bench:get")).await.unwrap();
                got
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_set, bench_get);
criterion_main!(benches);
