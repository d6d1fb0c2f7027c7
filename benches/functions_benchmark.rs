//! Function and Operator Benchmarks
//!
//! Measures kernel throughput over windows of increasing size and end-to-end
//! range queries over the in-memory store, including shard scaling.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use promql_exec::query::ast::Expr;
use promql_exec::query::{ExecutorConfig, FunctionArgs, FunctionRegistry, QueryEngine};
use promql_exec::storage::InMemoryStorage;
use promql_exec::types::{LabelMatcher, Labels, Point, METRIC_NAME};
use std::hint::black_box;
use std::sync::Arc;

// =============================================================================
// Test Data Generators
// =============================================================================

/// Counter-like points every 15s
fn create_points(count: usize) -> Vec<Point> {
    (0..count)
        .map(|i| Point::new(i as i64 * 15_000, i as f64 * 3.0 + (i as f64 * 0.1).sin()))
        .collect()
}

/// Store with `series_count` series of `points_per_series` points each
fn create_storage(series_count: usize, points_per_series: usize) -> Arc<InMemoryStorage> {
    let storage = InMemoryStorage::new();
    for i in 0..series_count {
        let instance = format!("host-{:04}", i);
        storage.add_series(
            Labels::from_pairs([
                (METRIC_NAME, "http_requests_total"),
                ("instance", instance.as_str()),
            ]),
            create_points(points_per_series),
        );
    }
    Arc::new(storage)
}

// =============================================================================
// Kernel Benchmarks
// =============================================================================

fn bench_kernels(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernels");
    let registry = FunctionRegistry::global();
    let labels = Labels::default();

    for size in [16usize, 256, 4096] {
        let points = create_points(size);
        let step_time = points.last().map_or(0, |p| p.t);
        group.throughput(Throughput::Elements(size as u64));

        for name in ["sum_over_time", "avg_over_time", "stddev_over_time", "rate", "deriv"] {
            let Ok(kernel) = registry.get(name) else {
                continue;
            };
            group.bench_with_input(BenchmarkId::new(name, size), &points, |b, points| {
                b.iter(|| {
                    kernel(black_box(&FunctionArgs {
                        labels: &labels,
                        points,
                        step_time,
                        select_range: step_time + 15_000,
                        scalar_points: &[],
                        offset: 0,
                    }))
                })
            });
        }
    }

    group.finish();
}

// =============================================================================
// Query Benchmarks
// =============================================================================

fn bench_range_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_query");
    group.sample_size(20);

    let storage = create_storage(200, 960);
    let expr = Expr::call(
        "rate",
        vec![Expr::matrix(vec![LabelMatcher::metric("http_requests_total")], 300_000)],
    );
    let end = 959 * 15_000;
    let steps = (end / 60_000 + 1) as u64;
    group.throughput(Throughput::Elements(steps * 200));

    for shards in [1usize, 2, 4, 8] {
        let engine = QueryEngine::with_config(
            storage.clone(),
            ExecutorConfig::new().with_shards(shards).without_metrics(),
        );
        group.bench_with_input(BenchmarkId::new("rate_5m", shards), &engine, |b, engine| {
            b.iter(|| engine.range_query(black_box(&expr), 0, end, 60_000))
        });
    }

    let engine = QueryEngine::with_config(
        storage.clone(),
        ExecutorConfig::new().with_shards(4).without_metrics(),
    );
    let clamped = Expr::call(
        "clamp_max",
        vec![
            Expr::selector(vec![LabelMatcher::metric("http_requests_total")]),
            Expr::number(1000.0),
        ],
    );
    group.bench_function("clamp_max_selector", |b| {
        b.iter(|| engine.range_query(black_box(&clamped), 0, end, 60_000))
    });

    group.finish();
}

fn bench_batch_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("steps_per_batch");
    group.sample_size(20);

    let storage = create_storage(50, 960);
    let expr = Expr::call(
        "sum_over_time",
        vec![Expr::matrix(vec![LabelMatcher::metric("http_requests_total")], 300_000)],
    );
    let end = 959 * 15_000;

    for steps_per_batch in [1usize, 10, 100] {
        let engine = QueryEngine::with_config(
            storage.clone(),
            ExecutorConfig::new()
                .with_shards(1)
                .with_steps_per_batch(steps_per_batch)
                .without_metrics(),
        );
        group.bench_with_input(
            BenchmarkId::from_parameter(steps_per_batch),
            &engine,
            |b, engine| b.iter(|| engine.range_query(black_box(&expr), 0, end, 15_000)),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_kernels, bench_range_query, bench_batch_size);
criterion_main!(benches);
