//! # Micro Benchmarks
//!
//! Fine-grained benchmarks for the waiting primitives and snapshot math.
//!
//! Run with: `cargo bench --bench micro_benchmarks`

use corral::{
    offer, poll, recv_with, CancelSource, CancelToken, DispatcherConfig, DispatcherStats,
    LimiterConfig, Outcome, RateLimiterMetrics, Selector,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

/// Benchmark single-source waits that resolve immediately
fn bench_ready_waits(c: &mut Criterion) {
    let mut group = c.benchmark_group("ready_waits");
    let (tx, rx) = crossbeam_channel::unbounded::<u64>();
    let source = CancelSource::new();
    let token = source.token();

    group.bench_function("poll", |b| {
        b.iter(|| {
            tx.send(1).unwrap();
            black_box(poll(&rx))
        });
    });

    group.bench_function("recv_with_timeout", |b| {
        b.iter(|| {
            tx.send(1).unwrap();
            black_box(recv_with(&rx, None, Some(Duration::from_secs(1))))
        });
    });

    group.bench_function("recv_with_cancel_and_timeout", |b| {
        b.iter(|| {
            tx.send(1).unwrap();
            black_box(recv_with(&rx, Some(&token), Some(Duration::from_secs(1))))
        });
    });

    group.bench_function("poll_empty", |b| {
        b.iter(|| {
            let outcome = poll(&rx);
            debug_assert_eq!(outcome, Outcome::NotReady);
            black_box(outcome)
        });
    });

    group.finish();
}

/// Benchmark multi-way selection over growing source sets
fn bench_selector(c: &mut Criterion) {
    let mut group = c.benchmark_group("selector");

    for sources in [2, 8, 32] {
        group.bench_with_input(
            BenchmarkId::from_parameter(sources),
            &sources,
            |b, &sources| {
                let mut selector = Selector::new();
                let senders: Vec<_> = (0..sources)
                    .map(|_| {
                        let (tx, rx) = crossbeam_channel::unbounded::<usize>();
                        selector.add(rx);
                        tx
                    })
                    .collect();
                let last = senders.len() - 1;

                b.iter(|| {
                    senders[last].send(last).unwrap();
                    black_box(selector.poll())
                });
            },
        );
    }

    group.finish();
}

/// Benchmark cancellation checks
fn bench_cancel_token(c: &mut Criterion) {
    let mut group = c.benchmark_group("cancel_token");

    let live = CancelSource::new();
    let live_token = live.token();
    group.bench_function("is_cancelled_live", |b| {
        b.iter(|| black_box(live_token.is_cancelled()));
    });

    let fired = CancelSource::new();
    fired.cancel();
    let fired_token = fired.token();
    group.bench_function("is_cancelled_fired", |b| {
        b.iter(|| black_box(fired_token.is_cancelled()));
    });

    let never = CancelToken::never();
    group.bench_function("is_cancelled_never", |b| {
        b.iter(|| black_box(never.is_cancelled()));
    });

    group.bench_function("clone", |b| {
        b.iter(|| black_box(live_token.clone()));
    });

    group.finish();
}

/// Benchmark the non-blocking send
fn bench_offer(c: &mut Criterion) {
    let mut group = c.benchmark_group("offer");
    let (tx, rx) = crossbeam_channel::bounded::<u64>(1);

    group.bench_function("accepted", |b| {
        b.iter(|| {
            black_box(offer(&tx, 1)).ok();
            rx.try_recv().ok();
        });
    });

    tx.send(0).unwrap();
    group.bench_function("rejected", |b| {
        b.iter(|| black_box(offer(&tx, 1)));
    });

    group.finish();
}

/// Benchmark metrics calculations
fn bench_metrics_calculation(c: &mut Criterion) {
    let mut group = c.benchmark_group("metrics_calc");

    let limiter_metrics = RateLimiterMetrics {
        total_acquired: 1_000_000,
        total_rejected: 50_000,
        tokens_issued: 1_100_000,
        tokens_discarded: 50_000,
        current_tokens: 2,
        capacity: 3,
        max_wait_time_ns: 400_000_000,
    };

    group.bench_function("limiter_health_status", |b| {
        b.iter(|| black_box(limiter_metrics.health_status()));
    });

    group.bench_function("limiter_summary", |b| {
        b.iter(|| black_box(limiter_metrics.summary()));
    });

    let pool_stats = DispatcherStats {
        workers: 8,
        submitted: 10_000,
        succeeded: 9_500,
        failed: 300,
        abandoned: 0,
        queued: 150,
        in_flight: 8,
    };

    group.bench_function("pool_failure_rate", |b| {
        b.iter(|| black_box(pool_stats.failure_rate()));
    });

    group.bench_function("pool_summary", |b| {
        b.iter(|| black_box(pool_stats.summary()));
    });

    group.finish();
}

/// Benchmark configuration validation
fn bench_config_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("config_validation");

    let limiter = LimiterConfig::bursty(400, 3);
    group.bench_function("limiter", |b| {
        b.iter(|| black_box(limiter.validate()));
    });

    let pool = DispatcherConfig::with_workers(8);
    group.bench_function("dispatcher", |b| {
        b.iter(|| black_box(pool.validate()));
    });

    group.bench_function("max_permits_in", |b| {
        b.iter(|| black_box(limiter.max_permits_in(black_box(60_000))));
    });

    group.finish();
}

criterion_group!(
    micro_benches,
    bench_ready_waits,
    bench_selector,
    bench_cancel_token,
    bench_offer,
    bench_metrics_calculation,
    bench_config_validation,
);

criterion_main!(micro_benches);
