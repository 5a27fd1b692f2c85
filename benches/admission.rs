//! Benchmarks for admission and cache hot paths
//!
//! This benchmark measures:
//! - Rate limiter decisions on one hot key and across many keys
//! - Breaker admission plus outcome recording
//! - Cache hits through get-or-load and versioned writes
//! - The full guard path, sync and async

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use txguard::{
    BreakerRule, CacheConfig, CallContext, CircuitBreakerConfig, CircuitBreakers, Error, Guard,
    GuardPolicy, RateLimitRule, RateLimiter, ResilientCache,
};

fn bench_rate_limiter(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_limiter");
    group.throughput(Throughput::Elements(1));

    let limiter = RateLimiter::new();
    group.bench_function("hot_key", |b| {
        b.iter(|| black_box(limiter.allow(black_box("acct-1"), u32::MAX, 60)))
    });

    for keys in [16usize, 1024] {
        let limiter = RateLimiter::new();
        let names: Vec<String> = (0..keys).map(|i| format!("acct-{i}")).collect();
        group.bench_with_input(BenchmarkId::new("spread_keys", keys), &names, |b, names| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % names.len();
                black_box(limiter.allow(&names[i], u32::MAX, 60))
            })
        });
    }
    group.finish();
}

fn bench_circuit_breaker(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_breaker");
    let breakers = CircuitBreakers::new(CircuitBreakerConfig::default());

    group.bench_function("allow_and_record_success", |b| {
        b.iter(|| {
            if breakers.allow(black_box("ledger")) {
                breakers.record_success("ledger");
            }
        })
    });
    group.bench_function("snapshot", |b| b.iter(|| black_box(breakers.snapshot("ledger"))));
    group.finish();
}

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");
    let cache: ResilientCache<String> = ResilientCache::new(CacheConfig::default());
    cache
        .atomic_update("transactions", "txn-1", "payload".to_string())
        .expect("transactions cache exists");

    group.bench_function("get_or_load_hit", |b| {
        b.iter(|| {
            black_box(cache.get_or_load("transactions", "txn-1", || {
                Ok::<_, Error>(Some("unused".to_string()))
            }))
        })
    });

    let mut version = 0u64;
    group.bench_function("versioned_update", |b| {
        b.iter(|| {
            version += 1;
            black_box(cache.atomic_update_with_version(
                "transactionStats",
                "acct-1",
                "stats".to_string(),
                version,
            ))
        })
    });
    group.finish();
}

fn bench_guard(c: &mut Criterion) {
    let mut group = c.benchmark_group("guard");
    let guard = Guard::new(
        Arc::new(RateLimiter::new()),
        Arc::new(CircuitBreakers::new(CircuitBreakerConfig::default())),
    );
    let policy = GuardPolicy::new()
        .with_rate_limit(RateLimitRule::new(u32::MAX, 60).per_subject())
        .with_breaker(BreakerRule::new("createTransaction"));
    let ctx = CallContext::new("createTransaction").with_subject("acct-1");

    group.bench_function("call", |b| {
        b.iter(|| black_box(guard.call(&ctx, &policy, || Ok::<_, Error>(1u64))))
    });

    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let (guard, ctx, policy) = (&guard, &ctx, &policy);
    group.bench_function("call_async", |b| {
        b.to_async(&runtime).iter(|| async move {
            black_box(
                guard
                    .call_async(ctx, policy, || async { Ok::<_, Error>(1u64) })
                    .await,
            )
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_rate_limiter,
    bench_circuit_breaker,
    bench_cache,
    bench_guard
);
criterion_main!(benches);
