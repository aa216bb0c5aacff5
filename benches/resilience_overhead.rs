//! Benchmarks for per-call resilience overhead
//!
//! This benchmark measures:
//! - Circuit breaker gate and bookkeeping on the hot path
//! - Backoff computation with jitter
//! - Executor overhead around an immediately successful operation
//! - Partial-success report aggregation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ingest_resilience::report::{CrawlerError, ErrorType, PartialSuccessReport};
use ingest_resilience::resilience::{
    CircuitBreakerConfig, CircuitBreakerRegistry, JitterSource, RateLimiterConfig,
    ResilienceManager, RetryConfig,
};
use ingest_resilience::SystemHealthSummary;

fn bench_circuit_breaker(c: &mut Criterion) {
    let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
    let services: Vec<String> = (0..16).map(|i| format!("service-{}", i)).collect();

    c.bench_function("circuit_breaker_allow_and_record", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let service = &services[i % services.len()];
            i += 1;
            if registry.is_allowed(black_box(service)) {
                registry.record_success(service);
            }
        })
    });

    c.bench_function("circuit_breaker_snapshots", |b| {
        b.iter(|| black_box(registry.snapshots()))
    });
}

fn bench_backoff(c: &mut Criterion) {
    let cfg = RetryConfig::default().with_max_retries(10);
    let jitter = JitterSource::seeded(7);

    c.bench_function("backoff_next_delay_jittered", |b| {
        b.iter(|| {
            for attempt in 0..10 {
                black_box(cfg.next_delay(black_box(attempt), &jitter));
            }
        })
    });
}

fn bench_executor(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    // Zero window disables throttling so only the executor itself is measured.
    let manager = ResilienceManager::builder()
        .with_rate_limit(RateLimiterConfig::new(1, std::time::Duration::ZERO))
        .build();

    c.bench_function("execute_with_retry_success", |b| {
        b.to_async(&rt).iter(|| async {
            let v = manager
                .execute_with_retry(|| async { Ok::<_, String>(1u32) }, "fetch", None, None)
                .await;
            black_box(v)
        })
    });

    c.bench_function("execute_with_circuit_breaker_success", |b| {
        b.to_async(&rt).iter(|| async {
            let v = manager
                .execute_with_circuit_breaker(|| async { Ok::<_, String>(1u32) }, "storage", None)
                .await;
            black_box(v)
        })
    });
}

fn bench_report(c: &mut Criterion) {
    let types = [
        ErrorType::Network,
        ErrorType::Storage,
        ErrorType::Embedding,
        ErrorType::Parsing,
    ];
    let mut group = c.benchmark_group("report_build");

    for size in [10usize, 100, 1000] {
        let errors: Vec<CrawlerError> = (0..size)
            .map(|i| {
                let t = types[i % types.len()];
                CrawlerError::new(
                    format!("https://docs.example/{}", i),
                    t,
                    t.default_recoverable(),
                    "failure",
                )
            })
            .collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &errors, |b, errors| {
            b.iter(|| {
                PartialSuccessReport::build(
                    size * 2,
                    size,
                    black_box(errors),
                    "bench",
                    SystemHealthSummary::from_snapshots(&[], 5),
                )
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_circuit_breaker,
    bench_backoff,
    bench_executor,
    bench_report
);
criterion_main!(benches);
