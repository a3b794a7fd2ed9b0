//! Benchmarks for the per-request hot paths.

use bgproxy::backend::{Backend, FailoverRouter};
use bgproxy::config::{parse_config, Role};
use bgproxy::health::{HealthPolicy, HealthTracker};
use bgproxy::metrics::MetricsCollector;
use bgproxy::proxy::{Classification, ForwardRequest, RetryableStatuses};
use bgproxy::util::RequestId;
use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use hyper::header::{HeaderMap, HeaderValue};
use hyper::{Method, StatusCode, Uri};
use std::time::{Duration, Instant};

const CONFIG: &str = r#"
proxy:
  listen: "127.0.0.1:0"
pool:
  - name: blue
    address: "app_blue:3000"
    role: primary
  - name: green
    address: "app_green:3000"
"#;

fn benchmark_candidates(c: &mut Criterion) {
    let config = parse_config(CONFIG).unwrap();
    let router = FailoverRouter::from_config(&config, MetricsCollector::new());

    let mut group = c.benchmark_group("candidates");

    group.bench_function("primary_up", |b| {
        b.iter(|| {
            black_box(router.candidates(Instant::now()));
        })
    });

    let now = Instant::now();
    for backend in router.pool().backends() {
        for _ in 0..2 {
            router.tracker().record_failure(backend, now);
        }
    }

    group.bench_function("all_down", |b| {
        b.iter(|| {
            black_box(router.candidates(Instant::now()));
        })
    });

    group.finish();
}

fn benchmark_tracker(c: &mut Criterion) {
    let tracker = HealthTracker::new(HealthPolicy {
        failure_threshold: 2,
        cooldown: Duration::from_secs(10),
    });
    let backend = Backend::new("blue", "app_blue:3000", Role::Primary);

    let mut group = c.benchmark_group("health_tracker");

    group.bench_function("is_up", |b| {
        b.iter(|| {
            black_box(tracker.is_up(&backend, Instant::now()));
        })
    });

    group.bench_function("record_success", |b| {
        b.iter(|| {
            tracker.record_success(&backend);
        })
    });

    group.bench_function("record_failure", |b| {
        b.iter(|| {
            black_box(tracker.record_failure(&backend, Instant::now()));
        })
    });

    group.finish();
}

fn benchmark_request(c: &mut Criterion) {
    let retryable = RetryableStatuses::default();
    let uri: Uri = "http://localhost:8080/version?verbose=1".parse().unwrap();
    let mut headers = HeaderMap::new();
    headers.insert("host", HeaderValue::from_static("localhost:8080"));
    headers.insert("connection", HeaderValue::from_static("keep-alive"));
    headers.insert("accept", HeaderValue::from_static("*/*"));

    let mut group = c.benchmark_group("request");

    group.bench_function("classify_status", |b| {
        b.iter(|| {
            black_box(Classification::from_status(
                black_box(StatusCode::BAD_GATEWAY),
                &retryable,
            ));
        })
    });

    group.bench_function("forward_request_new", |b| {
        b.iter(|| {
            let request = ForwardRequest::new(
                Method::GET,
                &uri,
                headers.clone(),
                Bytes::from_static(b"payload"),
            );
            black_box(request.to_request("app_blue:3000"));
        })
    });

    group.bench_function("request_id", |b| {
        b.iter(|| {
            black_box(RequestId::from_headers(&headers));
        })
    });

    group.finish();
}

fn benchmark_metrics(c: &mut Criterion) {
    let collector = MetricsCollector::new();

    let mut group = c.benchmark_group("metrics");
    group.throughput(Throughput::Elements(1));

    group.bench_function("record_request", |b| {
        b.iter(|| {
            collector.record_request(
                black_box("blue"),
                black_box("GET"),
                black_box(200),
                black_box(Duration::from_millis(10)),
            );
        })
    });

    group.bench_function("record_attempt", |b| {
        b.iter(|| {
            collector.record_attempt(black_box("blue"), black_box(Classification::Success));
        })
    });

    group.bench_function("track_active", |b| {
        b.iter(|| {
            black_box(collector.track_active());
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_candidates,
    benchmark_tracker,
    benchmark_request,
    benchmark_metrics,
);

criterion_main!(benches);
