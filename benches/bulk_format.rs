//! Benchmarks for bulk encoding and the producer enqueue path.

use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use logship::{
    Batch, BulkFormatter, DeliveryResult, Diagnostics, FieldValue, Level, LogRecord,
    OverflowPolicy, Payload, Pipeline, PipelineState, Transport,
};

/// Accepts every payload without keeping it.
struct Discard;

impl Transport for Discard {
    fn send(&mut self, payload: &Payload) -> DeliveryResult {
        black_box(payload.len());
        DeliveryResult::delivered()
    }
}

fn sample(i: usize) -> LogRecord {
    LogRecord::new("nginx.access", Level::Info, "Hello from the pipeline!")
        .with_field("path", "/test")
        .with_field("user_id", 123)
        .with_field("seq", i as i64)
        .with_field(
            "http",
            FieldValue::map([("status", FieldValue::Int(200)), ("method", "GET".into())]),
        )
}

fn bench_serialize(c: &mut Criterion) {
    let formatter = BulkFormatter::new("nginx-realaffiliate");
    let diagnostics = Diagnostics::new(Arc::new(PipelineState::new()), Vec::new());
    let mut group = c.benchmark_group("bulk_serialize");
    for size in [1usize, 100, 500] {
        let batch = Batch::new(0, (0..size).map(sample).collect(), 0);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &batch, |b, batch| {
            b.iter(|| black_box(formatter.serialize(batch, &diagnostics)));
        });
    }
    group.finish();
}

fn bench_encoded_len(c: &mut Criterion) {
    let formatter = BulkFormatter::new("nginx-realaffiliate");
    let record = sample(0);
    c.bench_function("encoded_len", |b| {
        b.iter(|| black_box(formatter.encoded_len(&record)));
    });
}

fn bench_enqueue(c: &mut Criterion) {
    let pipeline = Pipeline::builder()
        .with_transport(Discard)
        .without_log_sink()
        .with_capacity(100_000)
        .with_overflow_policy(OverflowPolicy::DropOldest)
        .with_linger(Duration::from_millis(50))
        .build()
        .expect("pipeline");
    let handle = pipeline.handle();
    c.bench_function("enqueue", |b| {
        b.iter(|| black_box(handle.enqueue(sample(0))));
    });
    pipeline.shutdown();
}

criterion_group!(benches, bench_serialize, bench_encoded_len, bench_enqueue);
criterion_main!(benches);
