//! Unit tests for the running pipeline, driven by a scripted transport.

use std::time::{Duration, Instant};

use rstest::rstest;

use super::*;
use crate::batcher::BatchLimits;
use crate::processor::{FnProcessor, ProcessorFault, Verdict};
use crate::state::BreakerStatus;
use crate::test_utils::{CollectingSink, ScriptedTransport};
use crate::transport::{BreakerPolicy, DeliveryResult, ItemFailures, RetryPolicy};
use crate::value::FieldValue;

const WAIT: Duration = Duration::from_secs(5);

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base: Duration::from_millis(1),
        cap: Duration::from_millis(2),
    }
}

fn builder(transport: &ScriptedTransport, sink: &CollectingSink) -> PipelineBuilder {
    PipelineBuilder::new()
        .with_transport(transport.clone())
        .with_diagnostic_sink(sink.as_sink())
        .without_log_sink()
        .with_batch_limits(BatchLimits {
            max_records: 10,
            max_bytes: 1 << 20,
            linger: Duration::from_millis(10),
        })
        .with_retry_policy(fast_retry(3))
}

fn messages(records: &[LogRecord]) -> Vec<String> {
    records.iter().map(|r| r.message().to_owned()).collect()
}

#[test]
fn delivers_in_enqueue_order_across_batches() {
    let transport = ScriptedTransport::new();
    let sink = CollectingSink::new();
    let pipeline = builder(&transport, &sink).build().expect("pipeline");
    let handle = pipeline.handle();
    for i in 0..25 {
        assert!(handle.info(format!("event {i}")).expect("enqueue").is_queued());
    }
    assert!(pipeline.flush(WAIT));
    let stats = pipeline.shutdown();

    let expected: Vec<String> = (0..25).map(|i| format!("event {i}")).collect();
    assert_eq!(messages(&transport.delivered_records()), expected);
    assert!(transport.sent().iter().all(|p| p.records().len() <= 10));
    assert_eq!(stats.accepted, 25);
    assert_eq!(stats.delivered, 25);
    assert_eq!(stats.total_dropped(), 0);
}

#[test]
fn filtered_records_never_reach_the_buffer() {
    let transport = ScriptedTransport::new();
    let sink = CollectingSink::new();
    let pipeline = builder(&transport, &sink)
        .with_min_level(Level::Warn)
        .build()
        .expect("pipeline");
    let handle = pipeline.handle();
    assert_eq!(handle.debug("noise").expect("enqueue"), Submission::Filtered);
    assert!(handle.warn("signal").expect("enqueue").is_queued());
    assert!(pipeline.flush(WAIT));
    let stats = pipeline.shutdown();
    assert_eq!(stats.filtered, 1);
    assert_eq!(stats.accepted, 1);
    assert_eq!(messages(&transport.delivered_records()), ["signal"]);
}

#[test]
fn configured_identity_is_stamped_on_records() {
    let transport = ScriptedTransport::new();
    let sink = CollectingSink::new();
    let pipeline = builder(&transport, &sink)
        .with_service("nginx-realaffiliate")
        .with_host("project.site")
        .with_static_field("env", "prod")
        .build()
        .expect("pipeline");
    let handle = pipeline.handle();
    handle
        .enqueue(handle.record(Level::Info, "Hello").with_field("path", "/test"))
        .expect("enqueue");
    assert!(pipeline.flush(WAIT));
    drop(pipeline);

    let delivered = transport.delivered_records();
    let record = delivered.first().expect("one record");
    assert_eq!(record.source().service.as_deref(), Some("nginx-realaffiliate"));
    assert_eq!(record.source().host.as_deref(), Some("project.site"));
    assert_eq!(record.field("env").and_then(FieldValue::as_str), Some("prod"));
}

#[test]
fn permanent_failure_drops_batch_without_retry() {
    let transport = ScriptedTransport::new().then(DeliveryResult::permanent(Some(400), "mapping"));
    let sink = CollectingSink::new();
    let pipeline = builder(&transport, &sink).build().expect("pipeline");
    let handle = pipeline.handle();
    for i in 0..3 {
        handle.info(format!("event {i}")).expect("enqueue");
    }
    assert!(pipeline.flush(WAIT));
    let stats = pipeline.shutdown();
    assert_eq!(transport.send_count(), 1);
    assert_eq!(stats.dropped(DropReason::Permanent), 3);
    assert_eq!(stats.retries, 0);
    assert_eq!(stats.breaker, BreakerStatus::Closed);
}

#[test]
fn exhausted_retries_drop_the_batch() {
    let transport = ScriptedTransport::always(DeliveryResult::retryable("HTTP 503"));
    let sink = CollectingSink::new();
    let pipeline = builder(&transport, &sink)
        .with_retry_policy(fast_retry(2))
        .with_breaker_policy(BreakerPolicy {
            failure_threshold: 100,
            ..BreakerPolicy::default()
        })
        .build()
        .expect("pipeline");
    pipeline.handle().info("doomed").expect("enqueue");
    assert!(pipeline.flush(WAIT));
    let stats = pipeline.shutdown();
    assert_eq!(transport.send_count(), 3);
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.dropped(DropReason::RetriesExhausted), 1);
    assert_eq!(sink.dropped(DropReason::RetriesExhausted), 1);
}

#[test]
fn partial_bulk_failure_retries_only_failed_items() {
    let transport = ScriptedTransport::new().then(DeliveryResult::RetryableFailure {
        reason: "bulk item status 429".into(),
        retry_items: Some(ItemFailures {
            retry: vec![1],
            rejected: 1,
        }),
    });
    let sink = CollectingSink::new();
    let pipeline = builder(&transport, &sink).build().expect("pipeline");
    let handle = pipeline.handle();
    for name in ["a", "b", "c"] {
        handle.info(name).expect("enqueue");
    }
    assert!(pipeline.flush(WAIT));
    let stats = pipeline.shutdown();

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(messages(&sent[1].records()), ["b"]);
    assert_eq!(sent[0].sequence, sent[1].sequence);
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.dropped(DropReason::Rejected), 1);
}

#[test]
fn fully_retried_partial_failure_is_not_a_sent_batch() {
    let transport = ScriptedTransport::new().then(DeliveryResult::RetryableFailure {
        reason: "bulk item status 429".into(),
        retry_items: Some(ItemFailures {
            retry: vec![0, 1],
            rejected: 0,
        }),
    });
    let sink = CollectingSink::new();
    let pipeline = builder(&transport, &sink).build().expect("pipeline");
    let handle = pipeline.handle();
    for name in ["a", "b"] {
        handle.info(name).expect("enqueue");
    }
    assert!(pipeline.flush(WAIT));
    let stats = pipeline.shutdown();

    assert_eq!(transport.send_count(), 2);
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.batches_sent, 1);
}

#[test]
fn unbounded_timeouts_wait_instead_of_overflowing() {
    let transport = ScriptedTransport::new();
    let sink = CollectingSink::new();
    let pipeline = builder(&transport, &sink)
        .with_linger(Duration::MAX)
        .with_shutdown_grace(Duration::MAX)
        .build()
        .expect("pipeline");
    pipeline.handle().info("no deadline").expect("enqueue");
    assert!(pipeline.flush(Duration::MAX));
    assert!(pipeline.handle().info("during shutdown").is_ok());
    let stats = pipeline.shutdown();

    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.dropped(DropReason::Shutdown), 0);
}

#[test]
fn breaker_opens_probes_and_closes() {
    let cooldown = Duration::from_millis(150);
    let transport = ScriptedTransport::new()
        .then_repeat(DeliveryResult::retryable("connection refused"), 4);
    let sink = CollectingSink::new();
    let pipeline = builder(&transport, &sink)
        .with_retry_policy(fast_retry(10))
        .with_breaker_policy(BreakerPolicy {
            failure_threshold: 3,
            cooldown,
            max_cooldown: Duration::from_secs(1),
        })
        .build()
        .expect("pipeline");
    pipeline.handle().error("backend down").expect("enqueue");
    assert!(pipeline.flush(WAIT));
    let stats = pipeline.shutdown();

    let sent = transport.sent();
    assert_eq!(sent.len(), 5);
    assert!(sent[3].at - sent[2].at >= cooldown);
    assert!(sent[4].at - sent[3].at >= cooldown * 2);
    assert_eq!(
        sink.transitions(),
        [
            (BreakerStatus::Closed, BreakerStatus::Open),
            (BreakerStatus::Open, BreakerStatus::HalfOpen),
            (BreakerStatus::HalfOpen, BreakerStatus::Open),
            (BreakerStatus::Open, BreakerStatus::HalfOpen),
            (BreakerStatus::HalfOpen, BreakerStatus::Closed),
        ]
    );
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.breaker, BreakerStatus::Closed);
}

#[test]
fn shutdown_is_bounded_by_grace_when_backend_is_down() {
    let transport = ScriptedTransport::always(DeliveryResult::retryable("timeout"));
    let sink = CollectingSink::new();
    let pipeline = builder(&transport, &sink)
        .with_breaker_policy(BreakerPolicy {
            failure_threshold: 1,
            cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(30),
        })
        .with_shutdown_grace(Duration::from_millis(100))
        .build()
        .expect("pipeline");
    let handle = pipeline.handle();
    for i in 0..5 {
        handle.info(format!("event {i}")).expect("enqueue");
    }
    assert!(transport.wait_for_sends(1, WAIT));

    let started = Instant::now();
    let stats = pipeline.shutdown();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(stats.dropped(DropReason::Shutdown), 5);
    assert_eq!(stats.delivered, 0);
}

#[test]
fn flush_does_not_wait_for_linger() {
    let transport = ScriptedTransport::new();
    let sink = CollectingSink::new();
    let pipeline = builder(&transport, &sink)
        .with_linger(Duration::from_secs(30))
        .build()
        .expect("pipeline");
    pipeline.handle().info("now").expect("enqueue");
    let started = Instant::now();
    assert!(pipeline.flush(WAIT));
    assert!(started.elapsed() < WAIT);
    assert_eq!(pipeline.stats().delivered, 1);
}

#[rstest]
#[case::closed_handle(true)]
#[case::open_handle(false)]
fn enqueue_after_shutdown_is_rejected(#[case] shut_down: bool) {
    let transport = ScriptedTransport::new();
    let sink = CollectingSink::new();
    let pipeline = builder(&transport, &sink).build().expect("pipeline");
    let handle = pipeline.handle();
    if shut_down {
        pipeline.shutdown();
        assert!(handle.is_closed());
        assert_eq!(handle.info("late"), Err(EnqueueError::Closed));
        assert_eq!(handle.stats().dropped(DropReason::Closed), 1);
    } else {
        assert!(handle.info("on time").is_ok());
        assert!(pipeline.flush(WAIT));
    }
}

#[test]
fn processor_faults_do_not_reach_the_producer() {
    let transport = ScriptedTransport::new();
    let sink = CollectingSink::new();
    let pipeline = builder(&transport, &sink)
        .with_processor(FnProcessor::new("explodes", |_: &LogRecord| -> Result<Verdict, ProcessorFault> { panic!("boom") }))
        .build()
        .expect("pipeline");
    assert!(pipeline.handle().info("survives").expect("enqueue").is_queued());
    assert!(pipeline.flush(WAIT));
    let stats = pipeline.shutdown();
    assert_eq!(stats.processor_faults, 1);
    assert_eq!(messages(&transport.delivered_records()), ["survives"]);
}
