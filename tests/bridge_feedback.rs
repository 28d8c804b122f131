//! A debug-level `log` bridge must not ship the HTTP client's own output.

mod test_utils;

use std::thread;
use std::time::{Duration, Instant};

use log::LevelFilter;
use logship::{LogBridge, OverflowPolicy, Pipeline};
use test_utils::{MockReply, spawn_bulk_server};

#[test]
fn transport_logging_does_not_feed_back() {
    let (addr, requests) = spawn_bulk_server(vec![MockReply::ok(); 20]);
    let pipeline = Pipeline::builder()
        .with_url(format!("http://{addr}"))
        .with_linger(Duration::from_millis(5))
        .with_capacity(4)
        .with_overflow_policy(OverflowPolicy::Block(Duration::from_secs(2)))
        .without_log_sink()
        .build()
        .expect("pipeline");
    LogBridge::new(pipeline.handle(), LevelFilter::Debug)
        .install()
        .expect("install bridge");

    log::info!(target: "checkout", "order placed");
    assert!(pipeline.flush(Duration::from_secs(10)));
    // Leave room for any echo of the first request to be shipped.
    thread::sleep(Duration::from_millis(500));
    let started = Instant::now();
    let stats = pipeline.shutdown();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.delivered, 1);
    assert_eq!(requests.try_iter().count(), 1);
}
