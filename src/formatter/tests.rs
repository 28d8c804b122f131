//! Unit tests for bulk encoding and decoding.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use crossbeam_channel::{Receiver, bounded};
use rstest::{fixture, rstest};
use serde_json::Value;

use super::*;
use crate::diagnostics::{ChannelSink, DiagnosticEvent, DiagnosticSink};
use crate::level::Level;
use crate::log_record::Source;
use crate::state::PipelineState;
use crate::value::FieldValue;

#[fixture]
fn diagnostics() -> (Diagnostics, Receiver<DiagnosticEvent>) {
    let (tx, rx) = bounded(16);
    let sink: Arc<dyn DiagnosticSink> = Arc::new(ChannelSink::new(tx));
    (
        Diagnostics::new(Arc::new(PipelineState::new()), vec![sink]),
        rx,
    )
}

fn sample() -> LogRecord {
    LogRecord::new("app", Level::Info, "Hello from the pipeline!")
        .with_timestamp(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0)
                .single()
                .expect("valid time"),
        )
        .with_source(Source {
            logger: "app".into(),
            service: Some("realaffiliate".into()),
            host: Some("web-1".into()),
            pid: 4242,
            thread: Some("main".into()),
        })
        .with_field("path", "/test")
        .with_field("user_id", 123)
        .with_field("project", FieldValue::map([("site", "realaffiliate.com")]))
}

fn lines(payload: &Payload) -> Vec<Value> {
    payload
        .body()
        .split(|b| *b == b'\n')
        .filter(|l| !l.is_empty())
        .map(|l| serde_json::from_slice(l).expect("json line"))
        .collect()
}

#[rstest]
fn writes_action_and_document_lines(diagnostics: (Diagnostics, Receiver<DiagnosticEvent>)) {
    let (diag, rx) = diagnostics;
    let formatter = BulkFormatter::new("nginx-realaffiliate").doc_type("_doc");
    let batch = Batch::new(3, vec![sample()], 0);
    let payload = formatter.serialize(&batch, &diag);

    assert_eq!(payload.record_count(), 1);
    assert_eq!(payload.sequence(), 3);
    assert_eq!(payload.content_type(), "application/x-ndjson");
    assert!(payload.body().ends_with(b"\n"));

    let lines = lines(&payload);
    assert_eq!(lines.len(), 2);
    assert_eq!(
        lines[0],
        serde_json::json!({"index": {"_index": "nginx-realaffiliate", "_type": "_doc"}})
    );
    let doc = &lines[1];
    assert_eq!(doc["@timestamp"], "2024-05-01T12:30:00.000000000Z");
    assert_eq!(doc["message"], "Hello from the pipeline!");
    assert_eq!(doc["level"], "INFO");
    assert_eq!(doc["service"], "realaffiliate");
    assert_eq!(doc["pid"], 4242);
    assert_eq!(doc["fields"]["user_id"], 123);
    assert_eq!(doc["fields"]["project"]["site"], "realaffiliate.com");
    assert!(doc.get("serialization_fallback").is_none());
    assert!(rx.try_recv().is_err());
}

#[rstest]
#[case(FieldValue::from("abc-1"), Some("abc-1"))]
#[case(FieldValue::from(42), Some("42"))]
#[case(FieldValue::from(true), None)]
fn id_field_populates_action(
    #[case] id: FieldValue,
    #[case] expected: Option<&str>,
    diagnostics: (Diagnostics, Receiver<DiagnosticEvent>),
) {
    let (diag, _rx) = diagnostics;
    let formatter = BulkFormatter::new("logs").id_field("request_id");
    let batch = Batch::new(0, vec![sample().with_field("request_id", id)], 0);
    let action = &lines(&formatter.serialize(&batch, &diag))[0];
    assert_eq!(action["index"]["_id"].as_str(), expected);
    assert!(action["index"].get("_type").is_none());
}

#[rstest]
fn unencodable_values_fall_back_to_strings(
    diagnostics: (Diagnostics, Receiver<DiagnosticEvent>),
) {
    let (diag, rx) = diagnostics;
    let record = sample()
        .with_field("ratio", f64::NAN)
        .with_field(
            "nested",
            FieldValue::List(vec![FieldValue::from(1), FieldValue::Bytes(vec![0xff, b'a'])]),
        );
    let payload = BulkFormatter::new("logs").serialize(&Batch::new(0, vec![record], 0), &diag);
    let doc = &lines(&payload)[1];
    assert_eq!(doc["fields"]["ratio"], "NaN");
    assert_eq!(doc["fields"]["nested"][1], "\u{fffd}a");
    assert_eq!(
        doc["serialization_fallback"],
        serde_json::json!(["fields.nested[1]", "fields.ratio"])
    );
    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events.len(), 2);
    assert_eq!(diag.state().snapshot().serialization_fallbacks, 2);
}

#[rstest]
fn encoded_len_matches_serialized_size(diagnostics: (Diagnostics, Receiver<DiagnosticEvent>)) {
    let (diag, _rx) = diagnostics;
    let formatter = BulkFormatter::new("logs").doc_type("_doc").id_field("path");
    let records = vec![
        sample(),
        sample().with_field("ratio", f64::INFINITY),
        LogRecord::new("other", Level::Error, "ünïcödé ✓"),
    ];
    let expected: usize = records.iter().map(|r| formatter.encoded_len(r)).sum();
    let payload = formatter.serialize(&Batch::new(0, records, expected), &diag);
    assert_eq!(payload.len(), expected);
}

#[rstest]
fn parse_round_trips_records(diagnostics: (Diagnostics, Receiver<DiagnosticEvent>)) {
    let (diag, _rx) = diagnostics;
    let records = vec![
        sample(),
        sample()
            .with_message("second")
            .with_field("ratio", 0.25)
            .with_field("tags", vec![FieldValue::from("a"), FieldValue::Null]),
    ];
    let payload =
        BulkFormatter::new("logs").serialize(&Batch::new(0, records.clone(), 0), &diag);
    assert_eq!(parse(payload.body()).expect("parse"), records);
}

#[rstest]
#[case(b"not json\n".as_slice(), "invalid JSON")]
#[case(b"{\"delete\":{}}\n{}\n".as_slice(), "expected an index or create action")]
#[case(b"{\"index\":{}}\n".as_slice(), "no document line")]
#[case(
    b"{\"index\":{}}\n{\"@timestamp\":\"yesterday\",\"level\":\"INFO\"}\n".as_slice(),
    "invalid @timestamp"
)]
#[case(
    b"{\"index\":{}}\n{\"@timestamp\":\"2024-05-01T00:00:00Z\",\"level\":\"LOUD\"}\n".as_slice(),
    "unknown log level"
)]
fn parse_reports_malformed_bodies(#[case] body: &[u8], #[case] expected: &str) {
    let err = parse(body).expect_err("malformed");
    assert!(
        err.to_string().contains(expected),
        "'{err}' should mention '{expected}'"
    );
}

#[test]
fn parse_skips_blank_lines() {
    let body = b"\n{\"create\":{\"_index\":\"x\"}}\n\n{\"@timestamp\":\"2024-05-01T00:00:00Z\",\"level\":\"warning\",\"message\":\"m\"}\n";
    let records = parse(body).expect("parse");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].level(), Level::Warn);
}
