//! Decoding of bulk bodies back into records.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::level::{Level, ParseLevelError};
use crate::log_record::{LogRecord, RecordParts, Source};
use crate::value::{FieldValue, Fields};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line {line}: invalid JSON: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("line {line}: expected an index or create action")]
    NotAnAction { line: usize },
    #[error("line {line}: action has no document line")]
    MissingDocument { line: usize },
    #[error("line {line}: invalid @timestamp '{value}'")]
    Timestamp { line: usize, value: String },
    #[error("line {line}: {source}")]
    Level {
        line: usize,
        #[source]
        source: ParseLevelError,
    },
}

#[derive(Deserialize)]
struct Document {
    #[serde(rename = "@timestamp")]
    timestamp: String,
    #[serde(default)]
    message: String,
    level: String,
    #[serde(default)]
    logger: String,
    service: Option<String>,
    host: Option<String>,
    #[serde(default)]
    pid: u32,
    thread: Option<String>,
    #[serde(default)]
    fields: serde_json::Map<String, Value>,
}

/// Decode a bulk body produced by
/// [`BulkFormatter::serialize`](super::BulkFormatter::serialize).
///
/// Blank lines are skipped. Line numbers in errors are one-based.
pub fn parse(body: &[u8]) -> Result<Vec<LogRecord>, ParseError> {
    let mut lines = body
        .split(|b| *b == b'\n')
        .enumerate()
        .map(|(i, line)| (i + 1, line))
        .filter(|(_, line)| !line.iter().all(u8::is_ascii_whitespace));

    let mut records = Vec::new();
    while let Some((line, action)) = lines.next() {
        let action: Value =
            serde_json::from_slice(action).map_err(|source| ParseError::Json { line, source })?;
        let is_action = action.as_object().is_some_and(|o| {
            o.get("index")
                .or_else(|| o.get("create"))
                .is_some_and(Value::is_object)
        });
        if !is_action {
            return Err(ParseError::NotAnAction { line });
        }

        let (line, doc) = lines.next().ok_or(ParseError::MissingDocument { line })?;
        let doc: Document =
            serde_json::from_slice(doc).map_err(|source| ParseError::Json { line, source })?;
        records.push(into_record(line, doc)?);
    }
    Ok(records)
}

fn into_record(line: usize, doc: Document) -> Result<LogRecord, ParseError> {
    let timestamp = DateTime::parse_from_rfc3339(&doc.timestamp)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ParseError::Timestamp {
            line,
            value: doc.timestamp.clone(),
        })?;
    let level: Level = doc
        .level
        .parse()
        .map_err(|source| ParseError::Level { line, source })?;
    let fields: Fields = doc
        .fields
        .into_iter()
        .map(|(k, v)| (k, from_json(v)))
        .collect();

    Ok(LogRecord::from_parts(RecordParts {
        timestamp,
        level,
        message: doc.message,
        fields,
        source: Source {
            logger: doc.logger,
            service: doc.service,
            host: doc.host,
            pid: doc.pid,
            thread: doc.thread,
        },
    }))
}

fn from_json(value: Value) -> FieldValue {
    match value {
        Value::Null => FieldValue::Null,
        Value::Bool(b) => FieldValue::Bool(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => FieldValue::Int(i),
            None => FieldValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => FieldValue::String(s),
        Value::Array(items) => FieldValue::List(items.into_iter().map(from_json).collect()),
        Value::Object(map) => {
            FieldValue::Map(map.into_iter().map(|(k, v)| (k, from_json(v))).collect())
        }
    }
}
