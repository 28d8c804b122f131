//! Borrowed serde views over records for bulk encoding.

use std::borrow::Cow;

use chrono::SecondsFormat;
use serde::Serialize;
use serde::ser::{SerializeMap, SerializeSeq, Serializer};

use crate::log_record::LogRecord;
use crate::value::{FieldValue, Fields};

use super::BulkFormatter;

pub(super) fn format_timestamp(record: &LogRecord) -> String {
    record
        .timestamp()
        .to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Paths of every field value that will be coerced to a string.
pub(super) fn fallback_paths(record: &LogRecord) -> Vec<String> {
    let mut paths = Vec::new();
    if record
        .fields()
        .values()
        .all(FieldValue::is_faithfully_encodable)
    {
        return paths;
    }
    collect_map("fields", record.fields(), &mut paths);
    paths
}

fn collect_map(prefix: &str, map: &Fields, paths: &mut Vec<String>) {
    for (key, value) in map {
        collect_value(format!("{prefix}.{key}"), value, paths);
    }
}

fn collect_value(path: String, value: &FieldValue, paths: &mut Vec<String>) {
    match value {
        FieldValue::Float(f) if !f.is_finite() => paths.push(path),
        FieldValue::Bytes(_) => paths.push(path),
        FieldValue::List(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_value(format!("{path}[{i}]"), item, paths);
            }
        }
        FieldValue::Map(map) => collect_map(&path, map, paths),
        _ => {}
    }
}

#[derive(Serialize)]
pub(super) struct ActionLine<'a> {
    index: ActionMeta<'a>,
}

#[derive(Serialize)]
struct ActionMeta<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_type", skip_serializing_if = "Option::is_none")]
    doc_type: Option<&'a str>,
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<Cow<'a, str>>,
}

impl<'a> ActionLine<'a> {
    pub(super) fn new(formatter: &'a BulkFormatter, record: &'a LogRecord) -> Self {
        let id = formatter
            .id_field
            .as_deref()
            .and_then(|field| record.field(field))
            .and_then(|value| match value {
                FieldValue::String(s) => Some(Cow::Borrowed(s.as_str())),
                FieldValue::Int(i) => Some(Cow::Owned(i.to_string())),
                _ => None,
            });
        Self {
            index: ActionMeta {
                index: &formatter.index,
                doc_type: formatter.doc_type.as_deref(),
                id,
            },
        }
    }
}

/// Document line for one record.
pub(super) struct DocumentRef<'a> {
    record: &'a LogRecord,
    fallbacks: &'a [String],
}

impl<'a> DocumentRef<'a> {
    pub(super) fn new(record: &'a LogRecord, fallbacks: &'a [String]) -> Self {
        Self { record, fallbacks }
    }
}

impl Serialize for DocumentRef<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let source = self.record.source();
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("@timestamp", &format_timestamp(self.record))?;
        map.serialize_entry("message", self.record.message())?;
        map.serialize_entry("level", self.record.level().as_str())?;
        map.serialize_entry("logger", &source.logger)?;
        if let Some(service) = &source.service {
            map.serialize_entry("service", service)?;
        }
        if let Some(host) = &source.host {
            map.serialize_entry("host", host)?;
        }
        map.serialize_entry("pid", &source.pid)?;
        if let Some(thread) = &source.thread {
            map.serialize_entry("thread", thread)?;
        }
        map.serialize_entry("fields", &FieldsRef(self.record.fields()))?;
        if !self.fallbacks.is_empty() {
            map.serialize_entry("serialization_fallback", self.fallbacks)?;
        }
        map.end()
    }
}

struct FieldsRef<'a>(&'a Fields);

impl Serialize for FieldsRef<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in self.0 {
            map.serialize_entry(key, &ValueRef(value))?;
        }
        map.end()
    }
}

struct ValueRef<'a>(&'a FieldValue);

impl Serialize for ValueRef<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.0 {
            FieldValue::Null => serializer.serialize_unit(),
            FieldValue::Bool(b) => serializer.serialize_bool(*b),
            FieldValue::Int(i) => serializer.serialize_i64(*i),
            FieldValue::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            FieldValue::Float(f) => serializer.collect_str(f),
            FieldValue::String(s) => serializer.serialize_str(s),
            FieldValue::Bytes(b) => serializer.serialize_str(&String::from_utf8_lossy(b)),
            FieldValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&ValueRef(item))?;
                }
                seq.end()
            }
            FieldValue::Map(map) => FieldsRef(map).serialize(serializer),
        }
    }
}
