//! Elasticsearch bulk (NDJSON) encoding.
//!
//! Each record becomes an action line followed by a document line:
//!
//! ```text
//! {"index":{"_index":"app-logs","_type":"_doc"}}
//! {"@timestamp":"2024-05-01T12:00:00.000000000Z","message":"...","level":"INFO",...}
//! ```
//!
//! Encoding never fails. Values JSON cannot carry (non-finite floats, raw
//! bytes) are written as strings, their paths are listed under
//! `serialization_fallback`, and a diagnostic is raised.

mod document;
mod parse;

use std::io::{self, Write};

use crate::batcher::Batch;
use crate::diagnostics::Diagnostics;
use crate::log_record::LogRecord;

use document::{ActionLine, DocumentRef, fallback_paths};

pub use parse::{ParseError, parse};

/// Content type of a bulk request body.
pub const CONTENT_TYPE: &str = "application/x-ndjson";

/// Serialized bulk request body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payload {
    body: Vec<u8>,
    records: usize,
    sequence: u64,
}

impl Payload {
    pub fn new(body: Vec<u8>, records: usize, sequence: u64) -> Self {
        Self {
            body,
            records,
            sequence,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Number of bulk items in the body.
    pub fn record_count(&self) -> usize {
        self.records
    }

    /// Sequence number of the batch this payload encodes.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn content_type(&self) -> &'static str {
        CONTENT_TYPE
    }
}

/// Encodes batches as bulk `index` requests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BulkFormatter {
    index: String,
    doc_type: Option<String>,
    id_field: Option<String>,
}

impl BulkFormatter {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            doc_type: None,
            id_field: None,
        }
    }

    /// Emit `_type` in every action line, for pre-7.x clusters.
    pub fn doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    /// Take `_id` from this record field when it holds a string or integer.
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = Some(field.into());
        self
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// Encode `batch`. Coerced values are reported to `diagnostics`.
    pub fn serialize(&self, batch: &Batch, diagnostics: &Diagnostics) -> Payload {
        let mut body = Vec::with_capacity(batch.encoded_bytes());
        for record in batch.records() {
            let fallbacks = fallback_paths(record);
            for path in &fallbacks {
                diagnostics.serialization_fallback(path.as_str());
            }
            let mark = body.len();
            if self.write_entry(&mut body, record, &fallbacks).is_err() {
                body.truncate(mark);
                self.write_minimal_entry(&mut body, record);
                diagnostics.serialization_fallback("document");
            }
        }
        Payload::new(body, batch.len(), batch.sequence())
    }

    /// Exact number of bytes [`serialize`](Self::serialize) writes for
    /// `record`, computed without buffering the output.
    pub fn encoded_len(&self, record: &LogRecord) -> usize {
        let mut counter = ByteCounter(0);
        let fallbacks = fallback_paths(record);
        if self.write_entry(&mut counter, record, &fallbacks).is_err() {
            let mut body = Vec::new();
            self.write_minimal_entry(&mut body, record);
            return body.len();
        }
        counter.0
    }

    fn write_entry<W: Write>(
        &self,
        out: &mut W,
        record: &LogRecord,
        fallbacks: &[String],
    ) -> serde_json::Result<()> {
        let action = ActionLine::new(self, record);
        serde_json::to_writer(&mut *out, &action)?;
        out.write_all(b"\n").map_err(serde_json::Error::io)?;
        serde_json::to_writer(&mut *out, &DocumentRef::new(record, fallbacks))?;
        out.write_all(b"\n").map_err(serde_json::Error::io)
    }

    fn write_minimal_entry(&self, out: &mut Vec<u8>, record: &LogRecord) {
        let action = serde_json::json!({ "index": { "_index": self.index } });
        let doc = serde_json::json!({
            "@timestamp": document::format_timestamp(record),
            "message": record.message(),
            "level": record.level().as_str(),
            "logger": record.logger(),
            "serialization_fallback": ["document"],
        });
        for line in [action, doc] {
            if serde_json::to_writer(&mut *out, &line).is_ok() {
                out.push(b'\n');
            }
        }
    }
}

struct ByteCounter(usize);

impl Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests;
