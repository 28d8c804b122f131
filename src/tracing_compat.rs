//! Bridge from `tracing` events into a pipeline.
//!
//! [`PipelineLayer`] is a `tracing_subscriber` layer. Each event becomes a
//! [`LogRecord`]: the `message` field is the record message and every other
//! field keeps its native type where the visitor sees one. Events from
//! `logship` targets or from a sender thread are skipped.

use std::fmt;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

use crate::level::Level;
use crate::log_record::LogRecord;
use crate::pipeline::{self, PipelineHandle};
use crate::value::{FieldValue, Fields};

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Layer forwarding `tracing` events to a [`PipelineHandle`].
#[derive(Debug)]
pub struct PipelineLayer {
    handle: PipelineHandle,
}

impl PipelineLayer {
    pub fn new(handle: PipelineHandle) -> Self {
        Self { handle }
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Fields,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: FieldValue) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_owned(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let rendered = format!("{value:?}");
        self.insert(field, FieldValue::String(rendered));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, FieldValue::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, FieldValue::Int(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, FieldValue::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, FieldValue::Float(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, FieldValue::Bool(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, FieldValue::String(value.to_string()));
    }
}

impl<S> Layer<S> for PipelineLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let target = metadata.target();
        if target == "logship"
            || target.starts_with("logship::")
            || pipeline::on_sender_thread()
        {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let logger = target.replace("::", ".");
        let record = LogRecord::new(
            &logger,
            Level::from(*metadata.level()),
            visitor.message.unwrap_or_default(),
        )
        .with_field_map(visitor.fields);
        let _ = self.handle.enqueue(record);
    }
}
