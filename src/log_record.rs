//! Log record representation shipped by the pipeline.
//!
//! A [`LogRecord`] captures one log event together with its structured
//! fields and the identity of the process that produced it. Records are
//! immutable: the `with_*` methods consume the record and return a new value,
//! which is how processors derive enriched copies.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::level::Level;
use crate::value::{FieldValue, Fields};

/// Identity of the code and process that produced a record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Source {
    /// Logger (channel) name, e.g. `app`.
    pub logger: String,
    /// Service name, usually stamped by configuration.
    pub service: Option<String>,
    /// Host name, usually stamped by configuration.
    pub host: Option<String>,
    /// Operating system process id.
    pub pid: u32,
    /// Name of the producing thread, if it has one.
    pub thread: Option<String>,
}

impl Source {
    /// Capture pid and thread name from the current execution context.
    pub fn capture(logger: &str) -> Self {
        Self {
            logger: logger.to_owned(),
            service: None,
            host: None,
            pid: std::process::id(),
            thread: thread::current().name().map(ToString::to_string),
        }
    }
}

/// Parts used to rebuild a record that was not created at a call site, such
/// as one decoded from a bulk payload.
#[derive(Clone, Debug)]
pub struct RecordParts {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub message: String,
    pub fields: Fields,
    pub source: Source,
}

#[derive(Clone, Debug)]
pub struct LogRecord {
    timestamp: DateTime<Utc>,
    monotonic: Instant,
    level: Level,
    message: String,
    fields: Fields,
    source: Source,
}

impl LogRecord {
    /// Create a record at the call site for logger `logger`.
    pub fn new(logger: &str, level: Level, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            monotonic: Instant::now(),
            level,
            message: message.into(),
            fields: Fields::new(),
            source: Source::capture(logger),
        }
    }

    pub fn from_parts(parts: RecordParts) -> Self {
        Self {
            timestamp: parts.timestamp,
            monotonic: Instant::now(),
            level: parts.level,
            message: parts.message,
            fields: parts.fields,
            source: parts.source,
        }
    }

    pub fn into_parts(self) -> RecordParts {
        RecordParts {
            timestamp: self.timestamp,
            level: self.level,
            message: self.message,
            fields: self.fields,
            source: self.source,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Monotonic creation instant. Process-local, never serialized.
    pub fn monotonic(&self) -> Instant {
        self.monotonic
    }

    /// Time elapsed since the record was created.
    pub fn age(&self) -> Duration {
        self.monotonic.elapsed()
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn logger(&self) -> &str {
        &self.source.logger
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_fields<K, V, I>(mut self, fields: I) -> Self
    where
        K: Into<String>,
        V: Into<FieldValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.fields
            .extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn without_field(mut self, key: &str) -> Self {
        self.fields.remove(key);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Replace the whole field map, keeping everything else.
    pub fn with_field_map(mut self, fields: Fields) -> Self {
        self.fields = fields;
        self
    }
}

/// Identity ignores the monotonic instant, which has no meaning outside the
/// producing process.
impl PartialEq for LogRecord {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp
            && self.level == other.level
            && self.message == other.message
            && self.fields == other.fields
            && self.source == other.source
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.source.logger, self.level, self.message)
    }
}
