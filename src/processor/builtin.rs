//! Processors shipped with the crate.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::level::Level;
use crate::log_record::LogRecord;
use crate::value::{FieldValue, Fields};

use super::{Processor, ProcessorFault, Verdict};

/// Replacement text written over redacted values.
pub const REDACTED: &str = "[REDACTED]";

/// Adds a fixed set of fields to every record.
///
/// Keys already present on the record win unless [`overwrite`] is set.
///
/// [`overwrite`]: StaticFields::overwrite
#[derive(Clone, Debug, Default)]
pub struct StaticFields {
    fields: Fields,
    overwrite: bool,
}

impl StaticFields {
    pub fn new<K, V, I>(fields: I) -> Self
    where
        K: Into<String>,
        V: Into<FieldValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            overwrite: false,
        }
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

impl Processor for StaticFields {
    fn name(&self) -> &str {
        "static_fields"
    }

    fn process(&self, record: &LogRecord) -> Result<Verdict, ProcessorFault> {
        let missing = self
            .fields
            .keys()
            .any(|k| self.overwrite || !record.fields().contains_key(k));
        if !missing {
            return Ok(Verdict::Keep);
        }
        let mut fields = record.fields().clone();
        for (key, value) in &self.fields {
            if self.overwrite || !fields.contains_key(key) {
                fields.insert(key.clone(), value.clone());
            }
        }
        Ok(Verdict::Replace(record.clone().with_field_map(fields)))
    }
}

/// Replaces the values of sensitive keys, at any nesting depth.
#[derive(Clone, Debug)]
pub struct Redact {
    keys: Vec<String>,
}

impl Redact {
    /// Keys are matched case-insensitively.
    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keys: keys
                .into_iter()
                .map(|k| k.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    fn is_sensitive(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k.eq_ignore_ascii_case(key))
    }

    fn needs_redaction(&self, fields: &Fields) -> bool {
        fields.iter().any(|(k, v)| {
            (self.is_sensitive(k) && v.as_str() != Some(REDACTED)) || self.value_needs_redaction(v)
        })
    }

    fn value_needs_redaction(&self, value: &FieldValue) -> bool {
        match value {
            FieldValue::Map(map) => self.needs_redaction(map),
            FieldValue::List(items) => items.iter().any(|v| self.value_needs_redaction(v)),
            _ => false,
        }
    }

    fn redact_map(&self, fields: &Fields) -> Fields {
        fields
            .iter()
            .map(|(k, v)| {
                let value = if self.is_sensitive(k) {
                    FieldValue::from(REDACTED)
                } else {
                    self.redact_value(v)
                };
                (k.clone(), value)
            })
            .collect()
    }

    fn redact_value(&self, value: &FieldValue) -> FieldValue {
        match value {
            FieldValue::Map(map) => FieldValue::Map(self.redact_map(map)),
            FieldValue::List(items) => {
                FieldValue::List(items.iter().map(|v| self.redact_value(v)).collect())
            }
            other => other.clone(),
        }
    }
}

impl Processor for Redact {
    fn name(&self) -> &str {
        "redact"
    }

    fn process(&self, record: &LogRecord) -> Result<Verdict, ProcessorFault> {
        if !self.needs_redaction(record.fields()) {
            return Ok(Verdict::Keep);
        }
        let fields = self.redact_map(record.fields());
        Ok(Verdict::Replace(record.clone().with_field_map(fields)))
    }
}

/// Drops records below a minimum level.
#[derive(Clone, Copy, Debug)]
pub struct LevelFilter {
    min: Level,
}

impl LevelFilter {
    pub fn new(min: Level) -> Self {
        Self { min }
    }
}

impl Processor for LevelFilter {
    fn name(&self) -> &str {
        "level_filter"
    }

    fn process(&self, record: &LogRecord) -> Result<Verdict, ProcessorFault> {
        if record.level() < self.min {
            Ok(Verdict::Drop)
        } else {
            Ok(Verdict::Keep)
        }
    }
}

/// Keeps one in `every` records below `keep_from`.
///
/// The decision hashes the record's logger, message, and timestamp, so the
/// same record always gets the same verdict.
#[derive(Clone, Copy, Debug)]
pub struct Sampler {
    every: u64,
    keep_from: Level,
}

impl Sampler {
    /// `every` of zero or one keeps everything.
    pub fn one_in(every: u64) -> Self {
        Self {
            every: every.max(1),
            keep_from: Level::Warn,
        }
    }

    /// Records at or above `level` bypass sampling.
    pub fn keep_from(mut self, level: Level) -> Self {
        self.keep_from = level;
        self
    }

    fn bucket(record: &LogRecord) -> u64 {
        let mut hasher = DefaultHasher::new();
        record.logger().hash(&mut hasher);
        record.message().hash(&mut hasher);
        record.timestamp().timestamp_nanos_opt().hash(&mut hasher);
        hasher.finish()
    }
}

impl Processor for Sampler {
    fn name(&self) -> &str {
        "sampler"
    }

    fn process(&self, record: &LogRecord) -> Result<Verdict, ProcessorFault> {
        if self.every == 1 || record.level() >= self.keep_from {
            return Ok(Verdict::Keep);
        }
        if Self::bucket(record) % self.every == 0 {
            Ok(Verdict::Keep)
        } else {
            Ok(Verdict::Drop)
        }
    }
}

/// Wraps a closure as a named processor.
pub struct FnProcessor<F> {
    name: String,
    func: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(&LogRecord) -> Result<Verdict, ProcessorFault> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Processor for FnProcessor<F>
where
    F: Fn(&LogRecord) -> Result<Verdict, ProcessorFault> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, record: &LogRecord) -> Result<Verdict, ProcessorFault> {
        (self.func)(record)
    }
}

/// Processor that always derives a new record with `map`.
pub fn enrich<M>(
    name: impl Into<String>,
    map: M,
) -> FnProcessor<impl Fn(&LogRecord) -> Result<Verdict, ProcessorFault> + Send + Sync>
where
    M: Fn(LogRecord) -> LogRecord + Send + Sync,
{
    FnProcessor::new(name, move |record: &LogRecord| {
        Ok(Verdict::Replace(map(record.clone())))
    })
}
