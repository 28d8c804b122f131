//! Compatibility bridge for the Rust `log` crate.
//!
//! [`LogBridge`] implements `log::Log` and forwards records into a pipeline
//! through a [`PipelineHandle`]. Records whose target starts with `logship`,
//! and anything logged on a sender thread (including the HTTP client's own
//! output), are ignored so shipping never feeds back into the pipeline.

use std::borrow::Cow;
use std::time::Duration;

use log::{LevelFilter, Metadata, Record, SetLoggerError};

use crate::level::Level;
use crate::log_record::LogRecord;
use crate::pipeline::{self, PipelineHandle};

/// How long `log::logger().flush()` waits for queued records.
pub const BRIDGE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

const OWN_TARGET: &str = "logship";

impl From<log::Level> for Level {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace => Level::Trace,
            log::Level::Debug => Level::Debug,
            log::Level::Info => Level::Info,
            log::Level::Warn => Level::Warn,
            log::Level::Error => Level::Error,
        }
    }
}

/// Adapter implementing the Rust `log::Log` trait.
#[derive(Debug)]
pub struct LogBridge {
    handle: PipelineHandle,
    max_level: LevelFilter,
}

impl LogBridge {
    pub fn new(handle: PipelineHandle, max_level: LevelFilter) -> Self {
        Self { handle, max_level }
    }

    /// Install the bridge as the global `log` logger.
    ///
    /// Fails when another global logger is already set.
    pub fn install(self) -> Result<(), SetLoggerError> {
        let max_level = self.max_level;
        log::set_logger(Box::leak(Box::new(self)))?;
        log::set_max_level(max_level);
        Ok(())
    }

    fn accepts(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.max_level
            && !is_own_target(metadata.target())
            && !pipeline::on_sender_thread()
    }
}

fn is_own_target(target: &str) -> bool {
    target == OWN_TARGET
        || target
            .strip_prefix(OWN_TARGET)
            .is_some_and(|rest| rest.starts_with("::"))
}

fn normalise_target(target: &str) -> Cow<'_, str> {
    if target.contains("::") {
        Cow::Owned(target.replace("::", "."))
    } else {
        Cow::Borrowed(target)
    }
}

fn convert(record: &Record<'_>) -> LogRecord {
    let logger = normalise_target(record.target());
    let mut converted = LogRecord::new(&logger, record.level().into(), record.args().to_string());
    if let Some(module) = record.module_path() {
        converted = converted.with_field("module_path", module);
    }
    if let Some(file) = record.file() {
        converted = converted.with_field("file", file);
    }
    if let Some(line) = record.line() {
        converted = converted.with_field("line", line);
    }
    converted
}

impl log::Log for LogBridge {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.accepts(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if !self.accepts(record.metadata()) {
            return;
        }
        // Rejections are already counted as drops by the pipeline.
        let _ = self.handle.enqueue(convert(record));
    }

    fn flush(&self) {
        self.handle.flush(BRIDGE_FLUSH_TIMEOUT);
    }
}
