//! Ordered chain of pure record transformations.
//!
//! A [`Processor`] inspects a record and either keeps it, replaces it with an
//! enriched copy, or drops it. The [`ProcessorChain`] applies processors in
//! their configured order on the producer's thread, before the record enters
//! the ring buffer. Processors must be deterministic and must not block or
//! perform I/O.
//!
//! A processor that returns a [`ProcessorFault`] or panics is skipped for
//! that record only. The record continues down the chain unchanged and the
//! fault is reported through [`Diagnostics`]; the producer never sees it.

mod builtin;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;

use crate::diagnostics::Diagnostics;
use crate::log_record::LogRecord;

pub use builtin::{FnProcessor, LevelFilter, REDACTED, Redact, Sampler, StaticFields, enrich};

/// Outcome of running one processor over one record.
#[derive(Debug)]
pub enum Verdict {
    /// Pass the record on unchanged.
    Keep,
    /// Pass on this derived record instead.
    Replace(LogRecord),
    /// Discard the record; later processors do not run.
    Drop,
}

/// Internal processor failure. Never reaches the producer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ProcessorFault(pub String);

impl ProcessorFault {
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

/// Trait implemented by all record processors.
///
/// Processors are `Send + Sync` so one chain can be shared by every producer.
pub trait Processor: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    fn process(&self, record: &LogRecord) -> Result<Verdict, ProcessorFault>;
}

/// Explicitly composed, ordered list of processors.
#[derive(Clone, Default)]
pub struct ProcessorChain {
    processors: Vec<Arc<dyn Processor>>,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `processor` to the end of the chain.
    pub fn with(mut self, processor: impl Processor + 'static) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }

    pub fn push(&mut self, processor: Arc<dyn Processor>) {
        self.processors.push(processor);
    }

    /// Append every processor of `other`, keeping its order.
    pub fn extend(&mut self, other: ProcessorChain) {
        self.processors.extend(other.processors);
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    /// Run the chain. Returns `None` when a processor dropped the record.
    pub fn apply(&self, record: LogRecord, diagnostics: &Diagnostics) -> Option<LogRecord> {
        let mut current = record;
        for processor in &self.processors {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| processor.process(&current)));
            match outcome {
                Ok(Ok(Verdict::Keep)) => {}
                Ok(Ok(Verdict::Replace(next))) => current = next,
                Ok(Ok(Verdict::Drop)) => {
                    diagnostics.state().record_filtered();
                    return None;
                }
                Ok(Err(fault)) => diagnostics.processor_fault(processor.name(), fault.0),
                Err(payload) => {
                    diagnostics.processor_fault(processor.name(), panic_message(payload.as_ref()))
                }
            }
        }
        Some(current)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_owned()
    }
}

impl std::fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
