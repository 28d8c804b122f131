//! Internal fault reporting.
//!
//! The pipeline never surfaces transport or processor faults to producers.
//! Instead every fault becomes a [`DiagnosticEvent`], is counted in
//! [`PipelineState`], and is handed to a [`DiagnosticSink`]. The default
//! [`LogSink`] writes through the `log` facade and coalesces repeated drop
//! warnings with [`RateLimitedWarner`].

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use log::{debug, info, warn};

use crate::rate_limited_warner::RateLimitedWarner;
use crate::state::{BreakerStatus, DropReason, PipelineState};

/// Structured description of something that went wrong inside the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiagnosticEvent {
    /// Records left the pipeline undelivered.
    Dropped { reason: DropReason, count: u64 },
    /// A processor failed or panicked; it was skipped for one record.
    ProcessorFault { processor: String, detail: String },
    /// A field value was coerced to a string during serialization.
    SerializationFallback { path: String },
    /// The circuit breaker changed state.
    BreakerTransition {
        from: BreakerStatus,
        to: BreakerStatus,
    },
    /// The backend rejected a batch permanently.
    PermanentFailure { status: Option<u16>, detail: String },
    /// A retryable send attempt failed and will be retried.
    RetryScheduled { attempt: u32, delay: Duration, detail: String },
}

/// Destination for [`DiagnosticEvent`]s.
///
/// Implementations must not block: events are emitted from producer threads
/// and from the sender thread.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, event: &DiagnosticEvent);
}

/// Sink reporting through the `log` facade.
pub struct LogSink {
    drops: RateLimitedWarner,
    fallbacks: RateLimitedWarner,
}

impl LogSink {
    pub fn new(warn_interval: Duration) -> Self {
        Self {
            drops: RateLimitedWarner::new(warn_interval),
            fallbacks: RateLimitedWarner::new(warn_interval),
        }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(crate::rate_limited_warner::DEFAULT_WARN_INTERVAL)
    }
}

impl DiagnosticSink for LogSink {
    fn emit(&self, event: &DiagnosticEvent) {
        match event {
            DiagnosticEvent::Dropped { reason, count } => {
                self.drops.record_drops(*count);
                self.drops.warn_if_due(|total| {
                    warn!("logship dropped {total} records (latest reason: {reason})");
                });
            }
            DiagnosticEvent::ProcessorFault { processor, detail } => {
                warn!("logship processor '{processor}' failed and was skipped: {detail}");
            }
            DiagnosticEvent::SerializationFallback { path } => {
                self.fallbacks.record_drop();
                self.fallbacks.warn_if_due(|total| {
                    warn!("logship coerced {total} unencodable field values (latest: {path})");
                });
            }
            DiagnosticEvent::BreakerTransition { from, to } => match to {
                BreakerStatus::Open => warn!("logship circuit breaker {from} -> {to}"),
                _ => info!("logship circuit breaker {from} -> {to}"),
            },
            DiagnosticEvent::PermanentFailure { status, detail } => match status {
                Some(code) => warn!("logship backend rejected batch with status {code}: {detail}"),
                None => warn!("logship backend rejected batch: {detail}"),
            },
            DiagnosticEvent::RetryScheduled {
                attempt,
                delay,
                detail,
            } => {
                debug!("logship send attempt {attempt} failed ({detail}); retrying in {delay:?}");
            }
        }
    }
}

/// Sink forwarding events over a bounded channel, e.g. into a metrics
/// exporter. Events that do not fit are discarded.
pub struct ChannelSink {
    tx: Sender<DiagnosticEvent>,
}

impl ChannelSink {
    pub fn new(tx: Sender<DiagnosticEvent>) -> Self {
        Self { tx }
    }
}

impl DiagnosticSink for ChannelSink {
    fn emit(&self, event: &DiagnosticEvent) {
        let _ = self.tx.try_send(event.clone());
    }
}

/// Counts every event in [`PipelineState`] and forwards it to the sinks.
#[derive(Clone)]
pub struct Diagnostics {
    state: Arc<PipelineState>,
    sinks: Arc<[Arc<dyn DiagnosticSink>]>,
}

impl Diagnostics {
    pub fn new(state: Arc<PipelineState>, sinks: Vec<Arc<dyn DiagnosticSink>>) -> Self {
        Self {
            state,
            sinks: sinks.into(),
        }
    }

    pub fn state(&self) -> &Arc<PipelineState> {
        &self.state
    }

    fn emit(&self, event: DiagnosticEvent) {
        for sink in self.sinks.iter() {
            sink.emit(&event);
        }
    }

    pub fn dropped(&self, reason: DropReason, count: u64) {
        if count == 0 {
            return;
        }
        self.state.record_dropped(reason, count);
        self.emit(DiagnosticEvent::Dropped { reason, count });
    }

    pub fn processor_fault(&self, processor: &str, detail: impl Into<String>) {
        self.state.record_processor_fault();
        self.emit(DiagnosticEvent::ProcessorFault {
            processor: processor.to_owned(),
            detail: detail.into(),
        });
    }

    pub fn serialization_fallback(&self, path: impl Into<String>) {
        self.state.record_serialization_fallback();
        self.emit(DiagnosticEvent::SerializationFallback { path: path.into() });
    }

    pub fn breaker_transition(&self, from: BreakerStatus, to: BreakerStatus) {
        self.emit(DiagnosticEvent::BreakerTransition { from, to });
    }

    pub fn permanent_failure(&self, status: Option<u16>, detail: impl Into<String>) {
        self.emit(DiagnosticEvent::PermanentFailure {
            status,
            detail: detail.into(),
        });
    }

    pub fn retry_scheduled(&self, attempt: u32, delay: Duration, detail: impl Into<String>) {
        self.state.record_retry();
        self.emit(DiagnosticEvent::RetryScheduled {
            attempt,
            delay,
            detail: detail.into(),
        });
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
