//! Running pipeline and its producer-facing handle.
//!
//! Producers call [`PipelineHandle::enqueue`] (or the level shortcuts) from
//! any thread. The processor chain runs on the caller's thread, the record
//! enters the ring buffer under the configured overflow policy, and a single
//! sender thread turns queued records into bulk requests. Enqueue never
//! performs network I/O and never reports a transport fault.

mod worker;

use std::cell::Cell;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, bounded};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::batcher::Batcher;
use crate::config::{ConfigError, PipelineBuilder, PipelineConfig, SourceConfig};
use crate::deadline;
use crate::diagnostics::{DiagnosticSink, Diagnostics};
use crate::level::Level;
use crate::log_record::{LogRecord, Source};
use crate::processor::ProcessorChain;
use crate::ring_buffer::{Admission, EnqueueError, RingBuffer};
use crate::state::{DropReason, PipelineState, PipelineStats};
use crate::transport::{Backoff, CircuitBreaker, Transport};
use crate::value::Fields;

use worker::Worker;

thread_local! {
    static SENDER_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is a pipeline's sender thread.
///
/// The transport logs through the same facades the bridges listen on, so
/// records raised here must not be shipped again.
pub(crate) fn on_sender_thread() -> bool {
    SENDER_THREAD.with(Cell::get)
}

pub(crate) fn mark_sender_thread() {
    SENDER_THREAD.with(|flag| flag.set(true));
}

/// Outcome of a successful [`PipelineHandle::enqueue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    /// The record is queued for delivery.
    Queued(Admission),
    /// A processor dropped the record. Nothing was queued.
    Filtered,
}

impl Submission {
    pub fn is_queued(self) -> bool {
        matches!(self, Self::Queued(_))
    }
}

struct Shared {
    chain: ProcessorChain,
    buffer: Arc<RingBuffer>,
    diagnostics: Diagnostics,
    source: SourceConfig,
}

/// Cloneable producer handle. Cheap to clone and safe to share.
#[derive(Clone)]
pub struct PipelineHandle {
    shared: Arc<Shared>,
}

impl PipelineHandle {
    /// Run the processor chain over `record` and queue the result.
    ///
    /// Records without a service or host get the configured ones. Errors
    /// only describe buffer admission; they are also counted as drops.
    pub fn enqueue(&self, record: LogRecord) -> Result<Submission, EnqueueError> {
        let shared = &*self.shared;
        let record = stamp(record, &shared.source);
        let Some(record) = shared.chain.apply(record, &shared.diagnostics) else {
            return Ok(Submission::Filtered);
        };
        match shared.buffer.enqueue(record) {
            Ok(admission) => {
                if admission == Admission::AcceptedEvictingOldest {
                    shared.diagnostics.dropped(DropReason::Evicted, 1);
                }
                Ok(Submission::Queued(admission))
            }
            Err(err) => {
                shared.diagnostics.dropped(err.drop_reason(), 1);
                Err(err)
            }
        }
    }

    /// Fresh record from the configured logger, ready for `with_field` calls.
    pub fn record(&self, level: Level, message: impl Into<String>) -> LogRecord {
        LogRecord::new(&self.shared.source.logger, level, message)
    }

    pub fn log(
        &self,
        level: Level,
        message: impl Into<String>,
        fields: Fields,
    ) -> Result<Submission, EnqueueError> {
        self.enqueue(self.record(level, message).with_field_map(fields))
    }

    pub fn trace(&self, message: impl Into<String>) -> Result<Submission, EnqueueError> {
        self.enqueue(self.record(Level::Trace, message))
    }

    pub fn debug(&self, message: impl Into<String>) -> Result<Submission, EnqueueError> {
        self.enqueue(self.record(Level::Debug, message))
    }

    pub fn info(&self, message: impl Into<String>) -> Result<Submission, EnqueueError> {
        self.enqueue(self.record(Level::Info, message))
    }

    pub fn warn(&self, message: impl Into<String>) -> Result<Submission, EnqueueError> {
        self.enqueue(self.record(Level::Warn, message))
    }

    pub fn error(&self, message: impl Into<String>) -> Result<Submission, EnqueueError> {
        self.enqueue(self.record(Level::Error, message))
    }

    pub fn fatal(&self, message: impl Into<String>) -> Result<Submission, EnqueueError> {
        self.enqueue(self.record(Level::Fatal, message))
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.diagnostics.state().snapshot()
    }

    pub fn state(&self) -> &Arc<PipelineState> {
        self.shared.diagnostics.state()
    }

    /// Wait until everything accepted before this call is delivered or
    /// dropped. Returns `false` if `timeout` elapsed first.
    ///
    /// A timeout too large to represent as a deadline, such as
    /// `Duration::MAX`, waits without limit.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = deadline::after(Instant::now(), timeout);
        let state = self.shared.diagnostics.state();
        let target = state.request_flush();
        self.shared.buffer.wake();
        state.wait_settled(target, deadline)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.buffer.is_closed()
    }
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("buffer", &self.shared.buffer)
            .field("processors", &self.shared.chain)
            .finish()
    }
}

fn stamp(record: LogRecord, source: &SourceConfig) -> LogRecord {
    let current = record.source();
    let needs_service = current.service.is_none() && source.service.is_some();
    let needs_host = current.host.is_none() && source.host.is_some();
    if !needs_service && !needs_host {
        return record;
    }
    let stamped = Source {
        service: current.service.clone().or_else(|| source.service.clone()),
        host: current.host.clone().or_else(|| source.host.clone()),
        ..current.clone()
    };
    record.with_source(stamped)
}

/// Owner of the sender thread.
///
/// Dropping the pipeline performs the same bounded shutdown as
/// [`Pipeline::shutdown`].
pub struct Pipeline {
    handle: PipelineHandle,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    sender: Mutex<Option<JoinHandle<()>>>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Start a pipeline shipping over HTTPS as described by `config`.
    pub fn start(config: PipelineConfig) -> Result<Self, ConfigError> {
        PipelineBuilder::from_config(config).build()
    }

    pub(crate) fn launch(
        config: PipelineConfig,
        chain: ProcessorChain,
        transport: Box<dyn Transport>,
        sinks: Vec<Arc<dyn DiagnosticSink>>,
    ) -> Result<Self, ConfigError> {
        let state = Arc::new(PipelineState::new());
        let diagnostics = Diagnostics::new(Arc::clone(&state), sinks);
        let buffer = Arc::new(RingBuffer::new(
            config.buffer.capacity,
            config.buffer.overflow,
            Arc::clone(&state),
        ));
        let formatter = config.formatter();
        let (shutdown_tx, shutdown_rx) = bounded(1);

        let worker = Worker {
            batcher: Batcher::new(
                config.batch,
                formatter.clone(),
                Arc::clone(&buffer),
                diagnostics.clone(),
            ),
            formatter,
            transport,
            breaker: CircuitBreaker::new(config.breaker),
            backoff: Backoff::new(config.retry),
            diagnostics: diagnostics.clone(),
            buffer: Arc::clone(&buffer),
            shutdown_rx,
            grace: config.shutdown_grace,
            draining: false,
            grace_deadline: None,
        };
        let sender = thread::Builder::new()
            .name("logship-sender".into())
            .spawn(move || {
                mark_sender_thread();
                worker.run();
            })
            .map_err(ConfigError::Spawn)?;

        debug!(
            "logship pipeline started (capacity {}, policy {}, index '{}')",
            config.buffer.capacity,
            config.buffer.overflow,
            config.index.name
        );
        Ok(Self {
            handle: PipelineHandle {
                shared: Arc::new(Shared {
                    chain,
                    buffer,
                    diagnostics,
                    source: config.source,
                }),
            },
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            sender: Mutex::new(Some(sender)),
        })
    }

    /// Producer handle sharing this pipeline.
    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    pub fn stats(&self) -> PipelineStats {
        self.handle.stats()
    }

    pub fn flush(&self, timeout: Duration) -> bool {
        self.handle.flush(timeout)
    }

    /// Stop accepting records, deliver what is queued within the shutdown
    /// grace period, drop the rest, and return the final counters.
    pub fn shutdown(self) -> PipelineStats {
        self.stop()
    }

    fn stop(&self) -> PipelineStats {
        let shared = &self.handle.shared;
        let Some(sender) = self.sender.lock().take() else {
            return shared.diagnostics.state().snapshot();
        };
        shared.buffer.close();
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.try_send(());
        }
        if sender.join().is_err() {
            warn!("logship sender thread panicked");
        }
        let leftover = shared.buffer.drain().len() as u64;
        shared.diagnostics.dropped(DropReason::Shutdown, leftover);
        let stats = shared.diagnostics.state().snapshot();
        debug!(
            "logship pipeline stopped: {} delivered, {} dropped",
            stats.delivered,
            stats.total_dropped()
        );
        stats
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("handle", &self.handle)
            .field("running", &self.sender.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests;
