//! Client-side log shipping to Elasticsearch-compatible bulk endpoints.
//!
//! Records flow through five stages:
//!
//! ```text
//! producers -> ProcessorChain -> RingBuffer -> Batcher -> BulkFormatter -> Transport
//!              (caller thread)   (bounded)     (sender thread ...................)
//! ```
//!
//! Producers never block on the network. Backpressure is applied at the ring
//! buffer according to its [`OverflowPolicy`], and a [`CircuitBreaker`]
//! stops the sender from hammering an unavailable backend. Internal faults
//! are reported through [`Diagnostics`] rather than to callers.
//!
//! ```no_run
//! use std::time::Duration;
//! use logship::{Level, Pipeline};
//!
//! let pipeline = Pipeline::builder()
//!     .with_url("https://log.example.org")
//!     .with_index("app-logs")
//!     .with_service("checkout")
//!     .build()?;
//! let log = pipeline.handle();
//! log.enqueue(log.record(Level::Info, "order placed").with_field("order_id", 1234))?;
//! pipeline.flush(Duration::from_secs(2));
//! let stats = pipeline.shutdown();
//! println!("delivered {}", stats.delivered);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod batcher;
pub mod config;
mod deadline;
pub mod diagnostics;
pub mod formatter;
mod level;
#[cfg(feature = "log-compat")]
pub mod log_compat;
mod log_record;
mod pipeline;
pub mod processor;
mod rate_limited_warner;
pub mod ring_buffer;
mod state;
#[cfg(any(test, feature = "test-util"))]
pub mod test_utils;
#[cfg(feature = "tracing-compat")]
pub mod tracing_compat;
pub mod transport;
mod value;

pub use batcher::{Batch, BatchLimits, Batcher};
pub use config::{
    Auth, ConfigError, EndpointConfig, PipelineBuilder, PipelineConfig, ProcessingConfig,
    SourceConfig,
};
pub use diagnostics::{ChannelSink, DiagnosticEvent, DiagnosticSink, Diagnostics, LogSink};
pub use formatter::{BulkFormatter, Payload};
pub use level::{Level, ParseLevelError};
#[cfg(feature = "log-compat")]
pub use log_compat::LogBridge;
pub use log_record::{LogRecord, RecordParts, Source};
pub use pipeline::{Pipeline, PipelineHandle, Submission};
pub use processor::{Processor, ProcessorChain, ProcessorFault, Verdict};
pub use rate_limited_warner::{DEFAULT_WARN_INTERVAL, RateLimitedWarner};
pub use ring_buffer::{Admission, EnqueueError, OverflowPolicy, RingBuffer};
pub use state::{BreakerStatus, DropReason, PipelineState, PipelineStats};
#[cfg(feature = "tracing-compat")]
pub use tracing_compat::PipelineLayer;
pub use transport::{
    BreakerPolicy, CircuitBreaker, DeliveryResult, HttpTransport, RetryPolicy, Transport,
};
pub use value::{FieldValue, Fields};
