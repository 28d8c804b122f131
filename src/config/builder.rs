//! Fluent construction of a running [`Pipeline`].
//!
//! The builder starts from [`PipelineConfig::default`] (or a supplied config)
//! and layers programmatic overrides, processors, a transport, and extra
//! diagnostic sinks on top. [`PipelineBuilder::build`] validates the result
//! and starts the sender thread.

use std::sync::Arc;
use std::time::Duration;

use crate::batcher::BatchLimits;
use crate::diagnostics::{DiagnosticSink, LogSink};
use crate::level::Level;
use crate::pipeline::Pipeline;
use crate::processor::{LevelFilter, Processor, ProcessorChain, Redact, StaticFields};
use crate::ring_buffer::OverflowPolicy;
use crate::transport::{BreakerPolicy, HttpTransport, RetryPolicy, Transport};
use crate::value::FieldValue;

use super::{Auth, ConfigError, PipelineConfig};

macro_rules! option_setter {
    ($(#[$meta:meta])* $fn_name:ident, $($field:ident).+, $ty:ty) => {
        $(#[$meta])*
        pub fn $fn_name(mut self, value: $ty) -> Self {
            self.config.$($field).+ = value;
            self
        }
    };
}

/// Builder for [`Pipeline`] instances.
pub struct PipelineBuilder {
    config: PipelineConfig,
    processors: ProcessorChain,
    transport: Option<Box<dyn Transport>>,
    sinks: Vec<Arc<dyn DiagnosticSink>>,
    log_sink: bool,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::from_config(PipelineConfig::default())
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration, e.g. one read from INI.
    pub fn from_config(config: PipelineConfig) -> Self {
        Self {
            config,
            processors: ProcessorChain::new(),
            transport: None,
            sinks: Vec::new(),
            log_sink: true,
        }
    }

    /// Configuration as it stands.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Set the base URL of the bulk endpoint (required unless a custom
    /// transport is supplied).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint.url = url.into();
        self
    }

    /// Bulk path appended to the URL. Defaults to `/_bulk`.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.config.endpoint.path = path.into();
        self
    }

    pub fn with_host_header(mut self, host: impl Into<String>) -> Self {
        self.config.endpoint.host_header = Some(host.into());
        self
    }

    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.config.endpoint.auth = Auth::Basic {
            username: username.into(),
            password: password.into(),
        };
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.config.endpoint.auth = Auth::Bearer {
            token: token.into(),
        };
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.endpoint.auth = Auth::ApiKey { key: key.into() };
        self
    }

    /// Add a single custom HTTP header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .endpoint
            .headers
            .insert(key.into(), value.into());
        self
    }

    option_setter!(
        #[doc = "Disable to accept self-signed certificates."]
        with_verify_tls,
        endpoint.verify_tls,
        bool
    );
    option_setter!(with_connect_timeout, endpoint.connect_timeout, Duration);
    option_setter!(with_request_timeout, endpoint.request_timeout, Duration);

    pub fn with_index(mut self, name: impl Into<String>) -> Self {
        self.config.index.name = name.into();
        self
    }

    pub fn with_doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.config.index.doc_type = Some(doc_type.into());
        self
    }

    /// Use this record field as the bulk `_id`.
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.config.index.id_field = Some(field.into());
        self
    }

    option_setter!(
        #[doc = "Set the ring buffer capacity in records."]
        with_capacity,
        buffer.capacity,
        usize
    );
    option_setter!(with_overflow_policy, buffer.overflow, OverflowPolicy);
    option_setter!(with_batch_limits, batch, BatchLimits);
    option_setter!(with_max_batch_records, batch.max_records, usize);
    option_setter!(with_max_batch_bytes, batch.max_bytes, usize);
    option_setter!(
        #[doc = "Longest time a partial batch waits for more records."]
        with_linger,
        batch.linger,
        Duration
    );
    option_setter!(with_retry_policy, retry, RetryPolicy);
    option_setter!(with_breaker_policy, breaker, BreakerPolicy);
    option_setter!(with_shutdown_grace, shutdown_grace, Duration);
    option_setter!(with_warn_interval, warn_interval, Duration);

    pub fn with_logger_name(mut self, logger: impl Into<String>) -> Self {
        self.config.source.logger = logger.into();
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.config.source.service = Some(service.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.config.source.host = Some(host.into());
        self
    }

    /// Filter records below `level` before any other processor runs.
    pub fn with_min_level(mut self, level: Level) -> Self {
        self.config.processing.min_level = Some(level);
        self
    }

    /// Add a field to every record that does not already carry it.
    pub fn with_static_field(
        mut self,
        key: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> Self {
        self.config
            .processing
            .static_fields
            .insert(key.into(), value.into());
        self
    }

    /// Redact these keys at any depth once all other processors have run.
    pub fn with_redacted_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config
            .processing
            .redact
            .extend(keys.into_iter().map(Into::into));
        self
    }

    /// Append a processor. Processors run in the order they were added.
    pub fn with_processor(mut self, processor: impl Processor + 'static) -> Self {
        self.processors = self.processors.with(processor);
        self
    }

    /// Replace the HTTPS transport, e.g. with a test double.
    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    pub fn with_diagnostic_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Stop reporting diagnostics through the `log` facade.
    pub fn without_log_sink(mut self) -> Self {
        self.log_sink = false;
        self
    }

    /// Validate the configuration and start the pipeline.
    pub fn build(self) -> Result<Pipeline, ConfigError> {
        self.config.validate(self.transport.is_none())?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Box::new(HttpTransport::new(&self.config.endpoint)?),
        };
        let chain = configured_chain(&self.config, self.processors);
        let mut sinks = self.sinks;
        if self.log_sink {
            sinks.insert(0, Arc::new(LogSink::new(self.config.warn_interval)));
        }
        Pipeline::launch(self.config, chain, transport, sinks)
    }
}

/// Level filter first, user processors next, then static fields and
/// redaction so nothing added later escapes redaction.
fn configured_chain(config: &PipelineConfig, user: ProcessorChain) -> ProcessorChain {
    let processing = &config.processing;
    let mut chain = ProcessorChain::new();
    if let Some(level) = processing.min_level {
        chain = chain.with(LevelFilter::new(level));
    }
    chain.extend(user);
    if !processing.static_fields.is_empty() {
        chain = chain.with(StaticFields::new(processing.static_fields.clone()));
    }
    if !processing.redact.is_empty() {
        chain = chain.with(Redact::keys(processing.redact.iter().cloned()));
    }
    chain
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("config", &self.config)
            .field("processors", &self.processors)
            .field("custom_transport", &self.transport.is_some())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
