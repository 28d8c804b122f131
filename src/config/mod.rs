//! Pipeline configuration.
//!
//! [`PipelineConfig`] is a plain value with sensible defaults. Build one
//! directly, through [`PipelineBuilder`], or from an INI file with
//! [`PipelineConfig::from_ini_file`]. [`PipelineConfig::validate`] runs before
//! a pipeline starts.

/// Validate that a value is greater than zero, returning an error otherwise.
macro_rules! ensure_positive {
    ($value:expr, $field:expr) => {{
        if $value == 0 {
            Err($crate::config::ConfigError::Invalid(format!(
                "{} must be greater than zero",
                $field
            )))
        } else {
            Ok($value)
        }
    }};
}

pub(crate) use ensure_positive;

mod builder;
mod ini;

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::batcher::BatchLimits;
use crate::formatter::BulkFormatter;
use crate::level::Level;
use crate::rate_limited_warner::DEFAULT_WARN_INTERVAL;
use crate::ring_buffer::OverflowPolicy;
use crate::transport::{BreakerPolicy, RetryPolicy};
use crate::value::Fields;

pub use builder::PipelineBuilder;

pub const DEFAULT_BULK_PATH: &str = "/_bulk";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CAPACITY: usize = 10_000;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_INDEX: &str = "logs";
pub const DEFAULT_LOGGER: &str = "app";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid pipeline configuration: {0}")]
    Invalid(String),
    #[error("[{section}] {key}: {message}")]
    InvalidValue {
        section: String,
        key: String,
        message: String,
    },
    #[error("unknown option [{section}] {key}")]
    UnknownKey { section: String, key: String },
    #[error("environment variable {0} is not set")]
    MissingEnv(String),
    #[error("failed to parse INI: {0}")]
    Ini(#[from] ::ini::ParseError),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("failed to spawn sender thread: {0}")]
    Spawn(io::Error),
}

/// Credential attached to every request.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Auth {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Bearer {
        token: String,
    },
    /// Elasticsearch API key, already base64 encoded.
    ApiKey {
        key: String,
    },
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Bearer { .. } => f.write_str("Bearer(<redacted>)"),
            Self::ApiKey { .. } => f.write_str("ApiKey(<redacted>)"),
        }
    }
}

/// Where and how batches are sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Base URL, e.g. `https://log.example.org/ingest`.
    pub url: String,
    /// Bulk path appended to `url`.
    pub path: String,
    /// `Host` header override for proxied routing.
    pub host_header: Option<String>,
    pub auth: Auth,
    pub headers: HashMap<String, String>,
    pub verify_tls: bool,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            path: DEFAULT_BULK_PATH.to_owned(),
            host_header: None,
            auth: Auth::None,
            headers: HashMap::new(),
            verify_tls: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl EndpointConfig {
    /// `url` joined with `path`.
    pub fn target_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        let path = self.path.trim_start_matches('/');
        if path.is_empty() {
            base.to_owned()
        } else {
            format!("{base}/{path}")
        }
    }
}

/// Bulk action metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexConfig {
    pub name: String,
    pub doc_type: Option<String>,
    pub id_field: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_INDEX.to_owned(),
            doc_type: None,
            id_field: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            overflow: OverflowPolicy::default(),
        }
    }
}

/// Identity stamped on records that do not carry their own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceConfig {
    /// Logger name used by [`PipelineHandle::info`](crate::PipelineHandle::info)
    /// and friends.
    pub logger: String,
    pub service: Option<String>,
    pub host: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            logger: DEFAULT_LOGGER.to_owned(),
            service: None,
            host: None,
        }
    }
}

/// Processors derived from configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProcessingConfig {
    /// Records below this level are filtered before anything else runs.
    pub min_level: Option<Level>,
    /// Added to every record without overwriting existing keys.
    pub static_fields: Fields,
    /// Keys redacted at any depth, after every other processor.
    pub redact: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub endpoint: EndpointConfig,
    pub index: IndexConfig,
    pub buffer: BufferConfig,
    pub batch: BatchLimits,
    pub retry: RetryPolicy,
    pub breaker: BreakerPolicy,
    pub processing: ProcessingConfig,
    pub source: SourceConfig,
    /// Upper bound on the final flush during shutdown. `Duration::MAX`
    /// waits until every queued record is delivered or dropped.
    pub shutdown_grace: Duration,
    /// Minimum gap between repeated drop warnings.
    pub warn_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            index: IndexConfig::default(),
            buffer: BufferConfig::default(),
            batch: BatchLimits::default(),
            retry: RetryPolicy::default(),
            breaker: BreakerPolicy::default(),
            processing: ProcessingConfig::default(),
            source: SourceConfig::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            warn_interval: DEFAULT_WARN_INTERVAL,
        }
    }
}

impl PipelineConfig {
    /// Check values that would make the pipeline misbehave.
    ///
    /// The endpoint URL is only checked when `needs_endpoint` is set, so a
    /// custom transport can run without one.
    pub fn validate(&self, needs_endpoint: bool) -> Result<(), ConfigError> {
        if needs_endpoint {
            validate_url(&self.endpoint.url)?;
        }
        if self.index.name.trim().is_empty() {
            return Err(ConfigError::Invalid("index name must not be empty".into()));
        }
        ensure_positive!(self.buffer.capacity, "buffer capacity")?;
        ensure_positive!(self.batch.max_records, "batch max_records")?;
        ensure_positive!(self.batch.max_bytes, "batch max_bytes")?;
        ensure_positive!(self.breaker.failure_threshold, "breaker failure_threshold")?;
        ensure_nonzero_duration(self.endpoint.connect_timeout, "connect timeout")?;
        ensure_nonzero_duration(self.endpoint.request_timeout, "request timeout")?;
        ensure_nonzero_duration(self.breaker.cooldown, "breaker cooldown")?;
        if self.breaker.max_cooldown < self.breaker.cooldown {
            return Err(ConfigError::Invalid(
                "breaker max_cooldown must not be shorter than cooldown".into(),
            ));
        }
        if self.retry.cap < self.retry.base {
            return Err(ConfigError::Invalid(
                "retry cap must not be shorter than base".into(),
            ));
        }
        Ok(())
    }

    /// Formatter described by the `index` section.
    pub fn formatter(&self) -> BulkFormatter {
        let mut formatter = BulkFormatter::new(self.index.name.clone());
        if let Some(doc_type) = &self.index.doc_type {
            formatter = formatter.doc_type(doc_type.clone());
        }
        if let Some(id_field) = &self.index.id_field {
            formatter = formatter.id_field(id_field.clone());
        }
        formatter
    }
}

fn validate_url(url: &str) -> Result<(), ConfigError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ConfigError::Invalid("endpoint URL must not be empty".into()));
    }
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(ConfigError::Invalid(format!(
            "endpoint URL must start with http:// or https://, got '{url}'"
        )));
    }
    Ok(())
}

fn ensure_nonzero_duration(value: Duration, field: &str) -> Result<Duration, ConfigError> {
    if value.is_zero() {
        Err(ConfigError::Invalid(format!(
            "{field} must be greater than zero"
        )))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn valid() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.endpoint.url = "https://log.example.org/ingest".into();
        config
    }

    #[rstest]
    #[case("https://log.example.org/ingest", "/_bulk", "https://log.example.org/ingest/_bulk")]
    #[case("https://log.example.org/ingest/", "_bulk", "https://log.example.org/ingest/_bulk")]
    #[case("http://localhost:9200", "", "http://localhost:9200")]
    fn target_url_joins_base_and_path(
        #[case] url: &str,
        #[case] path: &str,
        #[case] expected: &str,
    ) {
        let endpoint = EndpointConfig {
            url: url.into(),
            path: path.into(),
            ..EndpointConfig::default()
        };
        assert_eq!(endpoint.target_url(), expected);
    }

    #[test]
    fn defaults_validate_once_url_is_set() {
        assert!(valid().validate(true).is_ok());
        assert!(PipelineConfig::default().validate(false).is_ok());
    }

    #[rstest]
    #[case::missing_url(|c: &mut PipelineConfig| c.endpoint.url.clear(), "must not be empty")]
    #[case::bad_scheme(|c: &mut PipelineConfig| c.endpoint.url = "ftp://x".into(), "http://")]
    #[case::zero_capacity(|c: &mut PipelineConfig| c.buffer.capacity = 0, "buffer capacity")]
    #[case::zero_batch(|c: &mut PipelineConfig| c.batch.max_records = 0, "max_records")]
    #[case::zero_cooldown(|c: &mut PipelineConfig| c.breaker.cooldown = Duration::ZERO, "cooldown")]
    #[case::inverted_retry(
        |c: &mut PipelineConfig| c.retry.cap = Duration::from_millis(1),
        "retry cap"
    )]
    fn rejects_invalid_values(#[case] mutate: fn(&mut PipelineConfig), #[case] needle: &str) {
        let mut config = valid();
        mutate(&mut config);
        let err = config.validate(true).expect_err("invalid");
        assert!(err.to_string().contains(needle), "{err}");
    }

    #[test]
    fn auth_debug_redacts_secrets() {
        let auth = Auth::Basic {
            username: "elastic".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{auth:?}");
        assert!(rendered.contains("elastic"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn formatter_reflects_index_section() {
        let mut config = valid();
        config.index = IndexConfig {
            name: "nginx-realaffiliate".into(),
            doc_type: Some("_doc".into()),
            id_field: None,
        };
        let expected = BulkFormatter::new("nginx-realaffiliate").doc_type("_doc");
        assert_eq!(config.formatter(), expected);
    }
}
