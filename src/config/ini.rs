//! INI loader for [`PipelineConfig`].
//!
//! ```ini
//! [endpoint]
//! url = https://log.example.org/ingest
//! host_header = log.example.org
//! username = elastic
//! password_env = LOGSHIP_PASSWORD
//!
//! [index]
//! name = nginx-realaffiliate
//! doc_type = _doc
//!
//! [fields]
//! project.site = realaffiliate.com
//! ```
//!
//! Unknown sections and keys are rejected so typos do not silently fall back
//! to defaults.

use std::borrow::Cow;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;

use crate::level::Level;
use crate::ring_buffer::OverflowPolicy;
use crate::value::{FieldValue, Fields};

/// Sections whose keys are user data rather than option names.
const VERBATIM_SECTIONS: [&str; 2] = ["headers", "fields"];

use super::{Auth, ConfigError, PipelineConfig};

impl PipelineConfig {
    /// Load configuration from an INI file.
    pub fn from_ini_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ini_str(&text)
    }

    /// Load configuration from INI text, resolving `*_env` keys from the
    /// process environment.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        Self::from_ini_str_with_env(text, |name| std::env::var(name).ok())
    }

    /// Load configuration from INI text, resolving `*_env` keys with `env`.
    pub fn from_ini_str_with_env<E>(text: &str, env: E) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let ini = Ini::load_from_str(text)?;
        let mut loader = Loader {
            config: PipelineConfig::default(),
            auth: AuthParts::default(),
            env,
        };
        for (section, properties) in ini.iter() {
            let section = section.map(|s| s.trim().to_ascii_lowercase());
            let section = section.as_deref().unwrap_or("");
            for (key, value) in properties.iter() {
                let key = key.trim();
                let key = if VERBATIM_SECTIONS.contains(&section) {
                    Cow::Borrowed(key)
                } else {
                    Cow::Owned(key.to_ascii_lowercase())
                };
                let entry = Entry {
                    section,
                    key: &key,
                    value: value.trim(),
                };
                loader.apply(&entry)?;
            }
        }
        loader.finish()
    }
}

struct Entry<'a> {
    section: &'a str,
    key: &'a str,
    value: &'a str,
}

impl Entry<'_> {
    fn invalid(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::InvalidValue {
            section: self.section.to_owned(),
            key: self.key.to_owned(),
            message: message.into(),
        }
    }

    fn unknown(&self) -> ConfigError {
        ConfigError::UnknownKey {
            section: self.section.to_owned(),
            key: self.key.to_owned(),
        }
    }

    fn string(&self) -> String {
        self.value.to_owned()
    }

    fn optional(&self) -> Option<String> {
        (!self.value.is_empty()).then(|| self.value.to_owned())
    }

    fn parse<T: FromStr>(&self) -> Result<T, ConfigError> {
        self.value
            .parse()
            .map_err(|_| self.invalid(format!("'{}' is not a valid number", self.value)))
    }

    fn millis(&self) -> Result<Duration, ConfigError> {
        self.parse().map(Duration::from_millis)
    }

    fn boolean(&self) -> Result<bool, ConfigError> {
        match self.value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(self.invalid(format!("'{other}' is not a boolean"))),
        }
    }

    fn list(&self) -> Vec<String> {
        self.value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

#[derive(Default)]
struct AuthParts {
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
    api_key: Option<String>,
}

struct Loader<E> {
    config: PipelineConfig,
    auth: AuthParts,
    env: E,
}

impl<E> Loader<E>
where
    E: Fn(&str) -> Option<String>,
{
    fn apply(&mut self, entry: &Entry<'_>) -> Result<(), ConfigError> {
        match entry.section {
            "endpoint" => self.endpoint(entry),
            "headers" => {
                self.config
                    .endpoint
                    .headers
                    .insert(entry.key.to_owned(), entry.string());
                Ok(())
            }
            "index" => self.index(entry),
            "buffer" => self.buffer(entry),
            "batch" => self.batch(entry),
            "retry" => self.retry(entry),
            "breaker" => self.breaker(entry),
            "pipeline" => self.pipeline(entry),
            "source" => self.source(entry),
            "fields" => {
                insert_dotted(
                    &mut self.config.processing.static_fields,
                    entry.key,
                    entry.string(),
                );
                Ok(())
            }
            _ => Err(entry.unknown()),
        }
    }

    fn secret(&self, entry: &Entry<'_>) -> Result<String, ConfigError> {
        (self.env)(entry.value).ok_or_else(|| ConfigError::MissingEnv(entry.value.to_owned()))
    }

    fn endpoint(&mut self, entry: &Entry<'_>) -> Result<(), ConfigError> {
        match entry.key {
            "username" => self.auth.username = Some(entry.string()),
            "password" => self.auth.password = Some(entry.string()),
            "password_env" => self.auth.password = Some(self.secret(entry)?),
            "token" => self.auth.token = Some(entry.string()),
            "token_env" => self.auth.token = Some(self.secret(entry)?),
            "api_key" => self.auth.api_key = Some(entry.string()),
            "api_key_env" => self.auth.api_key = Some(self.secret(entry)?),
            _ => {
                let endpoint = &mut self.config.endpoint;
                match entry.key {
                    "url" => endpoint.url = entry.string(),
                    "path" => endpoint.path = entry.string(),
                    "host_header" => endpoint.host_header = entry.optional(),
                    "verify_tls" => endpoint.verify_tls = entry.boolean()?,
                    "connect_timeout_ms" => endpoint.connect_timeout = entry.millis()?,
                    "request_timeout_ms" => endpoint.request_timeout = entry.millis()?,
                    _ => return Err(entry.unknown()),
                }
            }
        }
        Ok(())
    }

    fn index(&mut self, entry: &Entry<'_>) -> Result<(), ConfigError> {
        let index = &mut self.config.index;
        match entry.key {
            "name" => index.name = entry.string(),
            "doc_type" => index.doc_type = entry.optional(),
            "id_field" => index.id_field = entry.optional(),
            _ => return Err(entry.unknown()),
        }
        Ok(())
    }

    fn buffer(&mut self, entry: &Entry<'_>) -> Result<(), ConfigError> {
        match entry.key {
            "capacity" => self.config.buffer.capacity = entry.parse()?,
            "overflow" => {
                self.config.buffer.overflow = OverflowPolicy::from_str(entry.value)
                    .map_err(|err| entry.invalid(err.to_string()))?;
            }
            _ => return Err(entry.unknown()),
        }
        Ok(())
    }

    fn batch(&mut self, entry: &Entry<'_>) -> Result<(), ConfigError> {
        let batch = &mut self.config.batch;
        match entry.key {
            "max_records" => batch.max_records = entry.parse()?,
            "max_bytes" => batch.max_bytes = entry.parse()?,
            "linger_ms" => batch.linger = entry.millis()?,
            _ => return Err(entry.unknown()),
        }
        Ok(())
    }

    fn retry(&mut self, entry: &Entry<'_>) -> Result<(), ConfigError> {
        let retry = &mut self.config.retry;
        match entry.key {
            "max_retries" => retry.max_retries = entry.parse()?,
            "base_ms" => retry.base = entry.millis()?,
            "cap_ms" => retry.cap = entry.millis()?,
            _ => return Err(entry.unknown()),
        }
        Ok(())
    }

    fn breaker(&mut self, entry: &Entry<'_>) -> Result<(), ConfigError> {
        let breaker = &mut self.config.breaker;
        match entry.key {
            "failure_threshold" => breaker.failure_threshold = entry.parse()?,
            "cooldown_ms" => breaker.cooldown = entry.millis()?,
            "max_cooldown_ms" => breaker.max_cooldown = entry.millis()?,
            _ => return Err(entry.unknown()),
        }
        Ok(())
    }

    fn pipeline(&mut self, entry: &Entry<'_>) -> Result<(), ConfigError> {
        match entry.key {
            "shutdown_grace_ms" => self.config.shutdown_grace = entry.millis()?,
            "warn_interval_ms" => self.config.warn_interval = entry.millis()?,
            "min_level" => {
                let level =
                    Level::from_str(entry.value).map_err(|err| entry.invalid(err.to_string()))?;
                self.config.processing.min_level = Some(level);
            }
            "redact" => self.config.processing.redact = entry.list(),
            _ => return Err(entry.unknown()),
        }
        Ok(())
    }

    fn source(&mut self, entry: &Entry<'_>) -> Result<(), ConfigError> {
        let source = &mut self.config.source;
        match entry.key {
            "logger" => source.logger = entry.string(),
            "service" => source.service = entry.optional(),
            "host" => source.host = entry.optional(),
            _ => return Err(entry.unknown()),
        }
        Ok(())
    }

    fn finish(mut self) -> Result<PipelineConfig, ConfigError> {
        let AuthParts {
            username,
            password,
            token,
            api_key,
        } = self.auth;
        let chosen = [username.is_some(), token.is_some(), api_key.is_some()]
            .into_iter()
            .filter(|set| *set)
            .count();
        if chosen > 1 {
            return Err(ConfigError::Invalid(
                "choose one of username/password, token, or api_key".into(),
            ));
        }
        self.config.endpoint.auth = match (username, password, token, api_key) {
            (Some(username), password, _, _) => Auth::Basic {
                username,
                password: password.unwrap_or_default(),
            },
            (None, Some(_), _, _) => {
                return Err(ConfigError::Invalid(
                    "endpoint password given without a username".into(),
                ));
            }
            (None, None, Some(token), _) => Auth::Bearer { token },
            (None, None, None, Some(key)) => Auth::ApiKey { key },
            (None, None, None, None) => Auth::None,
        };
        Ok(self.config)
    }
}

/// Insert `value` at a dotted path, creating intermediate maps.
fn insert_dotted(fields: &mut Fields, path: &str, value: String) {
    match path.split_once('.') {
        None => {
            fields.insert(path.to_owned(), FieldValue::String(value));
        }
        Some((head, rest)) => {
            let slot = fields
                .entry(head.to_owned())
                .or_insert_with(|| FieldValue::Map(Fields::new()));
            if !matches!(slot, FieldValue::Map(_)) {
                *slot = FieldValue::Map(Fields::new());
            }
            if let FieldValue::Map(inner) = slot {
                insert_dotted(inner, rest, value);
            }
        }
    }
}
