//! HTTPS bulk transport built on `ureq`.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use log::debug;
use native_tls::TlsConnector;
use ureq::{Agent, AgentBuilder};

use crate::config::{Auth, ConfigError, EndpointConfig};
use crate::formatter::{CONTENT_TYPE, Payload};

use super::response::{ResponseClass, classify_status, interpret_bulk_response};
use super::{DeliveryResult, Transport};

/// Longest response excerpt kept in failure reasons.
const REASON_LIMIT: usize = 256;

/// POSTs bulk payloads to `url + path` with a pooled `ureq` agent.
pub struct HttpTransport {
    agent: Agent,
    target: String,
    host_header: Option<String>,
    authorization: Option<String>,
    headers: Vec<(String, String)>,
}

impl HttpTransport {
    pub fn new(config: &EndpointConfig) -> Result<Self, ConfigError> {
        let mut tls = TlsConnector::builder();
        if !config.verify_tls {
            tls.danger_accept_invalid_certs(true);
            tls.danger_accept_invalid_hostnames(true);
        }
        let tls = tls.build()?;

        let agent = AgentBuilder::new()
            .timeout_connect(config.connect_timeout)
            .timeout(config.request_timeout)
            .tls_connector(Arc::new(tls))
            .build();

        let mut headers: Vec<(String, String)> = config
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        headers.sort();

        Ok(Self {
            agent,
            target: config.target_url(),
            host_header: config.host_header.clone(),
            authorization: authorization_header(&config.auth),
            headers,
        })
    }

    /// Full URL requests are sent to.
    pub fn target(&self) -> &str {
        &self.target
    }

    fn request(&self) -> ureq::Request {
        let mut req = self
            .agent
            .post(&self.target)
            .set("Content-Type", CONTENT_TYPE);
        if let Some(host) = &self.host_header {
            req = req.set("Host", host);
        }
        if let Some(value) = &self.authorization {
            req = req.set("Authorization", value);
        }
        for (key, value) in &self.headers {
            req = req.set(key, value);
        }
        req
    }
}

impl Transport for HttpTransport {
    fn send(&mut self, payload: &Payload) -> DeliveryResult {
        match self.request().send_bytes(payload.body()) {
            Ok(response) => {
                let status = response.status();
                if classify_status(status) != ResponseClass::Success {
                    return DeliveryResult::permanent(Some(status), format!("HTTP {status}"));
                }
                match response.into_string() {
                    Ok(body) => interpret_bulk_response(&body),
                    Err(err) => {
                        debug!("logship could not read bulk response (status {status}): {err}");
                        DeliveryResult::delivered()
                    }
                }
            }
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                let reason = describe_status(code, &body);
                match classify_status(code) {
                    ResponseClass::Retryable => DeliveryResult::retryable(reason),
                    ResponseClass::Permanent => DeliveryResult::permanent(Some(code), reason),
                    ResponseClass::Success => interpret_bulk_response(&body),
                }
            }
            Err(ureq::Error::Transport(err)) => DeliveryResult::retryable(err.to_string()),
        }
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("target", &self.target)
            .field("host_header", &self.host_header)
            .field("authorization", &self.authorization.as_ref().map(|_| "<set>"))
            .finish()
    }
}

fn authorization_header(auth: &Auth) -> Option<String> {
    match auth {
        Auth::None => None,
        Auth::Basic { username, password } => {
            let credentials = format!("{username}:{password}");
            Some(format!("Basic {}", BASE64_STANDARD.encode(credentials)))
        }
        Auth::Bearer { token } => Some(format!("Bearer {token}")),
        Auth::ApiKey { key } => Some(format!("ApiKey {key}")),
    }
}

fn describe_status(code: u16, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return format!("HTTP {code}");
    }
    let mut end = body.len().min(REASON_LIMIT);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("HTTP {code}: {}", &body[..end])
}
