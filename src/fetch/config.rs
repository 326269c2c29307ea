//! Static configuration of a fetch engine.
//!
//! A [`FetchConfig`] is fixed for the lifetime of a [`FetchEngine`](super::FetchEngine).
//! It can be built in code or deserialized from a JSON document; missing
//! fields take the crate defaults (2s timeout, 8 connections).

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use super::constants::{
    DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_CACHED_CONNECTIONS, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_TCP_KEEPALIVE, DEFAULT_USER_AGENT, MAX_CONNECTION_LIMIT,
};
use super::error::ConfigError;

const PROXY_SCHEMES: [&str; 4] = ["http", "https", "socks5", "socks5h"];

/// Engine-wide fetch options.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use dohfetch_core::FetchConfig;
///
/// let config = FetchConfig::default()
///     .with_proxy("socks5h://127.0.0.1:9050")
///     .with_request_timeout(Duration::from_secs(5));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// Forwarding proxy for every request, if any.
    pub proxy: Option<String>,
    /// Per-request timeout in milliseconds, measured from submission.
    pub request_timeout_ms: u64,
    /// Maximum simultaneous connections.
    pub max_connections: usize,
    /// Maximum idle connections kept for reuse.
    pub max_cached_connections: usize,
    /// TCP keep-alive idle interval in seconds; `None` disables keep-alive probes.
    pub tcp_keepalive_secs: Option<u64>,
    /// User-Agent header value.
    pub user_agent: String,
    /// Largest response body accepted per fetch.
    pub max_body_bytes: usize,
    /// Ask for HTTP/2, falling back to HTTP/1.1 when the server lacks it.
    pub prefer_http2: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            request_timeout_ms: duration_millis(DEFAULT_REQUEST_TIMEOUT),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_cached_connections: DEFAULT_MAX_CACHED_CONNECTIONS,
            tcp_keepalive_secs: Some(DEFAULT_TCP_KEEPALIVE.as_secs()),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            prefer_http2: true,
        }
    }
}

impl FetchConfig {
    /// Parses a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON or unknown fields,
    /// or any validation error from [`validate`](Self::validate).
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the forwarding proxy.
    #[must_use]
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = duration_millis(timeout);
        self
    }

    /// Sets both connection limits to the same pool size.
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self.max_cached_connections = max;
        self
    }

    /// Sets the response body bound.
    #[must_use]
    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Returns the TCP keep-alive interval, if enabled.
    #[must_use]
    pub fn tcp_keepalive(&self) -> Option<Duration> {
        self.tcp_keepalive_secs.map(Duration::from_secs)
    }

    /// Checks every option is usable.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        check_limit("max_connections", self.max_connections)?;
        check_limit("max_cached_connections", self.max_cached_connections)?;
        if self.max_body_bytes == 0 {
            return Err(ConfigError::ZeroBodyLimit);
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::EmptyUserAgent);
        }
        if let Some(proxy) = &self.proxy {
            validate_proxy(proxy)?;
        }
        Ok(())
    }
}

fn check_limit(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if (1..=MAX_CONNECTION_LIMIT).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidConnectionLimit {
            name,
            value,
            max: MAX_CONNECTION_LIMIT,
        })
    }
}

fn validate_proxy(proxy: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidProxy {
        proxy: proxy.to_string(),
        reason,
    };
    let parsed = Url::parse(proxy).map_err(|e| invalid(e.to_string()))?;
    if !PROXY_SCHEMES.contains(&parsed.scheme()) {
        return Err(invalid(format!("unsupported scheme {}", parsed.scheme())));
    }
    if parsed.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
