//! Error types for the fetch module.
//!
//! Per-fetch failures ([`FetchError`]) are delivered through the completion
//! callback and never returned from engine calls. Initialization failures
//! ([`EngineError`]) are returned from [`FetchEngine::new`](super::FetchEngine::new)
//! and mean the engine cannot serve traffic at all.

use thiserror::Error;

use super::buffer::BufferError;
use super::context::FetchId;

/// Failure of a single fetch, delivered to its completion.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The transfer did not finish within the per-request timeout.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
        /// Body bytes received before the timeout.
        partial: Vec<u8>,
    },

    /// Transfer-layer failure (DNS, TLS, connection reset, protocol error).
    #[error("transfer failed for {url}: {reason}")]
    Transfer {
        /// The URL that failed.
        url: String,
        /// Failure class reported by the transfer engine.
        reason: TransferFailure,
        /// Body bytes received before the failure.
        partial: Vec<u8>,
    },

    /// The response body could not be accumulated.
    #[error("response body for {url} rejected: {source}")]
    Body {
        /// The URL whose body was rejected.
        url: String,
        /// Why the buffer refused more data.
        #[source]
        source: BufferError,
        /// Body bytes accumulated before the rejected chunk.
        partial: Vec<u8>,
    },

    /// The transfer engine refused the request when it was submitted.
    #[error("fetch of {url} rejected: {reason}")]
    Rejected {
        /// The URL that was refused.
        url: String,
        /// Reason given by the transfer engine.
        reason: String,
    },

    /// The engine shut down while the fetch was still in flight.
    #[error("fetch of {url} cancelled by engine shutdown")]
    Shutdown {
        /// The URL that was in flight.
        url: String,
        /// Body bytes received before shutdown.
        partial: Vec<u8>,
    },
}

impl FetchError {
    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>, partial: Vec<u8>) -> Self {
        Self::Timeout {
            url: url.into(),
            partial,
        }
    }

    /// Creates a transfer failure error.
    pub fn transfer(url: impl Into<String>, reason: TransferFailure, partial: Vec<u8>) -> Self {
        Self::Transfer {
            url: url.into(),
            reason,
            partial,
        }
    }

    /// Creates a body accumulation error.
    pub fn body(url: impl Into<String>, source: BufferError, partial: Vec<u8>) -> Self {
        Self::Body {
            url: url.into(),
            source,
            partial,
        }
    }

    /// Creates a submission rejection error.
    pub fn rejected(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a shutdown cancellation error.
    pub fn shutdown(url: impl Into<String>, partial: Vec<u8>) -> Self {
        Self::Shutdown {
            url: url.into(),
            partial,
        }
    }

    /// Returns the URL of the failed fetch.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Timeout { url, .. }
            | Self::Transfer { url, .. }
            | Self::Body { url, .. }
            | Self::Rejected { url, .. }
            | Self::Shutdown { url, .. } => url,
        }
    }

    /// Returns whatever body bytes arrived before the failure.
    #[must_use]
    pub fn partial_body(&self) -> &[u8] {
        match self {
            Self::Timeout { partial, .. }
            | Self::Transfer { partial, .. }
            | Self::Body { partial, .. }
            | Self::Shutdown { partial, .. } => partial,
            Self::Rejected { .. } => &[],
        }
    }

    /// Returns true if the fetch failed because its timeout expired.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Failure class of a finished transfer, as reported by a transfer engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferFailure {
    /// The per-request timeout expired.
    #[error("timed out")]
    TimedOut,

    /// Name resolution, TCP connect, or TLS handshake failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The body sink refused a chunk and the transfer was aborted.
    #[error("body sink rejected data")]
    BodyRejected,

    /// Any other transfer-layer error.
    #[error("{0}")]
    Other(String),
}

/// Errors returned by calls into a transfer engine.
#[derive(Debug, Error)]
pub enum TransferError {
    /// An option could not be installed on the transfer engine.
    #[error("invalid transfer option {option}: {reason}")]
    InvalidOption {
        /// Name of the option.
        option: &'static str,
        /// Why it was refused.
        reason: String,
    },

    /// A request could not be added.
    #[error("transfer {id} rejected: {reason}")]
    Rejected {
        /// The fetch whose request was refused.
        id: FetchId,
        /// Why it was refused.
        reason: String,
    },

    /// The engine failed while being pumped.
    #[error("transfer engine driver failure: {0}")]
    Driver(String),

    /// I/O failure inside the transfer engine.
    #[error("transfer engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Creates an invalid option error.
    pub fn invalid_option(option: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option,
            reason: reason.into(),
        }
    }

    /// Creates a rejected request error.
    pub fn rejected(id: FetchId, reason: impl Into<String>) -> Self {
        Self::Rejected {
            id,
            reason: reason.into(),
        }
    }
}

/// Invalid [`FetchConfig`](super::FetchConfig) values.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The per-request timeout is zero.
    #[error("request timeout must be greater than zero")]
    ZeroTimeout,

    /// A connection limit is out of range.
    #[error("invalid {name} value {value}: must be between 1 and {max}")]
    InvalidConnectionLimit {
        /// Which limit.
        name: &'static str,
        /// The value that was provided.
        value: usize,
        /// Largest accepted value.
        max: usize,
    },

    /// The body limit is zero.
    #[error("max body bytes must be greater than zero")]
    ZeroBodyLimit,

    /// The User-Agent is empty.
    #[error("user agent must not be empty")]
    EmptyUserAgent,

    /// The proxy is not a usable URL.
    #[error("invalid proxy {proxy}: {reason}")]
    InvalidProxy {
        /// The configured proxy string.
        proxy: String,
        /// Why it was refused.
        reason: String,
    },

    /// The configuration document could not be parsed.
    #[error("failed to parse fetch config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Fatal errors raised while constructing a [`FetchEngine`](super::FetchEngine).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The configuration failed validation.
    #[error("invalid fetch configuration: {0}")]
    Config(#[from] ConfigError),

    /// The transfer engine refused its engine-wide options.
    #[error("failed to configure transfer engine: {0}")]
    Transfer(#[from] TransferError),
}
