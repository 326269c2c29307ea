//! Per-fetch state tracked by the engine until completion.

use std::fmt;
use std::time::Instant;

use tracing::{debug, warn};

use super::buffer::BodySink;
use super::error::{FetchError, TransferFailure};

/// Correlation id of one submitted fetch.
///
/// Ids increase monotonically and are never reused by an engine, so a late
/// message about a finished fetch can never be attributed to a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FetchId(u64);

impl FetchId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FetchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fetch#{}", self.0)
    }
}

/// A finished HTTP exchange.
///
/// Any status code counts as a completed fetch; callers that need a 2xx check
/// [`is_success`](Self::is_success).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    url: String,
    status: u16,
    body: Vec<u8>,
}

impl FetchResponse {
    /// Creates a response.
    pub fn new(url: impl Into<String>, status: u16, body: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            status,
            body,
        }
    }

    /// Returns the fetched URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the HTTP status code.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the response body.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns the body as text, if it is valid UTF-8.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Consumes the response, returning the body.
    #[must_use]
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

/// Outcome delivered to a fetch's completion.
pub type FetchResult = Result<FetchResponse, FetchError>;

/// Completion invoked exactly once per fetch.
pub(crate) type Completion = Box<dyn FnOnce(FetchResult)>;

/// State of one in-flight fetch.
pub(crate) struct FetchContext {
    id: FetchId,
    url: String,
    sink: BodySink,
    completion: Completion,
    submitted_at: Instant,
}

impl FetchContext {
    pub(crate) fn new(id: FetchId, url: String, sink: BodySink, completion: Completion) -> Self {
        Self {
            id,
            url,
            sink,
            completion,
            submitted_at: Instant::now(),
        }
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    /// Finishes the fetch with the transfer engine's verdict.
    ///
    /// A buffer rejection takes precedence over the transfer failure it caused.
    pub(crate) fn complete(self, outcome: Result<u16, TransferFailure>) {
        let body = self.sink.take();
        let result = match outcome {
            Ok(status) => Ok(FetchResponse::new(self.url.clone(), status, body)),
            Err(failure) => Err(match (self.sink.rejection(), failure) {
                (Some(rejection), _) => FetchError::body(self.url.as_str(), rejection, body),
                (None, TransferFailure::TimedOut) => FetchError::timeout(self.url.as_str(), body),
                (None, reason) => FetchError::transfer(self.url.as_str(), reason, body),
            }),
        };
        self.deliver(result);
    }

    /// Finishes the fetch with an engine-side error.
    pub(crate) fn fail(self, error: FetchError) {
        self.deliver(Err(error));
    }

    /// Finishes the fetch because the engine is shutting down.
    pub(crate) fn cancel(self) {
        let partial = self.sink.take();
        let error = FetchError::shutdown(self.url.as_str(), partial);
        self.deliver(Err(error));
    }

    fn deliver(self, result: FetchResult) {
        let elapsed_ms = self.submitted_at.elapsed().as_millis();
        match &result {
            Ok(response) => debug!(
                fetch_id = %self.id,
                url = %self.url,
                status = response.status(),
                bytes = response.body().len(),
                elapsed_ms,
                "fetch completed"
            ),
            Err(error) => warn!(
                fetch_id = %self.id,
                url = %self.url,
                error = %error,
                partial_bytes = error.partial_body().len(),
                elapsed_ms,
                "fetch failed"
            ),
        }
        (self.completion)(result);
    }
}

impl fmt::Debug for FetchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchContext")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("buffered", &self.sink.len())
            .finish_non_exhaustive()
    }
}
