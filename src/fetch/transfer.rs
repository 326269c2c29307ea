//! Transfer engine capability: the multiplexed HTTP client the engine drives.
//!
//! A transfer engine never calls back into the fetch engine. Socket and timer
//! subscription requests, and "transfer finished" messages, are queued inside
//! it and drained by the fetch engine after every call it makes.

use std::time::Duration;

use super::buffer::BodySink;
use super::context::FetchId;
use super::error::{TransferError, TransferFailure};
use super::reactor::{Interest, Socket};
use super::resolve::ResolveHint;

/// Engine-wide connection pool tuning installed once at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Maximum simultaneous connections across all hosts.
    pub max_total_connections: usize,
    /// Maximum connections kept open for reuse.
    pub max_cached_connections: usize,
    /// Multiplex requests over shared HTTP/2 connections where possible.
    pub multiplex: bool,
}

/// One request handed to the transfer engine.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Absolute URL to GET.
    pub url: String,
    /// Pinned resolutions that bypass DNS lookups.
    pub resolve: Vec<ResolveHint>,
    /// Ask for HTTP/2, falling back to HTTP/1.1.
    pub prefer_http2: bool,
    /// Whole-transfer timeout, measured from submission.
    pub timeout: Duration,
    /// TCP keep-alive idle interval.
    pub tcp_keepalive: Option<Duration>,
    /// User-Agent header value.
    pub user_agent: String,
    /// Forwarding proxy URL.
    pub proxy: Option<String>,
    /// Destination for response body bytes.
    pub sink: BodySink,
}

/// Subscription change requested by the transfer engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSignal {
    /// Watch `socket` for exactly `interest`, replacing any existing watch.
    Watch {
        /// Descriptor to watch.
        socket: Socket,
        /// Directions to report.
        interest: Interest,
    },
    /// Stop watching `socket`.
    Unwatch {
        /// Descriptor to release.
        socket: Socket,
    },
    /// Wake the engine after the delay; `None` cancels, zero means now.
    Timer(Option<Duration>),
}

/// A transfer the engine has finished with, successfully or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    /// The fetch the transfer belongs to.
    pub id: FetchId,
    /// HTTP status on completion, or the failure class.
    pub outcome: Result<u16, TransferFailure>,
}

/// Multiplexed-transfer service.
///
/// All methods run on the reactor thread. `socket_action` and
/// `timeout_action` return the number of transfers still running.
pub trait TransferEngine {
    /// Installs engine-wide connection limits.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidOption`] if a limit cannot be applied.
    fn configure(&mut self, limits: &ConnectionLimits) -> Result<(), TransferError>;

    /// Starts a transfer for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] if the request cannot be started; no
    /// `Finished` message is queued for it in that case.
    fn add(&mut self, id: FetchId, request: TransferRequest) -> Result<(), TransferError>;

    /// Releases every resource held for `id`. Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] if the transfer could not be detached cleanly.
    fn remove(&mut self, id: FetchId) -> Result<(), TransferError>;

    /// Reports readiness on one of the sockets the engine asked to watch.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Driver`] if the engine itself failed.
    fn socket_action(&mut self, socket: Socket, readiness: Interest)
    -> Result<usize, TransferError>;

    /// Reports that the requested timer elapsed with no socket activity.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Driver`] if the engine itself failed.
    fn timeout_action(&mut self) -> Result<usize, TransferError>;

    /// Pops the oldest queued subscription change.
    fn next_signal(&mut self) -> Option<TransferSignal>;

    /// Pops the oldest queued finished transfer.
    fn next_finished(&mut self) -> Option<Finished>;
}
