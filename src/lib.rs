//! dohfetch Core Library
//!
//! This library provides the HTTPS transport of a DNS-to-HTTPS proxy: many
//! concurrent, multiplexed fetches over a small connection pool, driven by a
//! single-threaded event reactor instead of blocking I/O.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`fetch`] - Fetch engine, its reactor and transfer-engine capabilities,
//!   and the concrete `poll(2)` reactor and reqwest transfer engine
//!
//! DNS message translation and option parsing live with the caller; the
//! engine consumes a [`FetchConfig`] and reports through completion callbacks.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod fetch;

// Re-export commonly used types
pub use fetch::{
    ConfigError, DEFAULT_MAX_CONNECTIONS, DEFAULT_REQUEST_TIMEOUT, DEFAULT_USER_AGENT, EngineError,
    FetchConfig, FetchEngine, FetchError, FetchId, FetchResponse, FetchResult, Interest, Reactor,
    ResolveHint, Socket, TransferEngine,
};

#[cfg(unix)]
pub use fetch::{HttpTransfer, PollReactor, ReactorEvent};
