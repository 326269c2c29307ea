//! Reactor-driven HTTPS fetch engine.
//!
//! This module provides the [`FetchEngine`], which runs many concurrent
//! fetches over a small connection pool while the caller's single-threaded
//! event loop does all the waiting.
//!
//! # Features
//!
//! - Capability traits for the event loop ([`Reactor`]) and the multiplexed
//!   HTTP client ([`TransferEngine`]), so the engine runs against fakes too
//! - Exactly one completion per submitted fetch, including at shutdown
//! - Pinned name resolution ([`ResolveHint`]) so no DNS lookup is needed
//! - Fixed per-request timeout (2s) and connection cap (8) by default,
//!   configurable through [`FetchConfig`]
//! - A `poll(2)` reactor ([`PollReactor`]) and a reqwest transfer engine
//!   ([`HttpTransfer`]) on unix
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(unix)]
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use dohfetch_core::{FetchConfig, FetchEngine, HttpTransfer, PollReactor, ResolveHint};
//!
//! let config = FetchConfig::default();
//! let mut engine = FetchEngine::new(config, HttpTransfer::new()?, PollReactor::new())?;
//!
//! let pin: ResolveHint = "dns.google:443:8.8.8.8".parse()?;
//! let url = "https://dns.google/resolve?name=example.com&type=AAAA";
//! let mut answer = engine.submit_oneshot(url, vec![pin]);
//!
//! engine.run_until_idle()?;
//! let response = answer.try_recv()??;
//! println!("{}", response.text().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

mod buffer;
mod config;
mod constants;
mod context;
mod engine;
mod error;
mod reactor;
mod resolve;
mod transfer;
mod watchers;

#[cfg(unix)]
mod http_transfer;
#[cfg(unix)]
mod poll_reactor;

pub use buffer::{BodySink, BufferError, ResponseBuffer};
pub use config::FetchConfig;
pub use constants::{
    DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_CACHED_CONNECTIONS, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_TCP_KEEPALIVE, DEFAULT_USER_AGENT, MAX_CONNECTION_LIMIT,
};
pub use context::{FetchId, FetchResponse, FetchResult};
pub use engine::FetchEngine;
pub use error::{ConfigError, EngineError, FetchError, TransferError, TransferFailure};
pub use reactor::{Interest, Reactor, Socket};
pub use resolve::{ResolveError, ResolveHint};
pub use transfer::{ConnectionLimits, Finished, TransferEngine, TransferRequest, TransferSignal};

#[cfg(unix)]
pub use http_transfer::HttpTransfer;
#[cfg(unix)]
pub use poll_reactor::{PollReactor, ReactorEvent};
