//! Fetch engine bridging a reactor and a multiplexed transfer engine.
//!
//! The [`FetchEngine`] owns the transfer engine, the reactor subscriptions it
//! asked for, and the registry of in-flight fetches. Every entry point runs to
//! completion on the calling thread:
//!
//! 1. forward the event (submission, socket readiness, timer expiry) to the
//!    transfer engine
//! 2. apply the socket/timer subscription changes it queued, running the
//!    timeout action immediately when it asks for a zero-delay wake-up
//! 3. drain its finished transfers: unregister the context, release the
//!    transfer, then invoke the completion
//!
//! Steps 2 and 3 repeat until neither queue yields anything, because
//! releasing a transfer may queue further subscription changes.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(unix)]
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use dohfetch_core::{FetchConfig, FetchEngine, HttpTransfer, PollReactor};
//!
//! let mut engine = FetchEngine::new(FetchConfig::default(), HttpTransfer::new()?, PollReactor::new())?;
//! engine.submit("https://dns.google/resolve?name=example.com&type=A", Vec::new(), |result| {
//!     match result {
//!         Ok(response) => println!("{} bytes", response.body().len()),
//!         Err(e) => eprintln!("{e}"),
//!     }
//! });
//! engine.run_until_idle()?;
//! engine.shutdown();
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, trace, warn};

use super::buffer::BodySink;
use super::config::FetchConfig;
use super::context::{FetchContext, FetchId, FetchResult};
use super::error::{EngineError, FetchError};
use super::reactor::{Interest, Reactor, Socket};
use super::resolve::ResolveHint;
use super::transfer::{ConnectionLimits, Finished, TransferEngine, TransferRequest, TransferSignal};
use super::watchers::{SocketWatchers, TimeoutWatcher};

/// Reactor-driven fetch engine.
///
/// Not thread-safe by design: it holds `Rc` state and is driven from one
/// reactor thread. Completions run inside engine calls and therefore cannot
/// call back into the engine; queue follow-up submissions instead.
///
/// Dropping the engine has the same effect as [`shutdown`](Self::shutdown).
pub struct FetchEngine<T: TransferEngine, R: Reactor> {
    config: FetchConfig,
    transfer: T,
    reactor: R,
    sockets: SocketWatchers,
    timeout: TimeoutWatcher,
    registry: HashMap<FetchId, FetchContext>,
    next_id: u64,
    running: usize,
    closed: bool,
}

impl<T: TransferEngine, R: Reactor> FetchEngine<T, R> {
    /// Creates an engine and installs the connection limits on the transfer engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if the configuration is invalid, or
    /// [`EngineError::Transfer`] if the transfer engine refuses its limits.
    /// Either means the engine cannot serve traffic.
    #[instrument(level = "debug", skip(transfer, reactor))]
    pub fn new(config: FetchConfig, mut transfer: T, reactor: R) -> Result<Self, EngineError> {
        config.validate()?;

        let limits = ConnectionLimits {
            max_total_connections: config.max_connections,
            max_cached_connections: config.max_cached_connections,
            multiplex: config.prefer_http2,
        };
        transfer.configure(&limits)?;

        debug!(
            max_connections = limits.max_total_connections,
            max_cached_connections = limits.max_cached_connections,
            timeout_ms = config.request_timeout_ms,
            proxy = config.proxy.as_deref().unwrap_or("none"),
            "creating fetch engine"
        );

        let mut engine = Self {
            config,
            transfer,
            reactor,
            sockets: SocketWatchers::default(),
            timeout: TimeoutWatcher::default(),
            registry: HashMap::new(),
            next_id: 1,
            running: 0,
            closed: false,
        };
        engine.service();
        Ok(engine)
    }

    /// Submits a GET for `url`; `on_complete` runs exactly once with the result.
    ///
    /// `resolve` pins hostnames to addresses so no DNS lookup happens. The
    /// completion may run before this call returns if the transfer engine
    /// refuses the request or finishes it immediately.
    pub fn submit<F>(
        &mut self,
        url: impl Into<String>,
        resolve: Vec<ResolveHint>,
        on_complete: F,
    ) -> FetchId
    where
        F: FnOnce(FetchResult) + 'static,
    {
        let id = FetchId::new(self.next_id);
        self.next_id += 1;
        let url: String = url.into();
        let sink = BodySink::new(self.config.max_body_bytes);
        let context = FetchContext::new(id, url.clone(), sink.clone(), Box::new(on_complete));
        trace!(fetch_id = %id, url = %url, hints = resolve.len(), "submitting fetch");

        let request = TransferRequest {
            url,
            resolve,
            prefer_http2: self.config.prefer_http2,
            timeout: self.config.request_timeout(),
            tcp_keepalive: self.config.tcp_keepalive(),
            user_agent: self.config.user_agent.clone(),
            proxy: self.config.proxy.clone(),
            sink,
        };

        self.registry.insert(id, context);
        match self.transfer.add(id, request) {
            Ok(()) => debug!(fetch_id = %id, in_flight = self.registry.len(), "fetch submitted"),
            Err(e) => {
                warn!(fetch_id = %id, error = %e, "transfer engine refused fetch");
                if let Some(context) = self.registry.remove(&id) {
                    let error = FetchError::rejected(context.url(), e.to_string());
                    context.fail(error);
                }
            }
        }

        self.service();
        id
    }

    /// Submits a GET for `url` and returns a receiver for its result.
    ///
    /// The sender is consumed by the completion, so the receiver always
    /// resolves once the fetch completes or the engine shuts down.
    pub fn submit_oneshot(
        &mut self,
        url: impl Into<String>,
        resolve: Vec<ResolveHint>,
    ) -> oneshot::Receiver<FetchResult> {
        let (tx, rx) = oneshot::channel();
        self.submit(url, resolve, move |result| {
            // The caller may have dropped the receiver; nothing to report then.
            let _ = tx.send(result);
        });
        rx
    }

    /// Bridges reactor readiness on `socket` into the transfer engine.
    ///
    /// Readiness for a socket the engine does not currently watch is ignored.
    pub fn on_socket_ready(&mut self, socket: Socket, readiness: Interest) {
        if self.sockets.interest(socket).is_none() {
            trace!(socket, %readiness, "readiness for unwatched socket ignored");
            return;
        }
        match self.transfer.socket_action(socket, readiness) {
            Ok(running) => self.running = running,
            Err(e) => error!(socket, error = %e, "transfer engine socket action failed"),
        }
        self.service();
    }

    /// Bridges expiry of the engine's timer into the transfer engine.
    pub fn on_timeout(&mut self) {
        self.timeout.fired();
        self.timeout_action();
        self.service();
    }

    /// Force-completes every in-flight fetch and releases all subscriptions.
    ///
    /// Each pending completion receives [`FetchError::Shutdown`] with whatever
    /// partial body had arrived. The transfer engine is dropped with `self`.
    pub fn shutdown(mut self) {
        self.close();
    }

    /// Returns the number of fetches whose completion has not run yet.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    /// Returns true if `id` was submitted and has not completed.
    #[must_use]
    pub fn is_in_flight(&self, id: FetchId) -> bool {
        self.registry.contains_key(&id)
    }

    /// Returns the transfer engine's last reported count of running transfers.
    #[must_use]
    pub fn running_transfers(&self) -> usize {
        self.running
    }

    /// Returns the number of sockets with an active subscription.
    #[must_use]
    pub fn watched_sockets(&self) -> usize {
        self.sockets.len()
    }

    /// Returns the interest `socket` is watched for, if watched.
    #[must_use]
    pub fn socket_interest(&self, socket: Socket) -> Option<Interest> {
        self.sockets.interest(socket)
    }

    /// Returns the delay of the armed timer, if any.
    #[must_use]
    pub fn timer(&self) -> Option<Duration> {
        self.timeout.armed()
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Returns the reactor the engine subscribes with.
    #[must_use]
    pub fn reactor(&self) -> &R {
        &self.reactor
    }

    fn timeout_action(&mut self) {
        match self.transfer.timeout_action() {
            Ok(running) => self.running = running,
            Err(e) => error!(error = %e, "transfer engine timeout action failed"),
        }
    }

    /// Applies queued subscription changes and drains finished transfers until both are empty.
    fn service(&mut self) {
        loop {
            let mut progressed = false;
            while let Some(signal) = self.transfer.next_signal() {
                progressed = true;
                self.apply_signal(signal);
            }
            while let Some(finished) = self.transfer.next_finished() {
                progressed = true;
                self.finish(finished);
            }
            if !progressed {
                break;
            }
        }
    }

    fn apply_signal(&mut self, signal: TransferSignal) {
        match signal {
            TransferSignal::Watch { socket, interest } => {
                if let Err(e) = self.sockets.watch(&mut self.reactor, socket, interest) {
                    warn!(socket, %interest, error = %e, "failed to watch socket");
                }
            }
            TransferSignal::Unwatch { socket } => {
                self.sockets.remove(&mut self.reactor, socket);
            }
            TransferSignal::Timer(None) => self.timeout.disarm(&mut self.reactor),
            TransferSignal::Timer(Some(after)) if after.is_zero() => {
                self.timeout.disarm(&mut self.reactor);
                trace!("transfer engine due immediately");
                self.timeout_action();
            }
            TransferSignal::Timer(Some(after)) => {
                trace!(after_ms = after.as_millis(), "timer armed");
                self.timeout.arm(&mut self.reactor, after);
            }
        }
    }

    fn finish(&mut self, finished: Finished) {
        let Some(context) = self.registry.remove(&finished.id) else {
            debug!(fetch_id = %finished.id, "finished transfer has no live fetch");
            return;
        };
        if let Err(e) = self.transfer.remove(finished.id) {
            warn!(fetch_id = %finished.id, error = %e, "failed to release transfer");
        }
        context.complete(finished.outcome);
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let mut pending: Vec<FetchId> = self.registry.keys().copied().collect();
        pending.sort_unstable();
        if !pending.is_empty() {
            info!(pending = pending.len(), "shutting down with fetches in flight");
        }

        for id in pending {
            if let Some(context) = self.registry.remove(&id) {
                if let Err(e) = self.transfer.remove(id) {
                    warn!(fetch_id = %id, error = %e, "failed to release transfer");
                }
                context.cancel();
            }
        }

        // Releasing transfers may queue more signals; none may outlive shutdown.
        while self.transfer.next_signal().is_some() {}
        while self.transfer.next_finished().is_some() {}

        self.sockets.clear(&mut self.reactor);
        self.timeout.disarm(&mut self.reactor);
        self.running = 0;
        debug!("fetch engine shut down");
    }
}

#[cfg(unix)]
impl<T: TransferEngine> FetchEngine<T, super::poll_reactor::PollReactor> {
    /// Waits for one batch of reactor events and dispatches it.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from `poll(2)`.
    pub fn turn(&mut self, max_wait: Option<Duration>) -> std::io::Result<()> {
        use super::poll_reactor::ReactorEvent;

        for event in self.reactor.wait(max_wait)? {
            match event {
                ReactorEvent::Socket { socket, readiness } => self.on_socket_ready(socket, readiness),
                ReactorEvent::Timeout => self.on_timeout(),
            }
        }
        Ok(())
    }

    /// Turns the reactor until no fetch is in flight.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from `poll(2)`, or an error if fetches remain
    /// while nothing is watched and no timer is armed.
    pub fn run_until_idle(&mut self) -> std::io::Result<()> {
        while self.in_flight() > 0 {
            if self.reactor.is_idle() {
                return Err(std::io::Error::other(format!(
                    "{} fetches in flight but nothing can wake the reactor",
                    self.in_flight()
                )));
            }
            self.turn(None)?;
        }
        Ok(())
    }
}

impl<T: TransferEngine, R: Reactor> Drop for FetchEngine<T, R> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: TransferEngine, R: Reactor> fmt::Debug for FetchEngine<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchEngine")
            .field("in_flight", &self.registry.len())
            .field("running", &self.running)
            .field("watched_sockets", &self.sockets.len())
            .field("timer", &self.timeout.armed())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
