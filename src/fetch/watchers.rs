//! Bookkeeping of the engine's reactor subscriptions.
//!
//! A descriptor is watched iff it has an entry in [`SocketWatchers`]. Every
//! descriptor value is valid, including 0.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use tracing::trace;

use super::reactor::{Interest, Reactor, Socket};

/// Active socket subscriptions keyed by descriptor.
#[derive(Debug, Default)]
pub(crate) struct SocketWatchers {
    active: HashMap<Socket, Interest>,
}

impl SocketWatchers {
    /// Replaces any subscription for `socket` with one for exactly `interest`.
    ///
    /// The old subscription is cancelled first. If the new one cannot be
    /// registered the socket is left unwatched.
    pub(crate) fn watch<R: Reactor>(
        &mut self,
        reactor: &mut R,
        socket: Socket,
        interest: Interest,
    ) -> io::Result<()> {
        if self.active.remove(&socket).is_some() {
            reactor.unwatch_socket(socket);
        }
        if interest.is_empty() {
            trace!(socket, "empty interest, socket left unwatched");
            return Ok(());
        }
        reactor.watch_socket(socket, interest)?;
        self.active.insert(socket, interest);
        trace!(socket, %interest, "socket watched");
        Ok(())
    }

    /// Cancels the subscription for `socket`, returning whether one existed.
    pub(crate) fn remove<R: Reactor>(&mut self, reactor: &mut R, socket: Socket) -> bool {
        let existed = self.active.remove(&socket).is_some();
        if existed {
            reactor.unwatch_socket(socket);
            trace!(socket, "socket unwatched");
        }
        existed
    }

    /// Cancels every subscription.
    pub(crate) fn clear<R: Reactor>(&mut self, reactor: &mut R) {
        for (socket, _) in self.active.drain() {
            reactor.unwatch_socket(socket);
        }
    }

    pub(crate) fn interest(&self, socket: Socket) -> Option<Interest> {
        self.active.get(&socket).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.active.len()
    }
}

/// The single timeout subscription.
#[derive(Debug, Default)]
pub(crate) struct TimeoutWatcher {
    armed: Option<Duration>,
}

impl TimeoutWatcher {
    /// Arms the timer for `after`, replacing any armed timer.
    pub(crate) fn arm<R: Reactor>(&mut self, reactor: &mut R, after: Duration) {
        self.disarm(reactor);
        reactor.arm_timer(after);
        self.armed = Some(after);
    }

    /// Cancels the timer if armed.
    pub(crate) fn disarm<R: Reactor>(&mut self, reactor: &mut R) {
        if self.armed.take().is_some() {
            reactor.disarm_timer();
        }
    }

    /// Records that the reactor fired the timer.
    pub(crate) fn fired(&mut self) {
        self.armed = None;
    }

    pub(crate) fn armed(&self) -> Option<Duration> {
        self.armed
    }
}
