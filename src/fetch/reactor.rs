//! Reactor capability: descriptor readiness and one-shot timer subscriptions.
//!
//! The engine is a client of a reactor, not its implementer. Whoever runs the
//! event loop delivers readiness to
//! [`FetchEngine::on_socket_ready`](super::FetchEngine::on_socket_ready) and
//! timer expiry to [`FetchEngine::on_timeout`](super::FetchEngine::on_timeout).

use std::fmt;
use std::io;
use std::ops::BitOr;
use std::time::Duration;

/// Platform socket descriptor as handed out by the transfer engine.
pub type Socket = std::os::raw::c_int;

/// Readiness directions, used both for subscriptions and for reported events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Interest {
    readable: bool,
    writable: bool,
}

impl Interest {
    /// No direction.
    pub const NONE: Self = Self::new(false, false);
    /// Readable only.
    pub const READABLE: Self = Self::new(true, false);
    /// Writable only.
    pub const WRITABLE: Self = Self::new(false, true);
    /// Readable and writable.
    pub const BOTH: Self = Self::new(true, true);

    /// Creates an interest from its two directions.
    #[must_use]
    pub const fn new(readable: bool, writable: bool) -> Self {
        Self { readable, writable }
    }

    /// Returns true if the readable direction is set.
    #[must_use]
    pub const fn is_readable(self) -> bool {
        self.readable
    }

    /// Returns true if the writable direction is set.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        self.writable
    }

    /// Returns true if neither direction is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        !self.readable && !self.writable
    }
}

impl BitOr for Interest {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self::new(self.readable || rhs.readable, self.writable || rhs.writable)
    }
}

impl fmt::Display for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match (self.readable, self.writable) {
            (true, true) => "read|write",
            (true, false) => "read",
            (false, true) => "write",
            (false, false) => "none",
        };
        f.write_str(label)
    }
}

/// Event-subscription service the engine registers its watches with.
///
/// Subscriptions are replaced, never upgraded: the engine always unwatches a
/// socket before watching it again with a new interest.
pub trait Reactor {
    /// Starts delivering readiness for `socket` in the given directions.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the subscription cannot be registered.
    fn watch_socket(&mut self, socket: Socket, interest: Interest) -> io::Result<()>;

    /// Stops delivering readiness for `socket`.
    fn unwatch_socket(&mut self, socket: Socket);

    /// Arms the one-shot timer to fire once after `after`, replacing any armed timer.
    fn arm_timer(&mut self, after: Duration);

    /// Cancels the one-shot timer if armed.
    fn disarm_timer(&mut self);
}
