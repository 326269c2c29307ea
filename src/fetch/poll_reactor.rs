//! Level-triggered reactor on `poll(2)`.
//!
//! [`PollReactor`] keeps the subscription table the engine registers and
//! waits on it; [`FetchEngine::turn`](super::FetchEngine::turn) and
//! [`FetchEngine::run_until_idle`](super::FetchEngine::run_until_idle) drive
//! an engine with it.

use std::collections::BTreeMap;
use std::io;
use std::time::{Duration, Instant};

use tracing::trace;

use super::reactor::{Interest, Reactor, Socket};

/// Event produced by one [`PollReactor::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorEvent {
    /// A watched socket is ready in the reported directions.
    Socket {
        /// The ready descriptor.
        socket: Socket,
        /// Directions it is ready for.
        readiness: Interest,
    },
    /// The one-shot timer expired.
    Timeout,
}

/// Single-threaded `poll(2)` reactor.
#[derive(Debug, Default)]
pub struct PollReactor {
    sockets: BTreeMap<Socket, Interest>,
    deadline: Option<Instant>,
}

impl PollReactor {
    /// Creates a reactor with no subscriptions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if nothing is watched and no timer is armed.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.sockets.is_empty() && self.deadline.is_none()
    }

    /// Returns the interest registered for `socket`.
    #[must_use]
    pub fn interest(&self, socket: Socket) -> Option<Interest> {
        self.sockets.get(&socket).copied()
    }

    /// Returns the armed timer's deadline.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Blocks until a watched socket is ready, the timer expires, or `max_wait` passes.
    ///
    /// An expired timer is reported once and disarmed. A wait interrupted by
    /// a signal returns no events.
    ///
    /// # Errors
    ///
    /// Returns the I/O error reported by `poll(2)`.
    pub fn wait(&mut self, max_wait: Option<Duration>) -> io::Result<Vec<ReactorEvent>> {
        let mut fds: Vec<libc::pollfd> = self
            .sockets
            .iter()
            .map(|(&fd, &interest)| libc::pollfd {
                fd,
                events: poll_events(interest),
                revents: 0,
            })
            .collect();

        let now = Instant::now();
        let until_deadline = self.deadline.map(|d| d.saturating_duration_since(now));
        let wait = match (until_deadline, max_wait) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let nfds = libc::nfds_t::try_from(fds.len())
            .map_err(|_| io::Error::other("too many sockets to poll"))?;
        // SAFETY: `fds` is a live, exclusively borrowed array of `nfds` pollfds.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), nfds, poll_timeout_ms(wait)) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }

        let mut events: Vec<ReactorEvent> = fds
            .iter()
            .filter(|fd| fd.revents != 0)
            .map(|fd| ReactorEvent::Socket {
                socket: fd.fd,
                readiness: readiness(fd.revents),
            })
            .collect();

        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            self.deadline = None;
            events.push(ReactorEvent::Timeout);
        }

        trace!(ready = events.len(), watched = fds.len(), "poll returned");
        Ok(events)
    }
}

impl Reactor for PollReactor {
    fn watch_socket(&mut self, socket: Socket, interest: Interest) -> io::Result<()> {
        if socket < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot watch negative descriptor {socket}"),
            ));
        }
        self.sockets.insert(socket, interest);
        Ok(())
    }

    fn unwatch_socket(&mut self, socket: Socket) {
        self.sockets.remove(&socket);
    }

    fn arm_timer(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    fn disarm_timer(&mut self) {
        self.deadline = None;
    }
}

fn poll_events(interest: Interest) -> libc::c_short {
    let mut events = 0;
    if interest.is_readable() {
        events |= libc::POLLIN;
    }
    if interest.is_writable() {
        events |= libc::POLLOUT;
    }
    events
}

/// Hang-ups and errors surface as readability so the transfer engine observes them.
fn readiness(revents: libc::c_short) -> Interest {
    let readable = revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0;
    let writable = revents & libc::POLLOUT != 0;
    Interest::new(readable, writable)
}

/// Rounds up so a timer is never reported before its deadline.
fn poll_timeout_ms(wait: Option<Duration>) -> libc::c_int {
    match wait {
        None => -1,
        Some(d) => {
            let mut ms = d.as_millis();
            if Duration::from_millis(u64::try_from(ms).unwrap_or(u64::MAX)) < d {
                ms += 1;
            }
            libc::c_int::try_from(ms).unwrap_or(libc::c_int::MAX)
        }
    }
}
