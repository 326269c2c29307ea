//! Pinned name-to-address overrides.
//!
//! The proxy serves DNS itself, so the upstream's own hostname is resolved
//! ahead of time and handed to every fetch instead of being looked up.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use thiserror::Error;

/// Errors parsing a `host:port:address` resolve entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The entry does not have three `:`-separated parts.
    #[error("resolve entry {entry:?} must have the form host:port:address")]
    Malformed {
        /// The entry as given.
        entry: String,
    },

    /// The host part is empty.
    #[error("resolve entry {entry:?} has an empty host")]
    EmptyHost {
        /// The entry as given.
        entry: String,
    },

    /// The port is not a number in 1..=65535.
    #[error("resolve entry {entry:?} has invalid port {port:?}")]
    InvalidPort {
        /// The entry as given.
        entry: String,
        /// The port part.
        port: String,
    },

    /// The address is not an IPv4 or IPv6 literal.
    #[error("resolve entry {entry:?} has invalid address {address:?}")]
    InvalidAddress {
        /// The entry as given.
        entry: String,
        /// The address part.
        address: String,
    },
}

/// One resolution override: connections to `host:port` go to `addr`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolveHint {
    host: String,
    port: u16,
    addr: IpAddr,
}

impl ResolveHint {
    /// Creates a hint pinning `host:port` to `addr`.
    pub fn new(host: impl Into<String>, port: u16, addr: IpAddr) -> Self {
        Self {
            host: host.into(),
            port,
            addr,
        }
    }

    /// Returns the pinned hostname.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port the pin applies to.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the pinned address.
    #[must_use]
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Returns the socket address connections should use.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

impl fmt::Display for ResolveHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr {
            IpAddr::V4(v4) => write!(f, "{}:{}:{v4}", self.host, self.port),
            IpAddr::V6(v6) => write!(f, "{}:{}:[{v6}]", self.host, self.port),
        }
    }
}

impl FromStr for ResolveHint {
    type Err = ResolveError;

    fn from_str(entry: &str) -> Result<Self, Self::Err> {
        let malformed = || ResolveError::Malformed {
            entry: entry.to_string(),
        };

        let mut parts = entry.splitn(3, ':');
        let host = parts.next().ok_or_else(malformed)?;
        let port = parts.next().ok_or_else(malformed)?;
        let address = parts.next().ok_or_else(malformed)?;

        if host.is_empty() {
            return Err(ResolveError::EmptyHost {
                entry: entry.to_string(),
            });
        }

        let port_num = port
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| ResolveError::InvalidPort {
                entry: entry.to_string(),
                port: port.to_string(),
            })?;

        let bare = address
            .strip_prefix('[')
            .and_then(|a| a.strip_suffix(']'))
            .unwrap_or(address);
        let addr = bare
            .parse::<IpAddr>()
            .map_err(|_| ResolveError::InvalidAddress {
                entry: entry.to_string(),
                address: address.to_string(),
            })?;

        Ok(Self::new(host, port_num, addr))
    }
}
