//! Constants for the fetch module (timeouts, connection pool sizing).

use std::time::Duration;

/// Default per-request timeout, measured from submission (2 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Default cap on simultaneous connections to the upstream.
pub const DEFAULT_MAX_CONNECTIONS: usize = 8;

/// Default number of idle connections kept for reuse.
pub const DEFAULT_MAX_CACHED_CONNECTIONS: usize = 8;

/// Upper bound accepted for either connection limit.
pub const MAX_CONNECTION_LIMIT: usize = 256;

/// Default TCP keep-alive idle interval (5 seconds).
pub const DEFAULT_TCP_KEEPALIVE: Duration = Duration::from_secs(5);

/// User-Agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = "dns-to-https-proxy/0.1";

/// Default response body bound: none, so only a failed allocation stops a body.
pub const DEFAULT_MAX_BODY_BYTES: usize = usize::MAX;
