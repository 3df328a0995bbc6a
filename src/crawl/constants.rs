//! Constants for the crawl module (timeouts, backoff, poll cadence).

use std::time::Duration;

/// Default per-request HTTP timeout (100 seconds).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 100;

/// Overall ceiling for one directory, retries included (5 minutes).
pub const DIRECTORY_CEILING: Duration = Duration::from_secs(300);

/// Maximum fetch attempts for one directory.
pub const MAX_ATTEMPTS: u32 = 100;

/// Backoff cap in seconds; the delay is `min(16, 2^attempt)`.
pub const BACKOFF_CAP_SECS: u64 = 16;

/// Upper bound (exclusive) for the uniform backoff jitter, in milliseconds.
pub const MAX_JITTER_MS: u64 = 200;

/// Worker poll sleep when its queue came up empty.
pub const POLL_IDLE: Duration = Duration::from_millis(1000);

/// Worker poll sleep between items when the queue is non-empty.
pub const POLL_BUSY: Duration = Duration::from_millis(10);

/// Statistics period while directory workers are active.
pub const STATS_PERIOD: Duration = Duration::from_secs(30);

/// Statistics period once the directory pool has drained.
pub const STATS_PERIOD_DRAINED: Duration = Duration::from_secs(5);

/// Default worker count for both pools.
pub const DEFAULT_WORKERS: usize = 5;

/// Default port substituted for ftps:// URLs that don't carry one.
pub const FTPS_DEFAULT_PORT: u16 = 990;

/// Body marker some servers echo back when they dislike the User-Agent.
pub const USER_AGENT_SENTINEL: &str = "HTTP_USER_AGENT";
