//! Retry policy for directory fetches.
//!
//! Wraps a directory fetch with bounded exponential backoff and classifies
//! each failure into retry-or-cancel. The delay before the k-th retry is
//! `min(16, 2^k)` seconds plus a uniform jitter below 200 ms; a directory is
//! abandoned after 100 attempts at the latest, and much earlier for failure
//! kinds that retrying cannot fix.
//!
//! Applies to HTTP directory fetches only. The FTP max-connections reply is
//! handled by the worker (requeue, not retry) and never reaches this policy.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};
use url::Url;

use super::constants::{BACKOFF_CAP_SECS, MAX_ATTEMPTS, MAX_JITTER_MS};
use super::error::CrawlError;

/// Attempt count from which auth failures (401/403) stop being retried.
const AUTH_ATTEMPT_LIMIT: u32 = 3;

/// Attempt count up to which unclassified failures are retried.
const GENERIC_ATTEMPT_LIMIT: u32 = 4;

/// Decision on how to proceed after a failed fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAction {
    /// Retry after the given delay.
    Retry {
        /// How long to wait before the next attempt.
        delay: Duration,
        /// The attempt number the retry will be (1-indexed).
        attempt: u32,
    },

    /// Signal the directory's cancellation token and mark it errored.
    Cancel {
        /// Human-readable reason, recorded on the directory.
        reason: String,
    },
}

/// Retry policy for directory fetches.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with a custom attempt ceiling (used by tests to keep
    /// runs short).
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Returns the configured attempt ceiling.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Classifies a failed attempt and decides whether to retry.
    ///
    /// `attempt` is the 1-indexed number of the attempt that just failed.
    #[must_use]
    pub fn decide(&self, error: &CrawlError, url: &Url, attempt: u32) -> RetryAction {
        // cgi-bin endpoints loop forever on some servers; never retry them.
        if last_segment_is_cgi_bin(url) {
            return RetryAction::Cancel {
                reason: "cgi-bin endpoint".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            return RetryAction::Cancel {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let status = error.status_code();

        if status == Some(503) || status == Some(429) || error.is_connection_refused() {
            warn!(url = %url, attempt, error = %error, "rate limited");
            return self.retry(attempt);
        }

        if status == Some(404) || error.is_dns_failure() {
            return RetryAction::Cancel {
                reason: error.to_string(),
            };
        }

        if matches!(status, Some(401 | 403)) && attempt >= AUTH_ATTEMPT_LIMIT {
            return RetryAction::Cancel {
                reason: error.to_string(),
            };
        }

        match error {
            CrawlError::Cancelled { reason, .. } => RetryAction::Cancel {
                reason: reason.clone(),
            },
            CrawlError::FtpMaxConnections { .. } => RetryAction::Cancel {
                reason: error.to_string(),
            },
            _ if attempt <= GENERIC_ATTEMPT_LIMIT => self.retry(attempt),
            _ => RetryAction::Cancel {
                reason: error.to_string(),
            },
        }
    }

    fn retry(&self, attempt: u32) -> RetryAction {
        let delay = backoff_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );
        RetryAction::Retry {
            delay,
            attempt: attempt + 1,
        }
    }
}

/// Delay before the retry that follows failed attempt `attempt`:
/// `min(16, 2^attempt)` seconds plus uniform jitter in `[0, 200)` ms.
#[must_use]
pub fn backoff_delay(attempt: u32) -> Duration {
    let base_secs = 2u64
        .checked_pow(attempt)
        .map_or(BACKOFF_CAP_SECS, |v| v.min(BACKOFF_CAP_SECS));
    let jitter_ms = rand::thread_rng().gen_range(0..MAX_JITTER_MS);
    Duration::from_secs(base_secs) + Duration::from_millis(jitter_ms)
}

/// True when the URL's last path segment is `cgi-bin`.
fn last_segment_is_cgi_bin(url: &Url) -> bool {
    let path = url.path();
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    trimmed.rsplit('/').next() == Some("cgi-bin")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn plain_url() -> Url {
        url("https://host/files/")
    }

    #[test]
    fn test_503_retries() {
        let policy = RetryPolicy::default();
        let error = CrawlError::status("https://host/files/", 503);
        let action = policy.decide(&error, &plain_url(), 1);
        assert!(matches!(action, RetryAction::Retry { .. }));
    }

    #[test]
    fn test_429_retries_past_generic_limit() {
        // Rate limiting keeps retrying where unclassified errors would stop.
        let policy = RetryPolicy::default();
        let error = CrawlError::status("https://host/files/", 429);
        let action = policy.decide(&error, &plain_url(), 50);
        assert!(matches!(action, RetryAction::Retry { .. }));
    }

    #[test]
    fn test_404_cancels_immediately() {
        let policy = RetryPolicy::default();
        let error = CrawlError::status("https://host/files/", 404);
        let action = policy.decide(&error, &plain_url(), 1);
        assert!(matches!(action, RetryAction::Cancel { .. }));
    }

    #[test]
    fn test_403_retries_before_third_attempt() {
        let policy = RetryPolicy::default();
        let error = CrawlError::status("https://host/files/", 403);
        assert!(matches!(
            policy.decide(&error, &plain_url(), 1),
            RetryAction::Retry { .. }
        ));
        assert!(matches!(
            policy.decide(&error, &plain_url(), 2),
            RetryAction::Retry { .. }
        ));
    }

    #[test]
    fn test_403_cancels_from_third_attempt() {
        let policy = RetryPolicy::default();
        let error = CrawlError::status("https://host/files/", 403);
        let action = policy.decide(&error, &plain_url(), 3);
        assert!(matches!(action, RetryAction::Cancel { .. }));
    }

    #[test]
    fn test_401_cancels_from_third_attempt() {
        let policy = RetryPolicy::default();
        let error = CrawlError::status("https://host/files/", 401);
        let action = policy.decide(&error, &plain_url(), 3);
        assert!(matches!(action, RetryAction::Cancel { .. }));
    }

    #[test]
    fn test_cgi_bin_cancels_regardless_of_error() {
        let policy = RetryPolicy::default();
        let error = CrawlError::status("https://host/cgi-bin/", 503);
        let action = policy.decide(&error, &url("https://host/cgi-bin/"), 1);
        assert!(matches!(action, RetryAction::Cancel { .. }));
        if let RetryAction::Cancel { reason } = action {
            assert!(reason.contains("cgi-bin"));
        }
    }

    #[test]
    fn test_generic_error_retries_through_attempt_four() {
        let policy = RetryPolicy::default();
        let error = CrawlError::timeout("https://host/files/");
        assert!(matches!(
            policy.decide(&error, &plain_url(), 4),
            RetryAction::Retry { .. }
        ));
    }

    #[test]
    fn test_generic_error_cancels_after_attempt_four() {
        let policy = RetryPolicy::default();
        let error = CrawlError::timeout("https://host/files/");
        let action = policy.decide(&error, &plain_url(), 5);
        assert!(matches!(action, RetryAction::Cancel { .. }));
    }

    #[test]
    fn test_attempt_ceiling_cancels() {
        let policy = RetryPolicy::with_max_attempts(10);
        let error = CrawlError::status("https://host/files/", 503);
        let action = policy.decide(&error, &plain_url(), 10);
        assert!(matches!(action, RetryAction::Cancel { .. }));
        if let RetryAction::Cancel { reason } = action {
            assert!(reason.contains("exhausted"));
        }
    }

    #[test]
    fn test_backoff_delay_bounds() {
        // k-th retry waits at least min(16, 2^k) seconds and at most 200ms more.
        for attempt in 1..=6 {
            let expected = 2u64.pow(attempt).min(16);
            let delay = backoff_delay(attempt);
            assert!(
                delay >= Duration::from_secs(expected),
                "attempt {attempt}: {delay:?} below floor"
            );
            assert!(
                delay < Duration::from_secs(expected) + Duration::from_millis(200),
                "attempt {attempt}: {delay:?} above ceiling"
            );
        }
    }

    #[test]
    fn test_backoff_delay_caps_at_sixteen_seconds() {
        let delay = backoff_delay(40);
        assert!(delay >= Duration::from_secs(16));
        assert!(delay < Duration::from_secs(17));
    }

    #[test]
    fn test_last_segment_is_cgi_bin() {
        assert!(last_segment_is_cgi_bin(&url("https://host/cgi-bin/")));
        assert!(last_segment_is_cgi_bin(&url("https://host/a/cgi-bin")));
        assert!(!last_segment_is_cgi_bin(&url("https://host/cgi-bin/x/")));
    }
}
