//! Error types for the crawl module.
//!
//! One variant per classified failure kind, so the retry policy can dispatch
//! on the error shape instead of string-matching at the call site. Context
//! (the URL involved) is attached by helper constructors; there is no blanket
//! `From<reqwest::Error>` because the source error carries no URL.

use thiserror::Error;

/// Errors that can occur while fetching or parsing one directory.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Network-level error (DNS resolution, connection refused, TLS, etc.)
    #[error("network error fetching {url}: {source}")]
    Transport {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// HTTP error response (non-2xx status).
    #[error("HTTP {status} fetching {url}")]
    Status {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Request or directory-ceiling timeout.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// A parser ran but produced no entries where entries were expected.
    #[error("parse failure for {url}: {message}")]
    Parse {
        /// The listing URL.
        url: String,
        /// What the parser had to say.
        message: String,
    },

    /// The URL could not be parsed or has an unsupported shape.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The offending URL string.
        url: String,
    },

    /// FTP protocol error other than the max-connections reply.
    #[error("FTP error for {url}: {message}")]
    Ftp {
        /// The listing URL.
        url: String,
        /// Server or client message.
        message: String,
    },

    /// The FTP server refused the connection because its connection budget
    /// is spent. Not a failure: the directory is requeued and the worker
    /// winds down.
    #[error("FTP max connections reached for {url}")]
    FtpMaxConnections {
        /// The listing URL that will be requeued.
        url: String,
    },

    /// The directory's cancellation token fired.
    #[error("cancelled fetching {url}: {reason}")]
    Cancelled {
        /// The listing URL.
        url: String,
        /// Why the token was signalled.
        reason: String,
    },
}

impl CrawlError {
    /// Creates a transport error from a reqwest error.
    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn status(url: impl Into<String>, status: u16) -> Self {
        Self::Status {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a parse-failure error.
    pub fn parse(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid-URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an FTP error.
    pub fn ftp(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Ftp {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates an FTP max-connections outcome.
    pub fn ftp_max_connections(url: impl Into<String>) -> Self {
        Self::FtpMaxConnections { url: url.into() }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Cancelled {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Returns the HTTP status code when this is a status error.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the transport error is a refused connection.
    ///
    /// reqwest does not expose the io::ErrorKind of the failure, so this
    /// inspects the error chain text (same approach the TLS check below
    /// takes).
    #[must_use]
    pub fn is_connection_refused(&self) -> bool {
        match self {
            Self::Transport { source, .. } => {
                source_text(source).contains("connection refused")
            }
            _ => false,
        }
    }

    /// True when the transport error is a failed DNS lookup.
    #[must_use]
    pub fn is_dns_failure(&self) -> bool {
        match self {
            Self::Transport { source, .. } => {
                let text = source_text(source);
                text.contains("dns error")
                    || text.contains("failed to lookup address")
                    || text.contains("no such host")
                    || text.contains("name or service not known")
            }
            _ => false,
        }
    }
}

/// Lowercased display of a reqwest error including its source chain.
fn source_text(error: &reqwest::Error) -> String {
    use std::error::Error as _;

    let mut text = error.to_string().to_lowercase();
    let mut source = error.source();
    while let Some(inner) = source {
        text.push(' ');
        text.push_str(&inner.to_string().to_lowercase());
        source = inner.source();
    }
    text
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_display() {
        let error = CrawlError::status("https://host/files/", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(msg.contains("https://host/files/"), "Expected URL in: {msg}");
    }

    #[test]
    fn test_timeout_error_display() {
        let error = CrawlError::timeout("https://host/files/");
        assert!(error.to_string().contains("timeout"));
        assert!(error.to_string().contains("https://host/files/"));
    }

    #[test]
    fn test_parse_error_display() {
        let error = CrawlError::parse("https://host/files/", "no entries found");
        let msg = error.to_string();
        assert!(msg.contains("parse failure"), "Expected kind in: {msg}");
        assert!(msg.contains("no entries found"), "Expected detail in: {msg}");
    }

    #[test]
    fn test_invalid_url_display() {
        let error = CrawlError::invalid_url("not-a-url");
        assert!(error.to_string().contains("invalid URL"));
        assert!(error.to_string().contains("not-a-url"));
    }

    #[test]
    fn test_ftp_max_connections_display() {
        let error = CrawlError::ftp_max_connections("ftp://host/pub/");
        let msg = error.to_string();
        assert!(msg.contains("max connections"), "Expected kind in: {msg}");
        assert!(msg.contains("ftp://host/pub/"), "Expected URL in: {msg}");
    }

    #[test]
    fn test_cancelled_display_includes_reason() {
        let error = CrawlError::cancelled("https://host/x/", "404 not found");
        let msg = error.to_string();
        assert!(msg.contains("cancelled"));
        assert!(msg.contains("404 not found"));
    }

    #[test]
    fn test_status_code_accessor() {
        assert_eq!(CrawlError::status("u", 503).status_code(), Some(503));
        assert_eq!(CrawlError::timeout("u").status_code(), None);
    }

    #[test]
    fn test_non_transport_errors_are_not_refused_or_dns() {
        let error = CrawlError::status("u", 503);
        assert!(!error.is_connection_refused());
        assert!(!error.is_dns_failure());
    }
}
