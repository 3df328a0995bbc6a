//! Concurrent indexing engine for open directory listings.
//!
//! The engine runs two cooperative worker pools over lock-free queues: N
//! directory workers that fetch and parse listings (recursing into scope),
//! and N size workers that resolve file sizes the listings did not provide.
//! Shared state lives in one [`crate::session::Session`]; a statistics
//! observer reports progress off the data path.
//!
//! # Example
//!
//! ```no_run
//! use odindexer_core::crawl::{Indexer, IndexerOptions};
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let root = Url::parse("https://example.com/files/")?;
//! let indexer = Indexer::new(root, IndexerOptions::default())?;
//! indexer.run().await?;
//! println!("{} files found", indexer.session().total_files());
//! # Ok(())
//! # }
//! ```

pub mod constants;
mod engine;
pub mod error;
pub mod ftp;
pub mod http;
pub mod retry;
mod stats;

pub use constants::{DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_WORKERS};
pub use engine::Indexer;
pub use error::CrawlError;
pub use ftp::{FtpRegistry, scrub_ip_addresses};
pub use http::{FetchedPage, HttpFetcher};
pub use retry::{RetryAction, RetryPolicy, backoff_delay};

/// Engine configuration, built from the CLI flags and threaded explicitly
/// through the crawl (no globals).
#[derive(Debug, Clone)]
pub struct IndexerOptions {
    /// Worker count for both pools.
    pub threads: usize,
    /// Per-request HTTP timeout in seconds.
    pub timeout_secs: u64,
    /// Resolve every file size over HTTP even when the listing provided one.
    pub exact_file_sizes: bool,
    /// Resolve sizes by streaming the file instead of a HEAD request.
    pub determine_size_by_download: bool,
    /// Override for the default User-Agent.
    pub user_agent: Option<String>,
    /// HTTP Basic / FTP user.
    pub username: Option<String>,
    /// HTTP Basic / FTP password.
    pub password: Option<String>,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self {
            threads: DEFAULT_WORKERS,
            timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            exact_file_sizes: false,
            determine_size_by_download: false,
            user_agent: None,
            username: None,
            password: None,
        }
    }
}
