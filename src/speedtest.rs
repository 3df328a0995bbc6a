//! Throughput measurement against the indexed server.
//!
//! Streams the largest discovered file for a bounded window and reports the
//! achieved rate. Read-only against the session; runs after the crawl.

use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tracing::{debug, info};
use url::Url;

use crate::crawl::error::CrawlError;
use crate::crawl::http::map_reqwest_error;
use crate::session::Session;

/// Measurement window.
const MAX_DURATION: Duration = Duration::from_secs(10);

/// Byte budget; the transfer stops early once this much arrived.
const MAX_BYTES: u64 = 50 * 1024 * 1024;

/// Result of one speed test.
#[derive(Debug, Clone)]
pub struct SpeedtestResult {
    /// The file that was sampled.
    pub url: String,
    /// Bytes transferred inside the window.
    pub bytes: u64,
    /// Wall time spent transferring.
    pub elapsed: Duration,
}

impl SpeedtestResult {
    /// Achieved rate in megabytes per second.
    #[must_use]
    pub fn megabytes_per_second(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds <= 0.0 {
            return 0.0;
        }
        (self.bytes as f64 / (1024.0 * 1024.0)) / seconds
    }
}

/// Samples download throughput using the largest known HTTP file.
///
/// Returns `Ok(None)` when the session has no HTTP file with a known size
/// to sample.
pub async fn run_speedtest(session: &Session) -> Result<Option<SpeedtestResult>, CrawlError> {
    let Some(target) = largest_http_file(session) else {
        debug!("no sized HTTP file to sample");
        return Ok(None);
    };
    let url = Url::parse(&target).map_err(|_| CrawlError::invalid_url(target.clone()))?;
    info!(url = %url, "speed test starting");

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| CrawlError::parse(url.as_str(), format!("client build failed: {e}")))?;

    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| map_reqwest_error(url.as_str(), e))?;
    if !response.status().is_success() {
        return Err(CrawlError::status(url.as_str(), response.status().as_u16()));
    }

    let started = Instant::now();
    let mut bytes: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| map_reqwest_error(url.as_str(), e))?;
        bytes += chunk.len() as u64;
        if started.elapsed() >= MAX_DURATION || bytes >= MAX_BYTES {
            break;
        }
    }

    let result = SpeedtestResult {
        url: url.to_string(),
        bytes,
        elapsed: started.elapsed(),
    };
    info!(
        bytes = result.bytes,
        elapsed_ms = result.elapsed.as_millis(),
        rate_mbps = result.megabytes_per_second(),
        "speed test finished"
    );
    Ok(Some(result))
}

/// The largest file with a known size on an HTTP(S) URL.
fn largest_http_file(session: &Session) -> Option<String> {
    session
        .file_urls_in_order()
        .into_iter()
        .filter_map(|url| session.file(&url))
        .filter(|file| file.size_known() && file.url.starts_with("http"))
        .max_by_key(|file| file.size)
        .map(|file| file.url)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::session::FileEntry;

    #[test]
    fn test_largest_http_file_picks_biggest_known() {
        let session = Session::new(&Url::parse("https://host/files/").unwrap());
        for (url, size) in [
            ("https://host/files/small.bin", 10),
            ("https://host/files/big.bin", 1000),
            ("https://host/files/unknown.bin", crate::session::FILE_SIZE_UNKNOWN),
        ] {
            session.add_file(FileEntry {
                url: url.to_string(),
                name: url.to_string(),
                size,
                timestamp: None,
            });
        }
        assert_eq!(
            largest_http_file(&session).as_deref(),
            Some("https://host/files/big.bin")
        );
    }

    #[test]
    fn test_largest_http_file_skips_ftp() {
        let session = Session::new(&Url::parse("ftp://host/pub/").unwrap());
        session.add_file(FileEntry {
            url: "ftp://host/pub/big.iso".to_string(),
            name: "big.iso".to_string(),
            size: 100,
            timestamp: None,
        });
        assert_eq!(largest_http_file(&session), None);
    }

    #[test]
    fn test_rate_computation() {
        let result = SpeedtestResult {
            url: "https://host/f".to_string(),
            bytes: 10 * 1024 * 1024,
            elapsed: Duration::from_secs(2),
        };
        assert!((result.megabytes_per_second() - 5.0).abs() < f64::EPSILON);
    }
}
