//! Calibre content-server parser.
//!
//! Calibre exposes its library over `/ajax/search` (paged book ids) and
//! `/ajax/books` (per-id metadata including per-format file sizes). Books
//! are emitted as files under `/get/<FORMAT>/<id>`; there are no
//! subdirectories. Enumeration is paced to at most one 100-book page per
//! 30 seconds so a large library does not hammer the server.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

use crate::crawl::error::CrawlError;

use super::{DirectoryParser, Listing, ParseContext, ParsedFile};

/// Parser label for Calibre servers.
pub const CALIBRE_LABEL: &str = "calibre";

/// Body marker identifying a Calibre server; the quoted value that follows
/// is the server version.
const VERSION_MARKER: &str = "CALIBRE_VERSION = \"";

/// Session parameter holding the detected server version.
const VERSION_PARAM: &str = "calibre_version";

/// Books fetched per search page.
const PAGE_SIZE: usize = 100;

/// Pacing window between search pages.
const PAGE_DELAY: Duration = Duration::from_secs(30);

/// Parser for Calibre content servers.
#[derive(Debug, Default)]
pub struct CalibreParser;

impl CalibreParser {
    /// Creates the parser.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DirectoryParser for CalibreParser {
    fn label(&self) -> &'static str {
        CALIBRE_LABEL
    }

    fn detect(&self, ctx: &ParseContext<'_>) -> bool {
        let server_says_calibre = ctx
            .page
            .server
            .as_deref()
            .is_some_and(|server| server.to_ascii_lowercase().contains("calibre"));
        server_says_calibre || ctx.page.body.contains(VERSION_MARKER)
    }

    async fn parse(&self, ctx: &ParseContext<'_>) -> Result<Listing, CrawlError> {
        if let Some(version) = extract_version(&ctx.page.body) {
            debug!(version = %version, "calibre server detected");
            ctx.session.set_parameter(VERSION_PARAM, &version);
        }

        let mut listing = Listing::empty(CALIBRE_LABEL);
        let mut offset = 0usize;

        loop {
            let search_url = ajax_url(
                ctx.url,
                &format!("/ajax/search?num={PAGE_SIZE}&offset={offset}"),
            )?;
            let page = ctx.fetcher.get_json(&search_url).await?;
            let total = page
                .get("total_num")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0) as usize;
            let ids: Vec<u64> = page
                .get("book_ids")
                .and_then(serde_json::Value::as_array)
                .map(|ids| ids.iter().filter_map(serde_json::Value::as_u64).collect())
                .unwrap_or_default();

            if ids.is_empty() {
                break;
            }

            self.append_books(ctx, &ids, &mut listing).await?;
            offset += ids.len();

            if offset >= total {
                break;
            }
            debug!(offset, total, "pacing calibre enumeration");
            tokio::time::sleep(PAGE_DELAY).await;
        }

        if listing.files.is_empty() {
            warn!(url = %ctx.url, "calibre server reported an empty library");
        }
        Ok(listing)
    }
}

impl CalibreParser {
    async fn append_books(
        &self,
        ctx: &ParseContext<'_>,
        ids: &[u64],
        listing: &mut Listing,
    ) -> Result<(), CrawlError> {
        let joined = ids
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let books_url = ajax_url(ctx.url, &format!("/ajax/books?ids={joined}"))?;
        let books = ctx.fetcher.get_json(&books_url).await?;
        let Some(books) = books.as_object() else {
            return Err(CrawlError::parse(
                books_url.as_str(),
                "expected a book map",
            ));
        };

        for (id, book) in books {
            let title = book
                .get("title")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("untitled");
            let Some(formats) = book
                .get("format_metadata")
                .and_then(serde_json::Value::as_object)
            else {
                continue;
            };
            for (format, metadata) in formats {
                let upper = format.to_ascii_uppercase();
                let Ok(url) = ajax_url(ctx.url, &format!("/get/{upper}/{id}")) else {
                    continue;
                };
                listing.files.push(ParsedFile {
                    url,
                    name: format!("{title}.{}", format.to_ascii_lowercase()),
                    size: metadata.get("size").and_then(serde_json::Value::as_u64),
                    timestamp: metadata
                        .get("mtime")
                        .and_then(serde_json::Value::as_str)
                        .map(str::to_string),
                });
            }
        }
        Ok(())
    }
}

/// Joins a server-absolute endpoint path against the listing URL.
fn ajax_url(base: &Url, path: &str) -> Result<Url, CrawlError> {
    base.join(path)
        .map_err(|_| CrawlError::invalid_url(format!("{base}{path}")))
}

/// Extracts the quoted version value following the body marker.
#[must_use]
pub fn extract_version(body: &str) -> Option<String> {
    let start = body.find(VERSION_MARKER)? + VERSION_MARKER.len();
    let rest = &body[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}
