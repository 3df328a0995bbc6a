//! Generic HTML directory-index parser.
//!
//! Handles the long tail of autoindex pages: Apache and nginx `<pre>`
//! listings, table-based themes, and bare link dumps. Anchors are resolved
//! against the page URL; sort links, fragments, and parent references are
//! dropped. Size and timestamp tokens are scraped best-effort from the text
//! around each anchor (the trailing text node in `<pre>` listings, the
//! sibling cells in table listings).

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::trace;
use url::Url;

use crate::crawl::error::CrawlError;

use super::{DirectoryParser, Listing, ParseContext, ParsedDirectory, ParsedFile};

/// Parser label for generic HTML listings.
pub const GENERIC_HTML_LABEL: &str = "generic_html";

static ANCHOR_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a[href]").unwrap_or_else(|_| unreachable!("static selector"))
});

static TD_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("td").unwrap_or_else(|_| unreachable!("static selector"))
});

/// `12-Jan-2024 13:55`, `2024-01-12 13:55`, or `2024-01-12T13:55:02Z` styles.
static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\d{2}-[A-Za-z]{3}-\d{4}\s+\d{2}:\d{2}(?::\d{2})?|\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}(?::\d{2})?Z?",
    )
    .unwrap_or_else(|_| unreachable!("static regex"))
});

/// A trailing size token: `1234`, `1.2K`, `3.4 MiB`, `512 B`.
static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*([KMGT]i?B?|B)?\s*$")
        .unwrap_or_else(|_| unreachable!("static regex"))
});

/// Accept-all fallback parser for HTML directory indexes.
#[derive(Debug, Default)]
pub struct GenericHtmlParser;

impl GenericHtmlParser {
    /// Creates the parser.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DirectoryParser for GenericHtmlParser {
    fn label(&self) -> &'static str {
        GENERIC_HTML_LABEL
    }

    fn detect(&self, _ctx: &ParseContext<'_>) -> bool {
        true
    }

    async fn parse(&self, ctx: &ParseContext<'_>) -> Result<Listing, CrawlError> {
        Ok(parse_html_listing(ctx.url, &ctx.page.body))
    }
}

/// Extracts a listing from HTML. Empty listings are legitimate (a directory
/// can be empty); they are not a parse failure.
#[must_use]
pub fn parse_html_listing(base: &Url, body: &str) -> Listing {
    let document = Html::parse_document(body);
    let mut listing = Listing::empty(GENERIC_HTML_LABEL);
    let mut seen: HashSet<String> = HashSet::new();

    for anchor in document.select(&ANCHOR_SELECTOR) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(mut target) = resolve_href(base, href) else {
            continue;
        };
        target.set_fragment(None);

        if is_parent_or_self(base, &target) {
            continue;
        }
        if !matches!(target.scheme(), "http" | "https" | "ftp" | "ftps") {
            continue;
        }
        if !seen.insert(target.to_string()) {
            continue;
        }

        let name = display_name(&target);
        if target.path().ends_with('/') {
            listing.subdirectories.push(ParsedDirectory {
                url: target,
                name,
            });
        } else {
            let (size, timestamp) = surrounding_metadata(anchor);
            listing.files.push(ParsedFile {
                url: target,
                name,
                size,
                timestamp,
            });
        }
    }

    trace!(
        subdirectories = listing.subdirectories.len(),
        files = listing.files.len(),
        "parsed HTML listing"
    );
    listing
}

/// Resolves an href against the page URL, dropping obvious non-content
/// links (fragments, sort queries, javascript/mailto).
fn resolve_href(base: &Url, href: &str) -> Option<Url> {
    let trimmed = href.trim();
    if trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed.starts_with('?')
        || trimmed.starts_with("javascript:")
        || trimmed.starts_with("mailto:")
    {
        return None;
    }
    match Url::parse(trimmed) {
        Ok(url) => Some(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => base.join(trimmed).ok(),
        Err(_) => None,
    }
}

/// True when the resolved URL points at the page itself or any ancestor
/// (`..` style backlinks must not re-enter the queue).
fn is_parent_or_self(base: &Url, candidate: &Url) -> bool {
    if candidate == base {
        return true;
    }
    candidate.host_str() == base.host_str()
        && candidate.path().len() < base.path().len()
        && base.path().starts_with(candidate.path())
}

/// Percent-decoded last path segment.
fn display_name(url: &Url) -> String {
    let path = url.path();
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    let segment = trimmed.rsplit('/').next().unwrap_or(trimmed);
    urlencoding::decode(segment)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

/// Scrapes size and timestamp from the text around an anchor.
///
/// Table listings carry them in sibling cells of the anchor's row; `<pre>`
/// listings carry them in the text node that follows the anchor.
fn surrounding_metadata(anchor: ElementRef<'_>) -> (Option<u64>, Option<String>) {
    let row_text = anchor
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "tr")
        .map(|row| {
            row.select(&TD_SELECTOR)
                .map(|cell| cell.text().collect::<String>())
                .collect::<Vec<_>>()
                .join("  ")
        });

    let text = row_text.unwrap_or_else(|| {
        anchor
            .next_siblings()
            .find_map(|node| node.value().as_text().map(|t| t.to_string()))
            .unwrap_or_default()
    });

    let timestamp = TIMESTAMP_RE
        .find(&text)
        .map(|m| m.as_str().trim().to_string());

    // Strip the timestamp before looking for a trailing size token, so the
    // minutes field is never mistaken for a size.
    let remainder = match TIMESTAMP_RE.find(&text) {
        Some(m) => format!("{} {}", &text[..m.start()], &text[m.end()..]),
        None => text,
    };
    let size = parse_size_token(remainder.trim());

    (size, timestamp)
}

/// Parses a human-readable size token into bytes. `-` and empty text mean
/// "no size".
#[must_use]
pub fn parse_size_token(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() || text == "-" {
        return None;
    }
    let captures = SIZE_RE.captures(text)?;
    let value: f64 = captures.get(1)?.as_str().parse().ok()?;
    let multiplier = match captures
        .get(2)
        .map(|m| m.as_str().to_ascii_uppercase())
        .as_deref()
    {
        None | Some("B") => 1.0,
        Some(unit) if unit.starts_with('K') => 1024.0,
        Some(unit) if unit.starts_with('M') => 1024.0 * 1024.0,
        Some(unit) if unit.starts_with('G') => 1024.0 * 1024.0 * 1024.0,
        Some(unit) if unit.starts_with('T') => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        Some(_) => return None,
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some((value * multiplier) as u64)
}
