//! Listing parsers and the dispatch registry.
//!
//! A listing parser turns one fetched page into `{subdirectories, files}`.
//! Parsers are registered as `(detector, parser)` pairs and consulted in
//! declared order; the first detector that matches wins. Special servers
//! (GdIndex, Google Drive, Calibre) are detected before the generic HTML
//! parser, which accepts anything. New server flavors are added by
//! registering another parser, not by editing the worker.
//!
//! FTP and FTPS URLs never reach this registry: the worker dispatches them
//! by scheme to the FTP fetcher, which produces a [`Listing`] directly.

mod calibre;
mod gdindex;
mod gdrive;
mod html;

pub use calibre::CalibreParser;
pub use gdindex::{GDINDEX_ROOT_ID_PARAM, GdIndexParser};
pub use gdrive::GoogleDriveParser;
pub use html::GenericHtmlParser;

use async_trait::async_trait;
use url::Url;

use crate::crawl::error::CrawlError;
use crate::crawl::http::{FetchedPage, HttpFetcher};
use crate::session::Session;

/// A subdirectory discovered in a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDirectory {
    /// Absolute URL.
    pub url: Url,
    /// Display name.
    pub name: String,
}

/// A file discovered in a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFile {
    /// Absolute URL.
    pub url: Url,
    /// Display name.
    pub name: String,
    /// Size in bytes when the listing provided one.
    pub size: Option<u64>,
    /// Listing-provided timestamp, verbatim.
    pub timestamp: Option<String>,
}

/// The result of parsing one directory page.
#[derive(Debug, Clone)]
pub struct Listing {
    /// Label of the parser that produced this listing (reported per
    /// directory and in the session snapshot).
    pub parser: &'static str,
    /// When false, the parser already enumerated every level and the
    /// subdirectories must be recorded but not enqueued.
    pub recurse: bool,
    /// Subdirectories in parse order.
    pub subdirectories: Vec<ParsedDirectory>,
    /// Files in parse order.
    pub files: Vec<ParsedFile>,
}

impl Listing {
    /// An empty recursive listing with the given label.
    #[must_use]
    pub fn empty(parser: &'static str) -> Self {
        Self {
            parser,
            recurse: true,
            subdirectories: Vec::new(),
            files: Vec::new(),
        }
    }
}

/// Everything a parser may look at: the fetched page plus session state and
/// the shared fetcher for parsers that page through follow-up requests.
pub struct ParseContext<'a> {
    /// The directory URL being parsed (post-redirect).
    pub url: &'a Url,
    /// The fetched page.
    pub page: &'a FetchedPage,
    /// Shared session state (server parameters, counters).
    pub session: &'a Session,
    /// Shared HTTP fetcher for follow-up requests.
    pub fetcher: &'a HttpFetcher,
}

/// One pluggable listing parser.
#[async_trait]
pub trait DirectoryParser: Send + Sync {
    /// Short label identifying this parser in reports.
    fn label(&self) -> &'static str;

    /// Whether this parser recognizes the page.
    fn detect(&self, ctx: &ParseContext<'_>) -> bool;

    /// Extracts the listing.
    async fn parse(&self, ctx: &ParseContext<'_>) -> Result<Listing, CrawlError>;
}

/// Ordered registry of listing parsers.
pub struct ParserRegistry {
    parsers: Vec<Box<dyn DirectoryParser>>,
}

impl ParserRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    /// The standard detection order: GdIndex, Google Drive, Calibre, then
    /// the generic HTML parser as the accept-all fallback.
    #[must_use]
    pub fn with_default_parsers() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(GdIndexParser::new()));
        registry.register(Box::new(GoogleDriveParser::new()));
        registry.register(Box::new(CalibreParser::new()));
        registry.register(Box::new(GenericHtmlParser::new()));
        registry
    }

    /// Appends a parser; earlier registrations win detection.
    pub fn register(&mut self, parser: Box<dyn DirectoryParser>) {
        self.parsers.push(parser);
    }

    /// Dispatches to the first parser whose detector matches.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Parse`] when no parser matches (cannot happen
    /// while the generic HTML parser is registered last) or when the
    /// matching parser fails.
    pub async fn dispatch(&self, ctx: &ParseContext<'_>) -> Result<Listing, CrawlError> {
        for parser in &self.parsers {
            if parser.detect(ctx) {
                tracing::debug!(parser = parser.label(), url = %ctx.url, "parser selected");
                return parser.parse(ctx).await;
            }
        }
        Err(CrawlError::parse(
            ctx.url.as_str(),
            "no parser recognized the page",
        ))
    }

    /// Label of the parser that would handle this page, for tests and
    /// diagnostics.
    #[must_use]
    pub fn detect_label(&self, ctx: &ParseContext<'_>) -> Option<&'static str> {
        self.parsers
            .iter()
            .find(|parser| parser.detect(ctx))
            .map(|parser| parser.label())
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_default_parsers()
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserRegistry")
            .field("parsers", &self.parsers.len())
            .finish()
    }
}
