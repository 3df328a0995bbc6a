//! GdIndex (GoIndex) parser.
//!
//! GoIndex deployments front a Google Drive with a Cloudflare Worker that
//! answers a JSON POST on any directory path. Directories are entries whose
//! mime type is the Drive folder type; everything else is a file served
//! from the same path.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::crawl::error::CrawlError;

use super::{DirectoryParser, Listing, ParseContext, ParsedDirectory, ParsedFile};

/// Parser label for GdIndex servers.
pub const GDINDEX_LABEL: &str = "gdindex";

/// Session parameter carrying the GdIndex root id. Its presence short-cuts
/// detection for every directory after the first.
pub const GDINDEX_ROOT_ID_PARAM: &str = "gdindex_root_id";

/// Drive mime type marking a folder entry.
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Body markers that identify a GoIndex front page.
const BODY_MARKERS: [&str; 2] = ["GoIndex", "go2index"];

/// Parser for GoIndex-style Drive indexes.
#[derive(Debug, Default)]
pub struct GdIndexParser;

impl GdIndexParser {
    /// Creates the parser.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DirectoryParser for GdIndexParser {
    fn label(&self) -> &'static str {
        GDINDEX_LABEL
    }

    fn detect(&self, ctx: &ParseContext<'_>) -> bool {
        if ctx.session.parameter(GDINDEX_ROOT_ID_PARAM).is_some() {
            return true;
        }
        BODY_MARKERS
            .iter()
            .any(|marker| ctx.page.body.contains(marker))
    }

    async fn parse(&self, ctx: &ParseContext<'_>) -> Result<Listing, CrawlError> {
        if ctx.session.parameter(GDINDEX_ROOT_ID_PARAM).is_none() {
            let root_id = extract_root_id(&ctx.page.body).unwrap_or_else(|| "root".to_string());
            debug!(root_id = %root_id, "gdindex detected");
            ctx.session.set_parameter(GDINDEX_ROOT_ID_PARAM, &root_id);
        }

        let payload = json!({ "password": "" });
        let response = ctx.fetcher.post_json(ctx.url, &payload).await?;
        let files = response
            .get("files")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| {
                CrawlError::parse(ctx.url.as_str(), "gdindex response missing files array")
            })?;

        let mut listing = Listing::empty(GDINDEX_LABEL);
        for entry in files {
            let Some(name) = entry.get("name").and_then(serde_json::Value::as_str) else {
                continue;
            };
            let is_folder = entry
                .get("mimeType")
                .and_then(serde_json::Value::as_str)
                .is_some_and(|mime| mime == FOLDER_MIME);
            let timestamp = entry
                .get("modifiedTime")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string);

            if is_folder {
                let Some(url) = join_child(ctx.url, name, true) else {
                    continue;
                };
                listing.subdirectories.push(ParsedDirectory {
                    url,
                    name: name.to_string(),
                });
            } else {
                let Some(url) = join_child(ctx.url, name, false) else {
                    continue;
                };
                let size = match entry.get("size") {
                    Some(serde_json::Value::Number(n)) => n.as_u64(),
                    Some(serde_json::Value::String(s)) => s.parse().ok(),
                    _ => None,
                };
                listing.files.push(ParsedFile {
                    url,
                    name: name.to_string(),
                    size,
                    timestamp,
                });
            }
        }
        Ok(listing)
    }
}

/// Joins a child entry name onto the directory URL, percent-encoding it.
fn join_child(base: &Url, name: &str, directory: bool) -> Option<Url> {
    let encoded = urlencoding::encode(name);
    let suffix = if directory {
        format!("{encoded}/")
    } else {
        encoded.into_owned()
    };
    base.join(&suffix).ok()
}

/// Pulls the configured root id out of a GoIndex front page, when present
/// (the worker script inlines it as `"root": "<id>"`).
fn extract_root_id(body: &str) -> Option<String> {
    let marker = "\"root\"";
    let start = body.find(marker)? + marker.len();
    let rest = body[start..].trim_start_matches([':', ' ', '\t']);
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    let id = &rest[..end];
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}
