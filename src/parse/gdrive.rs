//! Google Drive folder indexer.
//!
//! Public Drive folders are enumerated through the `embeddedfolderview`
//! endpoint, which serves static HTML (the normal Drive UI is all
//! JavaScript). Subfolders keep their `drive.google.com/drive/folders/<id>`
//! URLs; files are emitted as direct-download `uc?export=download` URLs.
//! Both live on Google storage hosts, which is why this host is exempt from
//! the scope predicate.

use std::sync::LazyLock;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::crawl::error::CrawlError;
use crate::scope::GOOGLE_DRIVE_HOST;

use super::{DirectoryParser, Listing, ParseContext, ParsedDirectory, ParsedFile};

/// Parser label for Google Drive folders.
pub const GDRIVE_LABEL: &str = "google_drive";

static ENTRY_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("div.flip-entry").unwrap_or_else(|_| unreachable!("static selector"))
});

static ANCHOR_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a[href]").unwrap_or_else(|_| unreachable!("static selector"))
});

static TITLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".flip-entry-title").unwrap_or_else(|_| unreachable!("static selector"))
});

/// Parser for public Google Drive folders.
#[derive(Debug, Default)]
pub struct GoogleDriveParser;

impl GoogleDriveParser {
    /// Creates the parser.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DirectoryParser for GoogleDriveParser {
    fn label(&self) -> &'static str {
        GDRIVE_LABEL
    }

    fn detect(&self, ctx: &ParseContext<'_>) -> bool {
        ctx.url.host_str() == Some(GOOGLE_DRIVE_HOST)
    }

    async fn parse(&self, ctx: &ParseContext<'_>) -> Result<Listing, CrawlError> {
        let folder_id = folder_id_from_url(ctx.url).ok_or_else(|| {
            CrawlError::invalid_url(format!("{} (no Drive folder id)", ctx.url))
        })?;

        let view_url = Url::parse(&format!(
            "https://{GOOGLE_DRIVE_HOST}/embeddedfolderview?id={folder_id}"
        ))
        .map_err(|_| CrawlError::invalid_url(ctx.url.as_str()))?;

        // The directory page itself is the JS app; the folder view is what
        // actually lists entries.
        let body = ctx.fetcher.get_text(&view_url).await?;
        let listing = parse_folder_view(&body);
        debug!(
            folder_id = %folder_id,
            subdirectories = listing.subdirectories.len(),
            files = listing.files.len(),
            "parsed drive folder view"
        );
        Ok(listing)
    }
}

/// Extracts the folder id from `/drive/folders/<id>` or `?id=` URLs.
#[must_use]
pub fn folder_id_from_url(url: &Url) -> Option<String> {
    if let Some(id) = url
        .query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.into_owned())
    {
        return Some(id);
    }
    let segments: Vec<&str> = url.path_segments()?.collect();
    let position = segments.iter().position(|segment| *segment == "folders")?;
    segments
        .get(position + 1)
        .filter(|id| !id.is_empty())
        .map(|id| (*id).to_string())
}

/// Parses the static folder-view HTML into a listing.
#[must_use]
pub fn parse_folder_view(body: &str) -> Listing {
    let document = Html::parse_document(body);
    let mut listing = Listing::empty(GDRIVE_LABEL);

    for entry in document.select(&ENTRY_SELECTOR) {
        let Some(anchor) = entry.select(&ANCHOR_SELECTOR).next() else {
            continue;
        };
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let name = entry
            .select(&TITLE_SELECTOR)
            .next()
            .map(|title| title.text().collect::<String>().trim().to_string())
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| href.to_string());

        if let Some(id) = id_after(href, "/folders/") {
            let Ok(url) = Url::parse(&format!(
                "https://{GOOGLE_DRIVE_HOST}/drive/folders/{id}"
            )) else {
                continue;
            };
            listing.subdirectories.push(ParsedDirectory { url, name });
        } else if let Some(id) = id_after(href, "/file/d/") {
            let Ok(url) = Url::parse(&format!(
                "https://{GOOGLE_DRIVE_HOST}/uc?export=download&id={id}"
            )) else {
                continue;
            };
            listing.files.push(ParsedFile {
                url,
                name,
                size: None,
                timestamp: None,
            });
        }
    }
    listing
}

/// The path segment following `marker`, stripped of trailing junk.
fn id_after(href: &str, marker: &str) -> Option<String> {
    let start = href.find(marker)? + marker.len();
    let id: String = href[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if id.is_empty() { None } else { Some(id) }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_id_from_folders_path() {
        let url = Url::parse("https://drive.google.com/drive/folders/1AbCdEf?usp=sharing").unwrap();
        assert_eq!(folder_id_from_url(&url).as_deref(), Some("1AbCdEf"));
    }

    #[test]
    fn test_folder_id_from_query() {
        let url = Url::parse("https://drive.google.com/embeddedfolderview?id=1XyZ").unwrap();
        assert_eq!(folder_id_from_url(&url).as_deref(), Some("1XyZ"));
    }

    #[test]
    fn test_folder_id_absent() {
        let url = Url::parse("https://drive.google.com/about").unwrap();
        assert_eq!(folder_id_from_url(&url), None);
    }

    const FOLDER_VIEW: &str = r#"<html><body>
<div class="flip-entry"><a href="https://drive.google.com/drive/folders/1Sub?usp=drive"><div class="flip-entry-title">season 1</div></a></div>
<div class="flip-entry"><a href="https://drive.google.com/file/d/1File_a-b/view"><div class="flip-entry-title">episode.mkv</div></a></div>
</body></html>"#;

    #[test]
    fn test_parse_folder_view() {
        let listing = parse_folder_view(FOLDER_VIEW);
        assert_eq!(listing.subdirectories.len(), 1);
        assert_eq!(listing.subdirectories[0].name, "season 1");
        assert_eq!(
            listing.subdirectories[0].url.as_str(),
            "https://drive.google.com/drive/folders/1Sub"
        );
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].name, "episode.mkv");
        assert_eq!(
            listing.files[0].url.as_str(),
            "https://drive.google.com/uc?export=download&id=1File_a-b"
        );
    }

    #[test]
    fn test_parse_folder_view_empty() {
        let listing = parse_folder_view("<html><body></body></html>");
        assert!(listing.subdirectories.is_empty());
        assert!(listing.files.is_empty());
    }
}
