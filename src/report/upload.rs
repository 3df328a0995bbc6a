//! URL-list upload to paste hosts.
//!
//! Pushes the URL list text to a primary paste host and falls back to a
//! secondary when the primary is down or rejects the payload. Both accept
//! a raw text POST, so no extra request plumbing is needed.

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

/// Primary paste host; answers a raw POST with the paste URL as the body.
pub const PRIMARY_PASTE_ENDPOINT: &str = "https://paste.rs/";

/// Fallback paste host; answers with `{"key": "..."}`.
pub const FALLBACK_PASTE_ENDPOINT: &str = "https://hastebin.com/documents";

/// Base URL a fallback key is appended to.
const FALLBACK_VIEW_BASE: &str = "https://hastebin.com/";

/// Upload timeout per host.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the upload path.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Both hosts failed.
    #[error("upload failed on primary and fallback hosts: {primary}; {fallback}")]
    AllHostsFailed {
        /// Why the primary upload failed.
        primary: String,
        /// Why the fallback upload failed.
        fallback: String,
    },

    /// The upload client could not be built.
    #[error("upload client build failed: {0}")]
    Client(#[from] reqwest::Error),
}

/// Uploads the URL list, trying the primary host first. Returns the public
/// link to the paste.
pub async fn upload_url_list(text: &str) -> Result<String, UploadError> {
    let client = reqwest::Client::builder()
        .timeout(UPLOAD_TIMEOUT)
        .build()?;

    let primary_error = match upload_primary(&client, text).await {
        Ok(link) => {
            info!(link = %link, "URL list uploaded");
            return Ok(link);
        }
        Err(error) => {
            warn!(%error, "primary paste host failed, trying fallback");
            error.to_string()
        }
    };

    match upload_fallback(&client, text).await {
        Ok(link) => {
            info!(link = %link, "URL list uploaded via fallback");
            Ok(link)
        }
        Err(error) => Err(UploadError::AllHostsFailed {
            primary: primary_error,
            fallback: error.to_string(),
        }),
    }
}

async fn upload_primary(client: &reqwest::Client, text: &str) -> Result<String, reqwest::Error> {
    let response = client
        .post(PRIMARY_PASTE_ENDPOINT)
        .body(text.to_string())
        .send()
        .await?
        .error_for_status()?;
    let link = response.text().await?;
    Ok(link.trim().to_string())
}

async fn upload_fallback(client: &reqwest::Client, text: &str) -> Result<String, reqwest::Error> {
    let response = client
        .post(FALLBACK_PASTE_ENDPOINT)
        .body(text.to_string())
        .send()
        .await?
        .error_for_status()?;
    let body: serde_json::Value = response.json().await?;
    let key = body
        .get("key")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    Ok(format!("{FALLBACK_VIEW_BASE}{key}"))
}
