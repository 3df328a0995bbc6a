//! Session result rendering and persisted artifacts.
//!
//! Produces the three user-facing outputs: the URL list file (one distinct
//! file URL per line, encounter order), the markdown statistics block, and
//! the JSON session snapshot. The snapshot loader exists so a previously
//! written file can be rendered again without re-crawling.

pub mod upload;

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::session::{Session, SessionSnapshot};

/// Errors from writing or loading report artifacts.
#[derive(Debug, Error)]
pub enum ReportError {
    /// File system failure.
    #[error("IO error for {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Snapshot (de)serialization failure.
    #[error("snapshot serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Turns a root URL into a filesystem-safe artifact stem.
///
/// Every character outside `[A-Za-z0-9._-]` becomes `_`; runs collapse and
/// the scheme separator goes with them, so
/// `https://host:8080/files/` becomes `https_host_8080_files`.
#[must_use]
pub fn sanitize_url_for_filename(url: &str) -> String {
    let mut out = String::with_capacity(url.len());
    let mut last_was_underscore = false;
    for c in url.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            out.push(c);
            last_was_underscore = false;
        } else if !last_was_underscore {
            out.push('_');
            last_was_underscore = true;
        }
    }
    out.trim_matches('_').to_string()
}

/// Writes the URL list file and returns its path.
///
/// One distinct file URL per line, in the order they were encountered.
pub fn write_url_list(
    session: &Session,
    output_file: Option<PathBuf>,
) -> Result<PathBuf, ReportError> {
    let path = output_file.unwrap_or_else(|| {
        PathBuf::from(format!(
            "{}.txt",
            sanitize_url_for_filename(session.root_url())
        ))
    });
    let mut contents = session.file_urls_in_order().join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }
    fs::write(&path, contents).map_err(|source| ReportError::Io {
        path: path.clone(),
        source,
    })?;
    info!(path = %path.display(), urls = session.total_files(), "URL list written");
    Ok(path)
}

/// Writes the pretty-printed JSON snapshot and returns its path.
pub fn write_json_snapshot(snapshot: &SessionSnapshot) -> Result<PathBuf, ReportError> {
    let path = PathBuf::from(format!(
        "{}.json",
        sanitize_url_for_filename(&snapshot.root_url)
    ));
    let json = serde_json::to_string_pretty(snapshot)?;
    fs::write(&path, json).map_err(|source| ReportError::Io {
        path: path.clone(),
        source,
    })?;
    info!(path = %path.display(), "session snapshot written");
    Ok(path)
}

/// Loads a snapshot written by [`write_json_snapshot`].
pub fn load_snapshot(path: &Path) -> Result<SessionSnapshot, ReportError> {
    let contents = fs::read_to_string(path).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&contents)?)
}

/// Renders the markdown statistics block printed on stdout.
#[must_use]
pub fn render_stats_markdown(snapshot: &SessionSnapshot) -> String {
    let mut out = String::new();
    out.push_str(&format!("**Url:** {}\n\n", snapshot.root_url));
    out.push_str("|Files|Total size|Errors|HTTP requests|Traffic|\n");
    out.push_str("|---:|---:|---:|---:|---:|\n");
    out.push_str(&format!(
        "|{}|{}|{}|{}|{}|\n",
        snapshot.total_files,
        format_bytes(snapshot.total_file_size),
        snapshot.errors,
        snapshot.total_http_requests,
        format_bytes(snapshot.total_http_traffic),
    ));

    if !snapshot.http_status_codes.is_empty() {
        out.push_str("\n**HTTP status codes:**\n\n");
        for (status, count) in &snapshot.http_status_codes {
            out.push_str(&format!("- {status}: {count}\n"));
        }
    }

    if !snapshot.urls_with_errors.is_empty() {
        out.push_str("\n**Urls with errors:**\n\n");
        for url in &snapshot.urls_with_errors {
            out.push_str(&format!("- {url}\n"));
        }
    }

    if let (Some(finished), started) = (snapshot.finished_at, snapshot.started_at) {
        let elapsed = finished.signed_duration_since(started);
        out.push_str(&format!(
            "\nIndexed in {}.{:03}s\n",
            elapsed.num_seconds(),
            elapsed.num_milliseconds().rem_euclid(1000)
        ));
    }
    out
}

/// Human-readable byte count (binary units).
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}
