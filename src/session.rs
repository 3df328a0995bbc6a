//! Session state shared across crawl workers.
//!
//! One [`Session`] exists per crawl. It owns the directory tree (a flat map
//! keyed by canonical URL; parent/child edges are URL references), the file
//! records, the processed-URL and error-URL sets, the HTTP status histogram,
//! and the monotonic counters. Workers mutate only the directory record they
//! currently hold; everything shared is behind a concurrent map, a short
//! mutex, or an atomic.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

/// Sentinel for a file whose size has not been determined yet.
pub const FILE_SIZE_UNKNOWN: u64 = u64::MAX;

/// One file discovered in a listing. Identity is the URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    /// Absolute file URL.
    pub url: String,
    /// Display name from the listing.
    pub name: String,
    /// Size in bytes, or [`FILE_SIZE_UNKNOWN`].
    pub size: u64,
    /// Listing-provided timestamp, verbatim, when present.
    pub timestamp: Option<String>,
}

impl FileEntry {
    /// True when the size has been resolved.
    #[must_use]
    pub fn size_known(&self) -> bool {
        self.size != FILE_SIZE_UNKNOWN
    }
}

/// One directory in the crawl tree. Identity is the canonical URL.
///
/// Created once per unique URL, mutated exactly once by the worker that
/// parses it, then treated as read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryRecord {
    /// Canonical URL (rewritten to the final URI after redirects).
    pub url: String,
    /// Display name (last path segment, or the URL for the root).
    pub name: String,
    /// Parent directory URL; `None` for the root.
    pub parent_url: Option<String>,
    /// Child directory URLs, in parse order.
    pub subdirectories: Vec<String>,
    /// Child file URLs, in parse order.
    pub file_urls: Vec<String>,
    /// Set when a worker dequeued this directory.
    pub started: bool,
    /// Set when processing ended without a cancellation reason.
    pub finished: bool,
    /// Set when processing ended in a classified failure.
    pub error: bool,
    /// Why the directory was cancelled, when it was.
    pub cancellation_reason: Option<String>,
    /// When a worker began processing.
    pub started_at: Option<DateTime<Utc>>,
    /// When processing ended.
    pub finished_at: Option<DateTime<Utc>>,
    /// Label of the parser that produced this listing.
    pub parser: Option<String>,
}

impl DirectoryRecord {
    /// Creates an unprocessed record.
    #[must_use]
    pub fn new(url: &str, name: &str, parent_url: Option<String>) -> Self {
        Self {
            url: url.to_string(),
            name: name.to_string(),
            parent_url,
            subdirectories: Vec::new(),
            file_urls: Vec::new(),
            started: false,
            finished: false,
            error: false,
            cancellation_reason: None,
            started_at: None,
            finished_at: None,
            parser: None,
        }
    }
}

/// Process-wide crawl state. Designed to be wrapped in `Arc` and shared
/// across worker tasks; every field is independently synchronized.
#[derive(Debug)]
pub struct Session {
    root_url: String,
    directories: DashMap<String, DirectoryRecord>,
    files: DashMap<String, FileEntry>,
    /// Distinct file URLs in the order they were first recorded.
    file_order: Mutex<Vec<String>>,
    processed_urls: DashSet<String>,
    urls_with_errors: DashSet<String>,
    http_status_codes: Mutex<BTreeMap<u16, u64>>,
    total_http_requests: AtomicU64,
    total_http_traffic: AtomicU64,
    errors: AtomicU64,
    skipped: AtomicU64,
    max_threads: AtomicUsize,
    started_at: DateTime<Utc>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
    /// Server-specific state (GdIndex root id, scrubbed FTP banner, ...).
    parameters: DashMap<String, String>,
}

impl Session {
    /// Creates a session rooted at the given URL, with the root directory
    /// record pre-inserted.
    #[must_use]
    pub fn new(root: &Url) -> Self {
        let root_url = root.to_string();
        let directories = DashMap::new();
        directories.insert(
            root_url.clone(),
            DirectoryRecord::new(&root_url, &root_url, None),
        );
        Self {
            root_url,
            directories,
            files: DashMap::new(),
            file_order: Mutex::new(Vec::new()),
            processed_urls: DashSet::new(),
            urls_with_errors: DashSet::new(),
            http_status_codes: Mutex::new(BTreeMap::new()),
            total_http_requests: AtomicU64::new(0),
            total_http_traffic: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            max_threads: AtomicUsize::new(0),
            started_at: Utc::now(),
            finished_at: Mutex::new(None),
            parameters: DashMap::new(),
        }
    }

    /// The canonical root URL.
    #[must_use]
    pub fn root_url(&self) -> &str {
        &self.root_url
    }

    // ==================== processed-URL set ====================

    /// Atomically adds a URL to the processed set. Returns `true` when the
    /// URL was not processed before (the caller owns it now).
    pub fn mark_processed(&self, url: &str) -> bool {
        self.processed_urls.insert(url.to_string())
    }

    /// Removes a URL from the processed set so it can be requeued (FTP
    /// max-connections path only).
    pub fn unmark_processed(&self, url: &str) {
        self.processed_urls.remove(url);
    }

    /// Membership test without insertion.
    #[must_use]
    pub fn is_processed(&self, url: &str) -> bool {
        self.processed_urls.contains(url)
    }

    /// Number of processed URLs.
    #[must_use]
    pub fn processed_count(&self) -> usize {
        self.processed_urls.len()
    }

    // ==================== directory tree ====================

    /// Inserts a directory record if none exists for its URL.
    pub fn insert_directory(&self, record: DirectoryRecord) {
        self.directories.entry(record.url.clone()).or_insert(record);
    }

    /// Runs a closure against the directory record for `url`, if present.
    pub fn with_directory_mut<R>(
        &self,
        url: &str,
        f: impl FnOnce(&mut DirectoryRecord) -> R,
    ) -> Option<R> {
        self.directories.get_mut(url).map(|mut entry| f(&mut entry))
    }

    /// Clones the directory record for `url`.
    #[must_use]
    pub fn directory(&self, url: &str) -> Option<DirectoryRecord> {
        self.directories.get(url).map(|entry| entry.clone())
    }

    /// Rekeys a directory whose URL was rewritten to the redirect target,
    /// fixing up the parent's child edge to match.
    pub fn rewrite_directory_url(&self, old_url: &str, new_url: &str) {
        if old_url == new_url {
            return;
        }
        if let Some((_, mut record)) = self.directories.remove(old_url) {
            record.url = new_url.to_string();
            self.directories.insert(new_url.to_string(), record);
        }
        if let Some(mut parent) = self
            .directories
            .iter_mut()
            .find(|entry| entry.subdirectories.iter().any(|u| u == old_url))
        {
            for child in &mut parent.subdirectories {
                if child == old_url {
                    *child = new_url.to_string();
                }
            }
        }
    }

    /// Marks a directory as dequeued by a worker.
    pub fn mark_started(&self, url: &str) {
        self.with_directory_mut(url, |dir| {
            dir.started = true;
            dir.started_at = Some(Utc::now());
        });
    }

    /// Marks a directory as cleanly finished.
    pub fn mark_finished(&self, url: &str) {
        self.with_directory_mut(url, |dir| {
            dir.finished = true;
            dir.finished_at = Some(Utc::now());
        });
    }

    /// Marks a directory as errored, recording the cancellation reason.
    pub fn mark_errored(&self, url: &str, reason: Option<String>) {
        self.with_directory_mut(url, |dir| {
            dir.error = true;
            dir.cancellation_reason = reason;
            dir.finished_at = Some(Utc::now());
        });
    }

    // ==================== files ====================

    /// Records a file if its URL is new. Returns `true` for a new file.
    pub fn add_file(&self, entry: FileEntry) -> bool {
        let url = entry.url.clone();
        let is_new = match self.files.entry(url.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        };
        if is_new {
            if let Ok(mut order) = self.file_order.lock() {
                order.push(url);
            }
        }
        is_new
    }

    /// Fills in a file's size (the size pool calls this).
    pub fn set_file_size(&self, url: &str, size: u64) {
        if let Some(mut entry) = self.files.get_mut(url) {
            entry.size = size;
        }
    }

    /// Clones the file record for `url`.
    #[must_use]
    pub fn file(&self, url: &str) -> Option<FileEntry> {
        self.files.get(url).map(|entry| entry.clone())
    }

    /// Distinct file URLs in encounter order.
    #[must_use]
    pub fn file_urls_in_order(&self) -> Vec<String> {
        self.file_order
            .lock()
            .map(|order| order.clone())
            .unwrap_or_default()
    }

    /// Number of distinct files recorded.
    #[must_use]
    pub fn total_files(&self) -> usize {
        self.files.len()
    }

    /// Sum of all known file sizes in bytes.
    #[must_use]
    pub fn total_file_size(&self) -> u64 {
        self.files
            .iter()
            .filter(|entry| entry.size_known())
            .map(|entry| entry.size)
            .sum()
    }

    // ==================== errors & counters ====================

    /// Adds a URL to the error set.
    pub fn add_error_url(&self, url: &str) {
        self.urls_with_errors.insert(url.to_string());
    }

    /// URLs that ended in error, sorted for stable output.
    #[must_use]
    pub fn error_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .urls_with_errors
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        urls.sort();
        urls
    }

    /// Bumps the histogram bucket for an HTTP status code.
    pub fn record_http_status(&self, status: u16) {
        if let Ok(mut histogram) = self.http_status_codes.lock() {
            *histogram.entry(status).or_insert(0) += 1;
        }
    }

    /// Snapshot of the status histogram.
    #[must_use]
    pub fn http_status_codes(&self) -> BTreeMap<u16, u64> {
        self.http_status_codes
            .lock()
            .map(|histogram| histogram.clone())
            .unwrap_or_default()
    }

    /// Counts one issued HTTP request.
    pub fn add_http_request(&self) {
        self.total_http_requests.fetch_add(1, Ordering::SeqCst);
    }

    /// Adds received bytes to the traffic counter.
    pub fn add_http_traffic(&self, bytes: u64) {
        self.total_http_traffic.fetch_add(bytes, Ordering::SeqCst);
    }

    /// Counts one errored directory.
    pub fn increment_errors(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    /// Counts one skipped (already processed or out-of-scope) item.
    pub fn increment_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    /// Records the high-water mark of concurrently running workers.
    pub fn record_running_threads(&self, running: usize) {
        self.max_threads.fetch_max(running, Ordering::SeqCst);
    }

    /// Total HTTP requests issued.
    #[must_use]
    pub fn total_http_requests(&self) -> u64 {
        self.total_http_requests.load(Ordering::SeqCst)
    }

    /// Total HTTP bytes received.
    #[must_use]
    pub fn total_http_traffic(&self) -> u64 {
        self.total_http_traffic.load(Ordering::SeqCst)
    }

    /// Errored-directory count.
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::SeqCst)
    }

    /// Skipped-item count.
    #[must_use]
    pub fn skipped_count(&self) -> u64 {
        self.skipped.load(Ordering::SeqCst)
    }

    /// High-water mark of concurrently running workers.
    #[must_use]
    pub fn max_threads(&self) -> usize {
        self.max_threads.load(Ordering::SeqCst)
    }

    // ==================== parameters & lifecycle ====================

    /// Sets a server-specific parameter.
    pub fn set_parameter(&self, key: &str, value: &str) {
        self.parameters.insert(key.to_string(), value.to_string());
    }

    /// Reads a server-specific parameter.
    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<String> {
        self.parameters.get(key).map(|value| value.clone())
    }

    /// When the session started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Stamps the session finished.
    pub fn finish(&self) {
        if let Ok(mut finished) = self.finished_at.lock() {
            *finished = Some(Utc::now());
        }
    }

    /// When the session finished, if it has.
    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at.lock().ok().and_then(|guard| *guard)
    }

    /// Checks that the file counter matches the distinct file URLs reachable
    /// in the tree. A mismatch is logged as a warning, never an abort.
    pub fn verify_file_accounting(&self) {
        let mut visited = HashSet::new();
        let mut tree_files = HashSet::new();
        self.collect_tree_files(&self.root_url, &mut visited, &mut tree_files);
        if tree_files.len() != self.total_files() {
            warn!(
                tree_files = tree_files.len(),
                recorded_files = self.total_files(),
                "file accounting mismatch"
            );
        }
    }

    fn collect_tree_files(
        &self,
        url: &str,
        visited: &mut HashSet<String>,
        out: &mut HashSet<String>,
    ) {
        if !visited.insert(url.to_string()) {
            return;
        }
        let Some(dir) = self.directory(url) else {
            return;
        };
        for file_url in &dir.file_urls {
            out.insert(file_url.clone());
        }
        for sub in &dir.subdirectories {
            self.collect_tree_files(sub, visited, out);
        }
    }

    // ==================== snapshot ====================

    /// Builds a serializable snapshot of the whole session.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let mut visited = HashSet::new();
        visited.insert(self.root_url.clone());
        let root = self.snapshot_directory(&self.root_url, &mut visited);
        SessionSnapshot {
            root_url: self.root_url.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at(),
            total_http_requests: self.total_http_requests(),
            total_http_traffic: self.total_http_traffic(),
            total_files: self.total_files() as u64,
            total_file_size: self.total_file_size(),
            errors: self.error_count(),
            skipped: self.skipped_count(),
            max_threads: self.max_threads() as u64,
            http_status_codes: self.http_status_codes(),
            urls_with_errors: self.error_urls(),
            parameters: self
                .parameters
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
            root,
        }
    }

    fn snapshot_directory(
        &self,
        url: &str,
        visited: &mut HashSet<String>,
    ) -> DirectorySnapshot {
        let record = self
            .directory(url)
            .unwrap_or_else(|| DirectoryRecord::new(url, url, None));
        let mut snapshot = DirectorySnapshot {
            url: record.url.clone(),
            name: record.name.clone(),
            parser: record.parser.clone(),
            finished: record.finished,
            error: record.error,
            cancellation_reason: record.cancellation_reason.clone(),
            files: Vec::new(),
            subdirectories: Vec::new(),
        };
        for file_url in &record.file_urls {
            if let Some(file) = self.file(file_url) {
                snapshot.files.push(file);
            }
        }
        for sub in &record.subdirectories {
            if visited.insert(sub.clone()) {
                snapshot
                    .subdirectories
                    .push(self.snapshot_directory(sub, visited));
            }
        }
        snapshot
    }
}

/// Serializable view of a session, written with `--json` and readable back
/// for stats display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Seed URL.
    pub root_url: String,
    /// Session start time.
    pub started_at: DateTime<Utc>,
    /// Session end time, when the crawl completed.
    pub finished_at: Option<DateTime<Utc>>,
    /// Total HTTP requests issued.
    pub total_http_requests: u64,
    /// Total HTTP bytes received.
    pub total_http_traffic: u64,
    /// Distinct files discovered.
    pub total_files: u64,
    /// Sum of known file sizes in bytes.
    pub total_file_size: u64,
    /// Errored-directory count.
    pub errors: u64,
    /// Skipped-item count.
    pub skipped: u64,
    /// High-water mark of concurrently running workers.
    pub max_threads: u64,
    /// HTTP status histogram.
    pub http_status_codes: BTreeMap<u16, u64>,
    /// URLs that ended in error.
    pub urls_with_errors: Vec<String>,
    /// Server-specific parameters.
    pub parameters: BTreeMap<String, String>,
    /// The directory tree.
    pub root: DirectorySnapshot,
}

/// One directory in the snapshot tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    /// Canonical URL.
    pub url: String,
    /// Display name.
    pub name: String,
    /// Parser label, when the directory was parsed.
    pub parser: Option<String>,
    /// Whether processing finished cleanly.
    pub finished: bool,
    /// Whether processing errored.
    pub error: bool,
    /// Cancellation reason, when errored.
    pub cancellation_reason: Option<String>,
    /// Files directly in this directory.
    pub files: Vec<FileEntry>,
    /// Child directories.
    pub subdirectories: Vec<DirectorySnapshot>,
}
