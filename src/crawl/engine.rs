//! The indexing engine: directory and file-size worker pools.
//!
//! Workers are cooperative tasks over lock-free FIFO queues. The directory
//! pool fetches listings (with retry), feeds discovered subdirectories back
//! through the scope check, and hands files without sizes to the size pool.
//! Quiescence: the engine is done when every directory-worker task has
//! returned; the size pool's exit predicate additionally references the
//! directory pool so it cannot stop while new files can still arrive.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::parse::{Listing, ParseContext, ParserRegistry};
use crate::scope;
use crate::session::{DirectoryRecord, FILE_SIZE_UNKNOWN, FileEntry, Session};

use super::IndexerOptions;
use super::constants::{DIRECTORY_CEILING, POLL_BUSY, POLL_IDLE};
use super::error::CrawlError;
use super::ftp::FtpRegistry;
use super::http::HttpFetcher;
use super::retry::{RetryAction, RetryPolicy};
use super::stats;

/// The indexing engine. Create one per crawl, then [`Indexer::run`] it to
/// completion; results accumulate in the shared [`Session`].
#[derive(Debug)]
pub struct Indexer {
    inner: Arc<EngineInner>,
}

#[derive(Debug)]
pub(crate) struct EngineInner {
    pub(crate) session: Arc<Session>,
    pub(crate) fetcher: Arc<HttpFetcher>,
    pub(crate) ftp: Arc<FtpRegistry>,
    registry: ParserRegistry,
    retry_policy: RetryPolicy,
    pub(crate) options: IndexerOptions,
    pub(crate) dir_queue: SegQueue<String>,
    pub(crate) file_queue: SegQueue<String>,
    pub(crate) running_dir: AtomicUsize,
    pub(crate) running_size: AtomicUsize,
    pub(crate) dir_workers_done: AtomicBool,
    /// Worker name → directory URL currently being processed, for the
    /// statistics observer.
    pub(crate) in_flight: DashMap<String, String>,
    pub(crate) shutdown: CancellationToken,
}

impl Indexer {
    /// Creates an engine rooted at `root` with the standard parser
    /// registry.
    ///
    /// # Errors
    ///
    /// Fails when the shared HTTP client cannot be built.
    pub fn new(root: Url, options: IndexerOptions) -> Result<Self, CrawlError> {
        let session = Arc::new(Session::new(&root));
        let fetcher = Arc::new(HttpFetcher::new(&options, Arc::clone(&session))?);
        let credentials = match (&options.username, &options.password) {
            (Some(user), password) => {
                Some((user.clone(), password.clone().unwrap_or_default()))
            }
            _ => None,
        };
        Ok(Self {
            inner: Arc::new(EngineInner {
                session,
                fetcher,
                ftp: Arc::new(FtpRegistry::new(credentials)),
                registry: ParserRegistry::with_default_parsers(),
                retry_policy: RetryPolicy::default(),
                options,
                dir_queue: SegQueue::new(),
                file_queue: SegQueue::new(),
                running_dir: AtomicUsize::new(0),
                running_size: AtomicUsize::new(0),
                dir_workers_done: AtomicBool::new(false),
                in_flight: DashMap::new(),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    /// The shared session state.
    #[must_use]
    pub fn session(&self) -> Arc<Session> {
        Arc::clone(&self.inner.session)
    }

    /// Token for graceful shutdown; both pools honor it at every
    /// suspension point.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Runs the crawl to quiescence: seeds the root, spawns both pools and
    /// the statistics observer, joins the directory pool, then joins the
    /// size pool.
    ///
    /// Individual directory failures never fail the run; they are counted
    /// and reported in the session.
    #[instrument(skip(self), fields(root = self.inner.session.root_url()))]
    pub async fn run(&self) -> Result<(), CrawlError> {
        let inner = &self.inner;
        info!(
            threads = inner.options.threads,
            timeout_secs = inner.options.timeout_secs,
            "indexing started"
        );
        inner.dir_queue.push(inner.session.root_url().to_string());

        let stats_handle = stats::spawn_observer(Arc::clone(inner));

        let mut dir_handles = Vec::new();
        for i in 0..inner.options.threads {
            let worker = Arc::clone(inner);
            dir_handles.push(tokio::spawn(worker.dir_worker(format!("dir-{:02}", i + 1))));
        }
        let mut size_handles = Vec::new();
        for i in 0..inner.options.threads {
            let worker = Arc::clone(inner);
            size_handles.push(tokio::spawn(worker.size_worker(format!("size-{:02}", i + 1))));
        }

        for handle in dir_handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "directory worker panicked");
            }
        }
        inner.dir_workers_done.store(true, Ordering::SeqCst);
        debug!("directory pool drained");
        if !inner.dir_queue.is_empty() {
            // Possible when every worker wound down on FTP max-connections.
            warn!(
                remaining = inner.dir_queue.len(),
                "directory queue not empty at pool exit"
            );
        }

        for handle in size_handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "size worker panicked");
            }
        }

        stats_handle.abort();
        inner.ftp.close_all().await;
        inner.session.finish();
        inner.session.verify_file_accounting();

        info!(
            files = inner.session.total_files(),
            processed = inner.session.processed_count(),
            errors = inner.session.error_count(),
            http_requests = inner.session.total_http_requests(),
            "indexing complete"
        );
        Ok(())
    }
}

impl EngineInner {
    /// One directory worker loop.
    async fn dir_worker(self: Arc<Self>, name: String) {
        let mut max_connections = false;
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            self.running_dir.fetch_add(1, Ordering::SeqCst);
            self.session.record_running_threads(
                self.running_dir.load(Ordering::SeqCst)
                    + self.running_size.load(Ordering::SeqCst),
            );

            if let Some(url) = self.dir_queue.pop() {
                self.in_flight.insert(name.clone(), url.clone());
                if self.session.mark_processed(&url) {
                    max_connections = self.process_directory(&name, &url).await;
                } else {
                    debug!(url = %url, "already processed, skipping");
                    self.session.increment_skipped();
                }
                self.in_flight.remove(&name);
            }

            self.running_dir.fetch_sub(1, Ordering::SeqCst);

            if max_connections {
                break;
            }
            let queue_empty = self.dir_queue.is_empty();
            if queue_empty && self.running_dir.load(Ordering::SeqCst) == 0 {
                break;
            }
            let poll = if queue_empty { POLL_IDLE } else { POLL_BUSY };
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(poll) => {}
            }
        }
        debug!(worker = %name, "directory worker exiting");
    }

    /// Processes one dequeued directory. Returns true when the worker must
    /// wind down because the FTP server is at its connection limit.
    async fn process_directory(&self, worker: &str, url_str: &str) -> bool {
        let Ok(url) = Url::parse(url_str) else {
            self.fail_directory(url_str, "invalid URL".to_string());
            return false;
        };
        self.session.mark_started(url_str);
        let token = CancellationToken::new();

        let outcome = tokio::time::timeout(
            DIRECTORY_CEILING,
            self.fetch_and_parse(worker, &url, &token),
        )
        .await;

        match outcome {
            Err(_elapsed) => {
                token.cancel();
                self.fail_directory(url_str, "directory ceiling exceeded".to_string());
                false
            }
            Ok(Err(CrawlError::FtpMaxConnections { .. })) => {
                // Not an error: hand the directory back, close this
                // worker's connection, and let the other workers continue.
                info!(url = url_str, "FTP connection budget spent; requeueing directory");
                self.session.unmark_processed(url_str);
                self.dir_queue.push(url_str.to_string());
                self.ftp.close(worker).await;
                true
            }
            Ok(Err(error)) => {
                self.fail_directory(url_str, error.to_string());
                false
            }
            Ok(Ok((final_url, listing))) => {
                let canonical = if final_url.as_str() == url_str {
                    url_str.to_string()
                } else {
                    debug!(from = url_str, to = %final_url, "directory URL rewritten to redirect target");
                    self.session.mark_processed(final_url.as_str());
                    self.session.rewrite_directory_url(url_str, final_url.as_str());
                    final_url.to_string()
                };
                self.add_processed(&canonical, &listing);
                let cancelled = self
                    .session
                    .directory(&canonical)
                    .is_some_and(|dir| dir.cancellation_reason.is_some());
                if !cancelled {
                    self.session.mark_finished(&canonical);
                }
                false
            }
        }
    }

    /// Marks a directory errored and records it in the session.
    fn fail_directory(&self, url: &str, reason: String) {
        warn!(url, reason = %reason, "directory failed");
        self.session.increment_errors();
        self.session.mark_errored(url, Some(reason));
        self.session.add_error_url(url);
    }

    /// Dispatches one directory to the FTP or HTTP path by scheme.
    async fn fetch_and_parse(
        &self,
        worker: &str,
        url: &Url,
        token: &CancellationToken,
    ) -> Result<(Url, Listing), CrawlError> {
        match url.scheme() {
            "ftp" | "ftps" => {
                let listing = self
                    .ftp
                    .list_directory(worker, url, &self.session, token)
                    .await?;
                Ok((url.clone(), listing))
            }
            "http" | "https" => self.fetch_http_with_retry(url, token).await,
            other => Err(CrawlError::invalid_url(format!(
                "{url} (unsupported scheme {other})"
            ))),
        }
    }

    /// HTTP fetch + parse wrapped in the retry policy. Retry attempts for
    /// one directory are strictly serial.
    async fn fetch_http_with_retry(
        &self,
        url: &Url,
        token: &CancellationToken,
    ) -> Result<(Url, Listing), CrawlError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let error = match self.fetcher.fetch_directory(url, token).await {
                Ok(page) => {
                    let final_url = page.final_url.clone();
                    let ctx = ParseContext {
                        url: &final_url,
                        page: &page,
                        session: &self.session,
                        fetcher: &self.fetcher,
                    };
                    match self.registry.dispatch(&ctx).await {
                        Ok(listing) => return Ok((final_url, listing)),
                        Err(error) => error,
                    }
                }
                Err(error) => error,
            };

            match self.retry_policy.decide(&error, url, attempt) {
                RetryAction::Retry { delay, .. } => {
                    debug!(url = %url, attempt, delay_ms = delay.as_millis(), error = %error, "retrying directory");
                    tokio::select! {
                        () = token.cancelled() => {
                            return Err(CrawlError::cancelled(url.as_str(), "directory cancelled"));
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                RetryAction::Cancel { reason } => {
                    token.cancel();
                    return Err(CrawlError::cancelled(url.as_str(), reason));
                }
            }
        }
    }

    /// Copies a parsed listing into the session: records the parser label,
    /// enqueues in-scope subdirectories, and records in-scope files
    /// (queueing the ones whose size still needs resolving).
    fn add_processed(&self, dir_url: &str, listing: &Listing) {
        let root = Url::parse(self.session.root_url()).ok();
        self.session.with_directory_mut(dir_url, |dir| {
            dir.parser = Some(listing.parser.to_string());
        });

        for sub in &listing.subdirectories {
            let sub_url = sub.url.to_string();
            if self.session.is_processed(&sub_url) {
                continue;
            }
            let in_bounds = scope::is_exempt_host(&sub.url)
                || root.as_ref().is_some_and(|r| scope::in_scope(r, &sub.url));
            if !in_bounds {
                debug!(url = %sub.url, "subdirectory outside crawl scope, dropped");
                self.session.increment_skipped();
                continue;
            }
            self.session.insert_directory(DirectoryRecord::new(
                &sub_url,
                &sub.name,
                Some(dir_url.to_string()),
            ));
            self.session.with_directory_mut(dir_url, |dir| {
                if !dir.subdirectories.contains(&sub_url) {
                    dir.subdirectories.push(sub_url.clone());
                }
            });
            if listing.recurse {
                self.dir_queue.push(sub_url);
            }
        }

        for file in &listing.files {
            if !matches!(file.url.scheme(), "http" | "https" | "ftp" | "ftps") {
                continue;
            }
            let exempt = scope::is_exempt_host(&file.url);
            let in_bounds = exempt
                || root.as_ref().is_some_and(|r| {
                    r.host_str() == file.url.host_str() && scope::in_scope(r, &file.url)
                });
            if !in_bounds {
                debug!(url = %file.url, "file outside crawl scope, dropped");
                self.session.increment_skipped();
                continue;
            }
            let file_url = file.url.to_string();
            let entry = FileEntry {
                url: file_url.clone(),
                name: file.name.clone(),
                size: file.size.unwrap_or(FILE_SIZE_UNKNOWN),
                timestamp: file.timestamp.clone(),
            };
            let size_known = entry.size_known();
            if self.session.add_file(entry) {
                self.session.with_directory_mut(dir_url, |dir| {
                    dir.file_urls.push(file_url.clone());
                });
                if !size_known || self.options.exact_file_sizes {
                    self.file_queue.push(file_url);
                }
            }
        }
    }

    /// One file-size worker loop. Its exit predicate references the
    /// directory pool: size work trails directory work and must not stop
    /// while new files can still arrive.
    async fn size_worker(self: Arc<Self>, name: String) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            self.running_size.fetch_add(1, Ordering::SeqCst);
            if let Some(url) = self.file_queue.pop() {
                self.resolve_file_size(&url).await;
            }
            self.running_size.fetch_sub(1, Ordering::SeqCst);

            let queue_empty = self.file_queue.is_empty();
            if queue_empty
                && self.running_size.load(Ordering::SeqCst) == 0
                && self.running_dir.load(Ordering::SeqCst) == 0
                && self.dir_workers_done.load(Ordering::SeqCst)
            {
                break;
            }
            let poll = if queue_empty { POLL_IDLE } else { POLL_BUSY };
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(poll) => {}
            }
        }
        debug!(worker = %name, "size worker exiting");
    }

    /// Resolves one file's size. Failures leave the sentinel in place.
    async fn resolve_file_size(&self, url_str: &str) {
        let Ok(url) = Url::parse(url_str) else {
            return;
        };
        if !matches!(url.scheme(), "http" | "https") {
            // FTP listings always carry sizes.
            return;
        }
        let result = if self.options.determine_size_by_download {
            self.fetcher.size_by_download(&url).await.map(Some)
        } else {
            self.fetcher.head_content_length(&url).await
        };
        match result {
            Ok(Some(size)) => {
                debug!(url = url_str, size, "file size resolved");
                self.session.set_file_size(url_str, size);
            }
            Ok(None) => {
                debug!(url = url_str, "no Content-Length; size stays unknown");
            }
            Err(error) => {
                error!(url = url_str, %error, "file size resolution failed");
            }
        }
    }
}
