//! HTTP fetcher for directory listings.
//!
//! One `reqwest` client is shared across all workers. Certificate validation
//! is disabled by default: the servers this tool points at misconfigure
//! their certs far too often for strict validation to be useful, and no
//! content is trusted beyond link extraction.
//!
//! The very first request of a session runs a User-Agent fallback ladder
//! (default, then curl, then Chrome): some index servers answer the default
//! agent with an empty page or an `HTTP_USER_AGENT` complaint and work fine
//! once the agent looks like curl or a browser. Whichever agent produced the
//! first usable body is reused for the rest of the session, and a `Referer`
//! equal to the first fetched directory URL is pinned from then on.

use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, REFERER, SERVER, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::session::Session;
use crate::user_agent::{default_user_agent, fallback_ladder};

use super::IndexerOptions;
use super::constants::USER_AGENT_SENTINEL;
use super::error::CrawlError;

/// One fetched listing page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URI after redirects; may differ from the requested URL.
    pub final_url: Url,
    /// HTTP status code.
    pub status: u16,
    /// `Server` response header, when present.
    pub server: Option<String>,
    /// `Content-Type` response header, when present.
    pub content_type: Option<String>,
    /// Decoded response body.
    pub body: String,
}

/// HTTP fetcher shared by all directory and size workers.
#[derive(Debug)]
pub struct HttpFetcher {
    client: Client,
    session: Arc<Session>,
    credentials: Option<(String, String)>,
    /// Agent currently in use; replaced once by the first-request ladder.
    agent: RwLock<String>,
    /// Referer pinned after the session's first successful fetch.
    referer: RwLock<Option<String>>,
    /// Whether the first-request ladder has completed.
    first_success: AtomicBool,
}

impl HttpFetcher {
    /// Builds the shared client.
    ///
    /// # Errors
    ///
    /// Fails only when the TLS backend cannot be initialized; the failure
    /// surfaces as a [`CrawlError::Parse`] on the root URL.
    pub fn new(options: &IndexerOptions, session: Arc<Session>) -> Result<Self, CrawlError> {
        let client = build_client(options.timeout_secs).map_err(|e| {
            CrawlError::parse(session.root_url(), format!("HTTP client build failed: {e}"))
        })?;
        let agent = options
            .user_agent
            .clone()
            .unwrap_or_else(default_user_agent);
        let credentials = match (&options.username, &options.password) {
            (Some(user), password) => Some((
                user.clone(),
                password.clone().unwrap_or_default(),
            )),
            _ => None,
        };
        Ok(Self {
            client,
            session,
            credentials,
            agent: RwLock::new(agent),
            referer: RwLock::new(None),
            first_success: AtomicBool::new(false),
        })
    }

    /// Fetches one directory listing.
    ///
    /// On the session's first fetch this walks the User-Agent ladder until a
    /// non-empty, sentinel-free body arrives; afterwards it issues a single
    /// request with the pinned agent and referer.
    #[instrument(level = "debug", skip(self, token), fields(url = %url))]
    pub async fn fetch_directory(
        &self,
        url: &Url,
        token: &CancellationToken,
    ) -> Result<FetchedPage, CrawlError> {
        if self.first_success.load(Ordering::SeqCst) {
            return self.request_once(url, &self.current_agent(), token).await;
        }

        let mut last_error = None;
        for agent in fallback_ladder(&self.current_agent()) {
            match self.request_once(url, &agent, token).await {
                Ok(page) if page_is_usable(&page) => {
                    self.pin_first_success(&agent, &page.final_url);
                    return Ok(page);
                }
                Ok(page) => {
                    debug!(
                        agent = %agent,
                        status = page.status,
                        body_len = page.body.len(),
                        "first-request agent rejected, trying next"
                    );
                    last_error = Some(CrawlError::parse(
                        url.as_str(),
                        "empty or agent-filtered body",
                    ));
                }
                Err(error) if advances_ladder(&error) => {
                    debug!(agent = %agent, %error, "first-request agent failed, trying next");
                    last_error = Some(error);
                }
                // Rate limits, 404s, DNS failures and cancellation are not
                // agent problems; hand them straight to the retry policy.
                Err(error) => return Err(error),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            CrawlError::parse(url.as_str(), "user-agent ladder exhausted")
        }))
    }

    /// Issues a HEAD request and returns the `Content-Length`, when the
    /// server provides one.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn head_content_length(&self, url: &Url) -> Result<Option<u64>, CrawlError> {
        let mut request = self
            .client
            .head(url.clone())
            .header(USER_AGENT, self.current_agent());
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password));
        }

        self.session.add_http_request();
        let response = request
            .send()
            .await
            .map_err(|e| map_reqwest_error(url.as_str(), e))?;
        let status = response.status().as_u16();
        self.session.record_http_status(status);
        if !response.status().is_success() {
            return Err(CrawlError::status(url.as_str(), status));
        }
        Ok(response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok()))
    }

    /// Determines a file's size by downloading it, counting streamed bytes.
    ///
    /// When the server does send a `Content-Length`, the transfer is aborted
    /// immediately and the header value is returned.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn size_by_download(&self, url: &Url) -> Result<u64, CrawlError> {
        let mut request = self
            .client
            .get(url.clone())
            .header(USER_AGENT, self.current_agent());
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password));
        }

        self.session.add_http_request();
        let response = request
            .send()
            .await
            .map_err(|e| map_reqwest_error(url.as_str(), e))?;
        let status = response.status().as_u16();
        self.session.record_http_status(status);
        if !response.status().is_success() {
            return Err(CrawlError::status(url.as_str(), status));
        }

        if let Some(length) = response.content_length() {
            return Ok(length);
        }

        let mut total: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_reqwest_error(url.as_str(), e))?;
            total += chunk.len() as u64;
        }
        self.session.add_http_traffic(total);
        Ok(total)
    }

    /// Plain GET returning the decoded body. Used by parsers that page
    /// through service endpoints (Google Drive folder views).
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn get_text(&self, url: &Url) -> Result<String, CrawlError> {
        let response = self.send_simple(self.client.get(url.clone())).await?;
        let status = response.status().as_u16();
        self.session.record_http_status(status);
        if !response.status().is_success() {
            return Err(CrawlError::status(url.as_str(), status));
        }
        let content_type = header_string(response.headers(), CONTENT_TYPE);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(url.as_str(), e))?;
        self.session.add_http_traffic(bytes.len() as u64);
        Ok(decode_body(&bytes, content_type.as_deref()))
    }

    /// GET returning parsed JSON. Used by the Calibre parser.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn get_json(&self, url: &Url) -> Result<serde_json::Value, CrawlError> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body)
            .map_err(|e| CrawlError::parse(url.as_str(), format!("invalid JSON: {e}")))
    }

    /// POST with a JSON body, returning parsed JSON. Used by the GdIndex
    /// parser.
    #[instrument(level = "debug", skip(self, payload), fields(url = %url))]
    pub async fn post_json(
        &self,
        url: &Url,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, CrawlError> {
        let response = self
            .send_simple(self.client.post(url.clone()).json(payload))
            .await?;
        let status = response.status().as_u16();
        self.session.record_http_status(status);
        if !response.status().is_success() {
            return Err(CrawlError::status(url.as_str(), status));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(url.as_str(), e))?;
        self.session.add_http_traffic(bytes.len() as u64);
        serde_json::from_slice(&bytes)
            .map_err(|e| CrawlError::parse(url.as_str(), format!("invalid JSON: {e}")))
    }

    async fn send_simple(
        &self,
        mut request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, CrawlError> {
        request = request.header(USER_AGENT, self.current_agent());
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password));
        }
        self.session.add_http_request();
        // The URL is re-derivable from the response; on error reqwest keeps
        // it in the source.
        request.send().await.map_err(|e| {
            let url = e.url().map(|u| u.to_string()).unwrap_or_default();
            map_reqwest_error(&url, e)
        })
    }

    /// The User-Agent currently in effect.
    #[must_use]
    pub fn current_agent(&self) -> String {
        self.agent
            .read()
            .map(|agent| agent.clone())
            .unwrap_or_else(|_| default_user_agent())
    }

    fn pin_first_success(&self, agent: &str, final_url: &Url) {
        if let Ok(mut current) = self.agent.write() {
            *current = agent.to_string();
        }
        if let Ok(mut referer) = self.referer.write() {
            *referer = Some(final_url.to_string());
        }
        self.first_success.store(true, Ordering::SeqCst);
        debug!(agent, referer = %final_url, "first request succeeded, agent pinned");
    }

    async fn request_once(
        &self,
        url: &Url,
        agent: &str,
        token: &CancellationToken,
    ) -> Result<FetchedPage, CrawlError> {
        let mut request = self.client.get(url.clone()).header(USER_AGENT, agent);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password));
        }
        if let Some(referer) = self.referer.read().ok().and_then(|guard| guard.clone()) {
            request = request.header(REFERER, referer);
        }

        self.session.add_http_request();
        let response = tokio::select! {
            () = token.cancelled() => {
                return Err(CrawlError::cancelled(url.as_str(), "directory cancelled"));
            }
            result = request.send() => result.map_err(|e| map_reqwest_error(url.as_str(), e))?,
        };

        let status = response.status().as_u16();
        self.session.record_http_status(status);
        let final_url = response.url().clone();
        let server = header_string(response.headers(), SERVER);
        let content_type = header_string(response.headers(), CONTENT_TYPE);

        if !response.status().is_success() {
            return Err(CrawlError::status(url.as_str(), status));
        }

        let bytes = tokio::select! {
            () = token.cancelled() => {
                return Err(CrawlError::cancelled(url.as_str(), "directory cancelled"));
            }
            result = response.bytes() => result.map_err(|e| map_reqwest_error(url.as_str(), e))?,
        };
        self.session.add_http_traffic(bytes.len() as u64);

        let body = decode_body(&bytes, content_type.as_deref());
        Ok(FetchedPage {
            final_url,
            status,
            server,
            content_type,
            body,
        })
    }
}

/// A first-request body is usable when it is non-empty and free of the
/// agent-complaint sentinel.
fn page_is_usable(page: &FetchedPage) -> bool {
    !page.body.trim().is_empty() && !page.body.contains(USER_AGENT_SENTINEL)
}

/// Failures a different User-Agent could plausibly fix: transport and
/// timeout errors, and the auth-ish statuses bot filters answer with.
/// Everything else (rate limits, 404, DNS) is agent-independent.
fn advances_ladder(error: &CrawlError) -> bool {
    if error.is_dns_failure() {
        return false;
    }
    match error {
        CrawlError::Transport { .. } | CrawlError::Timeout { .. } => true,
        CrawlError::Status { status, .. } => matches!(*status, 401 | 403),
        _ => false,
    }
}

fn build_client(timeout_secs: u64) -> Result<Client, reqwest::Error> {
    ClientBuilder::new()
        .timeout(Duration::from_secs(timeout_secs))
        .danger_accept_invalid_certs(true)
        .redirect(Policy::limited(10))
        .cookie_store(true)
        .build()
}

fn header_string(headers: &reqwest::header::HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Decodes a response body per its declared charset, repairing bogus
/// declarations first.
///
/// Servers in this domain declare `utf8` or `GB1212` — neither is a
/// registered charset name; both mean UTF-8 and are rewritten before the
/// label lookup. Every other label is honored the way `Response::text()`
/// would honor it (same `encoding_rs` lookup), falling back to UTF-8 with
/// replacement when the label is unrecognized or absent.
fn decode_body(bytes: &[u8], content_type: Option<&str>) -> String {
    let label = content_type.and_then(declared_charset).map(|charset| {
        let normalized = charset.to_ascii_lowercase();
        if normalized == "utf8" || normalized == "gb1212" {
            debug!(charset = %charset, "repairing bogus charset declaration to UTF-8");
            "utf-8".to_string()
        } else {
            charset
        }
    });
    let encoding = label
        .as_deref()
        .and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes()))
        .unwrap_or(encoding_rs::UTF_8);
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

/// Extracts the `charset=` parameter from a Content-Type header value.
fn declared_charset(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

/// Maps a reqwest error onto the classified crawl error shape.
pub(crate) fn map_reqwest_error(url: &str, error: reqwest::Error) -> CrawlError {
    if error.is_timeout() {
        warn!(url, "request timed out");
        CrawlError::timeout(url)
    } else {
        CrawlError::transport(url, error)
    }
}
