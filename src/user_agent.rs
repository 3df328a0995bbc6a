//! User-Agent strings for the indexer's HTTP traffic.
//!
//! Single source for the default agent and the two fallback agents used by
//! the first-request ladder, so every client in the crate sends consistent
//! headers and the strings stay easy to update.

/// Project URL for User-Agent identification (good citizenship; RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/odindexer";

/// curl-like User-Agent, the first fallback when the default agent is
/// rejected or filtered by the server.
pub const CURL_USER_AGENT: &str = "curl/8.9.1";

/// Browser User-Agent, the last fallback for servers that only answer
/// browser-looking clients.
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Default User-Agent for listing requests (identifies the tool).
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("odindexer/{version} (open-directory-indexer; +{PROJECT_UA_URL})")
}

/// The fallback ladder tried on the session's first request: the caller's
/// preferred agent first, then curl, then Chrome.
#[must_use]
pub fn fallback_ladder(preferred: &str) -> Vec<String> {
    vec![
        preferred.to_string(),
        CURL_USER_AGENT.to_string(),
        CHROME_USER_AGENT.to_string(),
    ]
}
