//! Crawl boundary predicate.
//!
//! Decides whether a discovered URL belongs to the crawl: same host and same
//! path prefix as the seed, with an allowance for sibling file links whose
//! URL lacks the trailing slash. A short list of special hosts bypasses the
//! predicate entirely because their file URLs live on different storage
//! hosts than their listing endpoints.

use url::Url;

/// Google Drive listing host; file URLs resolve to separate storage hosts.
pub const GOOGLE_DRIVE_HOST: &str = "drive.google.com";

/// Blitzfiles listing host; file URLs resolve to separate storage hosts.
pub const BLITZFILES_HOST: &str = "blitzfiles.com";

/// Hosts whose links bypass the scope predicate.
const EXEMPT_HOSTS: [&str; 2] = [GOOGLE_DRIVE_HOST, BLITZFILES_HOST];

/// Returns true when the URL's host is recognized as a special service whose
/// storage URLs legitimately point off-host.
#[must_use]
pub fn is_exempt_host(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    EXEMPT_HOSTS
        .iter()
        .any(|exempt| host == *exempt || host.ends_with(&format!(".{exempt}")))
}

/// Returns true when `candidate` falls inside the crawl boundary rooted at
/// `base`.
///
/// The two URLs are in scope when they are byte-equal, or when they share a
/// host and one path is a prefix of the other after stripping a trailing
/// filename. Directory listings routinely link to sibling files whose URL
/// lacks the trailing slash, and to sibling directories at the seed's own
/// level (mirror and sort variants); the base is therefore compared by its
/// parent directory, while candidates only get a trailing *filename*
/// stripped. Cross-site and cross-tree references stay excluded.
#[must_use]
pub fn in_scope(base: &Url, candidate: &Url) -> bool {
    if base.as_str() == candidate.as_str() {
        return true;
    }

    if base.host_str() != candidate.host_str() {
        return false;
    }

    let base_path = base.path();
    let candidate_path = candidate.path();

    candidate_path.starts_with(base_path)
        || candidate_path.starts_with(parent_directory(base_path))
        || base_path.starts_with(strip_trailing_filename(candidate_path))
}

/// Strips the trailing filename from a path, returning the containing
/// directory (always ending in '/').
///
/// Any non-empty last segment without a trailing slash is treated as a
/// filename, dotted or not; servers emit extensionless files often enough
/// that a dot test would misclassify them.
fn strip_trailing_filename(path: &str) -> &str {
    if path.ends_with('/') {
        return path;
    }
    match path.rfind('/') {
        Some(idx) => &path[..=idx],
        None => path,
    }
}

/// Drops the last path segment whether or not it carries a trailing slash:
/// `/a/b/` and `/a/b` both become `/a/`. The root stays `/`.
fn parent_directory(path: &str) -> &str {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return "/";
    }
    match trimmed.rfind('/') {
        Some(idx) => &path[..=idx],
        None => path,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_identical_urls_in_scope() {
        let base = url("https://host/files/");
        assert!(in_scope(&base, &base));
    }

    #[test]
    fn test_subdirectory_in_scope() {
        let base = url("https://host/files/");
        let sub = url("https://host/files/sub/");
        assert!(in_scope(&base, &sub));
    }

    #[test]
    fn test_deep_subdirectory_in_scope() {
        let base = url("https://host/files/");
        let deep = url("https://host/files/a/b/c/");
        assert!(in_scope(&base, &deep));
    }

    #[test]
    fn test_sibling_file_without_trailing_slash_in_scope() {
        let base = url("https://host/files/");
        let file = url("https://host/files/archive.zip");
        assert!(in_scope(&base, &file));
    }

    #[test]
    fn test_extensionless_file_in_scope() {
        let base = url("https://host/files/");
        let file = url("https://host/files/README");
        assert!(in_scope(&base, &file));
    }

    #[test]
    fn test_different_host_out_of_scope() {
        let base = url("https://host/files/");
        let other = url("https://other/files/");
        assert!(!in_scope(&base, &other));
    }

    #[test]
    fn test_seed_level_sibling_in_scope() {
        // Listings at /a/ routinely cross-link /b/ on the same host
        // (mirrors, sort variants); those stay inside the boundary.
        let base = url("https://host/a/");
        let other = url("https://host/b/");
        assert!(in_scope(&base, &other));
    }

    #[test]
    fn test_distant_tree_out_of_scope() {
        let base = url("https://host/pub/mirrors/a/");
        let other = url("https://host/private/b/");
        assert!(!in_scope(&base, &other));
    }

    #[test]
    fn test_parent_directory_handles_root() {
        assert_eq!(parent_directory("/"), "/");
        assert_eq!(parent_directory("/a/"), "/");
        assert_eq!(parent_directory("/a/b/"), "/a/");
        assert_eq!(parent_directory("/a/b.txt"), "/a/");
    }

    #[test]
    fn test_parent_directory_of_file_base_in_scope() {
        // A seed pointing at a file accepts links from its directory.
        let base = url("https://host/files/index.html");
        let dir = url("https://host/files/other.txt");
        assert!(in_scope(&base, &dir));
    }

    #[test]
    fn test_base_inside_candidate_directory_in_scope() {
        let base = url("https://host/files/sub/");
        let candidate = url("https://host/files/sub/more");
        assert!(in_scope(&base, &candidate));
    }

    #[test]
    fn test_strip_trailing_filename_keeps_directories() {
        assert_eq!(strip_trailing_filename("/a/b/"), "/a/b/");
        assert_eq!(strip_trailing_filename("/a/b.txt"), "/a/");
        assert_eq!(strip_trailing_filename("/file"), "/");
    }

    #[test]
    fn test_google_drive_host_exempt() {
        assert!(is_exempt_host(&url("https://drive.google.com/drive/folders/abc")));
    }

    #[test]
    fn test_blitzfiles_host_exempt() {
        assert!(is_exempt_host(&url("https://blitzfiles.com/files/x")));
        assert!(is_exempt_host(&url("https://cdn.blitzfiles.com/x")));
    }

    #[test]
    fn test_ordinary_host_not_exempt() {
        assert!(!is_exempt_host(&url("https://example.com/files/")));
    }
}
