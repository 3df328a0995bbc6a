//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use odindexer_core::{DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_WORKERS};

/// Index an open directory listing recursively.
///
/// Points at a single seed URL (HTTP/HTTPS directory index, FTP/FTPS
/// listing, Google Drive folder, GoIndex, or Calibre server) and enumerates
/// every subdirectory and file under it, producing a URL list, statistics,
/// and an optional JSON snapshot.
#[derive(Parser, Debug)]
#[command(name = "odindexer")]
#[command(author, version, about)]
pub struct Args {
    /// Seed URL of the open directory
    #[arg(short = 'u', long, required_unless_present = "file")]
    pub url: Option<String>,

    /// Worker count for both pools
    #[arg(short = 't', long, default_value_t = DEFAULT_WORKERS)]
    pub threads: usize,

    /// Per-request timeout in seconds
    #[arg(short = 'o', long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Exit immediately when the crawl finishes (instead of waiting for a key)
    #[arg(short = 'q', long)]
    pub quit: bool,

    /// Write a JSON session snapshot next to the URL list
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Suppress the URL list file
    #[arg(short = 'f', long = "no-urls")]
    pub no_urls: bool,

    /// Suppress the markdown stats block on stdout
    #[arg(short = 'r', long = "no-reddit")]
    pub no_reddit: bool,

    /// Resolve every file size over HTTP even when the listing provided one
    #[arg(short = 'e', long = "exact-file-sizes")]
    pub exact_file_sizes: bool,

    /// Upload the URL list to a paste host (primary, then fallback)
    #[arg(short = 'l', long = "upload-urls")]
    pub upload_urls: bool,

    /// Download the largest file briefly to measure throughput
    #[arg(short = 's', long)]
    pub speedtest: bool,

    /// Override the default User-Agent
    #[arg(short = 'a', long = "user-agent")]
    pub user_agent: Option<String>,

    /// HTTP Basic or FTP username
    #[arg(long)]
    pub username: Option<String>,

    /// HTTP Basic or FTP password
    #[arg(long)]
    pub password: Option<String>,

    /// Override the URL-list filename
    #[arg(long = "output-file", visible_alias = "of")]
    pub output_file: Option<PathBuf>,

    /// Load a previously written JSON snapshot and print its stats
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let args = Args::try_parse_from(["odindexer", "-u", "https://host/files/"]).unwrap();
        assert_eq!(args.url.as_deref(), Some("https://host/files/"));
        assert_eq!(args.threads, 5);
        assert_eq!(args.timeout, 100);
        assert!(!args.quit);
        assert!(!args.json);
        assert!(!args.no_urls);
        assert!(!args.no_reddit);
        assert!(!args.exact_file_sizes);
        assert!(!args.upload_urls);
        assert!(!args.speedtest);
        assert!(args.user_agent.is_none());
        assert!(args.output_file.is_none());
        assert_eq!(args.verbose, 0);
    }

    #[test]
    fn test_cli_requires_url_or_file() {
        assert!(Args::try_parse_from(["odindexer"]).is_err());
        assert!(Args::try_parse_from(["odindexer", "--file", "snap.json"]).is_ok());
    }

    #[test]
    fn test_cli_thread_and_timeout_flags() {
        let args = Args::try_parse_from([
            "odindexer", "-u", "https://h/", "-t", "8", "-o", "30",
        ])
        .unwrap();
        assert_eq!(args.threads, 8);
        assert_eq!(args.timeout, 30);
    }

    #[test]
    fn test_cli_boolean_flags() {
        let args = Args::try_parse_from([
            "odindexer", "-u", "https://h/", "-q", "-j", "-f", "-r", "-e", "-l", "-s",
        ])
        .unwrap();
        assert!(args.quit);
        assert!(args.json);
        assert!(args.no_urls);
        assert!(args.no_reddit);
        assert!(args.exact_file_sizes);
        assert!(args.upload_urls);
        assert!(args.speedtest);
    }

    #[test]
    fn test_cli_credentials_and_agent() {
        let args = Args::try_parse_from([
            "odindexer",
            "-u",
            "ftp://h/pub/",
            "--username",
            "scan",
            "--password",
            "secret",
            "-a",
            "probe/1.0",
        ])
        .unwrap();
        assert_eq!(args.username.as_deref(), Some("scan"));
        assert_eq!(args.password.as_deref(), Some("secret"));
        assert_eq!(args.user_agent.as_deref(), Some("probe/1.0"));
    }

    #[test]
    fn test_cli_output_file_alias() {
        let args = Args::try_parse_from([
            "odindexer", "-u", "https://h/", "--of", "list.txt",
        ])
        .unwrap();
        assert_eq!(args.output_file.as_deref(), Some(std::path::Path::new("list.txt")));

        let args = Args::try_parse_from([
            "odindexer", "-u", "https://h/", "--output-file", "list.txt",
        ])
        .unwrap();
        assert_eq!(args.output_file.as_deref(), Some(std::path::Path::new("list.txt")));
    }

    #[test]
    fn test_cli_verbose_count() {
        let args = Args::try_parse_from(["odindexer", "-u", "https://h/", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_help_flag() {
        let result = Args::try_parse_from(["odindexer", "--help"]);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::DisplayHelp
        );
    }
}
