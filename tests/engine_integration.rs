//! End-to-end crawl scenarios against mock HTTP servers.

use std::time::{Duration, Instant};

use odindexer_core::{FILE_SIZE_UNKNOWN, Indexer, IndexerOptions};
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html")
}

async fn run_crawl(seed: &str, options: IndexerOptions) -> Indexer {
    let indexer = Indexer::new(Url::parse(seed).expect("valid seed"), options).expect("indexer");
    indexer.run().await.expect("crawl reaches quiescence");
    indexer
}

#[tokio::test]
async fn test_single_directory_with_head_fill_in() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/files/"))
        .respond_with(html(
            r#"<html><body><pre>
<a href="a.txt">a.txt</a>    12-Jan-2024 13:55    10
<a href="b.txt">b.txt</a>    12-Jan-2024 13:55    -
</pre></body></html>"#,
        ))
        .mount(&server)
        .await;

    // A 20-byte body makes hyper advertise Content-Length: 20 on the HEAD
    // response without shipping the bytes.
    Mock::given(method("HEAD"))
        .and(path("/files/b.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 20]))
        .mount(&server)
        .await;

    let seed = format!("{}/files/", server.uri());
    let indexer = run_crawl(&seed, IndexerOptions::default()).await;
    let session = indexer.session();

    assert_eq!(session.total_files(), 2, "one directory with two files");
    let root = session.directory(&seed).expect("root record");
    assert!(root.finished);
    assert_eq!(root.file_urls.len(), 2);
    assert!(root.subdirectories.is_empty());

    let a = session
        .file(&format!("{}/files/a.txt", server.uri()))
        .expect("a.txt recorded");
    assert_eq!(a.size, 10);

    let b = session
        .file(&format!("{}/files/b.txt", server.uri()))
        .expect("b.txt recorded");
    assert_eq!(b.size, 20, "unknown size resolved via HEAD");

    // The URL list has one line per distinct file.
    let dir = TempDir::new().expect("temp dir");
    let list = odindexer_core::report::write_url_list(
        &session,
        Some(dir.path().join("urls.txt")),
    )
    .expect("url list written");
    let contents = std::fs::read_to_string(list).expect("readable list");
    assert_eq!(contents.lines().count(), 2);
}

#[tokio::test]
async fn test_nested_dedup_processes_subdirectory_once() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/x/"))
        .respond_with(html(
            r#"<a href="sub/">sub/</a><a href="sub/../sub/">sub again</a>"#,
        ))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/x/sub/"))
        .respond_with(html("<html><body>empty</body></html>"))
        .expect(1)
        .mount(&server)
        .await;

    let seed = format!("{}/x/", server.uri());
    let indexer = run_crawl(&seed, IndexerOptions::default()).await;
    let session = indexer.session();

    let root = session.directory(&seed).expect("root record");
    assert_eq!(
        root.subdirectories,
        vec![format!("{}/x/sub/", server.uri())],
        "the two spellings collapse to one canonical subdirectory"
    );
    // Mock::expect(1) verifies the single GET when the server drops.
}

#[tokio::test]
async fn test_rate_limit_then_success_backs_off() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/files/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/files/"))
        .respond_with(html(
            r#"<a href="a.txt">a.txt</a>    12-Jan-2024 13:55    10"#,
        ))
        .mount(&server)
        .await;

    let seed = format!("{}/files/", server.uri());
    let started = Instant::now();
    let indexer = run_crawl(&seed, IndexerOptions::default()).await;
    let elapsed = started.elapsed();
    let session = indexer.session();

    assert_eq!(session.total_http_requests(), 3, "two 503s then the listing");
    assert_eq!(session.http_status_codes().get(&503), Some(&2));
    assert_eq!(session.http_status_codes().get(&200), Some(&1));
    assert!(
        elapsed >= Duration::from_secs(6),
        "backoff floors (2s + 4s) respected, got {elapsed:?}"
    );

    let root = session.directory(&seed).expect("root record");
    assert!(root.finished, "directory finishes normally after retries");
    assert!(!root.error);
    assert_eq!(session.error_count(), 0);
    assert!(session.error_urls().is_empty());
}

#[tokio::test]
async fn test_forbidden_cancels_after_third_attempt() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/locked/"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let seed = format!("{}/locked/", server.uri());
    let indexer = run_crawl(&seed, IndexerOptions::default()).await;
    let session = indexer.session();

    let root = session.directory(&seed).expect("root record");
    assert!(root.error, "directory marked errored after attempt 3");
    assert!(!root.finished);
    assert_eq!(session.error_count(), 1);
    assert_eq!(session.error_urls(), vec![seed.clone()]);
    // The crawl still reached quiescence (run() returned Ok above).
}

#[tokio::test]
async fn test_off_scope_link_dropped_sibling_enqueued() {
    let server = MockServer::start().await;

    let sibling = format!("{}/b/", server.uri());
    Mock::given(method("GET"))
        .and(path("/a/"))
        .respond_with(html(&format!(
            r#"<a href="https://other/">offsite</a><a href="{sibling}">b</a>"#
        )))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/b/"))
        .respond_with(html("<html><body>empty</body></html>"))
        .expect(1)
        .mount(&server)
        .await;

    let seed = format!("{}/a/", server.uri());
    let indexer = run_crawl(&seed, IndexerOptions::default()).await;
    let session = indexer.session();

    assert!(session.is_processed(&sibling), "same-host sibling enqueued");
    assert!(
        session.directory("https://other/").is_none(),
        "cross-site link never becomes a directory"
    );
    assert!(session.skipped_count() >= 1, "off-scope drop counted");
}

#[tokio::test]
async fn test_calibre_detection_wins_over_generic_html() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Server", "calibre/5.0")
                .set_body_raw(
                    r#"<html><script>var CALIBRE_VERSION = "5.0.0";</script>
<a href="should-not-be-crawled/">decoy</a></html>"#,
                    "text/html",
                ),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/ajax/search"))
        .and(query_param("num", "100"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"total_num": 1, "book_ids": [7]}"#,
            "application/json",
        ))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/ajax/books"))
        .and(query_param("ids", "7"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"7": {"title": "Moby Dick", "format_metadata": {"epub": {"size": 1000, "mtime": "2020-01-01T00:00:00+00:00"}}}}"#,
            "application/json",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let seed = format!("{}/", server.uri());
    let indexer = run_crawl(&seed, IndexerOptions::default()).await;
    let session = indexer.session();

    let root = session.directory(&seed).expect("root record");
    assert_eq!(
        root.parser.as_deref(),
        Some("calibre"),
        "calibre parser selected, generic HTML parser not invoked"
    );
    assert!(
        root.subdirectories.is_empty(),
        "the decoy anchor was never treated as a listing entry"
    );
    assert_eq!(session.total_files(), 1);
    let book = session
        .file(&format!("{}/get/EPUB/7", server.uri()))
        .expect("book format recorded");
    assert_eq!(book.size, 1000);
    assert_eq!(book.name, "Moby Dick.epub");
    assert_eq!(
        session.parameter("calibre_version").as_deref(),
        Some("5.0.0")
    );
}

#[tokio::test]
async fn test_exact_file_sizes_heads_every_file() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/files/"))
        .respond_with(html(
            r#"<a href="a.txt">a.txt</a>    12-Jan-2024 13:55    10"#,
        ))
        .mount(&server)
        .await;

    Mock::given(method("HEAD"))
        .and(path("/files/a.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 999]))
        .expect(1)
        .mount(&server)
        .await;

    let seed = format!("{}/files/", server.uri());
    let options = IndexerOptions {
        exact_file_sizes: true,
        ..IndexerOptions::default()
    };
    let indexer = run_crawl(&seed, options).await;
    let session = indexer.session();

    let a = session
        .file(&format!("{}/files/a.txt", server.uri()))
        .expect("a.txt recorded");
    assert_eq!(a.size, 999, "listing size replaced by the HEAD result");
}

#[tokio::test]
async fn test_head_failure_leaves_sentinel_and_crawl_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/files/"))
        .respond_with(html(r#"<a href="ghost.bin">ghost.bin</a>    -"#))
        .mount(&server)
        .await;

    Mock::given(method("HEAD"))
        .and(path("/files/ghost.bin"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let seed = format!("{}/files/", server.uri());
    let indexer = run_crawl(&seed, IndexerOptions::default()).await;
    let session = indexer.session();

    let ghost = session
        .file(&format!("{}/files/ghost.bin", server.uri()))
        .expect("file recorded despite failed HEAD");
    assert_eq!(ghost.size, FILE_SIZE_UNKNOWN);
    let root = session.directory(&seed).expect("root record");
    assert!(root.finished, "size failures never fail the directory");
}

#[tokio::test]
async fn test_recursion_into_subdirectories() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/files/"))
        .respond_with(html(r#"<a href="sub/">sub/</a>"#))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/files/sub/"))
        .respond_with(html(r#"<a href="deep.txt">deep.txt</a>    5"#))
        .mount(&server)
        .await;

    let seed = format!("{}/files/", server.uri());
    let indexer = run_crawl(&seed, IndexerOptions::default()).await;
    let session = indexer.session();

    let sub_url = format!("{}/files/sub/", server.uri());
    let sub = session.directory(&sub_url).expect("subdirectory record");
    assert!(sub.finished);
    assert_eq!(sub.parent_url.as_deref(), Some(seed.as_str()));
    assert_eq!(sub.file_urls.len(), 1);
    assert_eq!(session.total_files(), 1);

    // Snapshot reflects the nesting.
    let snapshot = session.snapshot();
    assert_eq!(snapshot.root.subdirectories.len(), 1);
    assert_eq!(snapshot.root.subdirectories[0].files.len(), 1);
}
