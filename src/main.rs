//! CLI entry point for the open directory indexer.

use anyhow::{Context, Result};
use clap::Parser;
use odindexer_core::report::{
    load_snapshot, render_stats_markdown, upload::upload_url_list, write_json_snapshot,
    write_url_list,
};
use odindexer_core::speedtest::run_speedtest;
use odindexer_core::{Indexer, IndexerOptions};
use tracing::{debug, info, warn};
use url::Url;

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > verbose flag > default (info)
    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    // Display-only mode: render a previously written snapshot.
    if let Some(path) = &args.file {
        let snapshot = load_snapshot(path)
            .with_context(|| format!("failed to load snapshot {}", path.display()))?;
        println!("{}", render_stats_markdown(&snapshot));
        return Ok(());
    }

    let raw_url = args.url.as_deref().unwrap_or_default();
    let root = Url::parse(raw_url).with_context(|| format!("invalid seed URL: {raw_url}"))?;

    let options = IndexerOptions {
        threads: args.threads,
        timeout_secs: args.timeout,
        exact_file_sizes: args.exact_file_sizes,
        determine_size_by_download: false,
        user_agent: args.user_agent.clone(),
        username: args.username.clone(),
        password: args.password.clone(),
    };

    let indexer = Indexer::new(root, options)?;

    // Ctrl-C cancels both pools at their next suspension point.
    let shutdown = indexer.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    // The indexing task is awaited directly; the interactive wait below is
    // an orthogonal foreground shell.
    indexer.run().await?;

    let session = indexer.session();
    let snapshot = session.snapshot();

    if !args.no_reddit {
        println!("{}", render_stats_markdown(&snapshot));
    }

    let mut url_list_path = None;
    if !args.no_urls {
        let path = write_url_list(&session, args.output_file.clone())?;
        url_list_path = Some(path);
    }

    if args.json {
        write_json_snapshot(&snapshot)?;
    }

    if args.upload_urls {
        let text = match &url_list_path {
            Some(path) => std::fs::read_to_string(path)?,
            None => {
                let mut text = session.file_urls_in_order().join("\n");
                text.push('\n');
                text
            }
        };
        match upload_url_list(&text).await {
            Ok(link) => println!("URL list uploaded: {link}"),
            Err(error) => warn!(%error, "URL list upload failed"),
        }
    }

    if args.speedtest {
        match run_speedtest(&session).await {
            Ok(Some(result)) => println!(
                "Speed test: {:.2} MB/s ({} bytes in {:.1}s from {})",
                result.megabytes_per_second(),
                result.bytes,
                result.elapsed.as_secs_f64(),
                result.url
            ),
            Ok(None) => info!("speed test skipped: no sized HTTP file found"),
            Err(error) => warn!(%error, "speed test failed"),
        }
    }

    if !args.quit {
        wait_for_exit_key()?;
    }
    Ok(())
}

/// Blocks until the user presses ESC or `c`.
fn wait_for_exit_key() -> Result<()> {
    use crossterm::event::{Event, KeyCode, read};
    use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

    println!("Press ESC or 'c' to exit.");
    enable_raw_mode()?;
    let result = loop {
        match read() {
            Ok(Event::Key(key)) => match key.code {
                KeyCode::Esc | KeyCode::Char('c' | 'C') => break Ok(()),
                _ => {}
            },
            Ok(_) => {}
            Err(error) => break Err(error.into()),
        }
    };
    disable_raw_mode()?;
    result
}
