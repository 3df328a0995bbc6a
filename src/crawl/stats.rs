//! Periodic statistics observer.
//!
//! Emits queue depths, running-worker counts, and the size-resolution
//! backlog every 30 seconds, tightening to 5 seconds once the directory
//! pool has drained. Purely observational; it never touches the data path.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::task::JoinHandle;
use tracing::info;

use super::constants::{STATS_PERIOD, STATS_PERIOD_DRAINED};
use super::engine::EngineInner;

/// Spawns the observer task. The engine aborts it after both pools drain.
pub(crate) fn spawn_observer(inner: Arc<EngineInner>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let period = if inner.dir_workers_done.load(Ordering::SeqCst) {
                STATS_PERIOD_DRAINED
            } else {
                STATS_PERIOD
            };
            tokio::select! {
                () = inner.shutdown.cancelled() => break,
                () = tokio::time::sleep(period) => {}
            }

            info!(
                dir_queue = inner.dir_queue.len(),
                size_queue = inner.file_queue.len(),
                running_dir_workers = inner.running_dir.load(Ordering::SeqCst),
                running_size_workers = inner.running_size.load(Ordering::SeqCst),
                in_flight = inner.in_flight.len(),
                processed = inner.session.processed_count(),
                files = inner.session.total_files(),
                http_requests = inner.session.total_http_requests(),
                errors = inner.session.error_count(),
                "indexing statistics"
            );
        }
    })
}
