//! File Cache Sweep Task
//!
//! Background task that periodically deletes stale chart files from the
//! cache directory.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::ChartCache;
use crate::config::MIN_SWEEP_INTERVAL;

/// Spawns a background task that removes cache files last modified more than
/// `ttl` ago.
///
/// The task runs in an infinite loop, sleeping for `sweep_interval_secs`
/// (at least one second) between runs. A failed sweep is logged and retried
/// on the next tick.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let sweep_handle = spawn_sweep_task(cache.clone(), Duration::from_secs(3600), 300);
/// // Later, during shutdown:
/// sweep_handle.abort();
/// ```
pub fn spawn_sweep_task(cache: ChartCache, ttl: Duration, sweep_interval_secs: u64) -> JoinHandle<()> {
    let sweep_interval_secs = sweep_interval_secs.max(MIN_SWEEP_INTERVAL);
    let interval = Duration::from_secs(sweep_interval_secs);

    tokio::spawn(async move {
        info!(
            "Starting file cache sweep with interval of {} seconds, ttl of {} seconds",
            sweep_interval_secs,
            ttl.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            match cache.files().sweep_older_than(ttl).await {
                Ok(0) => debug!("File cache sweep: no stale files found"),
                Ok(removed) => {
                    cache.record_evictions(removed);
                    info!("File cache sweep: removed {} stale files", removed);
                }
                Err(e) => warn!(error = %e, "File cache sweep failed"),
            }
        }
    })
}
