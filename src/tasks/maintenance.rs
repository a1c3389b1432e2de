//! Maintenance Task
//!
//! Periodic expiry sweep plus persistence of the access-pattern model.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::error::Result;
use crate::prediction::AccessPatternRecorder;
use crate::storage::ModelStore;

/// Saves the pattern model if it changed since the last save.
///
/// Returns whether a save happened. On failure the model stays dirty so the
/// next attempt retries it.
pub async fn persist_model(
    recorder: &AccessPatternRecorder,
    models: &dyn ModelStore,
) -> Result<bool> {
    if !recorder.is_dirty() {
        return Ok(false);
    }
    let snapshot = recorder.snapshot();
    if let Err(e) = models.save(&snapshot).await {
        recorder.mark_dirty();
        return Err(e);
    }
    Ok(true)
}

/// Spawns the maintenance loop.
///
/// Each tick sweeps expired entries from every tier and saves the pattern
/// model when it is dirty. Failures are logged and the loop carries on with
/// the next tick.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
pub fn spawn_maintenance_task(
    store: Arc<CacheStore>,
    recorder: Arc<AccessPatternRecorder>,
    models: Arc<dyn ModelStore>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Starting maintenance task with interval of {}ms",
            interval.as_millis()
        );

        loop {
            tokio::time::sleep(interval).await;

            let report = store.sweep_expired().await;
            for tier in &report.failed_tiers {
                warn!("Expiry sweep failed for {} tier", tier);
            }
            if report.removed > 0 {
                info!("Expiry sweep: removed {} expired entries", report.removed);
            } else {
                debug!("Expiry sweep: no expired entries found");
            }

            match persist_model(&recorder, models.as_ref()).await {
                Ok(true) => debug!("Access-pattern model saved"),
                Ok(false) => {}
                Err(e) => warn!("Failed to save access-pattern model: {}", e),
            }
        }
    })
}
