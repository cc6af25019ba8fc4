//! Background sweep for abandoned staging files.

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::STAGING_CLEAN_INTERVAL_SECS;
use crate::staging::StagingArea;

/// Spawns the periodic staging sweep.
pub fn spawn_background_tasks(staging: Arc<StagingArea>, ttl: Duration) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(STAGING_CLEAN_INTERVAL_SECS));
        loop {
            interval.tick().await;
            if let Err(err) = staging.remove_stale(ttl).await {
                warn!(error = %err, "staging sweep failed");
            }
        }
    });
}
