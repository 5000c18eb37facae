//! Periodic rescan of the whole entity tree

use crate::config::long_threshold;
use crate::manager::{Manager, ROOT_CONTAINER};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Run the global housekeeping worker
///
/// Re-runs discovery from the root on every tick so entities the platform
/// did not report through events are still picked up and retired.
pub async fn run_global_housekeeping(
    manager: Arc<Manager>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let long_housekeeping = long_threshold(interval);
    info!("Starting global housekeeping (interval: {:?})", interval);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Shutdown signal received, stopping global housekeeping");
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {
                let start = Instant::now();
                if let Err(e) = manager.detect_subcontainers(ROOT_CONTAINER).await {
                    warn!("Failed to detect containers: {}", e);
                }
                let elapsed = start.elapsed();
                if elapsed >= long_housekeeping {
                    debug!("Global housekeeping took {:?}", elapsed);
                }
            }
        }
    }

    info!("Global housekeeping stopped");
}
