//! Applies add/delete notifications from the platform as they arrive

use crate::handler::{ContainerHandler, SubcontainerEvent, SubcontainerEventType};
use crate::manager::Manager;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Run the event watcher
///
/// Exits on shutdown or when the platform closes the event channel. On the
/// way out the subscription on `handler` is cancelled.
pub async fn run_event_watcher(
    manager: Arc<Manager>,
    handler: Arc<dyn ContainerHandler>,
    mut events: mpsc::Receiver<SubcontainerEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Starting container event watcher");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Shutdown signal received, stopping event watcher");
                    break;
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("Container event channel closed");
                    break;
                };
                apply_event(&manager, event).await;
            }
        }
    }

    if let Err(e) = handler.stop_watching_subcontainers().await {
        warn!("Failed to stop watching subcontainers: {}", e);
    }
    info!("Event watcher stopped");
}

async fn apply_event(manager: &Manager, event: SubcontainerEvent) {
    debug!("Container event: {:?} {}", event.event_type, event.name);
    let result = match event.event_type {
        SubcontainerEventType::Add => manager.create_container(&event.name).await,
        SubcontainerEventType::Delete => manager.destroy_container(&event.name).await,
    };
    if let Err(e) = result {
        warn!(
            "Failed to apply {:?} event for container {}: {}",
            event.event_type, event.name, e
        );
    }
}
