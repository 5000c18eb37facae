//! Handler factories, tried in registration order

use super::ContainerHandler;
use crate::error::{MonitorError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Builds handlers for the entities of one platform
#[async_trait]
pub trait HandlerFactory: Send + Sync {
    /// Short platform name used in logs, e.g. "docker" or "raw"
    fn name(&self) -> &str;

    /// Whether this factory is responsible for `container_name`
    fn can_handle(&self, container_name: &str) -> bool;

    async fn new_handler(&self, container_name: &str) -> Result<Arc<dyn ContainerHandler>>;
}

/// Ordered set of factories. The first factory that can handle a name wins,
/// so specific platforms register before catch-all ones.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: Vec<Arc<dyn HandlerFactory>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn HandlerFactory>) {
        info!("Registered container handler factory: {}", factory.name());
        self.factories.push(factory);
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Factory names in registration order
    pub fn names(&self) -> Vec<String> {
        self.factories.iter().map(|f| f.name().to_string()).collect()
    }

    /// Create a handler for `container_name` using the first matching factory
    pub async fn new_handler(&self, container_name: &str) -> Result<Arc<dyn ContainerHandler>> {
        let factory = self
            .factories
            .iter()
            .find(|f| f.can_handle(container_name))
            .ok_or_else(|| MonitorError::NoHandlerFactory(container_name.to_string()))?;
        debug!(
            "Using factory {} for container {}",
            factory.name(),
            container_name
        );
        factory.new_handler(container_name).await
    }
}
