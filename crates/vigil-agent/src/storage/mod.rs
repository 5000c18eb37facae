//! Snapshot storage
//!
//! Layers, front to back:
//! - [`CachedStorageDriver`]: write-back cache answering shallow reads from
//!   memory and batching writes to a backend
//! - [`InMemoryStorage`]: one [`StatsBuffer`] per entity
//! - a durable backend, resolved by name through [`StorageDriverRegistry`]

mod buffer;
mod cache;
mod memory;

use crate::config::StorageConfig;
use crate::error::{MonitorError, Result};
use async_trait::async_trait;
pub use buffer::StatsBuffer;
pub use cache::CachedStorageDriver;
pub use memory::InMemoryStorage;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use vigil_core::{ContainerReference, ContainerStats, ContainerStatsPercentiles, ContainerStatsSample};

/// Trait for snapshot storage backends.
///
/// Backends must tolerate the same snapshot being added more than once:
/// the write-back cache re-sends its whole batch after a failed flush.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Persist one snapshot of `reference`
    async fn add_stats(&self, reference: &ContainerReference, stats: &ContainerStats) -> Result<()>;

    /// Up to `num_stats` most recent snapshots, oldest first
    async fn recent_stats(&self, name: &str, num_stats: usize) -> Result<Vec<ContainerStats>>;

    /// CPU and memory usage percentiles
    async fn percentiles(
        &self,
        name: &str,
        cpu_percentages: &[u8],
        memory_percentages: &[u8],
    ) -> Result<ContainerStatsPercentiles>;

    /// Up to `num_samples` most recent samples, oldest first
    async fn samples(&self, name: &str, num_samples: usize) -> Result<Vec<ContainerStatsSample>>;

    /// Forget the in-memory history of an entity that is no longer
    /// monitored. Durable backends keep what they persisted.
    async fn remove_container(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    /// Release the backend
    async fn close(&self) -> Result<()>;
}

/// Implement StorageDriver for Arc<dyn StorageDriver> to allow sharing a
/// resolved backend
#[async_trait]
impl StorageDriver for Arc<dyn StorageDriver> {
    async fn add_stats(&self, reference: &ContainerReference, stats: &ContainerStats) -> Result<()> {
        (**self).add_stats(reference, stats).await
    }

    async fn recent_stats(&self, name: &str, num_stats: usize) -> Result<Vec<ContainerStats>> {
        (**self).recent_stats(name, num_stats).await
    }

    async fn percentiles(
        &self,
        name: &str,
        cpu_percentages: &[u8],
        memory_percentages: &[u8],
    ) -> Result<ContainerStatsPercentiles> {
        (**self)
            .percentiles(name, cpu_percentages, memory_percentages)
            .await
    }

    async fn samples(&self, name: &str, num_samples: usize) -> Result<Vec<ContainerStatsSample>> {
        (**self).samples(name, num_samples).await
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        (**self).remove_container(name).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

type DriverFactory = Box<dyn Fn(&StorageConfig) -> Result<Arc<dyn StorageDriver>> + Send + Sync>;

/// Backends registered by name, selected at startup from configuration
pub struct StorageDriverRegistry {
    factories: HashMap<String, DriverFactory>,
}

impl StorageDriverRegistry {
    /// Registry with no backends
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry holding the built-in `memory` backend
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("memory", |config| {
            Ok(Arc::new(InMemoryStorage::new(config.backend_buffer_depth)) as Arc<dyn StorageDriver>)
        });
        registry
    }

    /// Register (or replace) the backend called `name`
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&StorageConfig) -> Result<Arc<dyn StorageDriver>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Registered backend names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate the backend named by `config.driver`
    pub fn create(&self, config: &StorageConfig) -> Result<Arc<dyn StorageDriver>> {
        let factory = self
            .factories
            .get(&config.driver)
            .ok_or_else(|| MonitorError::UnknownStorageDriver(config.driver.clone()))?;
        factory(config)
    }
}

impl Default for StorageDriverRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

/// Resolve the configured backend and put the write-back cache in front of it
pub fn from_config(
    config: &StorageConfig,
    registry: &StorageDriverRegistry,
) -> Result<Arc<CachedStorageDriver>> {
    let backend = registry.create(config)?;
    info!(
        "Storage backend initialized: {} (cache depth: {}, flush threshold: {})",
        config.driver, config.max_stats_in_cache, config.flush_threshold
    );
    Ok(Arc::new(CachedStorageDriver::new(
        config.max_stats_in_cache,
        config.max_samples_in_cache,
        config.flush_threshold,
        backend,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = StorageDriverRegistry::with_builtin();
        assert_eq!(registry.names(), vec!["memory".to_string()]);
        assert!(registry.create(&StorageConfig::default()).is_ok());
    }

    #[test]
    fn test_unknown_driver_is_fatal() {
        let registry = StorageDriverRegistry::with_builtin();
        let config = StorageConfig {
            driver: "elasticsearch".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            from_config(&config, &registry),
            Err(MonitorError::UnknownStorageDriver(name)) if name == "elasticsearch"
        ));
    }

    #[test]
    fn test_register_custom_driver() {
        let mut registry = StorageDriverRegistry::new();
        registry.register("null", |_| {
            Ok(Arc::new(InMemoryStorage::new(1)) as Arc<dyn StorageDriver>)
        });
        let config = StorageConfig {
            driver: "null".to_string(),
            ..Default::default()
        };
        assert!(from_config(&config, &registry).is_ok());
    }

    #[tokio::test]
    async fn test_from_config_round_trips_through_cache() {
        let driver = from_config(&StorageConfig::default(), &StorageDriverRegistry::default()).unwrap();
        let reference = ContainerReference::new("/");
        driver
            .add_stats(&reference, &ContainerStats::at(chrono::Utc::now()))
            .await
            .unwrap();
        assert_eq!(driver.recent_stats("/", 10).await.unwrap().len(), 1);
    }
}
