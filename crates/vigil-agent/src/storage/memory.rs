//! In-memory snapshot storage, one ring buffer per entity

use super::{StatsBuffer, StorageDriver};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error};
use vigil_core::{
    samples_from_stats, ContainerReference, ContainerStats, ContainerStatsPercentiles,
    ContainerStatsSample,
};

/// Bounded per-entity history held in memory.
///
/// Each entity gets its own [`StatsBuffer`] of `max_num_stats` snapshots on
/// first write. Unknown names read as empty. An optional pass-through
/// backend receives every write as well; its failures are logged and do not
/// fail the write.
pub struct InMemoryStorage {
    max_num_stats: usize,
    containers: DashMap<String, StatsBuffer<ContainerStats>>,
    backend: Option<Arc<dyn StorageDriver>>,
}

impl InMemoryStorage {
    pub fn new(max_num_stats: usize) -> Self {
        Self {
            max_num_stats,
            containers: DashMap::new(),
            backend: None,
        }
    }

    /// Memory storage that also writes through to `backend`
    pub fn with_backend(max_num_stats: usize, backend: Arc<dyn StorageDriver>) -> Self {
        Self {
            backend: Some(backend),
            ..Self::new(max_num_stats)
        }
    }

    /// Number of entities with at least one snapshot
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Snapshots held for `name`
    pub fn size_of(&self, name: &str) -> usize {
        self.containers.get(name).map(|b| b.size()).unwrap_or(0)
    }

    fn window(&self, name: &str, n: usize) -> Vec<ContainerStats> {
        self.containers
            .get(name)
            .map(|buffer| buffer.first_n(n))
            .unwrap_or_default()
    }
}

#[async_trait]
impl StorageDriver for InMemoryStorage {
    async fn add_stats(&self, reference: &ContainerReference, stats: &ContainerStats) -> Result<()> {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.add_stats(reference, stats).await {
                error!("Failed to write stats for {} to backend: {}", reference.name, e);
            }
        }

        self.containers
            .entry(reference.name.clone())
            .or_insert_with(|| StatsBuffer::new(self.max_num_stats))
            .add(stats.clone());
        Ok(())
    }

    async fn recent_stats(&self, name: &str, num_stats: usize) -> Result<Vec<ContainerStats>> {
        Ok(self.window(name, num_stats))
    }

    async fn percentiles(
        &self,
        name: &str,
        cpu_percentages: &[u8],
        memory_percentages: &[u8],
    ) -> Result<ContainerStatsPercentiles> {
        let stats = self.window(name, self.max_num_stats);
        let samples = samples_from_stats(&stats);
        Ok(ContainerStatsPercentiles::compute(
            &stats,
            &samples,
            cpu_percentages,
            memory_percentages,
        )?)
    }

    async fn samples(&self, name: &str, num_samples: usize) -> Result<Vec<ContainerStatsSample>> {
        // n samples need n+1 snapshots
        let stats = self.window(name, num_samples.saturating_add(1));
        let mut samples = samples_from_stats(&stats);
        if samples.len() > num_samples {
            samples.drain(..samples.len() - num_samples);
        }
        Ok(samples)
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        if self.containers.remove(name).is_some() {
            debug!("Released stats buffer of container {}", name);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        debug!("Closing in-memory storage ({} containers)", self.containers.len());
        self.containers.clear();
        match &self.backend {
            Some(backend) => backend.close().await,
            None => Ok(()),
        }
    }
}
