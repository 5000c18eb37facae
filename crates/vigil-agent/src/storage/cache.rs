//! Write-back cache in front of a slower storage backend

use super::{InMemoryStorage, StorageDriver};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use vigil_core::{ContainerReference, ContainerStats, ContainerStatsPercentiles, ContainerStatsSample};

/// Serves shallow reads from memory and persists every snapshot to a
/// backend in batches.
///
/// Writes land in the in-memory cache immediately and are queued in a dirty
/// batch; once the batch reaches `flush_threshold` entries it is flushed
/// inline. A flush that fails keeps the whole batch, so a backend may see
/// the same snapshot more than once but never loses one.
pub struct CachedStorageDriver<B: StorageDriver = Arc<dyn StorageDriver>> {
    max_num_stats_in_cache: usize,
    max_num_samples_in_cache: usize,
    flush_threshold: usize,
    cache: InMemoryStorage,
    backend: B,
    /// Held across backend calls so one flush at a time is in flight
    dirty: Mutex<Vec<(ContainerReference, ContainerStats)>>,
}

impl<B: StorageDriver> CachedStorageDriver<B> {
    pub fn new(
        max_num_stats_in_cache: usize,
        max_num_samples_in_cache: usize,
        flush_threshold: usize,
        backend: B,
    ) -> Self {
        // Samples need one snapshot more than they cover
        let depth = max_num_stats_in_cache.max(max_num_samples_in_cache.saturating_add(1));
        Self {
            max_num_stats_in_cache,
            max_num_samples_in_cache,
            flush_threshold: flush_threshold.max(1),
            cache: InMemoryStorage::new(depth),
            backend,
            dirty: Mutex::new(Vec::with_capacity(flush_threshold)),
        }
    }

    /// Send every dirty snapshot to the backend, in arrival order.
    ///
    /// On the first backend error the batch is left untouched and the error
    /// returned; the next flush re-sends all of it.
    pub async fn flush(&self) -> Result<()> {
        let mut dirty = self.dirty.lock().await;
        self.flush_locked(&mut dirty).await
    }

    /// Snapshots accepted but not yet confirmed by the backend
    pub async fn pending(&self) -> usize {
        self.dirty.lock().await.len()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn flush_locked(&self, dirty: &mut Vec<(ContainerReference, ContainerStats)>) -> Result<()> {
        for (reference, stats) in dirty.iter() {
            if let Err(e) = self.backend.add_stats(reference, stats).await {
                warn!(
                    "Failed to flush {} buffered snapshots to backend: {}",
                    dirty.len(),
                    e
                );
                return Err(e);
            }
        }
        debug!("Flushed {} snapshots to backend", dirty.len());
        dirty.clear();
        Ok(())
    }
}

#[async_trait]
impl<B: StorageDriver> StorageDriver for CachedStorageDriver<B> {
    async fn add_stats(&self, reference: &ContainerReference, stats: &ContainerStats) -> Result<()> {
        self.cache.add_stats(reference, stats).await?;

        let mut dirty = self.dirty.lock().await;
        dirty.push((reference.clone(), stats.clone()));
        if dirty.len() >= self.flush_threshold {
            self.flush_locked(&mut dirty).await?;
        }
        Ok(())
    }

    async fn recent_stats(&self, name: &str, num_stats: usize) -> Result<Vec<ContainerStats>> {
        if num_stats <= self.max_num_stats_in_cache {
            return self.cache.recent_stats(name, num_stats).await;
        }
        self.backend.recent_stats(name, num_stats).await
    }

    async fn percentiles(
        &self,
        name: &str,
        cpu_percentages: &[u8],
        memory_percentages: &[u8],
    ) -> Result<ContainerStatsPercentiles> {
        self.cache
            .percentiles(name, cpu_percentages, memory_percentages)
            .await
    }

    async fn samples(&self, name: &str, num_samples: usize) -> Result<Vec<ContainerStatsSample>> {
        if num_samples <= self.max_num_samples_in_cache {
            return self.cache.samples(name, num_samples).await;
        }
        self.backend.samples(name, num_samples).await
    }

    /// Drops the cached history only; snapshots still in the dirty batch
    /// are delivered on the next flush
    async fn remove_container(&self, name: &str) -> Result<()> {
        self.cache.remove_container(name).await
    }

    async fn close(&self) -> Result<()> {
        if let Err(e) = self.flush().await {
            warn!(
                "Dropping {} unflushed snapshots on close: {}",
                self.pending().await,
                e
            );
        }
        self.cache.close().await?;
        self.backend.close().await
    }
}
