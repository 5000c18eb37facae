//! Per-entity housekeeping: one task sampling one entity on an adaptive schedule

use crate::config::HousekeepingConfig;
use crate::error::{MonitorError, Result};
use crate::handler::{ContainerHandler, ListType};
use crate::storage::StorageDriver;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vigil_core::{ContainerInfo, ContainerReference, ContainerSpec, ContainerStats, ContainerStatsSample};

/// Lifecycle of a housekeeping unit. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HousekeepingState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl HousekeepingState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Next housekeeping interval given the two most recent snapshots.
///
/// Idle entities (identical consecutive snapshots) back off by doubling up
/// to `max_interval`; any change in usage snaps the interval back to the
/// baseline. With fewer than two snapshots the interval is kept.
pub fn adaptive_interval(
    current: Duration,
    settings: &HousekeepingConfig,
    recent: &[ContainerStats],
) -> Duration {
    let [previous, latest] = recent else {
        return current;
    };
    if previous.stats_eq(latest) {
        if current < settings.max_interval {
            return current.saturating_mul(2).min(settings.max_interval);
        }
        current
    } else if current != settings.interval {
        settings.interval
    } else {
        current
    }
}

/// Spec and direct children as last read from the handler
#[derive(Debug, Default)]
struct CachedInfo {
    spec: ContainerSpec,
    subcontainers: Vec<ContainerReference>,
}

/// One monitored entity and its housekeeping task
pub struct ContainerData {
    reference: ContainerReference,
    handler: Arc<dyn ContainerHandler>,
    storage: Arc<dyn StorageDriver>,
    settings: HousekeepingConfig,
    log_usage: bool,
    info: ArcSwap<CachedInfo>,
    /// Time of the last successful refresh; held while refreshing
    last_refresh: Mutex<Option<Instant>>,
    interval_ms: AtomicU64,
    state: AtomicU8,
    stop_tx: mpsc::Sender<()>,
    stop_rx: StdMutex<Option<mpsc::Receiver<()>>>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl ContainerData {
    /// Create a unit for the entity behind `handler`. The unit is idle until
    /// [`start`](Self::start) is called.
    pub async fn new(
        handler: Arc<dyn ContainerHandler>,
        storage: Arc<dyn StorageDriver>,
        settings: HousekeepingConfig,
        log_usage: bool,
    ) -> Result<Arc<Self>> {
        let reference = handler.container_reference().await?;
        let (stop_tx, stop_rx) = mpsc::channel(1);
        Ok(Arc::new(Self {
            reference,
            handler,
            storage,
            interval_ms: AtomicU64::new(duration_ms(settings.interval)),
            settings,
            log_usage,
            info: ArcSwap::from_pointee(CachedInfo::default()),
            last_refresh: Mutex::new(None),
            state: AtomicU8::new(HousekeepingState::Created as u8),
            stop_tx,
            stop_rx: StdMutex::new(Some(stop_rx)),
            task: StdMutex::new(None),
        }))
    }

    pub fn reference(&self) -> &ContainerReference {
        &self.reference
    }

    pub fn name(&self) -> &str {
        &self.reference.name
    }

    pub fn handler(&self) -> &Arc<dyn ContainerHandler> {
        &self.handler
    }

    pub fn state(&self) -> HousekeepingState {
        HousekeepingState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Current housekeeping interval
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    /// Launch the housekeeping task
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if !self.transition(HousekeepingState::Created, HousekeepingState::Running) {
            return Err(MonitorError::AlreadyStarted(self.reference.name.clone()));
        }
        let stop_rx = self
            .stop_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| MonitorError::AlreadyStarted(self.reference.name.clone()))?;

        let unit = Arc::clone(self);
        let handle = tokio::spawn(async move { unit.housekeeping(stop_rx).await });
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Ask the housekeeping task to exit. Never blocks; the task notices at
    /// its next check point.
    pub fn stop(&self) {
        // A full slot means a stop is already pending
        let _ = self.stop_tx.try_send(());
        if !self.transition(HousekeepingState::Running, HousekeepingState::Stopping) {
            self.transition(HousekeepingState::Created, HousekeepingState::Stopped);
        }
    }

    /// Wait for the housekeeping task to finish, if it was started
    pub async fn wait(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Housekeeping task for {} ended abnormally: {}", self.name(), e);
            }
        }
    }

    /// Reference, spec and direct children. The spec and children are
    /// re-read from the handler when older than the configured max age.
    pub async fn get_info(&self) -> Result<ContainerInfo> {
        self.refresh_if_stale().await?;
        let cached = self.info.load();
        Ok(ContainerInfo {
            reference: self.reference.clone(),
            subcontainers: cached.subcontainers.clone(),
            spec: cached.spec.clone(),
            stats: Vec::new(),
        })
    }

    fn transition(&self, from: HousekeepingState, to: HousekeepingState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    async fn housekeeping(self: Arc<Self>, mut stop_rx: mpsc::Receiver<()>) {
        let long_housekeeping = self.settings.long_housekeeping();
        let mut last_housekeeping = Instant::now();
        debug!("Starting housekeeping for container {}", self.name());

        loop {
            if stop_rx.try_recv().is_ok() {
                break;
            }

            let start = Instant::now();
            self.housekeeping_tick().await;
            let elapsed = start.elapsed();
            if elapsed >= long_housekeeping {
                debug!("[{}] Housekeeping took {:?}", self.name(), elapsed);
            }

            if self.log_usage {
                self.log_usage().await;
            }

            let mut next = self.next_housekeeping(last_housekeeping).await;
            let now = Instant::now();
            if next > now {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = tokio::time::sleep_until(next) => {}
                }
            } else {
                next = now;
            }
            last_housekeeping = next;
        }

        self.state
            .store(HousekeepingState::Stopped as u8, Ordering::SeqCst);
        debug!("Housekeeping stopped for container {}", self.name());
    }

    async fn housekeeping_tick(&self) {
        if let Err(e) = self.update_stats().await {
            warn!("Failed to update stats for container {}: {}", self.name(), e);
        }
        if let Err(e) = self.refresh_if_stale().await {
            warn!("Failed to refresh spec for container {}: {}", self.name(), e);
        }
    }

    async fn update_stats(&self) -> Result<()> {
        match self.handler.get_stats().await {
            Ok(stats) => self.storage.add_stats(&self.reference, &stats).await,
            // Removed by the next discovery pass
            Err(e) if e.is_not_found() => {
                debug!("Container {} is gone, skipping stats", self.name());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn next_housekeeping(&self, last_housekeeping: Instant) -> Instant {
        if self.settings.allow_dynamic {
            match self.storage.recent_stats(self.name(), 2).await {
                Ok(stats) => {
                    let current = self.interval();
                    let next = adaptive_interval(current, &self.settings, &stats);
                    if next > current {
                        debug!("Raising housekeeping interval for {} to {:?}", self.name(), next);
                    } else if next < current {
                        debug!("Lowering housekeeping interval for {} to {:?}", self.name(), next);
                    }
                    self.interval_ms.store(duration_ms(next), Ordering::Relaxed);
                }
                Err(e) => {
                    warn!("Failed to get recent stats for {}: {}", self.name(), e);
                }
            }
        }
        last_housekeeping + self.interval()
    }

    async fn log_usage(&self) {
        let stats = match self.storage.recent_stats(self.name(), 2).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("[{}] Failed to get recent stats for logging usage: {}", self.name(), e);
                return;
            }
        };
        let [previous, latest] = stats.as_slice() else {
            return;
        };
        match ContainerStatsSample::new(previous, latest) {
            Ok(sample) => {
                let working_set = latest.memory.as_ref().map(|m| m.working_set).unwrap_or(0);
                info!(
                    "[{}] {:.3} cores, {} bytes of memory",
                    self.name(),
                    sample.cpu.usage as f64 / 1e9,
                    working_set
                );
            }
            Err(e) => debug!("[{}] Cannot compute usage: {}", self.name(), e),
        }
    }

    async fn refresh_if_stale(&self) -> Result<()> {
        let mut last_refresh = self.last_refresh.lock().await;
        if let Some(at) = *last_refresh {
            if at.elapsed() < self.settings.spec_max_age {
                return Ok(());
            }
        }

        let refreshed = async {
            let spec = self.handler.get_spec().await?;
            let subcontainers = self.handler.list_containers(ListType::SelfOnly).await?;
            Ok::<_, MonitorError>(CachedInfo {
                spec,
                subcontainers,
            })
        }
        .await;

        match refreshed {
            Ok(info) => {
                self.info.store(Arc::new(info));
                *last_refresh = Some(Instant::now());
                Ok(())
            }
            // Keep serving the last good copy
            Err(e) if last_refresh.is_some() => {
                warn!("Serving stale spec for container {}: {}", self.name(), e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}
