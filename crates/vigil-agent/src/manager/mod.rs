//! Manager: discovery, lifecycle and queries over all monitored entities

mod container;
mod registry;

pub use container::{adaptive_interval, ContainerData, HousekeepingState};
pub use registry::{ContainerRegistry, RegistrySnapshot};

use crate::config::AgentConfig;
use crate::error::{MonitorError, Result};
use crate::handler::{HandlerRegistry, ListType, MachineInspector};
use crate::storage::StorageDriver;
use crate::tasks;
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vigil_core::info::is_same_or_descendant;
use vigil_core::{ContainerInfo, ContainerInfoRequest, ContainerReference, MachineInfo, VersionInfo};

/// Root of the entity tree
pub const ROOT_CONTAINER: &str = "/";

/// Capacity of the platform event channel
const EVENT_BUFFER: usize = 256;

/// Owns every housekeeping unit and keeps the set in sync with the platform
pub struct Manager {
    config: AgentConfig,
    storage: Arc<dyn StorageDriver>,
    handlers: HandlerRegistry,
    inspector: Arc<dyn MachineInspector>,
    machine_info: MachineInfo,
    registry: ContainerRegistry,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Manager {
    /// Build a manager. Fails on invalid configuration, when no handler
    /// factory is registered, or when the machine cannot be inspected.
    pub async fn new(
        config: AgentConfig,
        storage: Arc<dyn StorageDriver>,
        handlers: HandlerRegistry,
        inspector: Arc<dyn MachineInspector>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        if handlers.is_empty() {
            return Err(MonitorError::NoHandlerFactory(ROOT_CONTAINER.to_string()));
        }
        let machine_info = inspector.machine_info().await?;
        info!(
            "Machine: {} cores, {} bytes of memory",
            machine_info.num_cores, machine_info.memory_capacity
        );

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Arc::new(Self {
            config,
            storage,
            handlers,
            inspector,
            machine_info,
            registry: ContainerRegistry::new(),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }))
    }

    /// Register the root, discover the tree, subscribe to platform events
    /// and launch periodic discovery. Returns once the tasks are running.
    ///
    /// On failure every unit created so far is stopped and dropped, and
    /// `start` may be called again.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(MonitorError::AlreadyStarted("manager".to_string()));
        }
        info!("Starting monitoring agent on {}", self.config.hostname);

        if let Err(e) = self.start_monitoring().await {
            error!("Failed to start monitoring agent: {}", e);
            self.teardown_units().await;
            self.started.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let handle = tokio::spawn(tasks::run_global_housekeeping(
            Arc::clone(self),
            self.config.global_housekeeping_interval,
            self.shutdown_tx.subscribe(),
        ));
        self.track(handle);

        info!(
            "Monitoring agent started with {} containers",
            self.registry.count().await
        );
        Ok(())
    }

    async fn start_monitoring(self: &Arc<Self>) -> Result<()> {
        self.create_container(ROOT_CONTAINER).await?;
        self.detect_subcontainers(ROOT_CONTAINER).await?;

        let root = self
            .registry
            .get(ROOT_CONTAINER)
            .await
            .ok_or_else(|| MonitorError::ContainerNotFound(ROOT_CONTAINER.to_string()))?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        match root.handler().watch_subcontainers(events_tx).await {
            Ok(()) => {
                let handle = tokio::spawn(tasks::run_event_watcher(
                    Arc::clone(self),
                    Arc::clone(root.handler()),
                    events_rx,
                    self.shutdown_tx.subscribe(),
                ));
                self.track(handle);
                // Catch entities created before the subscription took effect
                if let Err(e) = self.detect_subcontainers(ROOT_CONTAINER).await {
                    warn!("Discovery after subscribing to events failed: {}", e);
                }
                Ok(())
            }
            Err(MonitorError::WatchUnsupported) => {
                info!("Platform does not report container events, relying on periodic discovery");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Stop background tasks and every unit, wait for them to exit, then
    /// close storage. Calling it again is a no-op.
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Stopping monitoring agent");
        let _ = self.shutdown_tx.send(true);

        // A rescan or event in flight may still register units until its
        // task has exited
        let handles: Vec<_> = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!("Background task ended abnormally: {}", e);
            }
        }

        let units = self.registry.canonical().await;
        for unit in &units {
            unit.stop();
        }
        join_all(units.iter().map(|unit| unit.wait())).await;

        self.storage.close().await?;
        info!("Monitoring agent stopped");
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Remove every unit from the registry, stop them and drop their history
    async fn teardown_units(&self) {
        for unit in self.registry.canonical().await {
            self.registry.remove(unit.name()).await;
            self.retire(&unit).await;
        }
    }

    /// Stop a unit that is no longer registered and release its history
    async fn retire(&self, unit: &ContainerData) {
        unit.stop();
        unit.wait().await;
        if let Err(e) = self.storage.remove_container(unit.name()).await {
            warn!("Failed to release stats of container {}: {}", unit.name(), e);
        }
    }

    /// Start monitoring `name`. Does nothing when it is already registered
    /// or the manager is stopped.
    pub async fn create_container(&self, name: &str) -> Result<()> {
        if self.is_stopped() {
            debug!("Manager stopped, not adding container {}", name);
            return Ok(());
        }
        if self.registry.contains(name).await {
            return Ok(());
        }

        let handler = self.handlers.new_handler(name).await?;
        let log_usage = self.config.log_usage_container.as_deref() == Some(name);
        let unit = ContainerData::new(
            handler,
            Arc::clone(&self.storage),
            self.config.housekeeping.clone(),
            log_usage,
        )
        .await?;

        if !self.registry.insert(Arc::clone(&unit)).await {
            debug!("Container {} was registered concurrently", unit.name());
            return Ok(());
        }
        // stop() may have collected the registry before this insert
        if self.is_stopped() {
            self.registry.remove(unit.name()).await;
            unit.stop();
            return Ok(());
        }
        // A concurrent destroy may already have stopped it
        if let Err(e) = unit.start() {
            debug!("Not starting housekeeping for {}: {}", unit.name(), e);
        }

        info!(
            "Added container: {:?} (aliases: {:?})",
            unit.name(),
            unit.reference().aliases
        );
        Ok(())
    }

    /// Stop monitoring `name` (canonical or alias) and drop its in-memory
    /// history. Does nothing when it is not registered.
    pub async fn destroy_container(&self, name: &str) -> Result<()> {
        let Some(unit) = self.registry.remove(name).await else {
            return Ok(());
        };
        self.retire(&unit).await;
        info!(
            "Destroyed container: {:?} (aliases: {:?})",
            unit.name(),
            unit.reference().aliases
        );
        Ok(())
    }

    /// Entities under `name` that the platform lists but the registry lacks
    /// (added), and registered ones the platform no longer lists (removed)
    pub async fn get_containers_diff(
        &self,
        name: &str,
    ) -> Result<(Vec<ContainerReference>, Vec<ContainerReference>)> {
        let snapshot = self
            .registry
            .snapshot(name)
            .await
            .ok_or_else(|| MonitorError::ContainerNotFound(name.to_string()))?;

        let mut listed = snapshot
            .unit
            .handler()
            .list_containers(ListType::Recursive)
            .await?;
        listed.push(ContainerReference::new(name));

        let listed_names: HashSet<&str> = listed.iter().map(|r| r.name.as_str()).collect();
        let mut seen = HashSet::new();
        let added: Vec<ContainerReference> = listed
            .iter()
            .filter(|r| !snapshot.keys.contains(&r.name) && seen.insert(r.name.clone()))
            .cloned()
            .collect();
        let removed: Vec<ContainerReference> = snapshot
            .canonical
            .into_iter()
            .filter(|r| is_same_or_descendant(name, &r.name) && !listed_names.contains(r.name.as_str()))
            .collect();

        Ok((added, removed))
    }

    /// Bring the registry in line with the platform below `name`. Failures
    /// for individual entities are logged and skipped.
    pub async fn detect_subcontainers(&self, name: &str) -> Result<()> {
        let (added, removed) = self.get_containers_diff(name).await?;

        for reference in added {
            if let Err(e) = self.create_container(&reference.name).await {
                error!("Failed to create existing container {}: {}", reference.name, e);
            }
        }
        for reference in removed {
            if let Err(e) = self.destroy_container(&reference.name).await {
                error!("Failed to destroy container {}: {}", reference.name, e);
            }
        }
        Ok(())
    }

    pub async fn get_container_info(
        &self,
        name: &str,
        request: &ContainerInfoRequest,
    ) -> Result<ContainerInfo> {
        let unit = self
            .registry
            .get(name)
            .await
            .ok_or_else(|| MonitorError::ContainerNotFound(name.to_string()))?;
        self.container_info(&unit, request).await
    }

    /// Info for `name` and all its descendants. Entities whose info cannot
    /// be read are left out.
    pub async fn subcontainers_info(
        &self,
        name: &str,
        request: &ContainerInfoRequest,
    ) -> Result<Vec<ContainerInfo>> {
        let units = self.registry.subtree(name).await;
        if units.is_empty() {
            return Err(MonitorError::ContainerNotFound(name.to_string()));
        }

        let mut infos = Vec::with_capacity(units.len());
        for unit in units {
            match self.container_info(&unit, request).await {
                Ok(info) => infos.push(info),
                Err(e) => debug!("Skipping container {}: {}", unit.name(), e),
            }
        }
        Ok(infos)
    }

    async fn container_info(
        &self,
        unit: &ContainerData,
        request: &ContainerInfoRequest,
    ) -> Result<ContainerInfo> {
        let mut info = unit.get_info().await?;
        info.stats = self
            .storage
            .recent_stats(unit.name(), request.num_stats)
            .await?;
        if info.spec.memory.limit == 0 {
            info.spec.memory.limit = self.machine_info.memory_capacity;
        }
        Ok(info)
    }

    pub fn get_machine_info(&self) -> MachineInfo {
        self.machine_info.clone()
    }

    pub async fn get_version_info(&self) -> Result<VersionInfo> {
        let mut version = self.inspector.version_info().await?;
        version.agent_version = env!("CARGO_PKG_VERSION").to_string();
        Ok(version)
    }

    /// Number of monitored entities
    pub async fn container_count(&self) -> usize {
        self.registry.count().await
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}
