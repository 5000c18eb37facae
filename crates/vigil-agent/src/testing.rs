//! In-process fakes for unit tests: a mutable entity tree with handlers,
//! a factory and a machine inspector on top of it

use crate::error::{MonitorError, Result};
use crate::handler::{
    ContainerHandler, HandlerFactory, ListType, MachineInspector, SubcontainerEvent,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use vigil_core::{
    ContainerReference, ContainerSpec, ContainerStats, CpuStats, CpuUsage, MachineInfo,
    MemoryStats, VersionInfo,
};

pub const MEMORY_CAPACITY: u64 = 8 << 30;

/// Snapshot with only a cumulative CPU counter set
pub fn cpu_snapshot(secs: i64, cpu_total: u64) -> ContainerStats {
    ContainerStats {
        cpu: Some(CpuStats {
            usage: CpuUsage {
                total: cpu_total,
                ..Default::default()
            },
        }),
        ..ContainerStats::at(Utc.timestamp_opt(secs, 0).unwrap())
    }
}

fn parent_of(name: &str) -> Option<&str> {
    if name == "/" {
        return None;
    }
    match name.rsplit_once('/') {
        Some(("", _)) => Some("/"),
        Some((parent, _)) => Some(parent),
        None => None,
    }
}

/// Entity tree shared by every handler the fake factory hands out
#[derive(Default)]
pub struct FakePlatform {
    /// name -> aliases
    containers: Mutex<BTreeMap<String, Vec<String>>>,
    cpu_total: AtomicU64,
    stats_failing: AtomicBool,
    spec_failing: AtomicBool,
    spec_calls: AtomicUsize,
    watch_supported: AtomicBool,
    watch_failing: AtomicBool,
    list_delay_ms: AtomicU64,
    watcher: Mutex<Option<mpsc::Sender<SubcontainerEvent>>>,
}

impl FakePlatform {
    /// Tree holding only the root
    pub fn new() -> Arc<Self> {
        let platform = Arc::new(Self::default());
        platform.add("/");
        platform
    }

    pub fn add(&self, name: &str) {
        self.add_with_aliases(name, &[]);
    }

    pub fn add_with_aliases(&self, name: &str, aliases: &[&str]) {
        self.containers.lock().unwrap().insert(
            name.to_string(),
            aliases.iter().map(|a| a.to_string()).collect(),
        );
    }

    pub fn remove(&self, name: &str) {
        self.containers.lock().unwrap().remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.containers.lock().unwrap().contains_key(name)
    }

    pub fn enable_watch(&self) {
        self.watch_supported.store(true, Ordering::SeqCst);
    }

    /// Make watch subscriptions fail with a handler error
    pub fn set_watch_failing(&self, failing: bool) {
        self.watch_failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every recursive listing by `delay`
    pub fn set_list_delay(&self, delay: Duration) {
        self.list_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn is_watched(&self) -> bool {
        self.watcher.lock().unwrap().is_some()
    }

    /// Deliver an event to the current watcher, if any
    pub async fn emit(&self, event: SubcontainerEvent) {
        let sender = self.watcher.lock().unwrap().clone();
        if let Some(sender) = sender {
            sender.send(event).await.unwrap();
        }
    }

    fn reference(&self, name: &str) -> Option<ContainerReference> {
        self.containers
            .lock()
            .unwrap()
            .get(name)
            .map(|aliases| ContainerReference::with_aliases(name, aliases.clone()))
    }

    fn list(&self, name: &str, list_type: ListType) -> Vec<ContainerReference> {
        let containers = self.containers.lock().unwrap();
        containers
            .iter()
            .filter(|(child, _)| match list_type {
                ListType::SelfOnly => parent_of(child) == Some(name),
                ListType::Recursive => {
                    child.as_str() != name && vigil_core::info::is_same_or_descendant(name, child)
                }
            })
            .map(|(child, aliases)| ContainerReference::with_aliases(child.clone(), aliases.clone()))
            .collect()
    }
}

pub struct FakeHandler {
    name: String,
    platform: Arc<FakePlatform>,
}

impl FakeHandler {
    /// Handler on a private tree holding `/` and `name`
    pub fn new(name: &str) -> Self {
        let platform = FakePlatform::new();
        platform.add(name);
        Self::on(platform, name)
    }

    pub fn on(platform: Arc<FakePlatform>, name: &str) -> Self {
        Self {
            name: name.to_string(),
            platform,
        }
    }

    pub fn with_aliases(self, aliases: &[&str]) -> Self {
        self.platform.add_with_aliases(&self.name, aliases);
        self
    }

    pub fn with_children(self, children: &[&str]) -> Self {
        for child in children {
            self.platform.add(child);
        }
        self
    }

    pub fn set_cpu_total(&self, total: u64) {
        self.platform.cpu_total.store(total, Ordering::SeqCst);
    }

    pub fn set_stats_failing(&self, failing: bool) {
        self.platform.stats_failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_spec_failing(&self, failing: bool) {
        self.platform.spec_failing.store(failing, Ordering::SeqCst);
    }

    pub fn spec_calls(&self) -> usize {
        self.platform.spec_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerHandler for FakeHandler {
    async fn container_reference(&self) -> Result<ContainerReference> {
        self.platform
            .reference(&self.name)
            .ok_or_else(|| MonitorError::ContainerGone(self.name.clone()))
    }

    async fn get_spec(&self) -> Result<ContainerSpec> {
        self.platform.spec_calls.fetch_add(1, Ordering::SeqCst);
        if self.platform.spec_failing.load(Ordering::SeqCst) {
            return Err(MonitorError::Handler("spec unavailable".to_string()));
        }
        Ok(ContainerSpec {
            has_cpu: true,
            has_memory: true,
            ..Default::default()
        })
    }

    async fn get_stats(&self) -> Result<ContainerStats> {
        if !self.platform.contains(&self.name) {
            return Err(MonitorError::ContainerGone(self.name.clone()));
        }
        if self.platform.stats_failing.load(Ordering::SeqCst) {
            return Err(MonitorError::Handler("cgroup read failed".to_string()));
        }
        Ok(ContainerStats {
            memory: Some(MemoryStats {
                usage: 4096,
                working_set: 2048,
                ..Default::default()
            }),
            ..cpu_snapshot(
                Utc::now().timestamp(),
                self.platform.cpu_total.load(Ordering::SeqCst),
            )
        })
    }

    async fn list_containers(&self, list_type: ListType) -> Result<Vec<ContainerReference>> {
        let delay = self.platform.list_delay_ms.load(Ordering::SeqCst);
        if list_type == ListType::Recursive && delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(self.platform.list(&self.name, list_type))
    }

    async fn watch_subcontainers(&self, events: mpsc::Sender<SubcontainerEvent>) -> Result<()> {
        if self.platform.watch_failing.load(Ordering::SeqCst) {
            return Err(MonitorError::Handler("inotify watch limit reached".to_string()));
        }
        if !self.platform.watch_supported.load(Ordering::SeqCst) {
            return Err(MonitorError::WatchUnsupported);
        }
        *self.platform.watcher.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn stop_watching_subcontainers(&self) -> Result<()> {
        self.platform.watcher.lock().unwrap().take();
        Ok(())
    }
}

pub struct FakeFactory {
    pub platform: Arc<FakePlatform>,
}

#[async_trait]
impl HandlerFactory for FakeFactory {
    fn name(&self) -> &str {
        "fake"
    }

    fn can_handle(&self, _: &str) -> bool {
        true
    }

    async fn new_handler(&self, container_name: &str) -> Result<Arc<dyn ContainerHandler>> {
        Ok(Arc::new(FakeHandler::on(
            self.platform.clone(),
            container_name,
        )))
    }
}

#[derive(Default)]
pub struct FakeInspector {
    pub failing: bool,
}

#[async_trait]
impl MachineInspector for FakeInspector {
    async fn machine_info(&self) -> Result<MachineInfo> {
        if self.failing {
            return Err(MonitorError::Handler("cannot read /proc/meminfo".to_string()));
        }
        Ok(MachineInfo {
            num_cores: 4,
            cpu_frequency_khz: 2_400_000,
            memory_capacity: MEMORY_CAPACITY,
            machine_id: "test-machine".to_string(),
        })
    }

    async fn version_info(&self) -> Result<VersionInfo> {
        Ok(VersionInfo {
            kernel_version: "6.1.0".to_string(),
            container_os_version: "Test Linux".to_string(),
            runtime_version: "fake-1".to_string(),
            agent_version: String::new(),
        })
    }
}
