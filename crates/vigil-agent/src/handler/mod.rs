//! Platform contracts consumed by the agent
//!
//! The agent never reads cgroups, container runtimes or sysfs itself. It
//! only calls the traits defined here; concrete platforms implement them
//! and register a [`HandlerFactory`] in a [`HandlerRegistry`].

mod factory;

use crate::error::{MonitorError, Result};
use async_trait::async_trait;
pub use factory::{HandlerFactory, HandlerRegistry};
use tokio::sync::mpsc;
use vigil_core::{ContainerReference, ContainerSpec, ContainerStats, MachineInfo, VersionInfo};

/// How far `list_containers` descends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListType {
    /// Direct children only
    SelfOnly,
    /// Every descendant
    Recursive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubcontainerEventType {
    Add,
    Delete,
}

/// Asynchronous notification that an entity appeared or disappeared
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubcontainerEvent {
    pub event_type: SubcontainerEventType,
    pub name: String,
}

impl SubcontainerEvent {
    pub fn add(name: impl Into<String>) -> Self {
        Self {
            event_type: SubcontainerEventType::Add,
            name: name.into(),
        }
    }

    pub fn delete(name: impl Into<String>) -> Self {
        Self {
            event_type: SubcontainerEventType::Delete,
            name: name.into(),
        }
    }
}

/// Access to one entity on the platform
#[async_trait]
pub trait ContainerHandler: Send + Sync {
    /// Canonical name and aliases of the entity
    async fn container_reference(&self) -> Result<ContainerReference>;

    async fn get_spec(&self) -> Result<ContainerSpec>;

    /// Take one snapshot. Returns [`MonitorError::ContainerGone`] when the
    /// entity has disappeared.
    async fn get_stats(&self) -> Result<ContainerStats>;

    async fn list_containers(&self, list_type: ListType) -> Result<Vec<ContainerReference>>;

    /// Start delivering add/delete events for descendants into `events`
    async fn watch_subcontainers(&self, _events: mpsc::Sender<SubcontainerEvent>) -> Result<()> {
        Err(MonitorError::WatchUnsupported)
    }

    async fn stop_watching_subcontainers(&self) -> Result<()> {
        Ok(())
    }
}

/// Host-wide facts gathered once at startup
#[async_trait]
pub trait MachineInspector: Send + Sync {
    async fn machine_info(&self) -> Result<MachineInfo>;

    async fn version_info(&self) -> Result<VersionInfo>;
}
