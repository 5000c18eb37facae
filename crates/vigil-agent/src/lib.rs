//! vigil-agent - host-resident container resource monitoring
//!
//! Discovers the entity tree through pluggable platform handlers, samples
//! each entity on an adaptive schedule, and keeps recent history in memory
//! in front of a write-back storage backend.

pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod manager;
pub mod storage;
pub mod tasks;

#[cfg(test)]
mod testing;

pub use config::{AgentConfig, HousekeepingConfig, LogFormat, StorageConfig};
pub use error::{MonitorError, Result};
pub use handler::{
    ContainerHandler, HandlerFactory, HandlerRegistry, ListType, MachineInspector,
    SubcontainerEvent, SubcontainerEventType,
};
pub use manager::{ContainerData, HousekeepingState, Manager};
pub use storage::{CachedStorageDriver, InMemoryStorage, StatsBuffer, StorageDriver, StorageDriverRegistry};
