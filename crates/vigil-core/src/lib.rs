//! vigil-core - data model shared by the vigil monitoring agent
//!
//! Entity references and specs, resource snapshots, and the samples and
//! percentiles derived from them. Storage backends and platform handlers
//! exchange these types with the agent.

pub mod error;
pub mod info;
pub mod sample;

pub use error::{Error, Result};
pub use info::{
    ContainerInfo, ContainerInfoRequest, ContainerReference, ContainerSpec, ContainerStats,
    CpuSpec, CpuStats, CpuUsage, FsStats, MachineInfo, MemorySpec, MemoryStats, NetworkStats,
    VersionInfo,
};
pub use sample::{samples_from_stats, ContainerStatsPercentiles, ContainerStatsSample, Percentile};
