//! Entity descriptions and point-in-time resource snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of snapshots returned by an info request
pub const DEFAULT_NUM_STATS: usize = 60;

/// Identity of a monitored entity: its canonical hierarchical name and
/// any alternate identifiers (e.g. a runtime-assigned ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ContainerReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

impl ContainerReference {
    /// Reference with no aliases
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
        }
    }

    pub fn with_aliases(name: impl Into<String>, aliases: Vec<String>) -> Self {
        Self {
            name: name.into(),
            aliases,
        }
    }

    /// All keys this entity is reachable under: the canonical name first,
    /// then every alias
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    /// Whether `other` names this entity or one of its descendants
    pub fn is_ancestor_of(&self, other: &str) -> bool {
        is_same_or_descendant(&self.name, other)
    }
}

/// Returns true when `name` equals `parent` or lies below it in the tree.
/// The root `/` is the ancestor of every name.
pub fn is_same_or_descendant(parent: &str, name: &str) -> bool {
    if parent == "/" || name == parent {
        return true;
    }
    let parent = parent.trim_end_matches('/');
    name.strip_prefix(parent)
        .map(|rest| rest.starts_with('/'))
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CpuSpec {
    /// Relative weight (shares)
    pub limit: u64,
    /// Hard cap in millicores, 0 when unbounded
    pub max_limit: u64,
    /// CPU affinity mask, e.g. "0-3"
    #[serde(default)]
    pub mask: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemorySpec {
    /// Bytes; 0 means no limit
    pub limit: u64,
    pub reservation: u64,
    pub swap_limit: u64,
}

/// Capabilities and limits of an entity. Refreshed on demand from the
/// platform handler; not historical.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub creation_time: Option<DateTime<Utc>>,
    pub has_cpu: bool,
    #[serde(default)]
    pub cpu: CpuSpec,
    pub has_memory: bool,
    #[serde(default)]
    pub memory: MemorySpec,
    pub has_network: bool,
    pub has_filesystem: bool,
}

/// Cumulative CPU time in nanoseconds
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CpuUsage {
    pub total: u64,
    pub user: u64,
    pub system: u64,
    #[serde(default)]
    pub per_cpu: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CpuStats {
    pub usage: CpuUsage,
}

/// Memory usage in bytes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub usage: u64,
    pub working_set: u64,
    pub cache: u64,
    pub rss: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkStats {
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_errors: u64,
    pub rx_dropped: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errors: u64,
    pub tx_dropped: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FsStats {
    pub device: String,
    pub limit: u64,
    pub usage: u64,
}

/// One timestamped resource-usage measurement of an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStats {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkStats>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filesystem: Vec<FsStats>,
}

impl ContainerStats {
    /// Empty snapshot taken at `timestamp`
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            cpu: None,
            memory: None,
            network: None,
            filesystem: Vec::new(),
        }
    }

    /// Compares every counter, ignoring the timestamp. Two consecutive
    /// snapshots that are `stats_eq` mean the entity was idle in between.
    pub fn stats_eq(&self, other: &ContainerStats) -> bool {
        self.cpu == other.cpu
            && self.memory == other.memory
            && self.network == other.network
            && self.filesystem == other.filesystem
    }
}

/// A subtree snapshot handed to API callers
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContainerInfo {
    #[serde(flatten)]
    pub reference: ContainerReference,
    #[serde(default)]
    pub subcontainers: Vec<ContainerReference>,
    pub spec: ContainerSpec,
    /// Oldest first
    #[serde(default)]
    pub stats: Vec<ContainerStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfoRequest {
    /// Number of most recent snapshots to return
    pub num_stats: usize,
}

impl Default for ContainerInfoRequest {
    fn default() -> Self {
        Self {
            num_stats: DEFAULT_NUM_STATS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MachineInfo {
    pub num_cores: usize,
    pub cpu_frequency_khz: u64,
    /// Bytes
    pub memory_capacity: u64,
    #[serde(default)]
    pub machine_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionInfo {
    pub kernel_version: String,
    pub container_os_version: String,
    pub runtime_version: String,
    pub agent_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(secs: i64, cpu_total: u64, memory: u64) -> ContainerStats {
        ContainerStats {
            cpu: Some(CpuStats {
                usage: CpuUsage {
                    total: cpu_total,
                    ..Default::default()
                },
            }),
            memory: Some(MemoryStats {
                usage: memory,
                ..Default::default()
            }),
            ..ContainerStats::at(Utc.timestamp_opt(secs, 0).unwrap())
        }
    }

    #[test]
    fn test_stats_eq_ignores_timestamp() {
        let a = snapshot(1, 100, 2048);
        let b = snapshot(2, 100, 2048);
        assert!(a.stats_eq(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_stats_eq_detects_counter_change() {
        assert!(!snapshot(1, 100, 2048).stats_eq(&snapshot(2, 101, 2048)));
        assert!(!snapshot(1, 100, 2048).stats_eq(&snapshot(2, 100, 4096)));

        let mut with_fs = snapshot(2, 100, 2048);
        with_fs.filesystem.push(FsStats {
            device: "/dev/sda1".to_string(),
            limit: 10,
            usage: 1,
        });
        assert!(!snapshot(1, 100, 2048).stats_eq(&with_fs));
    }

    #[test]
    fn test_reference_keys() {
        let r = ContainerReference::with_aliases(
            "/docker/abc",
            vec!["abc".to_string(), "web".to_string()],
        );
        let keys: Vec<&str> = r.keys().collect();
        assert_eq!(keys, vec!["/docker/abc", "abc", "web"]);
    }

    #[test]
    fn test_is_same_or_descendant() {
        assert!(is_same_or_descendant("/", "/anything"));
        assert!(is_same_or_descendant("/docker", "/docker"));
        assert!(is_same_or_descendant("/docker", "/docker/abc"));
        assert!(is_same_or_descendant("/docker/", "/docker/abc"));
        assert!(!is_same_or_descendant("/docker", "/dockerd"));
        assert!(!is_same_or_descendant("/docker/abc", "/docker"));
    }

    #[test]
    fn test_info_serializes_flattened_reference() {
        let info = ContainerInfo {
            reference: ContainerReference::with_aliases("/a", vec!["x".to_string()]),
            ..Default::default()
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["name"], "/a");
        assert_eq!(value["aliases"][0], "x");
    }
}
