//! Configuration for the monitoring agent
//!
//! Every setting is read from a `VIGIL_*` environment variable and falls
//! back to a default when the variable is unset or unparsable.

use crate::error::{MonitorError, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Storage Configuration
// ============================================================================

/// Storage configuration: which backend to persist to and how much history
/// the in-memory cache keeps in front of it
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    /// Name of the backend driver, resolved through the driver registry
    pub driver: String,
    /// Snapshots per entity served from memory
    pub max_stats_in_cache: usize,
    /// Samples per entity served from memory
    pub max_samples_in_cache: usize,
    /// Depth of the built-in `memory` backend
    pub backend_buffer_depth: usize,
    /// Dirty snapshots accumulated before an inline flush
    pub flush_threshold: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            driver: "memory".to_string(),
            max_stats_in_cache: 60,
            max_samples_in_cache: 60,
            backend_buffer_depth: 1024,
            flush_threshold: 60,
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            driver: env_vigil("STORAGE_DRIVER")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.driver),
            max_stats_in_cache: env_parse("STATS_CACHE_DEPTH")
                .unwrap_or(defaults.max_stats_in_cache),
            max_samples_in_cache: env_parse("SAMPLES_CACHE_DEPTH")
                .unwrap_or(defaults.max_samples_in_cache),
            backend_buffer_depth: env_parse("BACKEND_BUFFER_DEPTH")
                .unwrap_or(defaults.backend_buffer_depth),
            flush_threshold: env_parse("FLUSH_THRESHOLD").unwrap_or(defaults.flush_threshold),
        }
    }
}

// ============================================================================
// Housekeeping Configuration
// ============================================================================

/// Per-entity sampling schedule
#[derive(Debug, Clone, PartialEq)]
pub struct HousekeepingConfig {
    /// Baseline interval between snapshots
    pub interval: Duration,
    /// Upper bound the interval may grow to while an entity is idle
    pub max_interval: Duration,
    /// Whether idle entities back off towards `max_interval`
    pub allow_dynamic: bool,
    /// How long a cached spec and child list stay fresh
    pub spec_max_age: Duration,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            allow_dynamic: true,
            spec_max_age: Duration::from_secs(5),
        }
    }
}

impl HousekeepingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval: env_duration("HOUSEKEEPING_INTERVAL").unwrap_or(defaults.interval),
            max_interval: env_duration("MAX_HOUSEKEEPING_INTERVAL")
                .unwrap_or(defaults.max_interval),
            allow_dynamic: env_vigil("ALLOW_DYNAMIC_HOUSEKEEPING")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(defaults.allow_dynamic),
            spec_max_age: env_duration("SPEC_MAX_AGE").unwrap_or(defaults.spec_max_age),
        }
    }

    /// Housekeeping passes slower than this get logged
    pub fn long_housekeeping(&self) -> Duration {
        long_threshold(self.interval)
    }
}

/// 100ms, or half the interval when that is shorter
pub(crate) fn long_threshold(interval: Duration) -> Duration {
    (interval / 2).min(Duration::from_millis(100))
}

// ============================================================================
// Logging
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "compact" | "text" => Ok(LogFormat::Compact),
            _ => Err(()),
        }
    }
}

// ============================================================================
// Agent Configuration
// ============================================================================

/// Main configuration for the agent
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// Host this agent runs on, used in log context
    pub hostname: String,
    pub housekeeping: HousekeepingConfig,
    /// Interval between full rescans of the entity tree
    pub global_housekeeping_interval: Duration,
    /// Entity whose resource usage is logged after every housekeeping pass
    pub log_usage_container: Option<String>,
    pub storage: StorageConfig,
    pub log_format: LogFormat,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            housekeeping: HousekeepingConfig::default(),
            global_housekeeping_interval: Duration::from_secs(60),
            log_usage_container: None,
            storage: StorageConfig::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl AgentConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".to_string());

        Self {
            hostname,
            housekeeping: HousekeepingConfig::from_env(),
            global_housekeeping_interval: env_duration("GLOBAL_HOUSEKEEPING_INTERVAL")
                .unwrap_or(Duration::from_secs(60)),
            log_usage_container: env_vigil("LOG_USAGE_CONTAINER").filter(|s| !s.is_empty()),
            storage: StorageConfig::from_env(),
            log_format: env_vigil("LOG_FORMAT")
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
        }
    }

    /// Reject settings the schedulers and caches cannot run with
    pub fn validate(&self) -> Result<()> {
        let hk = &self.housekeeping;
        if hk.interval.is_zero() {
            return Err(MonitorError::Config(
                "housekeeping interval must be positive".to_string(),
            ));
        }
        if hk.max_interval < hk.interval {
            return Err(MonitorError::Config(format!(
                "max housekeeping interval {:?} is below the baseline {:?}",
                hk.max_interval, hk.interval
            )));
        }
        if self.global_housekeeping_interval.is_zero() {
            return Err(MonitorError::Config(
                "global housekeeping interval must be positive".to_string(),
            ));
        }
        let storage = &self.storage;
        if storage.max_stats_in_cache == 0
            || storage.max_samples_in_cache == 0
            || storage.backend_buffer_depth == 0
        {
            return Err(MonitorError::Config(
                "cache depths must be positive".to_string(),
            ));
        }
        if storage.flush_threshold == 0 {
            return Err(MonitorError::Config(
                "flush threshold must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Get a `VIGIL_`-prefixed env var
fn env_vigil(name: &str) -> Option<String> {
    env::var(format!("VIGIL_{}", name)).ok()
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env_vigil(name).and_then(|v| v.trim().parse().ok())
}

fn env_duration(name: &str) -> Option<Duration> {
    env_vigil(name).and_then(|v| parse_duration(&v))
}

/// Parse a duration like "500ms", "10s", "5m", "1h" or raw seconds
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim().to_lowercase();

    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let (num_str, millis_per_unit) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60 * 1000)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 60 * 60 * 1000)
    } else {
        return None;
    };

    num_str
        .trim()
        .parse::<u64>()
        .ok()
        .map(|n| Duration::from_millis(n * millis_per_unit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        // Raw seconds
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));

        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("10s"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("2H"), Some(Duration::from_secs(7200)));

        // With whitespace
        assert_eq!(parse_duration(" 30 s "), Some(Duration::from_secs(30)));

        // Invalid
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("10d"), None);
        assert_eq!(parse_duration("-1s"), None);
    }

    #[test]
    fn test_log_format() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("compact".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_long_threshold() {
        assert_eq!(
            long_threshold(Duration::from_secs(1)),
            Duration::from_millis(100)
        );
        assert_eq!(
            long_threshold(Duration::from_millis(50)),
            Duration::from_millis(25)
        );
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(AgentConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_intervals() {
        let mut config = AgentConfig::default();
        config.housekeeping.max_interval = Duration::from_millis(10);
        assert!(matches!(config.validate(), Err(MonitorError::Config(_))));

        let mut config = AgentConfig::default();
        config.housekeeping.interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.global_housekeeping_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_caches() {
        let mut config = AgentConfig::default();
        config.storage.max_stats_in_cache = 0;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.storage.flush_threshold = 0;
        assert!(config.validate().is_err());
    }
}
