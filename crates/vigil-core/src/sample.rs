//! Rates derived from consecutive snapshots, and percentiles over them

use crate::error::{Error, Result};
use crate::info::ContainerStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const NANOS_PER_SECOND: u128 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CpuSample {
    /// Nanocores: CPU nanoseconds consumed per wall-clock second
    pub usage: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemorySample {
    /// Bytes
    pub usage: u64,
}

/// Usage over the interval between two consecutive snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatsSample {
    /// Timestamp of the later snapshot
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
    pub cpu: CpuSample,
    pub memory: MemorySample,
}

impl ContainerStatsSample {
    /// Build a sample from `prev` and the later snapshot `current`.
    ///
    /// A cumulative counter that went backwards is reported as
    /// [`Error::CounterReset`]; callers are expected to skip such pairs.
    pub fn new(prev: &ContainerStats, current: &ContainerStats) -> Result<Self> {
        let (Some(prev_cpu), Some(cur_cpu), Some(cur_mem)) =
            (&prev.cpu, &current.cpu, &current.memory)
        else {
            return Err(Error::IncompleteStats);
        };
        if prev.memory.is_none() {
            return Err(Error::IncompleteStats);
        }
        if prev.timestamp >= current.timestamp {
            return Err(Error::WrongOrder);
        }
        let (previous, cur) = (prev_cpu.usage.per_cpu.len(), cur_cpu.usage.per_cpu.len());
        if previous > cur {
            return Err(Error::CpuCountShrunk {
                previous,
                current: cur,
            });
        }
        let cpu_delta = cur_cpu
            .usage
            .total
            .checked_sub(prev_cpu.usage.total)
            .ok_or(Error::CounterReset)?;

        let duration = (current.timestamp - prev.timestamp)
            .to_std()
            .map_err(|_| Error::WrongOrder)?;
        let nanos = duration.as_nanos().max(1);
        let usage = (cpu_delta as u128 * NANOS_PER_SECOND / nanos).min(u64::MAX as u128) as u64;

        Ok(Self {
            timestamp: current.timestamp,
            duration,
            cpu: CpuSample { usage },
            memory: MemorySample {
                usage: cur_mem.usage,
            },
        })
    }
}

/// Samples for every valid consecutive pair of `stats` (oldest first).
/// Pairs that cannot form a sample are skipped.
pub fn samples_from_stats(stats: &[ContainerStats]) -> Vec<ContainerStatsSample> {
    stats
        .windows(2)
        .filter_map(|pair| ContainerStatsSample::new(&pair[0], &pair[1]).ok())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Percentile {
    pub percentage: u8,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContainerStatsPercentiles {
    pub max_memory_usage: u64,
    pub cpu_usage_percentiles: Vec<Percentile>,
    pub memory_usage_percentiles: Vec<Percentile>,
}

impl ContainerStatsPercentiles {
    /// Nearest-rank percentiles of CPU and memory usage over `samples`.
    /// `max_memory_usage` also considers the raw `stats` window, so the
    /// first snapshot (which starts no sample) still counts.
    pub fn compute(
        stats: &[ContainerStats],
        samples: &[ContainerStatsSample],
        cpu_percentages: &[u8],
        memory_percentages: &[u8],
    ) -> Result<Self> {
        if let Some(&bad) = cpu_percentages
            .iter()
            .chain(memory_percentages)
            .find(|&&p| p > 100)
        {
            return Err(Error::InvalidPercentile(bad));
        }

        let mut cpu: Vec<u64> = samples.iter().map(|s| s.cpu.usage).collect();
        let mut memory: Vec<u64> = samples.iter().map(|s| s.memory.usage).collect();
        cpu.sort_unstable();
        memory.sort_unstable();

        let max_memory_usage = stats
            .iter()
            .filter_map(|s| s.memory.as_ref().map(|m| m.usage))
            .chain(memory.last().copied())
            .max()
            .unwrap_or(0);

        Ok(Self {
            max_memory_usage,
            cpu_usage_percentiles: percentiles_of(&cpu, cpu_percentages),
            memory_usage_percentiles: percentiles_of(&memory, memory_percentages),
        })
    }
}

fn percentiles_of(sorted: &[u64], percentages: &[u8]) -> Vec<Percentile> {
    percentages
        .iter()
        .map(|&percentage| Percentile {
            percentage,
            value: nearest_rank(sorted, percentage),
        })
        .collect()
}

fn nearest_rank(sorted: &[u64], percentage: u8) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (percentage as usize * sorted.len()).div_ceil(100);
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}
