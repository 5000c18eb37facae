use thiserror::Error;

/// Reasons a pair of snapshots cannot be turned into a sample, or a
/// percentile request cannot be answered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("incomplete stats: cpu and memory are required")]
    IncompleteStats,

    #[error("wrong stats order: previous snapshot is not older than the current one")]
    WrongOrder,

    #[error("current measurement has fewer cpus ({current}) than previous one ({previous})")]
    CpuCountShrunk { previous: usize, current: usize },

    #[error("cumulative cpu counter went backwards")]
    CounterReset,

    #[error("invalid percentile {0}: must be between 0 and 100")]
    InvalidPercentile(u8),
}

pub type Result<T> = std::result::Result<T, Error>;
