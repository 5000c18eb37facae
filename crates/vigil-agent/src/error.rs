//! Error types for the monitoring agent

use thiserror::Error;

/// Main error type for the agent
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("unknown container {0:?}")]
    ContainerNotFound(String),

    /// The platform reports the entity no longer exists. Housekeeping treats
    /// this as expected: the next discovery pass removes the unit.
    #[error("container {0:?} no longer exists")]
    ContainerGone(String),

    #[error("container handler error: {0}")]
    Handler(String),

    #[error("no container handler factory can handle {0:?}")]
    NoHandlerFactory(String),

    #[error("the container handler does not support watching subcontainers")]
    WatchUnsupported,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("unknown storage driver {0:?}")]
    UnknownStorageDriver(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("housekeeping for {0:?} was already started")]
    AlreadyStarted(String),

    #[error(transparent)]
    Stats(#[from] vigil_core::Error),
}

impl MonitorError {
    /// Whether the error names an entity that does not (or no longer) exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ContainerNotFound(_) | Self::ContainerGone(_))
    }
}

impl From<anyhow::Error> for MonitorError {
    fn from(err: anyhow::Error) -> Self {
        MonitorError::Handler(format!("{:#}", err))
    }
}

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, MonitorError>;
