use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced by the orchestrator core.
///
/// Engine failures are classified once, at the driver boundary; everything
/// above the driver only ever sees these variants.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("container engine unreachable: {0}")]
    EngineUnreachable(String),

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("container engine error: {0}")]
    Engine(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session {0} has no container bound")]
    SessionNotReady(String),

    #[error("session {0} is not active")]
    SessionNotActive(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation timed out after {0:?}")]
    OperationTimeout(Duration),

    #[error("maximum container capacity reached")]
    MaxContainersReached,

    #[error("timeout must be greater than 0 and at most {0} seconds")]
    InvalidTimeout(u64),
}
