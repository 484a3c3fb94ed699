//! Worker error types.

use thiserror::Error;

use tloom_ports::PortError;
use tloom_store::StoreError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Stage failed: {0}")]
    StageFailed(String),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Lease lost: {0}")]
    LeaseLost(String),

    #[error("Collaborator error: {0}")]
    Port(#[from] PortError),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for WorkerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LeaseLost(msg) => WorkerError::LeaseLost(msg),
            other => WorkerError::Store(other),
        }
    }
}

impl WorkerError {
    pub fn stage_failed(msg: impl Into<String>) -> Self {
        Self::StageFailed(msg.into())
    }

    /// Check if error is retryable within a stage.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Port(e) => e.is_retryable(),
            WorkerError::Store(e) => e.is_retryable(),
            WorkerError::Io(_) => true,
            _ => false,
        }
    }

    /// Check if the worker should abandon the task entirely.
    pub fn is_lease_lost(&self) -> bool {
        matches!(self, WorkerError::LeaseLost(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_lost_maps_through() {
        let err: WorkerError = StoreError::lease_lost("task gone").into();
        assert!(err.is_lease_lost());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transient_port_error_is_retryable() {
        let err: WorkerError = PortError::transient("timeout").into();
        assert!(err.is_retryable());
        let err: WorkerError = PortError::permanent("bad input").into();
        assert!(!err.is_retryable());
    }
}
