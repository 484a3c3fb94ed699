//! Port error taxonomy.
//!
//! Collaborator failures are classified by their effect on the state
//! machine: transient errors are retried within the owning stage,
//! everything else fails the current attempt immediately.

use thiserror::Error;

/// Result type for port operations.
pub type PortResult<T> = Result<T, PortError>;

/// Errors surfaced by collaborator ports.
#[derive(Debug, Error)]
pub enum PortError {
    /// Retriable: network hiccup, 5xx, rate limit.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Not retriable: the input itself cannot be processed.
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// The collaborator does not handle this kind of input.
    #[error("Unsupported input: {0}")]
    Unsupported(String),

    /// Upstream quota exhausted; user action required.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),
}

impl PortError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn quota_exceeded(msg: impl Into<String>) -> Self {
        Self::QuotaExceeded(msg.into())
    }

    /// Check if the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PortError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(PortError::transient("timeout").is_retryable());
        assert!(!PortError::permanent("bad input").is_retryable());
        assert!(!PortError::unsupported("pdf").is_retryable());
        assert!(!PortError::quota_exceeded("llm tokens").is_retryable());
    }
}
