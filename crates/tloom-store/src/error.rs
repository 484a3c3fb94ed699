//! Store error types.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid task spec: {0}")]
    InvalidSpec(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Lease lost: {0}")]
    LeaseLost(String),

    #[error("Store corruption: {0}")]
    Corruption(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn lease_lost(msg: impl Into<String>) -> Self {
        Self::LeaseLost(msg.into())
    }

    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Check if the operation may be retried.
    ///
    /// Covers connection-level failures and SQLite lock contention; schema
    /// violations and logical errors are not retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Database(sqlx::Error::Io(_)) => true,
            StoreError::Database(sqlx::Error::PoolTimedOut) => true,
            StoreError::Database(sqlx::Error::Database(db)) => {
                let msg = db.message().to_ascii_lowercase();
                msg.contains("locked") || msg.contains("busy")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_errors_not_retryable() {
        assert!(!StoreError::invalid_spec("bad").is_retryable());
        assert!(!StoreError::not_found("x").is_retryable());
        assert!(!StoreError::corruption("x").is_retryable());
        assert!(!StoreError::lease_lost("x").is_retryable());
    }

    #[test]
    fn test_io_errors_retryable() {
        let err = StoreError::Database(sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        )));
        assert!(err.is_retryable());
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_retryable());
    }
}
