//! Retry policy for transient database errors.
//!
//! Bounded exponential backoff with full jitter. Only errors classified
//! retryable by [`StoreError::is_retryable`] are retried; a transaction
//! that failed has already rolled back, so re-running the operation is
//! safe.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{StoreError, StoreResult};

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct DbRetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay for exponential backoff (in milliseconds).
    pub base_delay_ms: u64,
    /// Maximum delay cap (in milliseconds).
    pub max_delay_ms: u64,
}

impl Default for DbRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 50,
            max_delay_ms: 500,
        }
    }
}

/// Execute a store operation with retry on transient database errors.
pub async fn with_db_retry<T, F, Fut>(
    config: &DbRetryConfig,
    operation: &str,
    op: F,
) -> StoreResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 0u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                attempt += 1;
                let delay = jittered_delay(config, attempt);
                warn!(
                    operation = %operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Store operation failed, retrying: {}",
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Classify a database error as corruption when a schema constraint was
/// violated somewhere it never should be.
pub fn map_constraint_to_corruption(err: sqlx::Error, context: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() || db.is_foreign_key_violation() => {
            StoreError::corruption(format!("{context}: {}", db.message()))
        }
        _ => StoreError::Database(err),
    }
}

/// Exponential backoff with full jitter, capped.
///
/// Jitter comes from the subsecond clock to avoid pulling in a random
/// number generator for this alone.
fn jittered_delay(config: &DbRetryConfig, attempt: u32) -> Duration {
    let exp = config
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt - 1));
    let capped = exp.min(config.max_delay_ms);

    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let factor = (nanos % 1000) as f64 / 1000.0;
    let jittered = ((capped as f64) * factor) as u64;

    Duration::from_millis(jittered.max(config.base_delay_ms))
}
