//! Retry utilities for collaborator calls.
//!
//! Stage runners wrap every port call in [`retry_async`]: transient
//! failures get 3 further attempts at 1 s / 4 s / 16 s (jittered); any
//! other failure, or exhaustion, is treated as permanent for the current
//! stage attempt.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use tloom_ports::PortError;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Base delay; multiplied by `growth^attempt`.
    pub base_delay: Duration,
    /// Backoff growth factor per attempt.
    pub growth: u32,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Operation name for logging.
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            growth: 4,
            max_delay: Duration::from_secs(16),
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with the given operation name.
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    /// Set the base delay.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay before the given 1-based retry attempt, jittered downward by
    /// up to half. Jitter comes from the subsecond clock rather than a
    /// random number generator.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self
            .base_delay
            .saturating_mul(self.growth.saturating_pow(attempt - 1))
            .min(self.max_delay);

        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let factor = 0.5 + (nanos % 1000) as f64 / 2000.0;
        scaled.mul_f64(factor)
    }
}

/// Execute a port call with retry on transient errors.
pub async fn retry_async<T, F, Fut>(config: &RetryConfig, op: F) -> Result<T, PortError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, PortError>>,
{
    let mut attempt = 0u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                attempt += 1;
                let delay = config.delay_for_attempt(attempt);
                debug!(
                    "{} attempt {} failed, retrying in {:?}: {}",
                    config.operation_name, attempt, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
