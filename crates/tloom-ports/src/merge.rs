//! Video merge service ports: submission and status polling.

use async_trait::async_trait;
#[cfg(feature = "mocks")]
use mockall::automock;
use serde_json::Value;

use crate::error::PortResult;

/// Result of a finished merge job.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutput {
    /// Finished video URL
    pub video_url: String,
    /// Thumbnail URL, if the service produced one
    pub thumbnail_url: Option<String>,
    /// Video duration
    pub duration_ms: Option<i64>,
}

/// Observed state of an external merge job.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeStatus {
    /// Still running; poll again later
    Processing,
    /// Finished with output URLs
    Succeeded(MergeOutput),
    /// Failed with the service's error detail
    Failed(String),
}

/// Posts a script + media bundle to the external composition service.
///
/// Implementations must honor the idempotency key for at least 24 hours:
/// a resubmission with the same key returns the original job ID instead
/// of creating a second job.
#[cfg_attr(feature = "mocks", automock)]
#[async_trait]
pub trait VideoMergeSubmitter: Send + Sync {
    async fn submit(&self, payload: &Value, idempotency_key: &str) -> PortResult<String>;
}

/// Queries the state of a previously submitted merge job.
#[cfg_attr(feature = "mocks", automock)]
#[async_trait]
pub trait VideoMergePoller: Send + Sync {
    async fn status(&self, external_id: &str) -> PortResult<MergeStatus>;
}
