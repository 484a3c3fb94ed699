//! Object storage upload port.

use std::path::Path;

use async_trait::async_trait;
#[cfg(feature = "mocks")]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::error::PortResult;

/// Which storage backend an uploader implementation targets.
///
/// Configuration only: the core depends on the [`Uploader`] trait and
/// never branches on the backend kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UploaderKind {
    /// Files served from a local directory
    Local { root: String },
    /// S3-compatible bucket
    S3 { bucket: String, endpoint: String },
    /// Huawei OBS bucket
    Obs { bucket: String, endpoint: String },
}

/// Uploads a local file and returns its public URL.
#[cfg_attr(feature = "mocks", automock)]
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn put(&self, local_path: &Path) -> PortResult<String>;
}
