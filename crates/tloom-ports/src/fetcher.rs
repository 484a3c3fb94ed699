//! Media download port.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(feature = "mocks")]
use mockall::automock;

use tloom_models::MediaType;

use crate::error::PortResult;

/// A successfully downloaded asset, stored inside the task workspace.
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    /// Where the fetcher wrote the file
    pub local_path: PathBuf,
    /// Size on disk in bytes
    pub file_size: i64,
    /// MIME type as reported or sniffed
    pub mime_type: String,
    /// Classified asset kind
    pub media_type: MediaType,
    /// "WxH" for images/videos
    pub resolution: Option<String>,
    /// Duration for videos
    pub duration_ms: Option<i64>,
}

/// Downloads one source URL into a local file.
#[cfg_attr(feature = "mocks", automock)]
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Fetch `url` into `dest_dir` within the per-call timeout.
    async fn fetch(
        &self,
        url: &str,
        dest_dir: &std::path::Path,
        timeout: Duration,
    ) -> PortResult<FetchedMedia>;
}
