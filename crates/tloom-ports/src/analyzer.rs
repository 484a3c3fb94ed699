//! Media analysis port.

use async_trait::async_trait;
#[cfg(feature = "mocks")]
use mockall::automock;

use tloom_models::MediaItem;

use crate::error::PortResult;

/// Fields produced by analyzing one media item.
#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    /// Natural-language description of the asset
    pub description: String,
    /// Content tags
    pub tags: Vec<String>,
    /// Detected theme, if any
    pub theme: Option<String>,
    /// Analyzer confidence / usefulness score
    pub quality_score: Option<f32>,
}

/// Describes a media item well enough to drive script generation.
#[cfg_attr(feature = "mocks", automock)]
#[async_trait]
pub trait MediaAnalyzer: Send + Sync {
    async fn analyze(&self, item: &MediaItem) -> PortResult<AnalysisOutput>;
}
