//! AI analyses of downloaded media items.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::fmt;
use uuid::Uuid;

use crate::task::TaskId;

/// Outcome of analyzing a single media item.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "analysis_status", rename_all = "snake_case")]
pub enum AnalysisStatus {
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One analysis row per media item. Append-only history per task.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MaterialAnalysis {
    /// Unique analysis ID
    pub id: Uuid,

    /// Owning task
    pub task_id: TaskId,

    /// The media item this analysis describes; unique per task
    pub media_item_id: Uuid,

    /// Natural-language description of the asset
    pub description: String,

    /// Content tags
    pub tags: Json<Vec<String>>,

    /// Detected theme, if any
    pub theme: Option<String>,

    /// Whether the analyzer succeeded on this item
    pub status: AnalysisStatus,

    /// Analyzer confidence / usefulness score
    pub quality_score: Option<f32>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl MaterialAnalysis {
    /// True if this analysis can feed script generation.
    pub fn is_usable(&self) -> bool {
        self.status == AnalysisStatus::Completed
    }
}
