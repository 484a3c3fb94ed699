//! Sub video tasks: one independently scripted and rendered variant.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use std::fmt;
use uuid::Uuid;

use crate::task::TaskId;

/// Unique identifier for a sub video task.
///
/// Also serves as the idempotency key for video-merge submission.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct SubTaskId(pub Uuid);

impl SubTaskId {
    /// Generate a new random sub-task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SubTaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sub-task status.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    sqlx::Type,
    Default,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "sub_status", rename_all = "snake_case")]
pub enum SubStatus {
    /// Waiting for script generation
    #[default]
    Pending,
    /// Script generation in flight
    ScriptGenerating,
    /// Script persisted, ready to submit
    ScriptReady,
    /// Script generation failed permanently
    ScriptFailed,
    /// Merge submission in flight
    VideoSubmitting,
    /// External merge job accepted and running
    VideoProcessing,
    /// Video done, subtitle render in flight
    ProcessingSubtitles,
    /// Finished video available
    Completed,
    /// Merge or render failed
    Failed,
}

impl SubStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubStatus::Pending => "pending",
            SubStatus::ScriptGenerating => "script_generating",
            SubStatus::ScriptReady => "script_ready",
            SubStatus::ScriptFailed => "script_failed",
            SubStatus::VideoSubmitting => "video_submitting",
            SubStatus::VideoProcessing => "video_processing",
            SubStatus::ProcessingSubtitles => "processing_subtitles",
            SubStatus::Completed => "completed",
            SubStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubStatus::Completed | SubStatus::Failed | SubStatus::ScriptFailed
        )
    }

    /// Transition allowlist. Re-asserting the current status is permitted.
    pub fn can_transition_to(&self, next: SubStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            SubStatus::Pending => matches!(next, SubStatus::ScriptGenerating),
            SubStatus::ScriptGenerating => {
                matches!(next, SubStatus::ScriptReady | SubStatus::ScriptFailed)
            }
            SubStatus::ScriptReady => matches!(next, SubStatus::VideoSubmitting),
            SubStatus::VideoSubmitting => {
                matches!(next, SubStatus::VideoProcessing | SubStatus::Failed)
            }
            SubStatus::VideoProcessing => matches!(
                next,
                SubStatus::ProcessingSubtitles | SubStatus::Failed | SubStatus::Completed
            ),
            SubStatus::ProcessingSubtitles => {
                matches!(next, SubStatus::Completed | SubStatus::Failed)
            }
            _ => false,
        }
    }
}

impl fmt::Display for SubStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One variant of a parent task.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubVideoTask {
    /// Unique sub-task ID
    pub id: SubTaskId,

    /// Owning parent task
    pub parent_task_id: TaskId,

    /// 1-based variant index, unique per parent
    pub variant_index: u32,

    /// Script style for this variant
    pub script_style: String,

    /// Current status
    pub status: SubStatus,

    /// Progress (0-100), monotonically non-decreasing
    pub progress: u8,

    /// Persisted script row, set once the script is ready
    pub script_id: Option<Uuid>,

    /// Opaque merge payload handed to the video-merge service
    pub script_payload: Option<Json<Value>>,

    /// External merge job ID, unique across the system
    pub external_merge_id: Option<String>,

    /// Finished video URL
    pub video_url: Option<String>,

    /// Finished thumbnail URL
    pub thumbnail_url: Option<String>,

    /// Finished video duration
    pub duration_ms: Option<i64>,

    /// Error detail (merge failure, subtitle degradation note)
    pub error_message: Option<String>,

    /// When the merge job was submitted
    pub submitted_at: Option<DateTime<Utc>>,

    /// When a terminal status was entered
    pub completed_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl SubVideoTask {
    /// Check if the sub-task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if the external merge job has exceeded its wall-clock budget.
    pub fn merge_timed_out(&self, now: DateTime<Utc>, timeout_s: i64) -> bool {
        matches!(self.submitted_at, Some(t) if (now - t).num_seconds() > timeout_s)
    }
}
