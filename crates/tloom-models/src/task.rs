//! Parent task definitions and the task status state machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// Unique identifier for a parent task.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new random task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parent task status.
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
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is waiting for a worker
    #[default]
    Pending,
    /// Task is being processed
    Processing,
    /// All variants finished successfully
    Completed,
    /// No variant produced a video
    Failed,
    /// Cancelled by the user
    Cancelled,
    /// At least one variant finished, at least one did not
    PartialSuccess,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::PartialSuccess => "partial_success",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::Cancelled
                | TaskStatus::PartialSuccess
        )
    }

    /// Transition allowlist. Writing the current status again is always
    /// permitted so that progress-only patches pass through.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            TaskStatus::Pending => {
                matches!(next, TaskStatus::Processing | TaskStatus::Cancelled)
            }
            TaskStatus::Processing => matches!(
                next,
                TaskStatus::Completed
                    | TaskStatus::Failed
                    | TaskStatus::Cancelled
                    | TaskStatus::PartialSuccess
            ),
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pipeline stage a task is currently in.
///
/// `Completed` is the post-pipeline marker written by parent aggregation;
/// the five preceding variants are the stages the dispatcher runs in order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "task_stage", rename_all = "snake_case")]
pub enum Stage {
    MaterialProcessing,
    MaterialAnalysis,
    SubtaskCreation,
    ScriptGeneration,
    VideoGeneration,
    Completed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::MaterialProcessing => "material_processing",
            Stage::MaterialAnalysis => "material_analysis",
            Stage::SubtaskCreation => "subtask_creation",
            Stage::ScriptGeneration => "script_generation",
            Stage::VideoGeneration => "video_generation",
            Stage::Completed => "completed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How scenes are cut for the generated videos.
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
#[sqlx(type_name = "task_mode", rename_all = "snake_case")]
pub enum TaskMode {
    #[default]
    SingleScene,
    MultiScene,
}

/// A parent task: one user request for one or more videos.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    /// Unique task ID
    pub id: TaskId,

    /// Human-readable title
    pub title: String,

    /// Optional description
    pub description: Option<String>,

    /// Scene mode
    pub mode: TaskMode,

    /// Script style used for variant 1
    pub script_style_default: String,

    /// Number of variants requested (1..=5)
    pub variant_count: u32,

    /// Source document / media URLs
    pub media_urls: Json<Vec<String>>,

    /// Opaque pass-through metadata supplied at creation
    pub media_meta: Option<Json<Value>>,

    /// Current status
    pub status: TaskStatus,

    /// Progress (0-100), monotonically non-decreasing
    pub progress: u8,

    /// Stage the task is currently in
    pub current_stage: Option<Stage>,

    /// Human-readable stage detail ("fetching 2/5")
    pub stage_message: Option<String>,

    /// When processing first started
    pub started_at: Option<DateTime<Utc>>,

    /// When a terminal status was entered
    pub completed_at: Option<DateTime<Utc>>,

    /// URL of the representative finished video
    pub video_url: Option<String>,

    /// Thumbnail of the representative finished video
    pub thumbnail_url: Option<String>,

    /// Duration of the representative finished video
    pub video_duration_ms: Option<i64>,

    /// Error summary (terminal failures, per-item fetch failures)
    pub error_message: Option<String>,

    /// Per-task scratch directory for downloaded media
    pub workspace_dir: String,

    /// Cancel flag set while processing; converted to `cancelled`
    /// at the next stage boundary
    pub cancel_requested: bool,

    /// How many times an expired lease was reclaimed
    pub reclaim_count: u32,

    /// Lease holder, non-null only while processing
    pub lease_worker_id: Option<String>,

    /// Lease deadline, non-null only while processing
    pub lease_expires_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if the lease has expired at the given instant.
    ///
    /// A task with no lease (released after video submission, or pending)
    /// is never considered expired.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.lease_expires_at, Some(deadline) if deadline < now)
    }
}

fn default_style() -> String {
    "default".to_string()
}

fn default_variant_count() -> u32 {
    1
}

/// Validated input for creating a task.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
pub struct CreateTaskSpec {
    /// Task title
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub title: String,

    /// Optional description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Scene mode
    #[serde(default)]
    pub mode: TaskMode,

    /// Script style for variant 1
    #[serde(default = "default_style")]
    pub script_style_default: String,

    /// Number of variants to produce
    #[serde(default = "default_variant_count")]
    #[validate(range(min = 1, max = 5, message = "variant_count must be in 1..=5"))]
    pub variant_count: u32,

    /// Source document / media URLs
    #[validate(length(min = 1, message = "media_urls must not be empty"))]
    pub media_urls: Vec<String>,

    /// Opaque pass-through metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_meta: Option<Value>,
}

impl CreateTaskSpec {
    /// Create a minimal spec with the given title and URLs.
    pub fn new(title: impl Into<String>, media_urls: Vec<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            mode: TaskMode::default(),
            script_style_default: default_style(),
            variant_count: 1,
            media_urls,
            media_meta: None,
        }
    }

    /// Set the number of variants.
    pub fn with_variant_count(mut self, variant_count: u32) -> Self {
        self.variant_count = variant_count;
        self
    }

    /// Set the default script style.
    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.script_style_default = style.into();
        self
    }
}
