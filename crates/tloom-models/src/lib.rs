//! Shared data models for the TextLoom orchestration core.
//!
//! This crate provides Serde- and sqlx-compatible types for:
//! - Parent tasks and their status/stage state machine
//! - Sub video tasks (one per requested variant)
//! - Downloaded media items and their AI analyses
//! - Generated script contents
//! - Progress interpolation across the five pipeline stages

pub mod analysis;
pub mod media;
pub mod progress;
pub mod script;
pub mod sub_task;
pub mod task;

// Re-export common types
pub use analysis::{AnalysisStatus, MaterialAnalysis};
pub use media::{MediaItem, MediaType};
pub use progress::{
    analysis_progress, fetch_progress, script_fanout_progress, CHILD_PROGRESS_COMPLETED,
    CHILD_PROGRESS_SCRIPT_DONE, CHILD_PROGRESS_SCRIPT_GENERATING, CHILD_PROGRESS_SUBMITTED,
    CHILD_PROGRESS_SUBTITLES, PROGRESS_DONE, STAGE_SUBTASKS_DONE,
};
pub use script::{ScriptContent, ScriptScene};
pub use sub_task::{SubStatus, SubTaskId, SubVideoTask};
pub use task::{CreateTaskSpec, Stage, Task, TaskId, TaskMode, TaskStatus};
