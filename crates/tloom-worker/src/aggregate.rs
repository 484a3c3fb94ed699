//! Parent aggregation: fold terminal children into the parent's terminal
//! state.
//!
//! Runs whenever a child reaches a terminal status (from the poller) and
//! once after the submission stage (to catch the all-terminal-already
//! case). Idempotent: a terminal parent swallows the write as a no-op.

use tracing::info;

use tloom_models::{Stage, SubStatus, TaskId, TaskStatus, PROGRESS_DONE};
use tloom_store::TaskPatch;

use crate::context::WorkerContext;
use crate::error::WorkerResult;

/// Aggregate a parent if every child is terminal. Returns whether the
/// parent was finalized by this call.
pub async fn maybe_finalize_parent(ctx: &WorkerContext, parent_id: TaskId) -> WorkerResult<bool> {
    let Some(task) = ctx.store.get_task(parent_id).await? else {
        return Ok(false);
    };
    if task.is_terminal() {
        return Ok(false);
    }

    let children = ctx.store.children_of(parent_id).await?;
    if children.is_empty() || children.iter().any(|c| !c.is_terminal()) {
        return Ok(false);
    }

    let completed: Vec<_> = children
        .iter()
        .filter(|c| c.status == SubStatus::Completed)
        .collect();

    let patch = if completed.len() == children.len() {
        let first = completed[0];
        TaskPatch::status(TaskStatus::Completed)
            .with_progress(PROGRESS_DONE)
            .with_stage(Stage::Completed)
            .with_video(
                first.video_url.clone().unwrap_or_default(),
                first.thumbnail_url.clone(),
                first.duration_ms,
            )
    } else if completed.is_empty() {
        TaskPatch::status(TaskStatus::Failed)
            .with_stage(Stage::Completed)
            .with_error("all variants failed")
    } else {
        let first = completed[0];
        TaskPatch::status(TaskStatus::PartialSuccess)
            .with_progress(PROGRESS_DONE)
            .with_stage(Stage::Completed)
            .with_video(
                first.video_url.clone().unwrap_or_default(),
                first.thumbnail_url.clone(),
                first.duration_ms,
            )
    };

    let outcome = ctx.store.apply_task_update(parent_id, &patch).await?;
    if outcome.is_applied() {
        info!(
            task_id = %parent_id,
            completed = completed.len(),
            total = children.len(),
            "Parent task finalized"
        );
    }
    Ok(outcome.is_applied())
}
