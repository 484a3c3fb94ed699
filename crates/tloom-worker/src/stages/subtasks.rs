//! Stage 3: sub-task creation (progress 50-55).
//!
//! Pure store work: one child row per requested variant. Variant 1 takes
//! the parent's default style; later variants rotate through the
//! configured style list.

use tloom_models::{Stage, Task, STAGE_SUBTASKS_DONE};
use tloom_store::TaskPatch;

use crate::context::WorkerContext;
use crate::error::WorkerResult;
use crate::logging::StageLog;
use crate::stages::StageOutcome;

pub async fn run_subtask_creation(ctx: &WorkerContext, task: &Task) -> WorkerResult<StageOutcome> {
    let log = StageLog::new(task.id, Stage::SubtaskCreation);

    let styles: Vec<String> = (1..=task.variant_count)
        .map(|i| ctx.config.style_for_variant(i, &task.script_style_default))
        .collect();

    let children = ctx.store.create_sub_tasks(task, &styles).await?;
    log.checkpoint(format!("{} sub-tasks ready", children.len()));

    let announced = ctx
        .store
        .apply_task_update(
            task.id,
            &TaskPatch::progress(STAGE_SUBTASKS_DONE.max(task.progress))
                .with_stage(Stage::SubtaskCreation)
                .with_stage_message(format!("created {} variants", children.len())),
        )
        .await?;
    if !announced.is_applied() {
        return Ok(StageOutcome::Stalled);
    }

    Ok(StageOutcome::Advanced)
}
