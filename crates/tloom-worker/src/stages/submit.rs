//! Stage 5 phase A: video merge submission (progress 75 onward).
//!
//! Submits every script-ready child to the external merge service. The
//! sub-task ID is the idempotency key: a resubmission after a crash gets
//! the original external job back instead of creating a second one.
//! Phase B (poll-based completion) belongs to the poller; after this
//! stage the dispatcher releases the task.

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;

use tloom_models::{Stage, SubStatus, SubVideoTask, Task, CHILD_PROGRESS_SUBMITTED};
use tloom_store::{SubTaskPatch, TaskPatch};

use crate::context::WorkerContext;
use crate::error::WorkerResult;
use crate::logging::StageLog;
use crate::retry::{retry_async, RetryConfig};
use crate::stages::StageOutcome;

pub async fn run_video_submission(
    ctx: &WorkerContext,
    task: &Task,
) -> WorkerResult<StageOutcome> {
    let log = StageLog::new(task.id, Stage::VideoGeneration);

    let children = ctx.store.children_of(task.id).await?;
    // video_submitting children are resubmission candidates: a previous
    // worker may have crashed between submit and the merge-ID write.
    let pending: Vec<&SubVideoTask> = children
        .iter()
        .filter(|c| matches!(c.status, SubStatus::ScriptReady | SubStatus::VideoSubmitting))
        .collect();

    log.checkpoint(format!(
        "submitting {} of {} variants for merge",
        pending.len(),
        children.len()
    ));

    let announced = ctx
        .store
        .apply_task_update(
            task.id,
            &TaskPatch::progress(75u8.max(task.progress))
                .with_stage(Stage::VideoGeneration)
                .with_stage_message("submitting merge jobs"),
        )
        .await?;
    if !announced.is_applied() {
        return Ok(StageOutcome::Stalled);
    }

    let limit = ctx.config.stage5_parallelism.max(1);
    let mut pending_iter = pending.into_iter();
    let mut futs = FuturesUnordered::new();
    for child in pending_iter.by_ref().take(limit) {
        futs.push(submit_child(ctx, child, &log));
    }
    let mut results: Vec<WorkerResult<()>> = Vec::new();
    while let Some(r) = futs.next().await {
        results.push(r);
        if let Some(child) = pending_iter.next() {
            futs.push(submit_child(ctx, child, &log));
        }
    }

    for result in results {
        result?;
    }

    ctx.store
        .apply_task_update(
            task.id,
            &TaskPatch::default().with_stage_message("awaiting external merge"),
        )
        .await?;

    log.checkpoint("all variants submitted or terminal");
    Ok(StageOutcome::Advanced)
}

async fn submit_child(
    ctx: &WorkerContext,
    child: &SubVideoTask,
    log: &StageLog,
) -> WorkerResult<()> {
    let claimed = ctx
        .store
        .apply_sub_task_update(child.id, &SubTaskPatch::status(SubStatus::VideoSubmitting))
        .await?;
    if !claimed.is_applied() {
        return Ok(());
    }

    let payload: Value = match &child.script_payload {
        Some(json) => json.0.clone(),
        // The payload is written together with script_ready; a missing one
        // means the row predates a crash we cannot recover from here.
        None => {
            ctx.store
                .apply_sub_task_update(
                    child.id,
                    &SubTaskPatch::status(SubStatus::Failed)
                        .with_error("no script payload to submit"),
                )
                .await?;
            return Ok(());
        }
    };

    let submit_key = child.id.to_string();
    let retry = RetryConfig::new("video_merge_submit");
    let submitted = retry_async(&retry, || {
        ctx.merge_submitter.submit(&payload, &submit_key)
    })
    .await;

    match submitted {
        Ok(external_id) => {
            ctx.store
                .apply_sub_task_update(
                    child.id,
                    &SubTaskPatch::status(SubStatus::VideoProcessing)
                        .with_progress(CHILD_PROGRESS_SUBMITTED)
                        .with_merge_submission(external_id, ctx.clock.now()),
                )
                .await?;
        }
        Err(e) => {
            log.variant(child).failed(&e);
            ctx.store
                .apply_sub_task_update(
                    child.id,
                    &SubTaskPatch::status(SubStatus::Failed).with_error(e.to_string()),
                )
                .await?;
        }
    }

    Ok(())
}
