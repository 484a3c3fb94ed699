//! Stage 4: script generation (progress 55-75).
//!
//! Fans the children out over a bounded pool. Each child moves through
//! script_generating to script_ready (script row persisted) or
//! script_failed. Children already past the script stage are skipped, so
//! a crashed run resumes where it stopped.

use std::sync::atomic::{AtomicUsize, Ordering};

use futures::stream::{FuturesUnordered, StreamExt};

use tloom_models::{
    script_fanout_progress, MaterialAnalysis, ScriptContent, Stage, SubStatus, SubVideoTask, Task,
    CHILD_PROGRESS_SCRIPT_DONE, CHILD_PROGRESS_SCRIPT_GENERATING,
};
use tloom_store::{SubTaskPatch, TaskPatch};

use crate::context::WorkerContext;
use crate::error::WorkerResult;
use crate::logging::StageLog;
use crate::retry::{retry_async, RetryConfig};
use crate::stages::StageOutcome;

pub async fn run_script_generation(
    ctx: &WorkerContext,
    task: &Task,
) -> WorkerResult<StageOutcome> {
    let log = StageLog::new(task.id, Stage::ScriptGeneration);

    let children = ctx.store.children_of(task.id).await?;
    let analyses: Vec<MaterialAnalysis> = ctx
        .store
        .analyses_for_task(task.id)
        .await?
        .into_iter()
        .filter(|a| a.is_usable())
        .collect();

    let total = children.len();
    let pending: Vec<&SubVideoTask> = children
        .iter()
        .filter(|c| matches!(c.status, SubStatus::Pending | SubStatus::ScriptGenerating))
        .collect();

    log.checkpoint(format!(
        "generating scripts for {} of {} variants",
        pending.len(),
        total
    ));

    let announced = ctx
        .store
        .apply_task_update(
            task.id,
            &TaskPatch::default()
                .with_stage(Stage::ScriptGeneration)
                .with_stage_message(format!("scripting 0/{total}")),
        )
        .await?;
    if !announced.is_applied() {
        return Ok(StageOutcome::Stalled);
    }

    let done = AtomicUsize::new(total - pending.len());

    let limit = ctx.config.stage4_parallelism.max(1);
    let mut pending_iter = pending.into_iter();
    let mut futs = FuturesUnordered::new();
    for child in pending_iter.by_ref().take(limit) {
        futs.push(process_script_child(
            ctx, task, &log, &done, total, &analyses, child,
        ));
    }
    let mut results: Vec<WorkerResult<()>> = Vec::new();
    while let Some(r) = futs.next().await {
        results.push(r);
        if let Some(child) = pending_iter.next() {
            futs.push(process_script_child(
                ctx, task, &log, &done, total, &analyses, child,
            ));
        }
    }

    for result in results {
        result?;
    }

    let ready = ctx
        .store
        .children_of(task.id)
        .await?
        .iter()
        .filter(|c| !matches!(c.status, SubStatus::Pending | SubStatus::ScriptFailed))
        .count();

    if ready == 0 {
        return Ok(StageOutcome::failed("all script generations failed"));
    }

    log.checkpoint(format!("{ready}/{total} scripts ready"));
    Ok(StageOutcome::Advanced)
}

async fn process_script_child(
    ctx: &WorkerContext,
    task: &Task,
    log: &StageLog,
    done: &AtomicUsize,
    total: usize,
    analyses: &[MaterialAnalysis],
    child: &SubVideoTask,
) -> WorkerResult<()> {
    generate_for_child(ctx, task, analyses, child, log).await?;

    let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
    ctx.store
        .apply_task_update(
            task.id,
            &TaskPatch::progress(script_fanout_progress(finished, total).max(task.progress))
                .with_stage_message(format!("scripting {finished}/{total}")),
        )
        .await?;
    Ok(())
}

async fn generate_for_child(
    ctx: &WorkerContext,
    task: &Task,
    analyses: &[MaterialAnalysis],
    child: &SubVideoTask,
    log: &StageLog,
) -> WorkerResult<()> {
    let claimed = ctx
        .store
        .apply_sub_task_update(
            child.id,
            &SubTaskPatch::status(SubStatus::ScriptGenerating)
                .with_progress(CHILD_PROGRESS_SCRIPT_GENERATING),
        )
        .await?;
    if !claimed.is_applied() {
        // Another worker already owns this child
        return Ok(());
    }

    let retry = RetryConfig::new("script_generation");
    let generated = retry_async(&retry, || {
        ctx.script_generator
            .generate(task, analyses, &child.script_style)
    })
    .await;

    match generated {
        Ok(output) => {
            let script = ScriptContent::from_scenes(
                child.id,
                child.script_style.clone(),
                output.titles,
                output.scenes,
            );
            let stored = ctx.store.insert_script(&script).await?;

            ctx.store
                .apply_sub_task_update(
                    child.id,
                    &SubTaskPatch::status(SubStatus::ScriptReady)
                        .with_progress(CHILD_PROGRESS_SCRIPT_DONE)
                        .with_script(stored.id, output.payload),
                )
                .await?;
        }
        Err(e) => {
            log.variant(child).failed(&e);
            ctx.store
                .apply_sub_task_update(
                    child.id,
                    &SubTaskPatch::status(SubStatus::ScriptFailed)
                        .with_progress(CHILD_PROGRESS_SCRIPT_DONE)
                        .with_error(e.to_string()),
                )
                .await?;
        }
    }

    Ok(())
}
