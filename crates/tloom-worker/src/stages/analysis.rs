//! Stage 2: material analysis (progress 25-50).
//!
//! Runs the analyzer over every media item that has no analysis yet, with
//! bounded parallelism. Unanalyzable items are recorded as failed
//! analyses; the stage proceeds as long as at least one analysis is
//! usable.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::stream::{FuturesUnordered, StreamExt};
use uuid::Uuid;

use tloom_models::{analysis_progress, AnalysisStatus, MediaItem, Stage, Task};
use tloom_store::{NewAnalysis, TaskPatch};

use crate::context::WorkerContext;
use crate::error::WorkerResult;
use crate::logging::StageLog;
use crate::retry::{retry_async, RetryConfig};
use crate::stages::StageOutcome;

pub async fn run_material_analysis(
    ctx: &WorkerContext,
    task: &Task,
) -> WorkerResult<StageOutcome> {
    let log = StageLog::new(task.id, Stage::MaterialAnalysis);

    let items = ctx.store.media_items_for_task(task.id).await?;
    let analyzed: HashSet<Uuid> = ctx
        .store
        .analyses_for_task(task.id)
        .await?
        .iter()
        .map(|a| a.media_item_id)
        .collect();

    let total = items.len();
    let pending: Vec<&MediaItem> = items
        .iter()
        .filter(|item| !analyzed.contains(&item.id))
        .collect();

    log.checkpoint(format!(
        "analyzing {} of {} media items",
        pending.len(),
        total
    ));

    let announced = ctx
        .store
        .apply_task_update(
            task.id,
            &TaskPatch::progress(analysis_progress(analyzed.len(), total).max(task.progress))
                .with_stage(Stage::MaterialAnalysis)
                .with_stage_message(format!("analyzing {}/{}", analyzed.len(), total)),
        )
        .await?;
    if !announced.is_applied() {
        return Ok(StageOutcome::Stalled);
    }

    let done = AtomicUsize::new(analyzed.len());

    let limit = ctx.config.analysis_parallelism.max(1);
    let mut pending_iter = pending.into_iter();
    let mut futs = FuturesUnordered::new();
    for item in pending_iter.by_ref().take(limit) {
        futs.push(process_analysis_item(ctx, task, &log, &done, total, item));
    }
    let mut results: Vec<WorkerResult<()>> = Vec::new();
    while let Some(r) = futs.next().await {
        results.push(r);
        if let Some(item) = pending_iter.next() {
            futs.push(process_analysis_item(ctx, task, &log, &done, total, item));
        }
    }

    for result in results {
        result?;
    }

    let usable = ctx
        .store
        .analyses_for_task(task.id)
        .await?
        .iter()
        .filter(|a| a.is_usable())
        .count();

    if usable == 0 {
        return Ok(StageOutcome::failed("no media item could be analyzed"));
    }

    log.checkpoint(format!("{usable}/{total} analyses usable"));
    Ok(StageOutcome::Advanced)
}

async fn analyze_one(ctx: &WorkerContext, item: &MediaItem) -> Result<NewAnalysis, tloom_ports::PortError> {
    let retry = RetryConfig::new("media_analysis");
    let output = retry_async(&retry, || ctx.analyzer.analyze(item)).await?;

    Ok(NewAnalysis {
        description: output.description,
        tags: output.tags,
        theme: output.theme,
        status: AnalysisStatus::Completed,
        quality_score: output.quality_score,
    })
}

async fn process_analysis_item(
    ctx: &WorkerContext,
    task: &Task,
    log: &StageLog,
    done: &AtomicUsize,
    total: usize,
    item: &MediaItem,
) -> WorkerResult<()> {
    let fields = match analyze_one(ctx, item).await {
        Ok(fields) => fields,
        Err(e) => {
            log.item_failed(&item.original_url, &e);
            NewAnalysis {
                description: format!("analysis failed: {e}"),
                tags: Vec::new(),
                theme: None,
                status: AnalysisStatus::Failed,
                quality_score: None,
            }
        }
    };
    ctx.store.insert_analysis(task.id, item.id, &fields).await?;

    let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
    ctx.store
        .apply_task_update(
            task.id,
            &TaskPatch::progress(analysis_progress(finished, total).max(task.progress))
                .with_stage_message(format!("analyzing {finished}/{total}")),
        )
        .await?;
    Ok(())
}
