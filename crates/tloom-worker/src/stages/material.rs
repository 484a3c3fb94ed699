//! Stage 1: material processing (progress 0-25).
//!
//! Downloads every source URL into the task workspace, uploads each file
//! to object storage, and records one media item per URL. Already-fetched
//! URLs are skipped, so re-running after a crash never double-creates
//! items.

use std::collections::HashSet;
use std::path::Path;

use tloom_models::{fetch_progress, Stage, Task};
use tloom_store::{NewMediaItem, TaskPatch};

use crate::context::WorkerContext;
use crate::error::WorkerResult;
use crate::logging::StageLog;
use crate::retry::{retry_async, RetryConfig};
use crate::stages::StageOutcome;

pub async fn run_material_processing(
    ctx: &WorkerContext,
    task: &Task,
) -> WorkerResult<StageOutcome> {
    let log = StageLog::new(task.id, Stage::MaterialProcessing);
    let urls = &task.media_urls.0;
    let total = urls.len();

    tokio::fs::create_dir_all(&task.workspace_dir).await?;

    let existing = ctx.store.media_items_for_task(task.id).await?;
    let existing_urls: HashSet<&str> = existing.iter().map(|m| m.original_url.as_str()).collect();
    let mut fetched = existing.len();
    let mut failures: Vec<String> = Vec::new();

    log.checkpoint(format!("fetching {total} source URLs ({fetched} cached)"));

    let announced = ctx
        .store
        .apply_task_update(
            task.id,
            &TaskPatch::default()
                .with_stage(Stage::MaterialProcessing)
                .with_stage_message(format!("fetching {fetched}/{total}")),
        )
        .await?;
    if !announced.is_applied() {
        return Ok(StageOutcome::Stalled);
    }

    for url in urls {
        if existing_urls.contains(url.as_str()) {
            continue;
        }

        match fetch_one(ctx, task, url).await {
            Ok(()) => {
                fetched += 1;
                // Clamp so a re-run after reclaim never writes a regression
                let progress = fetch_progress(fetched, total).max(task.progress);
                let patch = TaskPatch::progress(progress)
                    .with_stage_message(format!("fetching {fetched}/{total}"));
                if !ctx.store.apply_task_update(task.id, &patch).await?.is_applied() {
                    return Ok(StageOutcome::Stalled);
                }
            }
            Err(e) => {
                log.item_failed(url, &e);
                failures.push(format!("{url}: {e}"));
            }
        }
    }

    if fetched == 0 {
        return Ok(StageOutcome::failed(format!(
            "no media could be fetched: {}",
            failures.join("; ")
        )));
    }

    if !failures.is_empty() {
        // Partial failure: record and continue
        let note = format!("{} of {} sources failed: {}", failures.len(), total, failures.join("; "));
        ctx.store
            .apply_task_update(task.id, &TaskPatch::default().with_error(note))
            .await?;
    }

    log.checkpoint(format!("{fetched}/{total} sources fetched"));
    Ok(StageOutcome::Advanced)
}

async fn fetch_one(ctx: &WorkerContext, task: &Task, url: &str) -> WorkerResult<()> {
    let fetch_retry = RetryConfig::new("media_fetch");
    let media = retry_async(&fetch_retry, || {
        ctx.fetcher
            .fetch(url, Path::new(&task.workspace_dir), ctx.config.collaborator_timeout)
    })
    .await?;

    let upload_retry = RetryConfig::new("media_upload");
    let remote_url = retry_async(&upload_retry, || ctx.uploader.put(&media.local_path)).await?;

    ctx.store
        .upsert_media_item(
            task.id,
            url,
            &NewMediaItem {
                local_path: media.local_path.to_string_lossy().into_owned(),
                remote_url,
                media_type: media.media_type,
                file_size: media.file_size,
                mime_type: media.mime_type.clone(),
                resolution: media.resolution.clone(),
                duration_ms: media.duration_ms,
            },
        )
        .await?;

    Ok(())
}
