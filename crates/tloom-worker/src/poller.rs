//! Poll-based reconciler for in-flight video merge jobs.
//!
//! Every cycle the poller lists sub-tasks with an in-flight submission
//! and advances each one: timeout check first, then a status query
//! against the merge service. Succeeded children move to subtitle
//! rendering (out-of-band) and then to completed; failures and timeouts
//! go terminal. Whenever a child goes terminal, parent aggregation runs.
//!
//! Poll errors are tracked per child and never block the rest of the
//! batch; a child whose polls fail too many times in a row is failed as
//! unreachable.

use std::collections::HashMap;
use std::sync::Mutex;

use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use tloom_models::{
    SubStatus, SubTaskId, SubVideoTask, CHILD_PROGRESS_COMPLETED, CHILD_PROGRESS_SUBTITLES,
};
use tloom_ports::{MergeOutput, MergeStatus};
use tloom_store::SubTaskPatch;

use crate::aggregate::maybe_finalize_parent;
use crate::config::SubtitleFailureMode;
use crate::context::WorkerContext;
use crate::error::WorkerResult;

/// What a failed poll means for the child it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollVerdict {
    /// The merge job stays in flight; `true` when this error opened a
    /// new streak (and deserves a warn-level line).
    Wait { first_of_streak: bool },
    /// The error budget is spent; give the child up.
    Unreachable,
}

/// Consecutive poll-error bookkeeping for in-flight merge jobs.
///
/// Each child gets `limit - 1` consecutive bad polls before the next one
/// condemns it as unreachable; one clean poll wipes its streak. Children
/// are dropped from the map the moment they stop being polled, so the
/// map only ever holds currently-misbehaving jobs.
#[derive(Debug)]
struct ErrorStreaks {
    limit: u32,
    by_child: HashMap<SubTaskId, u32>,
}

impl ErrorStreaks {
    fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            by_child: HashMap::new(),
        }
    }

    fn record_error(&mut self, id: SubTaskId) -> PollVerdict {
        let streak = self.by_child.entry(id).or_insert(0);
        *streak += 1;
        if *streak >= self.limit {
            self.by_child.remove(&id);
            PollVerdict::Unreachable
        } else {
            PollVerdict::Wait {
                first_of_streak: *streak == 1,
            }
        }
    }

    /// A clean poll; returns true if it ended a streak.
    fn clear(&mut self, id: SubTaskId) -> bool {
        self.by_child.remove(&id).is_some()
    }

    /// The child left the polling set (terminal or succeeded).
    fn forget(&mut self, id: SubTaskId) {
        self.by_child.remove(&id);
    }
}

/// Counters from one reconcile cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollStats {
    /// Children examined this cycle
    pub checked: usize,
    /// Children that went terminal this cycle
    pub terminal: usize,
    /// Children still processing
    pub in_flight: usize,
}

/// The Stage 5 Phase B reconciler.
pub struct MergeReconciler {
    ctx: WorkerContext,
    streaks: Mutex<ErrorStreaks>,
    renders: tokio::sync::Mutex<JoinSet<()>>,
}

impl MergeReconciler {
    pub fn new(ctx: WorkerContext) -> Self {
        let streaks = ErrorStreaks::new(ctx.config.poll_failure_limit);
        Self {
            ctx,
            streaks: Mutex::new(streaks),
            renders: tokio::sync::Mutex::new(JoinSet::new()),
        }
    }

    /// Reconcile loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval = ?self.ctx.config.poll_interval,
            "Merge reconciler started"
        );
        let mut ticker = tokio::time::interval(self.ctx.config.poll_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.check_once().await {
                        error!("Merge reconcile cycle error: {e}");
                    }
                    self.reap_renders().await;
                }
            }
        }

        // Let in-flight subtitle renders finish before stopping
        self.drain_renders().await;
        info!("Merge reconciler stopped");
    }

    /// Run a single reconcile cycle over one batch.
    pub async fn check_once(&self) -> WorkerResult<PollStats> {
        let batch = self
            .ctx
            .store
            .list_submitted_subtasks(self.ctx.config.poll_batch_size)
            .await?;

        counter!("tloom_poll_cycles_total").increment(1);

        let mut stats = PollStats {
            checked: batch.len(),
            ..Default::default()
        };

        for child in batch {
            // Mid-submit orphans have no merge ID yet; the submission
            // stage re-drives them when the task is reclaimed.
            if child.external_merge_id.is_none() {
                stats.in_flight += 1;
                continue;
            }

            match self.reconcile_child(&child).await? {
                true => stats.terminal += 1,
                false => stats.in_flight += 1,
            }
        }

        Ok(stats)
    }

    /// Advance one child. Returns whether it went terminal in this cycle.
    async fn reconcile_child(&self, child: &SubVideoTask) -> WorkerResult<bool> {
        let now = self.ctx.clock.now();
        let timeout_s = self.ctx.config.video_merge_timeout.as_secs() as i64;

        if child.merge_timed_out(now, timeout_s) {
            warn!(sub_task_id = %child.id, "Merge job exceeded wall-clock timeout");
            return self.fail_child(child, "merge timeout").await;
        }

        let external_id = child.external_merge_id.as_deref().unwrap_or_default();
        let status = self.ctx.merge_poller.status(external_id).await;

        match status {
            Err(e) => {
                // Bind the verdict so the lock is gone before any await
                let verdict = self.streaks.lock().unwrap().record_error(child.id);
                match verdict {
                    PollVerdict::Unreachable => {
                        warn!(
                            sub_task_id = %child.id,
                            budget = self.ctx.config.poll_failure_limit,
                            "Giving up on merge job, poll error budget spent: {e}"
                        );
                        self.fail_child(child, "merge unreachable").await
                    }
                    PollVerdict::Wait { first_of_streak } => {
                        if first_of_streak {
                            warn!(sub_task_id = %child.id, "Merge poll failed, retrying next cycle: {e}");
                        } else {
                            debug!(sub_task_id = %child.id, "Merge poll still failing: {e}");
                        }
                        Ok(false)
                    }
                }
            }
            Ok(MergeStatus::Processing) => {
                if self.streaks.lock().unwrap().clear(child.id) {
                    debug!(sub_task_id = %child.id, "Merge poll recovered");
                }
                Ok(false)
            }
            Ok(MergeStatus::Succeeded(output)) => {
                self.streaks.lock().unwrap().forget(child.id);
                self.start_subtitles(child, output).await?;
                Ok(false)
            }
            Ok(MergeStatus::Failed(reason)) => {
                warn!(sub_task_id = %child.id, "Merge job failed: {reason}");
                self.fail_child(child, &format!("merge failed: {reason}"))
                    .await
            }
        }
    }

    async fn fail_child(&self, child: &SubVideoTask, reason: &str) -> WorkerResult<bool> {
        self.streaks.lock().unwrap().forget(child.id);

        let outcome = self
            .ctx
            .store
            .apply_sub_task_update(
                child.id,
                &SubTaskPatch::status(SubStatus::Failed).with_error(reason),
            )
            .await?;

        if outcome.is_applied() {
            maybe_finalize_parent(&self.ctx, child.parent_task_id).await?;
        }
        Ok(outcome.is_applied())
    }

    /// Record the finished video and hand the child to the subtitle
    /// renderer out-of-band.
    async fn start_subtitles(&self, child: &SubVideoTask, output: MergeOutput) -> WorkerResult<()> {
        let outcome = self
            .ctx
            .store
            .apply_sub_task_update(
                child.id,
                &SubTaskPatch::status(SubStatus::ProcessingSubtitles)
                    .with_progress(CHILD_PROGRESS_SUBTITLES)
                    .with_video(output.video_url, output.thumbnail_url, output.duration_ms),
            )
            .await?;

        let Some(updated) = outcome.applied() else {
            return Ok(());
        };

        let ctx = self.ctx.clone();
        self.renders.lock().await.spawn(async move {
            render_and_complete(ctx, updated).await;
        });
        Ok(())
    }

    /// Collect any finished render tasks without blocking.
    async fn reap_renders(&self) {
        let mut renders = self.renders.lock().await;
        while renders.try_join_next().is_some() {}
    }

    /// Await every spawned render; used on shutdown and by tests that
    /// need deterministic completion.
    pub async fn drain_renders(&self) {
        let mut renders = self.renders.lock().await;
        while renders.join_next().await.is_some() {}
    }
}

/// Render subtitles for a finished video, then mark the child completed
/// (degrading on failure when configured) and aggregate the parent.
async fn render_and_complete(ctx: WorkerContext, child: SubVideoTask) {
    let result = ctx.subtitle_renderer.render(&child).await;

    let patch = match result {
        Ok(()) => SubTaskPatch::status(SubStatus::Completed).with_progress(CHILD_PROGRESS_COMPLETED),
        Err(e) => match ctx.config.subtitle_failure_mode {
            SubtitleFailureMode::Degrade => {
                warn!(sub_task_id = %child.id, "Subtitle render failed, keeping raw video: {e}");
                SubTaskPatch::status(SubStatus::Completed)
                    .with_progress(CHILD_PROGRESS_COMPLETED)
                    .with_error(format!("subtitle render failed: {e}"))
            }
            SubtitleFailureMode::Fail => {
                warn!(sub_task_id = %child.id, "Subtitle render failed: {e}");
                SubTaskPatch::status(SubStatus::Failed)
                    .with_error(format!("subtitle render failed: {e}"))
            }
        },
    };

    match ctx.store.apply_sub_task_update(child.id, &patch).await {
        Ok(outcome) if outcome.is_applied() => {
            if let Err(e) = maybe_finalize_parent(&ctx, child.parent_task_id).await {
                error!(sub_task_id = %child.id, "Parent aggregation failed: {e}");
            }
        }
        Ok(_) => {}
        Err(e) => error!(sub_task_id = %child.id, "Failed to record subtitle outcome: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streak_exhausts_budget() {
        let mut streaks = ErrorStreaks::new(3);
        let id = SubTaskId::new();

        assert_eq!(
            streaks.record_error(id),
            PollVerdict::Wait { first_of_streak: true }
        );
        assert_eq!(
            streaks.record_error(id),
            PollVerdict::Wait { first_of_streak: false }
        );
        assert_eq!(streaks.record_error(id), PollVerdict::Unreachable);

        // The condemned child starts fresh if it ever reappears
        assert_eq!(
            streaks.record_error(id),
            PollVerdict::Wait { first_of_streak: true }
        );
    }

    #[test]
    fn test_clean_poll_wipes_streak() {
        let mut streaks = ErrorStreaks::new(3);
        let id = SubTaskId::new();

        streaks.record_error(id);
        streaks.record_error(id);
        assert!(streaks.clear(id));
        // No streak in progress, nothing to end
        assert!(!streaks.clear(id));

        // The budget is whole again
        assert_eq!(
            streaks.record_error(id),
            PollVerdict::Wait { first_of_streak: true }
        );
    }

    #[test]
    fn test_streaks_are_per_child() {
        let mut streaks = ErrorStreaks::new(2);
        let a = SubTaskId::new();
        let b = SubTaskId::new();

        streaks.record_error(a);
        // b's budget is untouched by a's streak
        assert_eq!(
            streaks.record_error(b),
            PollVerdict::Wait { first_of_streak: true }
        );
        assert_eq!(streaks.record_error(a), PollVerdict::Unreachable);
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        // A zero budget would condemn children on their first error with
        // no warn line ever logged; clamp to one instead
        let mut streaks = ErrorStreaks::new(0);
        assert_eq!(streaks.record_error(SubTaskId::new()), PollVerdict::Unreachable);
    }
}
