//! Dispatcher: claims pending tasks and drives them through the stages.
//!
//! One dispatcher is one worker identity. It claims a task, keeps the
//! lease fresh from a background refresher, runs stages 1-5 in order
//! with a cancellation check at every boundary, and after the submission
//! stage releases the lease while leaving the task in processing for the
//! poller to resolve.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use tloom_models::{Task, TaskId, TaskStatus};
use tloom_store::TaskPatch;

use crate::aggregate::maybe_finalize_parent;
use crate::context::WorkerContext;
use crate::error::{WorkerError, WorkerResult};
use crate::stages::{
    run_material_analysis, run_material_processing, run_script_generation, run_subtask_creation,
    run_video_submission, StageOutcome,
};

/// What the dispatcher observed at a stage boundary.
enum Boundary {
    /// Keep going with a fresh task snapshot.
    Continue(Task),
    /// Cancel observed (or task gone); stop immediately.
    Stop,
}

pub struct Dispatcher {
    ctx: WorkerContext,
    worker_id: String,
}

impl Dispatcher {
    pub fn new(ctx: WorkerContext) -> Self {
        let worker_id = format!("worker-{}", Uuid::new_v4());
        Self { ctx, worker_id }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Claim-and-process loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.worker_id, "Dispatcher started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.claim_and_process().await {
                Ok(true) => {} // processed one task, claim again immediately
                Ok(false) => {
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(self.ctx.config.claim_idle_sleep) => {}
                    }
                }
                Err(e) => {
                    error!(worker_id = %self.worker_id, "Dispatch cycle error: {e}");
                    tokio::time::sleep(self.ctx.config.claim_idle_sleep).await;
                }
            }
        }

        info!(worker_id = %self.worker_id, "Dispatcher stopped");
    }

    /// Claim one pending task and run it. Returns whether a task was
    /// claimed.
    pub async fn claim_and_process(&self) -> WorkerResult<bool> {
        let lease_ttl = ChronoDuration::from_std(self.ctx.config.lease_ttl)
            .unwrap_or_else(|_| ChronoDuration::seconds(300));

        let Some(task) = self
            .ctx
            .store
            .claim_task(&self.worker_id, lease_ttl, self.ctx.clock.now())
            .await?
        else {
            return Ok(false);
        };

        self.process_claimed(task).await?;
        Ok(true)
    }

    /// Drive a claimed task through the pipeline.
    pub async fn process_claimed(&self, task: Task) -> WorkerResult<()> {
        let task_id = task.id;
        let lease_lost = Arc::new(AtomicBool::new(false));
        let refresher = self.spawn_lease_refresher(task_id, Arc::clone(&lease_lost));

        let result = self.run_stages(task_id, &lease_lost).await;

        refresher.abort();

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_lease_lost() => {
                // Another worker owns the task now; abandon without writes
                warn!(task_id = %task_id, "Lease lost, abandoning task");
                Ok(())
            }
            Err(e) => {
                error!(task_id = %task_id, "Pipeline error: {e}");
                let patch = TaskPatch::status(TaskStatus::Failed)
                    .with_error(format!("internal error: {e}"));
                if let Err(write_err) = self.ctx.store.apply_task_update(task_id, &patch).await {
                    error!(task_id = %task_id, "Failed to record task failure: {write_err}");
                }
                Err(e)
            }
        }
    }

    async fn run_stages(&self, task_id: TaskId, lease_lost: &AtomicBool) -> WorkerResult<()> {
        let mut current: Task;

        macro_rules! stage {
            ($name:literal, $runner:path) => {
                if lease_lost.load(Ordering::SeqCst) {
                    return Err(WorkerError::LeaseLost(format!(
                        "lease refresher lost task {task_id}"
                    )));
                }
                match self.observe_boundary(task_id).await? {
                    Boundary::Continue(fresh) => current = fresh,
                    Boundary::Stop => return Ok(()),
                }
                match $runner(&self.ctx, &current).await? {
                    StageOutcome::Advanced => {}
                    StageOutcome::Stalled => {
                        warn!(task_id = %task_id, stage = $name, "Stage stalled, abandoning task");
                        return Ok(());
                    }
                    StageOutcome::Failed(reason) => {
                        warn!(task_id = %task_id, stage = $name, "Stage failed: {reason}");
                        self.ctx
                            .store
                            .apply_task_update(
                                task_id,
                                &TaskPatch::status(TaskStatus::Failed).with_error(reason),
                            )
                            .await?;
                        return Ok(());
                    }
                }
            };
        }

        stage!("material_processing", run_material_processing);
        stage!("material_analysis", run_material_analysis);
        stage!("subtask_creation", run_subtask_creation);
        stage!("script_generation", run_script_generation);
        stage!("video_submission", run_video_submission);

        // Children that went terminal during submission may already
        // settle the parent.
        maybe_finalize_parent(&self.ctx, task_id).await?;

        self.ctx.store.release_lease(task_id, &self.worker_id).await?;
        info!(task_id = %task_id, "Pipeline handed off to poller");
        Ok(())
    }

    /// Fresh-read the task and convert a cancel request into the
    /// cancelled terminal state.
    async fn observe_boundary(&self, task_id: TaskId) -> WorkerResult<Boundary> {
        let Some(task) = self.ctx.store.get_task(task_id).await? else {
            warn!(task_id = %task_id, "Task disappeared mid-pipeline");
            return Ok(Boundary::Stop);
        };

        if task.status == TaskStatus::Cancelled || task.is_terminal() {
            return Ok(Boundary::Stop);
        }

        if task.cancel_requested {
            info!(task_id = %task_id, "Cancel observed at stage boundary");
            self.ctx
                .store
                .apply_task_update(task_id, &TaskPatch::status(TaskStatus::Cancelled))
                .await?;
            return Ok(Boundary::Stop);
        }

        Ok(Boundary::Continue(task))
    }

    fn spawn_lease_refresher(
        &self,
        task_id: TaskId,
        lease_lost: Arc<AtomicBool>,
    ) -> tokio::task::JoinHandle<()> {
        let store = self.ctx.store.clone();
        let clock = Arc::clone(&self.ctx.clock);
        let worker_id = self.worker_id.clone();
        let ttl = self.ctx.config.lease_ttl;
        let refresh_every = ttl / 3;

        tokio::spawn(async move {
            let lease_ttl = ChronoDuration::from_std(ttl)
                .unwrap_or_else(|_| ChronoDuration::seconds(300));
            let mut ticker = tokio::time::interval(refresh_every);
            ticker.tick().await; // first tick fires immediately

            loop {
                ticker.tick().await;
                match store
                    .refresh_lease(task_id, &worker_id, lease_ttl, clock.now())
                    .await
                {
                    Ok(_) => {}
                    Err(e) => {
                        warn!(task_id = %task_id, "Lease refresh failed: {e}");
                        lease_lost.store(true, Ordering::SeqCst);
                        break;
                    }
                }
            }
        })
    }
}
