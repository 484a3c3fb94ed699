//! Background housekeeping: lease reclamation, stuck-task detection,
//! terminal-task expiry.

use chrono::Duration as ChronoDuration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::context::WorkerContext;
use crate::error::WorkerResult;

/// Counters from one housekeeping cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HousekeepingStats {
    /// Expired leases returned to pending
    pub reclaimed: usize,
    /// Tasks failed for exhausting the retry budget
    pub retry_exhausted: usize,
    /// Processing tasks flagged as stuck (logged only)
    pub stuck: usize,
    /// Terminal tasks scrubbed with their workspaces
    pub scrubbed: usize,
}

/// Periodic cleanup service.
pub struct Housekeeper {
    ctx: WorkerContext,
}

impl Housekeeper {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    /// Cleanup loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval = ?self.ctx.config.housekeeping_interval,
            "Housekeeper started"
        );
        let mut ticker = tokio::time::interval(self.ctx.config.housekeeping_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.check_once().await {
                        error!("Housekeeping cycle error: {e}");
                    }
                }
            }
        }

        info!("Housekeeper stopped");
    }

    /// Run a single cleanup cycle.
    pub async fn check_once(&self) -> WorkerResult<HousekeepingStats> {
        let now = self.ctx.clock.now();
        let mut stats = HousekeepingStats::default();

        // Crashed workers leave expired leases behind
        let reclaimed = self.ctx.store.reclaim_expired_leases(now).await?;
        stats.reclaimed = reclaimed.len();
        for task in &reclaimed {
            warn!(
                task_id = %task.id,
                reclaim_count = task.reclaim_count,
                "Reclaimed expired lease"
            );
        }

        let exhausted = self
            .ctx
            .store
            .fail_retry_exhausted(self.ctx.config.retry_budget, now)
            .await?;
        stats.retry_exhausted = exhausted.len();
        for task in &exhausted {
            warn!(task_id = %task.id, "Task exceeded retry budget");
        }

        // Stuck tasks are surfaced for operators, never auto-failed
        let stuck_cutoff = now
            - ChronoDuration::from_std(self.ctx.config.stuck_threshold)
                .unwrap_or_else(|_| ChronoDuration::seconds(900));
        let stuck = self.ctx.store.list_stuck_tasks(stuck_cutoff).await?;
        stats.stuck = stuck.len();
        for task in &stuck {
            warn!(
                task_id = %task.id,
                updated_at = %task.updated_at,
                stage = ?task.current_stage,
                "Task appears stuck in processing"
            );
        }

        let retention_cutoff = now
            - ChronoDuration::from_std(self.ctx.config.retention)
                .unwrap_or_else(|_| ChronoDuration::days(7));
        let expired = self.ctx.store.list_expired_tasks(retention_cutoff).await?;
        for task in &expired {
            if let Err(e) = tokio::fs::remove_dir_all(&task.workspace_dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(task_id = %task.id, "Failed to remove workspace: {e}");
                }
            }
            self.ctx.store.purge_task(task.id).await?;
            stats.scrubbed += 1;
            info!(task_id = %task.id, "Scrubbed expired task");
        }

        Ok(stats)
    }
}
