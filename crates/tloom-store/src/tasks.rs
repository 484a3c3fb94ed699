//! Parent task operations: creation, claiming, leases, cancel, retry.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use sqlx::types::Json;
use tracing::info;
use validator::Validate;

use tloom_models::{CreateTaskSpec, Task, TaskId, TaskStatus};

use crate::client::Store;
use crate::error::{StoreError, StoreResult};
use crate::retry::{map_constraint_to_corruption, with_db_retry};

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Cancel recorded: pending tasks go straight to `cancelled`,
    /// processing tasks get the flag and cancel at the next boundary.
    Accepted,
    /// Task already terminal; nothing to cancel.
    NoopTerminal,
    /// No such task.
    NotFound,
}

/// Result of a retry request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Task reset to pending; children discarded.
    Accepted,
    /// Only `failed` tasks can be retried.
    RejectedNonterminal,
    /// No such task.
    NotFound,
}

impl Store {
    /// Create a new task from a validated spec.
    ///
    /// Fails with `InvalidSpec` if `variant_count` is out of range or
    /// `media_urls` is empty.
    pub async fn create_task(
        &self,
        spec: &CreateTaskSpec,
        workspace_root: &str,
    ) -> StoreResult<Task> {
        spec.validate()
            .map_err(|e| StoreError::invalid_spec(e.to_string()))?;

        let now = Utc::now();
        let id = TaskId::new();
        let task = Task {
            id,
            title: spec.title.clone(),
            description: spec.description.clone(),
            mode: spec.mode,
            script_style_default: spec.script_style_default.clone(),
            variant_count: spec.variant_count,
            media_urls: Json(spec.media_urls.clone()),
            media_meta: spec.media_meta.clone().map(Json),
            status: TaskStatus::Pending,
            progress: 0,
            current_stage: None,
            stage_message: None,
            started_at: None,
            completed_at: None,
            video_url: None,
            thumbnail_url: None,
            video_duration_ms: None,
            error_message: None,
            workspace_dir: format!("{}/{}", workspace_root.trim_end_matches('/'), id),
            cancel_requested: false,
            reclaim_count: 0,
            lease_worker_id: None,
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
        };

        with_db_retry(&self.retry, "create_task", || async {
            sqlx::query(
                r#"INSERT INTO tloom_tasks (
                    id, title, description, mode, script_style_default, variant_count,
                    media_urls, media_meta, status, progress, workspace_dir,
                    cancel_requested, reclaim_count, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"#,
            )
            .bind(task.id)
            .bind(&task.title)
            .bind(&task.description)
            .bind(task.mode)
            .bind(&task.script_style_default)
            .bind(task.variant_count)
            .bind(&task.media_urls)
            .bind(&task.media_meta)
            .bind(task.status)
            .bind(task.progress)
            .bind(&task.workspace_dir)
            .bind(task.cancel_requested)
            .bind(task.reclaim_count)
            .bind(task.created_at)
            .bind(task.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_constraint_to_corruption(e, "create_task"))?;
            Ok(())
        })
        .await?;

        info!(task_id = %task.id, "Created task");
        Ok(task)
    }

    /// Fetch a task by ID.
    pub async fn get_task(&self, id: TaskId) -> StoreResult<Option<Task>> {
        with_db_retry(&self.retry, "get_task", || async {
            let task = sqlx::query_as::<_, Task>("SELECT * FROM tloom_tasks WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(task)
        })
        .await
    }

    /// Atomically claim the oldest pending task for a worker.
    ///
    /// The claim is a single UPDATE over a pending-row subquery, which is
    /// SQLite's equivalent of `SELECT ... FOR UPDATE SKIP LOCKED`: writers
    /// serialize, so a task can only ever be moved to processing once.
    pub async fn claim_task(
        &self,
        worker_id: &str,
        lease_ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Task>> {
        let deadline = now + lease_ttl;

        let claimed = with_db_retry(&self.retry, "claim_task", || async {
            let task = sqlx::query_as::<_, Task>(
                r#"UPDATE tloom_tasks SET
                    status = 'processing',
                    lease_worker_id = ?1,
                    lease_expires_at = ?2,
                    started_at = COALESCE(started_at, ?3),
                    updated_at = ?3
                WHERE id = (
                    SELECT id FROM tloom_tasks
                    WHERE status = 'pending'
                    ORDER BY created_at ASC
                    LIMIT 1
                )
                RETURNING *"#,
            )
            .bind(worker_id)
            .bind(deadline)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
            Ok(task)
        })
        .await?;

        if let Some(task) = &claimed {
            counter!("tloom_tasks_claimed_total").increment(1);
            info!(task_id = %task.id, worker_id, "Claimed task");
        }
        Ok(claimed)
    }

    /// Extend the lease iff `worker_id` still owns it.
    pub async fn refresh_lease(
        &self,
        id: TaskId,
        worker_id: &str,
        lease_ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<DateTime<Utc>> {
        let deadline = now + lease_ttl;

        let refreshed = with_db_retry(&self.retry, "refresh_lease", || async {
            let row = sqlx::query_scalar::<_, DateTime<Utc>>(
                r#"UPDATE tloom_tasks SET lease_expires_at = ?1, updated_at = ?2
                WHERE id = ?3 AND lease_worker_id = ?4 AND status = 'processing'
                RETURNING lease_expires_at"#,
            )
            .bind(deadline)
            .bind(now)
            .bind(id)
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        })
        .await?;

        refreshed.ok_or_else(|| {
            StoreError::lease_lost(format!("task {id} no longer leased to {worker_id}"))
        })
    }

    /// Drop the lease while leaving the task in `processing`.
    ///
    /// Used after all merge jobs are submitted: terminal resolution is the
    /// poller's responsibility and no worker needs to hold the task.
    pub async fn release_lease(&self, id: TaskId, worker_id: &str) -> StoreResult<()> {
        with_db_retry(&self.retry, "release_lease", || async {
            sqlx::query(
                r#"UPDATE tloom_tasks
                SET lease_worker_id = NULL, lease_expires_at = NULL, updated_at = ?1
                WHERE id = ?2 AND lease_worker_id = ?3"#,
            )
            .bind(Utc::now())
            .bind(id)
            .bind(worker_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Return expired-lease tasks to `pending`, bumping their reclaim
    /// counter. Returns the reclaimed tasks.
    pub async fn reclaim_expired_leases(&self, now: DateTime<Utc>) -> StoreResult<Vec<Task>> {
        let reclaimed = with_db_retry(&self.retry, "reclaim_expired_leases", || async {
            let tasks = sqlx::query_as::<_, Task>(
                r#"UPDATE tloom_tasks SET
                    status = 'pending',
                    lease_worker_id = NULL,
                    lease_expires_at = NULL,
                    reclaim_count = reclaim_count + 1,
                    updated_at = ?1
                WHERE status = 'processing'
                  AND lease_expires_at IS NOT NULL
                  AND lease_expires_at < ?1
                RETURNING *"#,
            )
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
            Ok(tasks)
        })
        .await?;

        if !reclaimed.is_empty() {
            counter!("tloom_leases_reclaimed_total").increment(reclaimed.len() as u64);
        }
        Ok(reclaimed)
    }

    /// Fail pending tasks that have been reclaimed more times than the
    /// retry budget allows. Returns the failed tasks.
    pub async fn fail_retry_exhausted(
        &self,
        retry_budget: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Task>> {
        with_db_retry(&self.retry, "fail_retry_exhausted", || async {
            let tasks = sqlx::query_as::<_, Task>(
                r#"UPDATE tloom_tasks SET
                    status = 'failed',
                    error_message = 'exceeded retry budget',
                    completed_at = ?1,
                    updated_at = ?1
                WHERE status = 'pending' AND reclaim_count > ?2
                RETURNING *"#,
            )
            .bind(now)
            .bind(retry_budget)
            .fetch_all(&self.pool)
            .await?;
            Ok(tasks)
        })
        .await
    }

    /// Record a user cancel request.
    pub async fn request_cancel(&self, id: TaskId) -> StoreResult<CancelOutcome> {
        with_db_retry(&self.retry, "request_cancel", || async {
            let mut tx = self.pool.begin().await?;

            let Some(task) =
                sqlx::query_as::<_, Task>("SELECT * FROM tloom_tasks WHERE id = ?1")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?
            else {
                return Ok(CancelOutcome::NotFound);
            };

            if task.status.is_terminal() {
                return Ok(CancelOutcome::NoopTerminal);
            }

            let now = Utc::now();
            match task.status {
                TaskStatus::Pending => {
                    sqlx::query(
                        r#"UPDATE tloom_tasks SET
                            status = 'cancelled', completed_at = ?1, updated_at = ?1
                        WHERE id = ?2"#,
                    )
                    .bind(now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                }
                _ => {
                    sqlx::query(
                        "UPDATE tloom_tasks SET cancel_requested = 1, updated_at = ?1 WHERE id = ?2",
                    )
                    .bind(now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                }
            }

            tx.commit().await?;
            Ok(CancelOutcome::Accepted)
        })
        .await
    }

    /// Reset a failed task back to pending, discarding its children.
    pub async fn retry_task(&self, id: TaskId) -> StoreResult<RetryOutcome> {
        with_db_retry(&self.retry, "retry_task", || async {
            let mut tx = self.pool.begin().await?;

            let Some(task) =
                sqlx::query_as::<_, Task>("SELECT * FROM tloom_tasks WHERE id = ?1")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?
            else {
                return Ok(RetryOutcome::NotFound);
            };

            if task.status != TaskStatus::Failed {
                return Ok(RetryOutcome::RejectedNonterminal);
            }

            sqlx::query("DELETE FROM tloom_sub_video_tasks WHERE parent_task_id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                r#"UPDATE tloom_tasks SET
                    status = 'pending', progress = 0, current_stage = NULL,
                    stage_message = NULL, error_message = NULL, video_url = NULL,
                    thumbnail_url = NULL, video_duration_ms = NULL, started_at = NULL,
                    completed_at = NULL, cancel_requested = 0, reclaim_count = 0,
                    lease_worker_id = NULL, lease_expires_at = NULL, updated_at = ?1
                WHERE id = ?2"#,
            )
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            info!(task_id = %id, "Reset failed task to pending");
            Ok(RetryOutcome::Accepted)
        })
        .await
    }

    /// Processing tasks whose row has not moved since `cutoff`.
    pub async fn list_stuck_tasks(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Task>> {
        with_db_retry(&self.retry, "list_stuck_tasks", || async {
            let tasks = sqlx::query_as::<_, Task>(
                r#"SELECT * FROM tloom_tasks
                WHERE status = 'processing' AND updated_at < ?1
                ORDER BY updated_at ASC"#,
            )
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
            Ok(tasks)
        })
        .await
    }

    /// Terminal tasks older than the retention cutoff.
    pub async fn list_expired_tasks(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Task>> {
        with_db_retry(&self.retry, "list_expired_tasks", || async {
            let tasks = sqlx::query_as::<_, Task>(
                r#"SELECT * FROM tloom_tasks
                WHERE status IN ('completed', 'failed', 'cancelled', 'partial_success')
                  AND completed_at IS NOT NULL AND completed_at < ?1"#,
            )
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
            Ok(tasks)
        })
        .await
    }

    /// Remove a task and all dependent rows.
    pub async fn purge_task(&self, id: TaskId) -> StoreResult<()> {
        with_db_retry(&self.retry, "purge_task", || async {
            sqlx::query("DELETE FROM tloom_tasks WHERE id = ?1")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }
}
