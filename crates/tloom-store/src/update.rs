//! Conditional updates enforcing the monotonicity invariants.
//!
//! Every mutation of a task or sub-task row goes through [`Store::apply_task_update`]
//! or [`Store::apply_sub_task_update`]. Inside one transaction the current
//! row is read, the patch is validated against the transition allowlist
//! and the monotone-progress rule, and only then written. Terminal rows
//! reject all writes as a silent no-op.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde_json::Value;
use sqlx::types::Json;
use uuid::Uuid;

use tloom_models::{Stage, SubStatus, SubTaskId, SubVideoTask, Task, TaskId, TaskStatus};

use crate::client::Store;
use crate::error::StoreResult;
use crate::retry::with_db_retry;

/// Result of a conditional update.
#[derive(Debug, Clone)]
pub enum ApplyOutcome<T> {
    /// Patch validated and written; carries the resulting row.
    Applied(T),
    /// Row is terminal; the write was silently dropped.
    NoopTerminal,
    /// Patch would move status off the allowlist or decrease progress.
    RejectedRegression,
    /// No such row.
    NotFound,
}

impl<T> ApplyOutcome<T> {
    /// True if the patch was written.
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied(_))
    }

    /// The resulting row, if the patch was written.
    pub fn applied(self) -> Option<T> {
        match self {
            ApplyOutcome::Applied(row) => Some(row),
            _ => None,
        }
    }
}

/// Field patch for a parent task.
///
/// Absent fields keep their current value. `completed_at` and the lease
/// columns are managed by the store: entering a terminal status stamps
/// `completed_at` and clears the lease.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub current_stage: Option<Stage>,
    pub stage_message: Option<String>,
    pub error_message: Option<String>,
    pub video_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub video_duration_ms: Option<i64>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.current_stage = Some(stage);
        self
    }

    pub fn with_stage_message(mut self, message: impl Into<String>) -> Self {
        self.stage_message = Some(message.into());
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_video(
        mut self,
        video_url: impl Into<String>,
        thumbnail_url: Option<String>,
        duration_ms: Option<i64>,
    ) -> Self {
        self.video_url = Some(video_url.into());
        self.thumbnail_url = thumbnail_url;
        self.video_duration_ms = duration_ms;
        self
    }

    /// Progress-only patch.
    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }
}

/// Field patch for a sub video task.
#[derive(Debug, Clone, Default)]
pub struct SubTaskPatch {
    pub status: Option<SubStatus>,
    pub progress: Option<u8>,
    pub script_id: Option<Uuid>,
    pub script_payload: Option<Value>,
    pub external_merge_id: Option<String>,
    pub video_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl SubTaskPatch {
    pub fn status(status: SubStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_script(mut self, script_id: Uuid, payload: Value) -> Self {
        self.script_id = Some(script_id);
        self.script_payload = Some(payload);
        self
    }

    pub fn with_merge_submission(
        mut self,
        external_merge_id: impl Into<String>,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        self.external_merge_id = Some(external_merge_id.into());
        self.submitted_at = Some(submitted_at);
        self
    }

    pub fn with_video(
        mut self,
        video_url: impl Into<String>,
        thumbnail_url: Option<String>,
        duration_ms: Option<i64>,
    ) -> Self {
        self.video_url = Some(video_url.into());
        self.thumbnail_url = thumbnail_url;
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

impl Store {
    /// Conditionally patch a parent task row.
    pub async fn apply_task_update(
        &self,
        id: TaskId,
        patch: &TaskPatch,
    ) -> StoreResult<ApplyOutcome<Task>> {
        let outcome = with_db_retry(&self.retry, "apply_task_update", || async {
            self.apply_task_update_once(id, patch).await
        })
        .await?;

        record_outcome("tasks", &outcome);
        Ok(outcome)
    }

    async fn apply_task_update_once(
        &self,
        id: TaskId,
        patch: &TaskPatch,
    ) -> StoreResult<ApplyOutcome<Task>> {
        let mut tx = self.pool.begin().await?;

        let Some(current) =
            sqlx::query_as::<_, Task>("SELECT * FROM tloom_tasks WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
        else {
            return Ok(ApplyOutcome::NotFound);
        };

        if current.status.is_terminal() {
            return Ok(ApplyOutcome::NoopTerminal);
        }

        if let Some(next) = patch.status {
            if !current.status.can_transition_to(next) {
                return Ok(ApplyOutcome::RejectedRegression);
            }
        }
        if let Some(p) = patch.progress {
            if p < current.progress {
                return Ok(ApplyOutcome::RejectedRegression);
            }
        }

        let now = Utc::now();
        let status = patch.status.unwrap_or(current.status);
        let entering_terminal = status.is_terminal();

        let mut updated = Task {
            status,
            progress: patch.progress.unwrap_or(current.progress),
            current_stage: patch.current_stage.or(current.current_stage),
            stage_message: patch.stage_message.clone().or(current.stage_message),
            error_message: patch.error_message.clone().or(current.error_message),
            video_url: patch.video_url.clone().or(current.video_url),
            thumbnail_url: patch.thumbnail_url.clone().or(current.thumbnail_url),
            video_duration_ms: patch.video_duration_ms.or(current.video_duration_ms),
            updated_at: now,
            ..current
        };
        if entering_terminal {
            updated.completed_at = updated.completed_at.or(Some(now));
            updated.lease_worker_id = None;
            updated.lease_expires_at = None;
        }

        sqlx::query(
            r#"UPDATE tloom_tasks SET
                status = ?1, progress = ?2, current_stage = ?3, stage_message = ?4,
                error_message = ?5, video_url = ?6, thumbnail_url = ?7,
                video_duration_ms = ?8, completed_at = ?9, lease_worker_id = ?10,
                lease_expires_at = ?11, updated_at = ?12
            WHERE id = ?13"#,
        )
        .bind(updated.status)
        .bind(updated.progress)
        .bind(updated.current_stage)
        .bind(&updated.stage_message)
        .bind(&updated.error_message)
        .bind(&updated.video_url)
        .bind(&updated.thumbnail_url)
        .bind(updated.video_duration_ms)
        .bind(updated.completed_at)
        .bind(&updated.lease_worker_id)
        .bind(updated.lease_expires_at)
        .bind(updated.updated_at)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ApplyOutcome::Applied(updated))
    }

    /// Conditionally patch a sub video task row.
    pub async fn apply_sub_task_update(
        &self,
        id: SubTaskId,
        patch: &SubTaskPatch,
    ) -> StoreResult<ApplyOutcome<SubVideoTask>> {
        let outcome = with_db_retry(&self.retry, "apply_sub_task_update", || async {
            self.apply_sub_task_update_once(id, patch).await
        })
        .await?;

        record_outcome("sub_video_tasks", &outcome);
        Ok(outcome)
    }

    async fn apply_sub_task_update_once(
        &self,
        id: SubTaskId,
        patch: &SubTaskPatch,
    ) -> StoreResult<ApplyOutcome<SubVideoTask>> {
        let mut tx = self.pool.begin().await?;

        let Some(current) = sqlx::query_as::<_, SubVideoTask>(
            "SELECT * FROM tloom_sub_video_tasks WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(ApplyOutcome::NotFound);
        };

        if current.status.is_terminal() {
            return Ok(ApplyOutcome::NoopTerminal);
        }

        if let Some(next) = patch.status {
            if !current.status.can_transition_to(next) {
                return Ok(ApplyOutcome::RejectedRegression);
            }
        }
        if let Some(p) = patch.progress {
            if p < current.progress {
                return Ok(ApplyOutcome::RejectedRegression);
            }
        }

        let now = Utc::now();
        let status = patch.status.unwrap_or(current.status);
        let entering_terminal = status.is_terminal();

        let mut updated = SubVideoTask {
            status,
            progress: patch.progress.unwrap_or(current.progress),
            script_id: patch.script_id.or(current.script_id),
            script_payload: patch
                .script_payload
                .clone()
                .map(Json)
                .or(current.script_payload),
            external_merge_id: patch
                .external_merge_id
                .clone()
                .or(current.external_merge_id),
            video_url: patch.video_url.clone().or(current.video_url),
            thumbnail_url: patch.thumbnail_url.clone().or(current.thumbnail_url),
            duration_ms: patch.duration_ms.or(current.duration_ms),
            error_message: patch.error_message.clone().or(current.error_message),
            submitted_at: patch.submitted_at.or(current.submitted_at),
            updated_at: now,
            ..current
        };
        if entering_terminal {
            updated.completed_at = updated.completed_at.or(Some(now));
        }

        sqlx::query(
            r#"UPDATE tloom_sub_video_tasks SET
                status = ?1, progress = ?2, script_id = ?3, script_payload = ?4,
                external_merge_id = ?5, video_url = ?6, thumbnail_url = ?7,
                duration_ms = ?8, error_message = ?9, submitted_at = ?10,
                completed_at = ?11, updated_at = ?12
            WHERE id = ?13"#,
        )
        .bind(updated.status)
        .bind(updated.progress)
        .bind(updated.script_id)
        .bind(&updated.script_payload)
        .bind(&updated.external_merge_id)
        .bind(&updated.video_url)
        .bind(&updated.thumbnail_url)
        .bind(updated.duration_ms)
        .bind(&updated.error_message)
        .bind(updated.submitted_at)
        .bind(updated.completed_at)
        .bind(updated.updated_at)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ApplyOutcome::Applied(updated))
    }
}

fn record_outcome<T>(table: &'static str, outcome: &ApplyOutcome<T>) {
    match outcome {
        ApplyOutcome::Applied(_) => {
            counter!("tloom_store_updates_applied_total", "table" => table).increment(1);
        }
        ApplyOutcome::NoopTerminal | ApplyOutcome::RejectedRegression => {
            counter!("tloom_store_updates_rejected_total", "table" => table).increment(1);
        }
        ApplyOutcome::NotFound => {}
    }
}
