//! Sub video task operations.

use chrono::Utc;
use tracing::info;

use tloom_models::{SubTaskId, SubVideoTask, Task};

use crate::client::Store;
use crate::error::StoreResult;
use crate::retry::{map_constraint_to_corruption, with_db_retry};

impl Store {
    /// Create one child per variant for a parent task.
    ///
    /// Idempotent on `(parent_task_id, variant_index)`: re-running after a
    /// crash keeps the existing rows and returns the full child set.
    /// `styles[i]` is the script style of variant `i + 1`.
    pub async fn create_sub_tasks(
        &self,
        parent: &Task,
        styles: &[String],
    ) -> StoreResult<Vec<SubVideoTask>> {
        debug_assert_eq!(styles.len(), parent.variant_count as usize);

        with_db_retry(&self.retry, "create_sub_tasks", || async {
            let mut tx = self.pool.begin().await?;
            let now = Utc::now();

            for (i, style) in styles.iter().enumerate() {
                sqlx::query(
                    r#"INSERT INTO tloom_sub_video_tasks (
                        id, parent_task_id, variant_index, script_style, status,
                        progress, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?5)
                    ON CONFLICT (parent_task_id, variant_index) DO NOTHING"#,
                )
                .bind(SubTaskId::new())
                .bind(parent.id)
                .bind((i + 1) as u32)
                .bind(style)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_constraint_to_corruption(e, "create_sub_tasks"))?;
            }

            let children = sqlx::query_as::<_, SubVideoTask>(
                r#"SELECT * FROM tloom_sub_video_tasks
                WHERE parent_task_id = ?1 ORDER BY variant_index ASC"#,
            )
            .bind(parent.id)
            .fetch_all(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(children)
        })
        .await
        .inspect(|children| {
            info!(task_id = %parent.id, count = children.len(), "Sub-tasks ready");
        })
    }

    /// Fetch a sub-task by ID.
    pub async fn get_sub_task(&self, id: SubTaskId) -> StoreResult<Option<SubVideoTask>> {
        with_db_retry(&self.retry, "get_sub_task", || async {
            let sub = sqlx::query_as::<_, SubVideoTask>(
                "SELECT * FROM tloom_sub_video_tasks WHERE id = ?1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(sub)
        })
        .await
    }

    /// All children of a parent, ordered by variant index.
    pub async fn children_of(
        &self,
        parent_id: tloom_models::TaskId,
    ) -> StoreResult<Vec<SubVideoTask>> {
        with_db_retry(&self.retry, "children_of", || async {
            let children = sqlx::query_as::<_, SubVideoTask>(
                r#"SELECT * FROM tloom_sub_video_tasks
                WHERE parent_task_id = ?1 ORDER BY variant_index ASC"#,
            )
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(children)
        })
        .await
    }

    /// Sub-tasks with an in-flight merge submission, oldest first.
    ///
    /// Includes `video_submitting` rows so the poller can see children
    /// orphaned by a crash between submit and the merge-ID write.
    pub async fn list_submitted_subtasks(&self, limit: u32) -> StoreResult<Vec<SubVideoTask>> {
        with_db_retry(&self.retry, "list_submitted_subtasks", || async {
            let subs = sqlx::query_as::<_, SubVideoTask>(
                r#"SELECT * FROM tloom_sub_video_tasks
                WHERE status IN ('video_processing', 'video_submitting')
                ORDER BY submitted_at IS NULL, submitted_at ASC
                LIMIT ?1"#,
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(subs)
        })
        .await
    }
}
