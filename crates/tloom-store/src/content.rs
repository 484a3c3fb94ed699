//! Append-only content rows: media items, analyses, scripts.

use chrono::Utc;
use sqlx::types::Json;
use uuid::Uuid;

use tloom_models::{
    AnalysisStatus, MaterialAnalysis, MediaItem, MediaType, ScriptContent, SubTaskId, TaskId,
};

use crate::client::Store;
use crate::error::StoreResult;
use crate::retry::{map_constraint_to_corruption, with_db_retry};

/// Fields of a media item produced by the fetch stage.
#[derive(Debug, Clone)]
pub struct NewMediaItem {
    pub local_path: String,
    pub remote_url: String,
    pub media_type: MediaType,
    pub file_size: i64,
    pub mime_type: String,
    pub resolution: Option<String>,
    pub duration_ms: Option<i64>,
}

/// Fields of an analysis produced by the analysis stage.
#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub description: String,
    pub tags: Vec<String>,
    pub theme: Option<String>,
    pub status: AnalysisStatus,
    pub quality_score: Option<f32>,
}

impl Store {
    /// Insert a media item, or return the existing row for the same
    /// `(task_id, original_url)`. Re-running the fetch stage never
    /// double-creates items.
    pub async fn upsert_media_item(
        &self,
        task_id: TaskId,
        original_url: &str,
        fields: &NewMediaItem,
    ) -> StoreResult<MediaItem> {
        with_db_retry(&self.retry, "upsert_media_item", || async {
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                r#"INSERT INTO tloom_media_items (
                    id, task_id, original_url, local_path, remote_url, media_type,
                    file_size, mime_type, resolution, duration_ms, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT (task_id, original_url) DO NOTHING"#,
            )
            .bind(Uuid::new_v4())
            .bind(task_id)
            .bind(original_url)
            .bind(&fields.local_path)
            .bind(&fields.remote_url)
            .bind(fields.media_type)
            .bind(fields.file_size)
            .bind(&fields.mime_type)
            .bind(&fields.resolution)
            .bind(fields.duration_ms)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_constraint_to_corruption(e, "upsert_media_item"))?;

            let item = sqlx::query_as::<_, MediaItem>(
                "SELECT * FROM tloom_media_items WHERE task_id = ?1 AND original_url = ?2",
            )
            .bind(task_id)
            .bind(original_url)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(item)
        })
        .await
    }

    /// All media items fetched for a task.
    pub async fn media_items_for_task(&self, task_id: TaskId) -> StoreResult<Vec<MediaItem>> {
        with_db_retry(&self.retry, "media_items_for_task", || async {
            let items = sqlx::query_as::<_, MediaItem>(
                "SELECT * FROM tloom_media_items WHERE task_id = ?1 ORDER BY created_at ASC",
            )
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(items)
        })
        .await
    }

    /// Insert an analysis for a media item, or return the existing one.
    /// At most one analysis per media item.
    pub async fn insert_analysis(
        &self,
        task_id: TaskId,
        media_item_id: Uuid,
        fields: &NewAnalysis,
    ) -> StoreResult<MaterialAnalysis> {
        with_db_retry(&self.retry, "insert_analysis", || async {
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                r#"INSERT INTO tloom_material_analyses (
                    id, task_id, media_item_id, description, tags, theme,
                    status, quality_score, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT (media_item_id) DO NOTHING"#,
            )
            .bind(Uuid::new_v4())
            .bind(task_id)
            .bind(media_item_id)
            .bind(&fields.description)
            .bind(Json(fields.tags.clone()))
            .bind(&fields.theme)
            .bind(fields.status)
            .bind(fields.quality_score)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_constraint_to_corruption(e, "insert_analysis"))?;

            let analysis = sqlx::query_as::<_, MaterialAnalysis>(
                "SELECT * FROM tloom_material_analyses WHERE media_item_id = ?1",
            )
            .bind(media_item_id)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(analysis)
        })
        .await
    }

    /// All analyses for a task.
    pub async fn analyses_for_task(&self, task_id: TaskId) -> StoreResult<Vec<MaterialAnalysis>> {
        with_db_retry(&self.retry, "analyses_for_task", || async {
            let analyses = sqlx::query_as::<_, MaterialAnalysis>(
                "SELECT * FROM tloom_material_analyses WHERE task_id = ?1 ORDER BY created_at ASC",
            )
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(analyses)
        })
        .await
    }

    /// Insert a script row, or return the existing one for the sub-task.
    pub async fn insert_script(&self, script: &ScriptContent) -> StoreResult<ScriptContent> {
        with_db_retry(&self.retry, "insert_script", || async {
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                r#"INSERT INTO tloom_script_contents (
                    id, sub_task_id, style, titles, word_count, scene_count,
                    estimated_duration_s, scenes, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT (sub_task_id) DO NOTHING"#,
            )
            .bind(script.id)
            .bind(script.sub_task_id)
            .bind(&script.style)
            .bind(&script.titles)
            .bind(script.word_count)
            .bind(script.scene_count)
            .bind(script.estimated_duration_s)
            .bind(&script.scenes)
            .bind(script.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_constraint_to_corruption(e, "insert_script"))?;

            let stored = sqlx::query_as::<_, ScriptContent>(
                "SELECT * FROM tloom_script_contents WHERE sub_task_id = ?1",
            )
            .bind(script.sub_task_id)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(stored)
        })
        .await
    }

    /// The script generated for a sub-task, if any.
    pub async fn script_for_sub_task(
        &self,
        sub_task_id: SubTaskId,
    ) -> StoreResult<Option<ScriptContent>> {
        with_db_retry(&self.retry, "script_for_sub_task", || async {
            let script = sqlx::query_as::<_, ScriptContent>(
                "SELECT * FROM tloom_script_contents WHERE sub_task_id = ?1",
            )
            .bind(sub_task_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(script)
        })
        .await
    }

}
