//! Core operations exposed to the surrounding API layer.
//!
//! Thin wrappers over the store: creation validates against the
//! configured variant ceiling, reads bundle the children in, cancel and
//! retry delegate to the store's own state checks.

use tloom_models::{CreateTaskSpec, SubVideoTask, Task, TaskId};
use tloom_store::{CancelOutcome, RetryOutcome, Store, StoreError, StoreResult};

use crate::config::OrchestratorConfig;

/// A task together with its children, as returned to API readers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskSnapshot {
    pub task: Task,
    pub children: Vec<SubVideoTask>,
}

/// Validate a spec and persist the new task as pending.
pub async fn create_task(
    store: &Store,
    config: &OrchestratorConfig,
    spec: &CreateTaskSpec,
) -> StoreResult<Task> {
    if spec.variant_count > config.variant_count_max {
        return Err(StoreError::invalid_spec(format!(
            "variant_count {} exceeds configured maximum {}",
            spec.variant_count, config.variant_count_max
        )));
    }
    store.create_task(spec, &config.workspace_root).await
}

/// Read a task snapshot, optionally including its children.
pub async fn get_task(
    store: &Store,
    id: TaskId,
    include_children: bool,
) -> StoreResult<Option<TaskSnapshot>> {
    let Some(task) = store.get_task(id).await? else {
        return Ok(None);
    };
    let children = if include_children {
        store.children_of(id).await?
    } else {
        Vec::new()
    };
    Ok(Some(TaskSnapshot { task, children }))
}

/// Request cancellation of a task.
pub async fn cancel_task(store: &Store, id: TaskId) -> StoreResult<CancelOutcome> {
    store.request_cancel(id).await
}

/// Reset a failed task back to pending, discarding its children.
pub async fn retry_task(store: &Store, id: TaskId) -> StoreResult<RetryOutcome> {
    store.retry_task(id).await
}
