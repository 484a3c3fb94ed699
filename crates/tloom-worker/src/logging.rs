//! Structured logging for stage runs.
//!
//! A stage run logs against a fixed (task, stage) context; the fan-out
//! stages narrow it per variant so interleaved children of one task stay
//! greppable by sub-task id.

use std::fmt;

use tracing::{info, warn};

use tloom_models::{Stage, SubVideoTask, TaskId};

/// Log context for one stage run of one task.
#[derive(Debug, Clone, Copy)]
pub struct StageLog {
    task_id: TaskId,
    stage: Stage,
}

impl StageLog {
    pub fn new(task_id: TaskId, stage: Stage) -> Self {
        Self { task_id, stage }
    }

    /// Stage boundary line: what the runner is about to do, or what it
    /// ended up doing ("fetching 0/3", "2/3 scripts ready").
    pub fn checkpoint(&self, detail: impl fmt::Display) {
        info!(task_id = %self.task_id, stage = %self.stage, "{detail}");
    }

    /// One input (source URL, media item) dropped out without failing
    /// the stage.
    pub fn item_failed(&self, item: impl fmt::Display, err: impl fmt::Display) {
        warn!(
            task_id = %self.task_id,
            stage = %self.stage,
            item = %item,
            "input dropped: {err}"
        );
    }

    /// Narrow the context to one variant of the fan-out.
    pub fn variant(&self, child: &SubVideoTask) -> VariantLog {
        VariantLog {
            stage: *self,
            sub_task_id: child.id.to_string(),
            variant_index: child.variant_index,
        }
    }
}

/// Stage log narrowed to a single variant.
#[derive(Debug, Clone)]
pub struct VariantLog {
    stage: StageLog,
    sub_task_id: String,
    variant_index: u32,
}

impl VariantLog {
    /// The variant dropped out of the pipeline (script generation or
    /// merge submission failed); its siblings carry on.
    pub fn failed(&self, err: impl fmt::Display) {
        warn!(
            task_id = %self.stage.task_id,
            stage = %self.stage.stage,
            sub_task_id = %self.sub_task_id,
            variant = self.variant_index,
            "variant failed: {err}"
        );
    }
}
