//! Script generation port.

use async_trait::async_trait;
#[cfg(feature = "mocks")]
use mockall::automock;
use serde_json::Value;

use tloom_models::{MaterialAnalysis, ScriptScene, Task};

/// A generated script plus the opaque payload the merge service expects.
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    /// Candidate titles, best first
    pub titles: Vec<String>,
    /// Ordered scenes
    pub scenes: Vec<ScriptScene>,
    /// Pass-through merge payload; the core never inspects it
    pub payload: Value,
}

/// Generates one script for a variant from the task and its analyses.
#[cfg_attr(feature = "mocks", automock)]
#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    async fn generate(
        &self,
        task: &Task,
        analyses: &[MaterialAnalysis],
        style: &str,
    ) -> crate::error::PortResult<ScriptOutput>;
}
