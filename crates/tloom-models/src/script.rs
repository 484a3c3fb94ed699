//! Generated script contents.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use crate::sub_task::SubTaskId;

/// One scene of a generated script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScriptScene {
    /// Narration text
    pub text: String,

    /// Target scene duration in seconds
    pub duration_s: f32,

    /// Media items shown during this scene
    pub media_item_ids: Vec<Uuid>,
}

impl ScriptScene {
    /// Whitespace-separated word count of the narration.
    pub fn word_count(&self) -> u32 {
        self.text.split_whitespace().count() as u32
    }
}

/// One script row per sub-task. Append-only: written once by the
/// script-generation stage.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScriptContent {
    /// Unique script ID
    pub id: Uuid,

    /// Owning sub-task; unique
    pub sub_task_id: SubTaskId,

    /// Script style this was generated with
    pub style: String,

    /// Candidate titles, best first
    pub titles: Json<Vec<String>>,

    /// Total narration word count
    pub word_count: u32,

    /// Number of scenes
    pub scene_count: u32,

    /// Estimated total duration in seconds
    pub estimated_duration_s: f32,

    /// Ordered scenes
    pub scenes: Json<Vec<ScriptScene>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl ScriptContent {
    /// Build a script row from generated scenes, deriving the counters.
    pub fn from_scenes(
        sub_task_id: SubTaskId,
        style: impl Into<String>,
        titles: Vec<String>,
        scenes: Vec<ScriptScene>,
    ) -> Self {
        let word_count = scenes.iter().map(ScriptScene::word_count).sum();
        let scene_count = scenes.len() as u32;
        let estimated_duration_s = scenes.iter().map(|s| s.duration_s).sum();

        Self {
            id: Uuid::new_v4(),
            sub_task_id,
            style: style.into(),
            titles: Json(titles),
            word_count,
            scene_count,
            estimated_duration_s,
            scenes: Json(scenes),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(text: &str, duration_s: f32) -> ScriptScene {
        ScriptScene {
            text: text.into(),
            duration_s,
            media_item_ids: vec![],
        }
    }

    #[test]
    fn test_derived_counters() {
        let script = ScriptContent::from_scenes(
            SubTaskId::new(),
            "default",
            vec!["Title A".into()],
            vec![scene("one two three", 4.0), scene("four five", 6.5)],
        );

        assert_eq!(script.word_count, 5);
        assert_eq!(script.scene_count, 2);
        assert!((script.estimated_duration_s - 10.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_empty_script() {
        let script = ScriptContent::from_scenes(SubTaskId::new(), "default", vec![], vec![]);
        assert_eq!(script.word_count, 0);
        assert_eq!(script.scene_count, 0);
    }
}
