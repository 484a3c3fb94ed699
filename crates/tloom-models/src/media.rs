//! Downloaded input assets.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::task::TaskId;

/// Kind of source asset.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "media_type", rename_all = "snake_case")]
pub enum MediaType {
    Markdown,
    Image,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Markdown => "markdown",
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }

    /// Best-effort classification from a MIME type.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.to_ascii_lowercase();
        if mime.starts_with("image/") {
            Some(MediaType::Image)
        } else if mime.starts_with("video/") {
            Some(MediaType::Video)
        } else if mime.starts_with("text/") || mime.contains("markdown") {
            Some(MediaType::Markdown)
        } else {
            None
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One downloaded input asset. Append-only: rows are written once by the
/// material-processing stage and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MediaItem {
    /// Unique media item ID
    pub id: Uuid,

    /// Owning task
    pub task_id: TaskId,

    /// Source URL as supplied by the user; unique per task
    pub original_url: String,

    /// Path inside the task workspace directory
    pub local_path: String,

    /// URL after upload to object storage
    pub remote_url: String,

    /// Asset kind
    pub media_type: MediaType,

    /// Size on disk in bytes
    pub file_size: i64,

    /// MIME type reported by the fetcher
    pub mime_type: String,

    /// "WxH" for images/videos
    pub resolution: Option<String>,

    /// Duration for videos
    pub duration_ms: Option<i64>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}
