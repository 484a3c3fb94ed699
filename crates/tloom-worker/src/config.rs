//! Orchestrator configuration.
//!
//! Frozen at startup and passed by value; nothing in the core mutates
//! configuration at runtime.

use std::time::Duration;

/// What a subtitle render failure does to an otherwise finished variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubtitleFailureMode {
    /// Keep the raw video, mark the child completed with a warning note.
    #[default]
    Degrade,
    /// Fail the child.
    Fail,
}

impl SubtitleFailureMode {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "degrade" => Some(Self::Degrade),
            "fail" => Some(Self::Fail),
            _ => None,
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on variants per task
    pub variant_count_max: u32,
    /// Concurrent script generations per task
    pub stage4_parallelism: usize,
    /// Concurrent merge submissions per task
    pub stage5_parallelism: usize,
    /// Concurrent media analyses per task
    pub analysis_parallelism: usize,
    /// Poller cycle interval
    pub poll_interval: Duration,
    /// Max sub-tasks reconciled per poll cycle
    pub poll_batch_size: u32,
    /// Wall-clock budget for an external merge job
    pub video_merge_timeout: Duration,
    /// Consecutive poll failures before a child is failed as unreachable
    pub poll_failure_limit: u32,
    /// Task lease TTL; refreshed at a third of this
    pub lease_ttl: Duration,
    /// Max lease reclaims before a task is failed
    pub retry_budget: u32,
    /// Subtitle failure handling
    pub subtitle_failure_mode: SubtitleFailureMode,
    /// Per-collaborator-call timeout
    pub collaborator_timeout: Duration,
    /// Root of per-task workspace directories
    pub workspace_root: String,
    /// Sleep between empty claim attempts
    pub claim_idle_sleep: Duration,
    /// Housekeeping cycle interval
    pub housekeeping_interval: Duration,
    /// Processing tasks silent for longer than this are logged as stuck
    pub stuck_threshold: Duration,
    /// Terminal tasks older than this are scrubbed
    pub retention: Duration,
    /// Styles rotated through variants 2..N
    pub script_style_rotation: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            variant_count_max: 5,
            stage4_parallelism: 3,
            stage5_parallelism: 3,
            analysis_parallelism: 4,
            poll_interval: Duration::from_secs(60),
            poll_batch_size: 50,
            video_merge_timeout: Duration::from_secs(1800),
            poll_failure_limit: 5,
            lease_ttl: Duration::from_secs(300),
            retry_budget: 3,
            subtitle_failure_mode: SubtitleFailureMode::Degrade,
            collaborator_timeout: Duration::from_secs(120),
            workspace_root: "/tmp/tloom".to_string(),
            claim_idle_sleep: Duration::from_millis(500),
            housekeeping_interval: Duration::from_secs(60),
            stuck_threshold: Duration::from_secs(900),
            retention: Duration::from_secs(7 * 24 * 3600),
            script_style_rotation: vec![
                "default".to_string(),
                "energetic".to_string(),
                "calm".to_string(),
                "humorous".to_string(),
                "dramatic".to_string(),
            ],
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl OrchestratorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            variant_count_max: env_u64("TLOOM_VARIANT_COUNT_MAX", 5) as u32,
            stage4_parallelism: env_usize("TLOOM_STAGE4_PARALLELISM", 3),
            stage5_parallelism: env_usize("TLOOM_STAGE5_PARALLELISM", 3),
            analysis_parallelism: env_usize("TLOOM_ANALYSIS_PARALLELISM", 4),
            poll_interval: Duration::from_secs(env_u64("TLOOM_POLL_INTERVAL_SECS", 60)),
            poll_batch_size: env_u64("TLOOM_POLL_BATCH_SIZE", 50) as u32,
            video_merge_timeout: Duration::from_secs(env_u64(
                "TLOOM_VIDEO_MERGE_TIMEOUT_SECS",
                1800,
            )),
            poll_failure_limit: env_u64("TLOOM_POLL_FAILURE_LIMIT", 5) as u32,
            lease_ttl: Duration::from_secs(env_u64("TLOOM_LEASE_TTL_SECS", 300)),
            retry_budget: env_u64("TLOOM_RETRY_BUDGET", 3) as u32,
            subtitle_failure_mode: std::env::var("TLOOM_SUBTITLE_FAILURE_MODE")
                .ok()
                .and_then(|s| SubtitleFailureMode::parse(&s))
                .unwrap_or_default(),
            collaborator_timeout: Duration::from_secs(env_u64(
                "TLOOM_COLLABORATOR_TIMEOUT_SECS",
                120,
            )),
            workspace_root: std::env::var("TLOOM_WORKSPACE_ROOT")
                .unwrap_or_else(|_| "/tmp/tloom".to_string()),
            claim_idle_sleep: Duration::from_millis(env_u64("TLOOM_CLAIM_IDLE_SLEEP_MS", 500)),
            housekeeping_interval: Duration::from_secs(env_u64(
                "TLOOM_HOUSEKEEPING_INTERVAL_SECS",
                60,
            )),
            stuck_threshold: Duration::from_secs(env_u64("TLOOM_STUCK_THRESHOLD_SECS", 900)),
            retention: Duration::from_secs(env_u64("TLOOM_RETENTION_SECS", 7 * 24 * 3600)),
            script_style_rotation: defaults.script_style_rotation,
        }
    }

    /// Script style for a given 1-based variant index.
    ///
    /// Variant 1 uses the task default; later variants rotate through the
    /// configured style list, skipping styles equal to the default so two
    /// variants don't collide on it.
    pub fn style_for_variant(&self, variant_index: u32, default_style: &str) -> String {
        if variant_index <= 1 || self.script_style_rotation.is_empty() {
            return default_style.to_string();
        }

        let rotation: Vec<&String> = self
            .script_style_rotation
            .iter()
            .filter(|s| s.as_str() != default_style)
            .collect();
        if rotation.is_empty() {
            return default_style.to_string();
        }
        rotation[(variant_index as usize - 2) % rotation.len()].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.variant_count_max, 5);
        assert_eq!(config.stage4_parallelism, 3);
        assert_eq!(config.analysis_parallelism, 4);
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.video_merge_timeout, Duration::from_secs(1800));
        assert_eq!(config.lease_ttl, Duration::from_secs(300));
        assert_eq!(config.retry_budget, 3);
        assert_eq!(config.subtitle_failure_mode, SubtitleFailureMode::Degrade);
    }

    #[test]
    fn test_style_rotation() {
        let config = OrchestratorConfig::default();

        assert_eq!(config.style_for_variant(1, "custom"), "custom");
        // Variant 2 takes the first rotation style that isn't the default
        assert_eq!(config.style_for_variant(2, "default"), "energetic");
        assert_eq!(config.style_for_variant(3, "default"), "calm");
        // Rotation wraps
        assert_eq!(config.style_for_variant(6, "default"), "energetic");
    }

    #[test]
    fn test_subtitle_mode_parse() {
        assert_eq!(
            SubtitleFailureMode::parse("degrade"),
            Some(SubtitleFailureMode::Degrade)
        );
        assert_eq!(
            SubtitleFailureMode::parse("fail"),
            Some(SubtitleFailureMode::Fail)
        );
        assert_eq!(SubtitleFailureMode::parse("other"), None);
    }
}
