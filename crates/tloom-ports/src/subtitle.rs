//! Dynamic subtitle rendering port.

use async_trait::async_trait;
#[cfg(feature = "mocks")]
use mockall::automock;

use tloom_models::SubVideoTask;

use crate::error::PortResult;

/// Burns dynamic subtitles into a finished variant video.
///
/// May be long-running; the poller invokes it out-of-band after the merge
/// job succeeds. A failure is downgraded or escalated according to the
/// configured subtitle failure mode.
#[cfg_attr(feature = "mocks", automock)]
#[async_trait]
pub trait SubtitleRenderer: Send + Sync {
    async fn render(&self, sub_task: &SubVideoTask) -> PortResult<()>;
}
