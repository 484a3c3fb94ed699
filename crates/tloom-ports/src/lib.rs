//! Collaborator ports for the TextLoom orchestration core.
//!
//! The core never talks to the outside world directly: media download,
//! AI analysis, script generation, video merging, subtitle rendering and
//! object storage are all reached through the traits in this crate. Real
//! implementations live with the embedding service; the `mocks` feature
//! generates mockall doubles for tests.

pub mod analyzer;
pub mod error;
pub mod fetcher;
pub mod merge;
pub mod script;
pub mod subtitle;
pub mod uploader;

pub use analyzer::{AnalysisOutput, MediaAnalyzer};
pub use error::{PortError, PortResult};
pub use fetcher::{FetchedMedia, MediaFetcher};
pub use merge::{MergeOutput, MergeStatus, VideoMergePoller, VideoMergeSubmitter};
pub use script::{ScriptGenerator, ScriptOutput};
pub use subtitle::SubtitleRenderer;
pub use uploader::{Uploader, UploaderKind};

#[cfg(feature = "mocks")]
pub use analyzer::MockMediaAnalyzer;
#[cfg(feature = "mocks")]
pub use fetcher::MockMediaFetcher;
#[cfg(feature = "mocks")]
pub use merge::{MockVideoMergePoller, MockVideoMergeSubmitter};
#[cfg(feature = "mocks")]
pub use script::MockScriptGenerator;
#[cfg(feature = "mocks")]
pub use subtitle::MockSubtitleRenderer;
#[cfg(feature = "mocks")]
pub use uploader::MockUploader;
