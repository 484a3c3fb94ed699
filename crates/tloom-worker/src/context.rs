//! Shared context for the orchestration services.

use std::sync::Arc;

use tloom_ports::{
    MediaAnalyzer, MediaFetcher, ScriptGenerator, SubtitleRenderer, Uploader, VideoMergePoller,
    VideoMergeSubmitter,
};
use tloom_store::Store;

use crate::clock::{Clock, SystemClock};
use crate::config::OrchestratorConfig;

/// Everything a dispatcher worker, the poller, and housekeeping need:
/// the store, the collaborator ports, the clock, and frozen config.
#[derive(Clone)]
pub struct WorkerContext {
    pub config: OrchestratorConfig,
    pub store: Store,
    pub clock: Arc<dyn Clock>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub analyzer: Arc<dyn MediaAnalyzer>,
    pub script_generator: Arc<dyn ScriptGenerator>,
    pub merge_submitter: Arc<dyn VideoMergeSubmitter>,
    pub merge_poller: Arc<dyn VideoMergePoller>,
    pub subtitle_renderer: Arc<dyn SubtitleRenderer>,
    pub uploader: Arc<dyn Uploader>,
}

/// Builder for [`WorkerContext`]; the embedding service supplies real
/// port implementations, tests supply fakes.
pub struct WorkerContextBuilder {
    config: OrchestratorConfig,
    store: Store,
    clock: Arc<dyn Clock>,
    fetcher: Option<Arc<dyn MediaFetcher>>,
    analyzer: Option<Arc<dyn MediaAnalyzer>>,
    script_generator: Option<Arc<dyn ScriptGenerator>>,
    merge_submitter: Option<Arc<dyn VideoMergeSubmitter>>,
    merge_poller: Option<Arc<dyn VideoMergePoller>>,
    subtitle_renderer: Option<Arc<dyn SubtitleRenderer>>,
    uploader: Option<Arc<dyn Uploader>>,
}

impl WorkerContext {
    /// Start building a context over a store and config.
    pub fn builder(config: OrchestratorConfig, store: Store) -> WorkerContextBuilder {
        WorkerContextBuilder {
            config,
            store,
            clock: Arc::new(SystemClock),
            fetcher: None,
            analyzer: None,
            script_generator: None,
            merge_submitter: None,
            merge_poller: None,
            subtitle_renderer: None,
            uploader: None,
        }
    }
}

impl WorkerContextBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn MediaFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn analyzer(mut self, analyzer: Arc<dyn MediaAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn script_generator(mut self, script_generator: Arc<dyn ScriptGenerator>) -> Self {
        self.script_generator = Some(script_generator);
        self
    }

    pub fn merge_submitter(mut self, merge_submitter: Arc<dyn VideoMergeSubmitter>) -> Self {
        self.merge_submitter = Some(merge_submitter);
        self
    }

    pub fn merge_poller(mut self, merge_poller: Arc<dyn VideoMergePoller>) -> Self {
        self.merge_poller = Some(merge_poller);
        self
    }

    pub fn subtitle_renderer(mut self, subtitle_renderer: Arc<dyn SubtitleRenderer>) -> Self {
        self.subtitle_renderer = Some(subtitle_renderer);
        self
    }

    pub fn uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Finish the build; panics if a port is missing, which is a wiring
    /// bug in the embedding service, not a runtime condition.
    pub fn build(self) -> WorkerContext {
        WorkerContext {
            config: self.config,
            store: self.store,
            clock: self.clock,
            fetcher: self.fetcher.expect("MediaFetcher not configured"),
            analyzer: self.analyzer.expect("MediaAnalyzer not configured"),
            script_generator: self
                .script_generator
                .expect("ScriptGenerator not configured"),
            merge_submitter: self
                .merge_submitter
                .expect("VideoMergeSubmitter not configured"),
            merge_poller: self.merge_poller.expect("VideoMergePoller not configured"),
            subtitle_renderer: self
                .subtitle_renderer
                .expect("SubtitleRenderer not configured"),
            uploader: self.uploader.expect("Uploader not configured"),
        }
    }
}
