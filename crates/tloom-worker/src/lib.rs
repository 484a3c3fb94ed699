//! TextLoom orchestration worker.
//!
//! Binds the pieces of the pipeline together: the dispatcher claims
//! pending tasks and runs the five stage runners in order, the merge
//! reconciler completes submitted videos by polling the external
//! service, and the housekeeper reclaims leases and scrubs expired
//! tasks. The embedding service constructs a [`WorkerContext`] with real
//! collaborator ports and hands it to an [`Orchestrator`].

pub mod aggregate;
pub mod clock;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod housekeeping;
pub mod logging;
pub mod ops;
pub mod poller;
pub mod retry;
pub mod runtime;
pub mod stages;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{OrchestratorConfig, SubtitleFailureMode};
pub use context::{WorkerContext, WorkerContextBuilder};
pub use dispatcher::Dispatcher;
pub use error::{WorkerError, WorkerResult};
pub use housekeeping::{Housekeeper, HousekeepingStats};
pub use ops::TaskSnapshot;
pub use poller::{MergeReconciler, PollStats};
pub use runtime::Orchestrator;
pub use stages::StageOutcome;
