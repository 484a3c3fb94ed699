//! Transactional repository for the TextLoom orchestration core.
//!
//! The store is the only shared mutable state in the system: dispatchers,
//! the poller and housekeeping all coordinate exclusively through it. It
//! enforces the state-machine invariants itself — status transitions are
//! checked against an allowlist, progress never decreases, and terminal
//! rows accept no further writes.

mod client;
mod content;
mod error;
mod retry;
mod sub_tasks;
mod tasks;
mod update;

pub use client::Store;
pub use content::{NewAnalysis, NewMediaItem};
pub use error::{StoreError, StoreResult};
pub use retry::DbRetryConfig;
pub use tasks::{CancelOutcome, RetryOutcome};
pub use update::{ApplyOutcome, SubTaskPatch, TaskPatch};
