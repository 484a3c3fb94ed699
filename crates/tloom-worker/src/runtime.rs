//! Runtime harness: owns the dispatcher workers, the merge reconciler,
//! and the housekeeper, and coordinates graceful shutdown.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::context::WorkerContext;
use crate::dispatcher::Dispatcher;
use crate::error::WorkerResult;
use crate::housekeeping::Housekeeper;
use crate::poller::MergeReconciler;

/// The orchestration core as a runnable service.
pub struct Orchestrator {
    ctx: WorkerContext,
    num_workers: usize,
    shutdown: watch::Sender<bool>,
}

impl Orchestrator {
    /// Create an orchestrator with `num_workers` dispatcher workers.
    pub fn new(ctx: WorkerContext, num_workers: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            ctx,
            num_workers: num_workers.max(1),
            shutdown,
        }
    }

    /// Run all services until [`Orchestrator::shutdown`] is called.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(workers = self.num_workers, "Starting orchestrator");

        let mut handles = Vec::new();

        for _ in 0..self.num_workers {
            let dispatcher = Dispatcher::new(self.ctx.clone());
            let rx = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                dispatcher.run(rx).await;
            }));
        }

        let reconciler = Arc::new(MergeReconciler::new(self.ctx.clone()));
        {
            let reconciler = Arc::clone(&reconciler);
            let rx = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                reconciler.run(rx).await;
            }));
        }

        let housekeeper = Housekeeper::new(self.ctx.clone());
        let rx = self.shutdown.subscribe();
        handles.push(tokio::spawn(async move {
            housekeeper.run(rx).await;
        }));

        for handle in handles {
            handle.await.ok();
        }

        info!("Orchestrator stopped");
        Ok(())
    }

    /// Signal shutdown; `run` drains and returns.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
