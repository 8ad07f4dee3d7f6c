//! Worker agents.
//!
//! Each agent registers itself, then pulls due jobs from a shared channel
//! and hands them to the coordinator one at a time. Agents stop when the
//! channel closes.

use crate::coordinator::Coordinator;
use crate::error::{CoordinatorError, WorkerError};
use crate::worker::{Worker, WorkerStatus};
use mixtape_scheduler::DueJob;
use rootcause::prelude::Report;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A running set of worker agents.
pub struct WorkerPool {
    workers: Vec<Worker>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Registers `size` agents and starts them on the current runtime.
    ///
    /// Agent `n` registers under the device hash `"{device_prefix}-{n}"`.
    pub async fn spawn(
        coordinator: Arc<Coordinator>,
        jobs: mpsc::Receiver<DueJob>,
        size: usize,
        device_prefix: &str,
    ) -> Result<Self, Report<WorkerError>> {
        let jobs = Arc::new(Mutex::new(jobs));
        let mut workers = Vec::with_capacity(size);
        let mut handles = Vec::with_capacity(size);

        for n in 0..size.max(1) {
            let worker = coordinator
                .workers()
                .register(&format!("{device_prefix}-{n}"))
                .await?;
            let coordinator = Arc::clone(&coordinator);
            let jobs = Arc::clone(&jobs);
            let worker_id = worker.id;
            handles.push(tokio::spawn(async move {
                agent(coordinator, jobs, worker_id).await;
            }));
            workers.push(worker);
        }
        info!(size = workers.len(), "worker pool started");
        Ok(Self { workers, handles })
    }

    #[must_use]
    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    /// Waits for every agent to stop.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker agent panicked");
            }
        }
    }
}

async fn agent(
    coordinator: Arc<Coordinator>,
    jobs: Arc<Mutex<mpsc::Receiver<DueJob>>>,
    worker_id: mixtape_core::WorkerId,
) {
    loop {
        let next = jobs.lock().await.recv().await;
        let Some(due) = next else {
            break;
        };
        debug!(
            %worker_id,
            workflow_id = %due.workflow_id,
            scheduled_for = %due.scheduled_for,
            "picked up job"
        );

        match coordinator.execute_due(worker_id, &due).await {
            Ok(completed) => {
                debug!(%worker_id, run_id = %completed.run.id, "job completed");
            }
            Err(report) => match report.current_context() {
                CoordinatorError::AlreadyClaimed { .. }
                | CoordinatorError::AlreadyRan { .. }
                | CoordinatorError::JobNotFound { .. } => {
                    debug!(%worker_id, error = %report, "job skipped");
                }
                e if e.requires_reauth() => {
                    warn!(
                        %worker_id,
                        workflow_id = %due.workflow_id,
                        "job owner must re-authenticate"
                    );
                }
                _ => {
                    warn!(
                        %worker_id,
                        workflow_id = %due.workflow_id,
                        error = %report,
                        "job failed"
                    );
                }
            },
        }

        if let Err(e) = coordinator.workers().heartbeat(worker_id).await {
            warn!(%worker_id, error = %e, "heartbeat failed");
        }
    }

    if let Err(e) = coordinator
        .workers()
        .set_status(worker_id, WorkerStatus::Offline)
        .await
    {
        warn!(%worker_id, error = %e, "failed to mark worker offline");
    }
    debug!(%worker_id, "worker agent stopped");
}
