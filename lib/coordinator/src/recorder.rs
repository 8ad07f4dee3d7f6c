//! Run history recording.

use crate::error::RecordError;
use crate::store::RunStore;
use mixtape_core::{WorkflowId, WorkflowRunId};
use mixtape_workflow::{InvalidTransition, WorkflowRun};
use rootcause::prelude::Report;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, instrument, warn};

/// Writes the lifecycle of each run to the run store.
///
/// A run is inserted as running when execution starts and updated once
/// when it completes. A run already in a terminal state is never changed.
///
/// If the terminal write fails, the completed run is held and written by
/// [`RunRecorder::retry_unrecorded`]. A held run counts as terminal.
#[derive(Clone)]
pub struct RunRecorder {
    runs: Arc<dyn RunStore>,
    unrecorded: Arc<Mutex<HashMap<WorkflowRunId, WorkflowRun>>>,
}

impl RunRecorder {
    #[must_use]
    pub fn new(runs: Arc<dyn RunStore>) -> Self {
        Self {
            runs,
            unrecorded: Arc::default(),
        }
    }

    fn held(&self) -> MutexGuard<'_, HashMap<WorkflowRunId, WorkflowRun>> {
        self.unrecorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a running run for a workflow.
    #[instrument(skip(self))]
    pub async fn start(&self, workflow_id: WorkflowId) -> Result<WorkflowRun, Report<RecordError>> {
        let run = WorkflowRun::start(workflow_id);
        self.runs
            .insert(run.clone())
            .await
            .map_err(|e| RecordError::Storage {
                details: e.to_string(),
            })?;
        debug!(run_id = %run.id, "run started");
        Ok(run)
    }

    /// Completes a run successfully with its serialized result.
    #[instrument(skip(self, return_values))]
    pub async fn succeed(
        &self,
        run_id: WorkflowRunId,
        return_values: JsonValue,
    ) -> Result<WorkflowRun, Report<RecordError>> {
        self.complete(run_id, |run| run.succeed(return_values)).await
    }

    /// Completes a run as failed. No result is stored.
    #[instrument(skip(self))]
    pub async fn fail(&self, run_id: WorkflowRunId) -> Result<WorkflowRun, Report<RecordError>> {
        self.complete(run_id, WorkflowRun::fail).await
    }

    async fn complete(
        &self,
        run_id: WorkflowRunId,
        finish: impl FnOnce(&mut WorkflowRun) -> Result<(), InvalidTransition>,
    ) -> Result<WorkflowRun, Report<RecordError>> {
        if let Some(held) = self.held().get(&run_id) {
            return Err(RecordError::AlreadyTerminal {
                run_id,
                status: held.status,
            }
            .into());
        }

        let mut run = self
            .runs
            .get(run_id)
            .await
            .map_err(|e| RecordError::Storage {
                details: e.to_string(),
            })?
            .ok_or(RecordError::RunNotFound { run_id })?;

        finish(&mut run).map_err(|e| {
            warn!(%run_id, status = %e.from, "refusing to change a completed run");
            RecordError::AlreadyTerminal {
                run_id,
                status: e.from,
            }
        })?;

        if let Err(e) = self.runs.update(run.clone()).await {
            warn!(
                %run_id,
                status = %run.status,
                error = %e,
                "terminal status not written; holding for retry"
            );
            self.held().insert(run_id, run);
            return Err(RecordError::Storage {
                details: e.to_string(),
            }
            .into());
        }
        debug!(%run_id, status = %run.status, "run completed");
        Ok(run)
    }

    /// Writes completed runs whose terminal update failed earlier.
    ///
    /// Returns how many are still waiting to be written.
    pub async fn retry_unrecorded(&self) -> usize {
        let pending: Vec<WorkflowRun> = self.held().values().cloned().collect();
        for run in pending {
            match self.runs.update(run.clone()).await {
                Ok(()) => {
                    self.held().remove(&run.id);
                    debug!(
                        run_id = %run.id,
                        status = %run.status,
                        "terminal status written on retry"
                    );
                }
                Err(e) => warn!(run_id = %run.id, error = %e, "terminal status still not written"),
            }
        }
        self.unrecorded()
    }

    /// Number of completed runs waiting for their terminal write.
    #[must_use]
    pub fn unrecorded(&self) -> usize {
        self.held().len()
    }

    /// Every recorded run of a workflow, most recent first.
    pub async fn history(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<WorkflowRun>, Report<RecordError>> {
        Ok(self
            .runs
            .list_for_workflow(workflow_id)
            .await
            .map_err(|e| RecordError::Storage {
                details: e.to_string(),
            })?)
    }
}
