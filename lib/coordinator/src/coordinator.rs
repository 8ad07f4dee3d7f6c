//! Claiming and executing due jobs.
//!
//! `execute_job` is the single path from a due job to a recorded run:
//! claim, load, prepare, resolve credentials, record start, execute and
//! record the outcome. The claim is held for the whole run, so a second
//! worker asking for the same job is refused until it completes.
//! `execute_due` does the same for one scheduled occurrence, which runs at
//! most once.

use crate::claim::ClaimTable;
use crate::credentials::CredentialProvider;
use crate::error::{CoordinatorError, RecordError, RunOutcome, WorkerError};
use crate::recorder::RunRecorder;
use crate::service::PreparedWorkflows;
use crate::store::{JobStore, RunStore};
use crate::worker::{WorkerRegistry, WorkerStatus};
use chrono::{DateTime, Utc};
use mixtape_core::{WorkerId, WorkflowId, WorkflowRunId};
use mixtape_scheduler::DueJob;
use mixtape_workflow::{Credentials, Engine, ExecutionResult, ValidatedWorkflow, WorkflowRun};
use rootcause::prelude::Report;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Coordinator tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Workers silent for longer than this are marked offline.
    pub worker_stale_after: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            worker_stale_after: Duration::from_secs(120),
        }
    }
}

/// A run that finished successfully.
#[derive(Debug, Clone)]
pub struct CompletedRun {
    /// The recorded run, in its terminal state.
    pub run: WorkflowRun,
    pub result: ExecutionResult,
}

/// Runs claimed jobs and records their history.
pub struct Coordinator {
    engine: Engine,
    jobs: Arc<dyn JobStore>,
    recorder: RunRecorder,
    claims: ClaimTable,
    workers: WorkerRegistry,
    credentials: Arc<dyn CredentialProvider>,
    prepared: PreparedWorkflows,
    config: CoordinatorConfig,
}

impl Coordinator {
    #[must_use]
    pub fn new(
        engine: Engine,
        jobs: Arc<dyn JobStore>,
        runs: Arc<dyn RunStore>,
        workers: WorkerRegistry,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            engine,
            jobs,
            recorder: RunRecorder::new(runs),
            claims: ClaimTable::new(),
            workers,
            credentials,
            prepared: PreparedWorkflows::new(),
            config: CoordinatorConfig::default(),
        }
    }

    /// Shares the workflows a job service validated at save time.
    #[must_use]
    pub fn with_prepared(mut self, prepared: PreparedWorkflows) -> Self {
        self.prepared = prepared;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn claims(&self) -> &ClaimTable {
        &self.claims
    }

    #[must_use]
    pub fn workers(&self) -> &WorkerRegistry {
        &self.workers
    }

    /// Claims a job for `worker_id` and runs it to completion.
    ///
    /// # Errors
    ///
    /// - `AlreadyClaimed` if another run of the job is in flight
    /// - `JobNotFound` if the job was deleted
    /// - `Invalid` if the stored workflow no longer validates; no run is recorded
    /// - `Reauthenticate` if the owner has no usable credential
    /// - `ExecutionFailed` with the aggregated node failures; the run is
    ///   recorded as failed
    /// - `Unrecorded` with the outcome if the terminal status could not be
    ///   written yet
    #[instrument(skip(self), fields(%worker_id, %workflow_id))]
    pub async fn execute_job(
        &self,
        worker_id: WorkerId,
        workflow_id: WorkflowId,
    ) -> Result<CompletedRun, Report<CoordinatorError>> {
        self.execute(worker_id, workflow_id, None).await
    }

    /// Runs one scheduled occurrence of a job.
    ///
    /// # Errors
    ///
    /// As [`Coordinator::execute_job`], plus `AlreadyRan` if this occurrence
    /// was already claimed, for example after a duplicate delivery.
    #[instrument(
        skip(self, due),
        fields(%worker_id, workflow_id = %due.workflow_id, scheduled_for = %due.scheduled_for)
    )]
    pub async fn execute_due(
        &self,
        worker_id: WorkerId,
        due: &DueJob,
    ) -> Result<CompletedRun, Report<CoordinatorError>> {
        self.execute(worker_id, due.workflow_id, Some(due.scheduled_for))
            .await
    }

    async fn execute(
        &self,
        worker_id: WorkerId,
        workflow_id: WorkflowId,
        occurrence: Option<DateTime<Utc>>,
    ) -> Result<CompletedRun, Report<CoordinatorError>> {
        let claimed = match occurrence {
            Some(scheduled_for) => {
                self.claims
                    .try_claim_occurrence(workflow_id, worker_id, scheduled_for)
            }
            None => self.claims.try_claim(workflow_id, worker_id),
        };
        let claim = claimed.map_err(|e| {
            debug!(error = %e, "claim refused");
            CoordinatorError::from(e)
        })?;

        let job = self
            .jobs
            .get(workflow_id)
            .await
            .map_err(|e| CoordinatorError::Storage {
                details: e.to_string(),
            })?
            .ok_or(CoordinatorError::JobNotFound { workflow_id })?;

        let validated = match self.prepared.get(&job.workflow) {
            Some(validated) => validated,
            None => {
                let validated = self
                    .engine
                    .prepare(job.workflow.clone())
                    .map_err(|report| {
                        warn!(errors = report.errors.len(), "stored workflow is invalid");
                        CoordinatorError::Invalid {
                            workflow_id,
                            report,
                        }
                    })?;
                Arc::new(validated)
            }
        };

        let credentials = match self.credentials.credentials_for(job.user_id).await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(user_id = %job.user_id, error = %e, "no usable credential");
                return Err(CoordinatorError::Reauthenticate {
                    user_id: job.user_id,
                }
                .into());
            }
        };

        self.mark(worker_id, WorkerStatus::Busy).await;
        let outcome = self.run_claimed(&validated, &credentials).await;
        self.mark(worker_id, WorkerStatus::Idle).await;
        drop(claim);
        outcome
    }

    async fn run_claimed(
        &self,
        validated: &ValidatedWorkflow,
        credentials: &Credentials,
    ) -> Result<CompletedRun, Report<CoordinatorError>> {
        let run = self
            .recorder
            .start(validated.workflow().id)
            .await
            .map_err(|e| CoordinatorError::Storage {
                details: e.to_string(),
            })?;

        match self.engine.execute(validated, credentials).await {
            Ok(result) => {
                let run = match self.recorder.succeed(run.id, result.return_values()).await {
                    Ok(run) => run,
                    Err(e) => return Err(unrecorded(run.id, &e, RunOutcome::Succeeded(result))),
                };
                info!(run_id = %run.id, tracks = result.output.len(), "run succeeded");
                Ok(CompletedRun { run, result })
            }
            Err(error) => {
                if let Err(e) = self.recorder.fail(run.id).await {
                    return Err(unrecorded(run.id, &e, RunOutcome::Failed(error)));
                }
                warn!(
                    run_id = %run.id,
                    failures = error.failures.len(),
                    reauth = error.requires_reauth(),
                    "run failed"
                );
                Err(CoordinatorError::ExecutionFailed {
                    run_id: run.id,
                    error,
                }
                .into())
            }
        }
    }

    /// Retries terminal run writes that failed. Returns how many remain.
    pub async fn retry_unrecorded_runs(&self) -> usize {
        self.recorder.retry_unrecorded().await
    }

    async fn mark(&self, worker_id: WorkerId, status: WorkerStatus) {
        if let Err(e) = self.workers.set_status(worker_id, status).await {
            warn!(%worker_id, %status, error = %e, "failed to update worker status");
        }
    }

    /// Marks workers that stopped heartbeating as offline.
    pub async fn sweep_stale_workers(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkerId>, Report<WorkerError>> {
        let older_than = chrono::Duration::from_std(self.config.worker_stale_after)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        self.workers.mark_stale(older_than, now).await
    }
}

fn unrecorded(
    run_id: WorkflowRunId,
    error: &Report<RecordError>,
    outcome: RunOutcome,
) -> Report<CoordinatorError> {
    warn!(%run_id, error = %error, "run finished but its status was not recorded");
    CoordinatorError::Unrecorded {
        run_id,
        details: error.to_string(),
        outcome,
    }
    .into()
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("engine", &self.engine)
            .field("claims", &self.claims)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
