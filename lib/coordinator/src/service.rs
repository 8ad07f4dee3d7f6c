//! User-facing job management.
//!
//! Every read and write is scoped to a user: a job that exists but belongs
//! to someone else yields `JobError::Ownership`, an unknown id yields
//! `JobError::NotFound`. Saving validates the whole graph first and stores
//! nothing if any check fails.

use crate::error::{JobError, StoreError};
use crate::job::WorkflowJob;
use crate::recorder::RunRecorder;
use crate::store::{JobStore, OwnerCheck, RunStore};
use chrono::{DateTime, Utc};
use mixtape_core::{UserId, WorkflowId};
use mixtape_scheduler::{CronSchedule, Scheduler};
use mixtape_workflow::{NodeRegistry, ValidatedWorkflow, Validator, Workflow, WorkflowRun};
use rootcause::prelude::Report;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, instrument, warn};

/// Result of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Nothing with that id existed; nothing was changed.
    NotFound,
}

/// Workflows validated at save time, keyed by job id.
///
/// An entry is only used while it still matches the stored workflow.
#[derive(Debug, Clone, Default)]
pub struct PreparedWorkflows {
    entries: Arc<Mutex<HashMap<WorkflowId, Arc<ValidatedWorkflow>>>>,
}

impl PreparedWorkflows {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WorkflowId, Arc<ValidatedWorkflow>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, validated: ValidatedWorkflow) {
        let id = validated.workflow().id;
        self.lock().insert(id, Arc::new(validated));
    }

    /// The validated form of `workflow`, if it was prepared unchanged.
    #[must_use]
    pub fn get(&self, workflow: &Workflow) -> Option<Arc<ValidatedWorkflow>> {
        self.lock()
            .get(&workflow.id)
            .filter(|validated| validated.workflow() == workflow)
            .cloned()
    }

    pub fn remove(&self, id: WorkflowId) {
        self.lock().remove(&id);
    }
}

fn storage(e: Report<StoreError>) -> JobError {
    JobError::Storage {
        details: e.to_string(),
    }
}

/// Saves, reads and deletes workflow jobs on behalf of users.
#[derive(Clone)]
pub struct JobService {
    jobs: Arc<dyn JobStore>,
    recorder: RunRecorder,
    scheduler: Arc<Scheduler>,
    registry: Arc<NodeRegistry>,
    prepared: PreparedWorkflows,
}

impl JobService {
    #[must_use]
    pub fn new(
        jobs: Arc<dyn JobStore>,
        runs: Arc<dyn RunStore>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            jobs,
            recorder: RunRecorder::new(runs),
            scheduler,
            registry: NodeRegistry::shared_builtin(),
            prepared: PreparedWorkflows::new(),
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: Arc<NodeRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Workflows validated by this service, for the coordinator's fast path.
    #[must_use]
    pub fn prepared(&self) -> PreparedWorkflows {
        self.prepared.clone()
    }

    /// Creates or replaces a job and (re)schedules it.
    ///
    /// # Errors
    ///
    /// - `JobError::InvalidSchedule` if the cron expression does not parse
    /// - `JobError::Invalid` with the full report if the graph is invalid
    /// - `JobError::Ownership` if the id belongs to another user's job
    #[instrument(skip(self, workflow), fields(workflow_id = %workflow.id))]
    pub async fn save(
        &self,
        user_id: UserId,
        workflow: Workflow,
        cron: Option<String>,
    ) -> Result<WorkflowJob, Report<JobError>> {
        let schedule = CronSchedule::parse(cron.as_deref()).map_err(JobError::InvalidSchedule)?;
        let validated = Validator::new(&self.registry)
            .check(workflow)
            .map_err(|report| {
                info!(errors = report.errors.len(), "rejected invalid workflow");
                JobError::Invalid(report)
            })?;

        let id = validated.workflow().id;
        let cron = schedule.expression().map(str::to_string);
        let candidate = WorkflowJob::new(user_id, validated.workflow().clone(), cron);
        let job = match self.jobs.put_owned(candidate).await.map_err(storage)? {
            OwnerCheck::Done(job) => job,
            OwnerCheck::OwnedBy(_) => return Err(JobError::Ownership { id, user_id }.into()),
        };

        self.prepared.insert(validated);
        let next_run = self.scheduler.upsert(id, schedule, Utc::now());
        info!(next_run = ?next_run, "workflow job saved");
        Ok(job)
    }

    pub async fn get(
        &self,
        user_id: UserId,
        id: WorkflowId,
    ) -> Result<WorkflowJob, Report<JobError>> {
        self.owned(user_id, id).await
    }

    pub async fn list_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<WorkflowJob>, Report<JobError>> {
        Ok(self.jobs.list_for_user(user_id).await.map_err(storage)?)
    }

    /// Deletes a job and cancels its future triggers.
    ///
    /// Safe to repeat: an unknown id reports `DeleteOutcome::NotFound`. Run
    /// history is kept, and a run already in flight completes normally.
    #[instrument(skip(self))]
    pub async fn delete(
        &self,
        user_id: UserId,
        id: WorkflowId,
    ) -> Result<DeleteOutcome, Report<JobError>> {
        match self.jobs.delete_owned(id, user_id).await.map_err(storage)? {
            OwnerCheck::OwnedBy(_) => Err(JobError::Ownership { id, user_id }.into()),
            OwnerCheck::Done(false) => Ok(DeleteOutcome::NotFound),
            OwnerCheck::Done(true) => {
                self.scheduler.cancel(id);
                self.prepared.remove(id);
                info!("workflow job deleted");
                Ok(DeleteOutcome::Deleted)
            }
        }
    }

    /// Schedules every stored job that carries a cron expression.
    ///
    /// Run at startup so recurring jobs survive a restart. Jobs whose
    /// expression or graph no longer validates are logged and left
    /// unscheduled. Returns the number scheduled.
    #[instrument(skip(self))]
    pub async fn restore_schedules(&self, now: DateTime<Utc>) -> Result<usize, Report<JobError>> {
        let mut restored = 0;
        for job in self.jobs.list_scheduled().await.map_err(storage)? {
            let schedule = match job.schedule() {
                Ok(schedule) => schedule,
                Err(e) => {
                    warn!(workflow_id = %job.id, error = %e, "stored cron expression is invalid");
                    continue;
                }
            };
            match Validator::new(&self.registry).check(job.workflow) {
                Ok(validated) => self.prepared.insert(validated),
                Err(report) => {
                    warn!(
                        workflow_id = %job.id,
                        errors = report.errors.len(),
                        "stored workflow is invalid"
                    );
                    continue;
                }
            }
            if self.scheduler.upsert(job.id, schedule, now).is_some() {
                restored += 1;
            }
        }
        info!(restored, "restored job schedules");
        Ok(restored)
    }

    /// Run history of one of the user's jobs, most recent first.
    pub async fn list_runs(
        &self,
        user_id: UserId,
        id: WorkflowId,
    ) -> Result<Vec<WorkflowRun>, Report<JobError>> {
        self.owned(user_id, id).await?;
        Ok(self
            .recorder
            .history(id)
            .await
            .map_err(|e| JobError::Storage {
                details: e.to_string(),
            })?)
    }

    async fn owned(
        &self,
        user_id: UserId,
        id: WorkflowId,
    ) -> Result<WorkflowJob, Report<JobError>> {
        let job = self
            .jobs
            .get(id)
            .await
            .map_err(storage)?
            .ok_or(JobError::NotFound { id })?;
        if !job.is_owned_by(user_id) {
            return Err(JobError::Ownership { id, user_id }.into());
        }
        Ok(job)
    }
}
