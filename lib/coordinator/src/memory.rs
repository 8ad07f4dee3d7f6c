//! In-memory store implementations.
//!
//! Used by tests and by the worker binary, which seeds jobs from a file and
//! keeps history for the life of the process.

use crate::error::StoreError;
use crate::job::WorkflowJob;
use crate::status::SystemStatus;
use crate::store::{JobStore, OwnerCheck, RunStore, StatusStore, WorkerStore};
use crate::worker::Worker;
use async_trait::async_trait;
use chrono::Utc;
use mixtape_core::{Result, UserId, WorkerId, WorkflowId, WorkflowRunId};
use mixtape_workflow::{RunStatus, WorkflowRun};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<WorkflowId, WorkflowJob>>,
}

impl InMemoryJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn put_owned(&self, job: WorkflowJob) -> Result<OwnerCheck<WorkflowJob>, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = match jobs.get(&job.id) {
            Some(existing) if !existing.is_owned_by(job.user_id) => {
                return Ok(OwnerCheck::OwnedBy(existing.user_id));
            }
            Some(existing) => WorkflowJob {
                created_at: existing.created_at,
                updated_at: Some(Utc::now()),
                ..job
            },
            None => job,
        };
        jobs.insert(job.id, job.clone());
        Ok(OwnerCheck::Done(job))
    }

    async fn get(&self, id: WorkflowId) -> Result<Option<WorkflowJob>, StoreError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<WorkflowJob>, StoreError> {
        let mut jobs: Vec<WorkflowJob> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.user_id == user_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| (job.created_at, job.id));
        Ok(jobs)
    }

    async fn list_scheduled(&self) -> Result<Vec<WorkflowJob>, StoreError> {
        let mut jobs: Vec<WorkflowJob> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.cron.is_some())
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.id);
        Ok(jobs)
    }

    async fn delete_owned(
        &self,
        id: WorkflowId,
        user_id: UserId,
    ) -> Result<OwnerCheck<bool>, StoreError> {
        let mut jobs = self.jobs.write().await;
        match jobs.get(&id) {
            None => Ok(OwnerCheck::Done(false)),
            Some(job) if !job.is_owned_by(user_id) => Ok(OwnerCheck::OwnedBy(job.user_id)),
            Some(_) => Ok(OwnerCheck::Done(jobs.remove(&id).is_some())),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<WorkflowRunId, WorkflowRun>>,
}

impl InMemoryRunStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn insert(&self, run: WorkflowRun) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&run.id) {
            return Err(StoreError::Conflict {
                details: format!("workflow run '{}' already exists", run.id),
            }
            .into());
        }
        runs.insert(run.id, run);
        Ok(())
    }

    async fn update(&self, run: WorkflowRun) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        match runs.get_mut(&run.id) {
            Some(existing) => {
                *existing = run;
                Ok(())
            }
            None => Err(StoreError::Unavailable {
                details: format!("workflow run '{}' does not exist", run.id),
            }
            .into()),
        }
    }

    async fn get(&self, id: WorkflowRunId) -> Result<Option<WorkflowRun>, StoreError> {
        Ok(self.runs.read().await.get(&id).cloned())
    }

    async fn list_for_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<WorkflowRun>, StoreError> {
        let mut runs: Vec<WorkflowRun> = self
            .runs
            .read()
            .await
            .values()
            .filter(|run| run.workflow_id == workflow_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        Ok(runs)
    }

    async fn count_by_status(&self, status: RunStatus) -> Result<usize, StoreError> {
        Ok(self
            .runs
            .read()
            .await
            .values()
            .filter(|run| run.status == status)
            .count())
    }
}

#[derive(Default)]
pub struct InMemoryWorkerStore {
    workers: RwLock<BTreeMap<WorkerId, Worker>>,
}

impl InMemoryWorkerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerStore for InMemoryWorkerStore {
    async fn put(&self, worker: Worker) -> Result<(), StoreError> {
        self.workers.write().await.insert(worker.id, worker);
        Ok(())
    }

    async fn get(&self, id: WorkerId) -> Result<Option<Worker>, StoreError> {
        Ok(self.workers.read().await.get(&id).cloned())
    }

    async fn find_by_device(&self, device_hash: &str) -> Result<Option<Worker>, StoreError> {
        Ok(self
            .workers
            .read()
            .await
            .values()
            .find(|worker| worker.device_hash == device_hash)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Worker>, StoreError> {
        Ok(self.workers.read().await.values().cloned().collect())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    statuses: RwLock<Vec<SystemStatus>>,
}

impl InMemoryStatusStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn insert(&self, status: SystemStatus) -> Result<(), StoreError> {
        self.statuses.write().await.push(status);
        Ok(())
    }

    async fn latest(&self) -> Result<Option<SystemStatus>, StoreError> {
        Ok(self
            .statuses
            .read()
            .await
            .iter()
            .max_by_key(|status| (status.recorded_at, status.id))
            .cloned())
    }
}

/// One of each in-memory store.
#[derive(Clone)]
pub struct InMemoryBackend {
    pub jobs: Arc<InMemoryJobStore>,
    pub runs: Arc<InMemoryRunStore>,
    pub workers: Arc<InMemoryWorkerStore>,
    pub statuses: Arc<InMemoryStatusStore>,
}

impl InMemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(InMemoryJobStore::new()),
            runs: Arc::new(InMemoryRunStore::new()),
            workers: Arc::new(InMemoryWorkerStore::new()),
            statuses: Arc::new(InMemoryStatusStore::new()),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}
