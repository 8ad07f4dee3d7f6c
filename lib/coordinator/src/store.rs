//! Persistence seams.
//!
//! The coordinator only needs create, read and update by id plus a few
//! filtered lists, so any storage engine can sit behind these traits.
//! [`crate::memory`] provides in-process implementations.

use crate::error::StoreError;
use crate::job::WorkflowJob;
use crate::status::SystemStatus;
use crate::worker::Worker;
use async_trait::async_trait;
use mixtape_core::{Result, UserId, WorkerId, WorkflowId, WorkflowRunId};
use mixtape_workflow::{RunStatus, WorkflowRun};

/// Result of a write that is only allowed for the owner of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum OwnerCheck<T> {
    Done(T),
    /// The job belongs to this user; nothing was changed.
    OwnedBy(UserId),
}

/// Storage for workflow jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts `job`, or replaces the stored job with the same id if it has
    /// the same owner, as one atomic step.
    ///
    /// A replaced job keeps its stored `created_at` and gets `updated_at`
    /// set. Returns the job as written.
    async fn put_owned(&self, job: WorkflowJob) -> Result<OwnerCheck<WorkflowJob>, StoreError>;

    async fn get(&self, id: WorkflowId) -> Result<Option<WorkflowJob>, StoreError>;

    /// Jobs owned by one user, oldest first.
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<WorkflowJob>, StoreError>;

    /// Every job that carries a cron expression.
    async fn list_scheduled(&self) -> Result<Vec<WorkflowJob>, StoreError>;

    /// Removes a job if `user_id` owns it. `Done(false)` means it did not exist.
    async fn delete_owned(
        &self,
        id: WorkflowId,
        user_id: UserId,
    ) -> Result<OwnerCheck<bool>, StoreError>;
}

/// Storage for run history.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Inserts a new run.
    ///
    /// Fails with `StoreError::Conflict` if the id is already present.
    async fn insert(&self, run: WorkflowRun) -> Result<(), StoreError>;

    /// Replaces an existing run.
    async fn update(&self, run: WorkflowRun) -> Result<(), StoreError>;

    async fn get(&self, id: WorkflowRunId) -> Result<Option<WorkflowRun>, StoreError>;

    /// Runs of one workflow, most recently started first.
    async fn list_for_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<WorkflowRun>, StoreError>;

    async fn count_by_status(&self, status: RunStatus) -> Result<usize, StoreError>;
}

/// Storage for worker liveness records.
#[async_trait]
pub trait WorkerStore: Send + Sync {
    async fn put(&self, worker: Worker) -> Result<(), StoreError>;

    async fn get(&self, id: WorkerId) -> Result<Option<Worker>, StoreError>;

    async fn find_by_device(&self, device_hash: &str) -> Result<Option<Worker>, StoreError>;

    /// Every worker, ordered by id.
    async fn list(&self) -> Result<Vec<Worker>, StoreError>;
}

/// Storage for system status snapshots.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn insert(&self, status: SystemStatus) -> Result<(), StoreError>;

    /// The most recently recorded snapshot.
    async fn latest(&self) -> Result<Option<SystemStatus>, StoreError>;
}
