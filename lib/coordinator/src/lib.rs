//! Coordination of scheduled workflow jobs.
//!
//! This crate provides:
//!
//! - **Stores**: persistence seams for jobs, runs, workers and status, with
//!   in-memory implementations
//! - **Job Service**: user-scoped save, read, delete and history queries
//! - **Coordinator**: exclusive claims, execution and run history recording
//! - **Worker Pool**: agents that pull due jobs and report liveness
//! - **Status**: periodic snapshots served through an optional TTL cache

pub mod claim;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod job;
pub mod memory;
pub mod pool;
pub mod recorder;
pub mod service;
pub mod status;
pub mod store;
pub mod worker;

pub use claim::{Claim, ClaimTable};
pub use coordinator::{CompletedRun, Coordinator, CoordinatorConfig};
pub use credentials::{CredentialProvider, InMemoryCredentials, StaticCredentials};
pub use error::{
    ClaimError, CoordinatorError, CredentialError, JobError, RecordError, RunOutcome, StatusError,
    StoreError, WorkerError,
};
pub use job::WorkflowJob;
pub use memory::{
    InMemoryBackend, InMemoryJobStore, InMemoryRunStore, InMemoryStatusStore, InMemoryWorkerStore,
};
pub use pool::WorkerPool;
pub use recorder::RunRecorder;
pub use service::{DeleteOutcome, JobService, PreparedWorkflows};
pub use status::{InMemoryReadCache, PoolStatus, ReadCache, StatusService, SystemStatus};
pub use store::{JobStore, OwnerCheck, RunStore, StatusStore, WorkerStore};
pub use worker::{Worker, WorkerRegistry, WorkerStatus, WorkerView};
