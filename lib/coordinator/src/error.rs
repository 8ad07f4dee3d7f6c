//! Error types for the coordinator crate.
//!
//! Every fallible operation here crosses a persistence or process boundary,
//! so each returns a `rootcause::Report` over one of these enums.

use chrono::{DateTime, Utc};
use mixtape_core::{UserId, WorkerId, WorkflowId, WorkflowRunId};
use mixtape_scheduler::ScheduleError;
use mixtape_workflow::{
    AggregatedExecutionError, ErrorPair, ExecutionResult, RunStatus, ValidationReport,
};
use std::fmt;

/// Failures of a backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or refused the operation.
    Unavailable { details: String },
    /// A record that must be unique already exists.
    Conflict { details: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { details } => write!(f, "store unavailable: {details}"),
            Self::Conflict { details } => write!(f, "store conflict: {details}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from job management.
#[derive(Debug, Clone, PartialEq)]
pub enum JobError {
    /// No job with this id exists.
    NotFound { id: WorkflowId },
    /// The job exists but belongs to another user.
    Ownership { id: WorkflowId, user_id: UserId },
    /// The workflow failed validation and was not saved.
    Invalid(ValidationReport),
    /// The cron expression could not be parsed.
    InvalidSchedule(ScheduleError),
    /// A backing store failed.
    Storage { details: String },
}

impl JobError {
    /// Returns true for errors caused by the caller rather than the system.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Storage { .. })
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "workflow job '{id}' not found"),
            Self::Ownership { id, user_id } => {
                write!(f, "workflow job '{id}' is not owned by user '{user_id}'")
            }
            Self::Invalid(report) => {
                write!(f, "workflow is invalid ({} errors)", report.errors.len())
            }
            Self::InvalidSchedule(e) => write!(f, "{e}"),
            Self::Storage { details } => write!(f, "job storage error: {details}"),
        }
    }
}

impl std::error::Error for JobError {}

impl From<StoreError> for JobError {
    fn from(e: StoreError) -> Self {
        Self::Storage {
            details: e.to_string(),
        }
    }
}

/// A claim could not be taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
    /// Another worker holds the claim.
    AlreadyClaimed {
        workflow_id: WorkflowId,
        owner: WorkerId,
    },
    /// This scheduled occurrence, or a later one, was already claimed.
    AlreadyRan {
        workflow_id: WorkflowId,
        scheduled_for: DateTime<Utc>,
    },
}

impl fmt::Display for ClaimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyClaimed { workflow_id, owner } => {
                write!(f, "workflow job '{workflow_id}' is already claimed by worker '{owner}'")
            }
            Self::AlreadyRan {
                workflow_id,
                scheduled_for,
            } => write!(
                f,
                "workflow job '{workflow_id}' already ran for {scheduled_for}"
            ),
        }
    }
}

impl std::error::Error for ClaimError {}

/// Errors from the run history recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// No run with this id was recorded.
    RunNotFound { run_id: WorkflowRunId },
    /// The run already reached a terminal status.
    AlreadyTerminal {
        run_id: WorkflowRunId,
        status: RunStatus,
    },
    /// A backing store failed.
    Storage { details: String },
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunNotFound { run_id } => write!(f, "workflow run '{run_id}' not found"),
            Self::AlreadyTerminal { run_id, status } => {
                write!(f, "workflow run '{run_id}' is already {status}")
            }
            Self::Storage { details } => write!(f, "run storage error: {details}"),
        }
    }
}

impl std::error::Error for RecordError {}

impl From<StoreError> for RecordError {
    fn from(e: StoreError) -> Self {
        Self::Storage {
            details: e.to_string(),
        }
    }
}

/// Errors from the worker registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// No worker with this id is registered.
    NotFound { id: WorkerId },
    /// A backing store failed.
    Storage { details: String },
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "worker '{id}' not found"),
            Self::Storage { details } => write!(f, "worker storage error: {details}"),
        }
    }
}

impl std::error::Error for WorkerError {}

impl From<StoreError> for WorkerError {
    fn from(e: StoreError) -> Self {
        Self::Storage {
            details: e.to_string(),
        }
    }
}

/// Errors resolving a user's content credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// The user never linked an account.
    Missing { user_id: UserId },
    /// The stored credential can no longer be refreshed.
    Expired { user_id: UserId },
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { user_id } => write!(f, "no credential for user '{user_id}'"),
            Self::Expired { user_id } => write!(f, "credential for user '{user_id}' has expired"),
        }
    }
}

impl std::error::Error for CredentialError {}

/// What a run produced, kept when its terminal status could not be written.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Succeeded(ExecutionResult),
    Failed(AggregatedExecutionError),
}

/// Errors from executing a claimed job.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorError {
    /// Another worker is already running this job.
    AlreadyClaimed {
        workflow_id: WorkflowId,
        owner: WorkerId,
    },
    /// The scheduled occurrence was already delivered and claimed once.
    AlreadyRan {
        workflow_id: WorkflowId,
        scheduled_for: DateTime<Utc>,
    },
    /// The job was deleted before it could be claimed.
    JobNotFound { workflow_id: WorkflowId },
    /// The stored workflow no longer validates; nothing was run.
    Invalid {
        workflow_id: WorkflowId,
        report: ValidationReport,
    },
    /// The owner must re-authenticate before the job can run.
    Reauthenticate { user_id: UserId },
    /// The run started and one or more nodes failed.
    ExecutionFailed {
        run_id: WorkflowRunId,
        error: AggregatedExecutionError,
    },
    /// The run finished but its terminal status could not be written.
    ///
    /// The recorder retries the write; `outcome` is what the run produced.
    Unrecorded {
        run_id: WorkflowRunId,
        details: String,
        outcome: RunOutcome,
    },
    /// Job or run storage failed.
    Storage { details: String },
}

impl CoordinatorError {
    /// Returns true if the owner's credential must be renewed.
    #[must_use]
    pub fn requires_reauth(&self) -> bool {
        match self {
            Self::Reauthenticate { .. } => true,
            Self::ExecutionFailed { error, .. }
            | Self::Unrecorded {
                outcome: RunOutcome::Failed(error),
                ..
            } => error.requires_reauth(),
            _ => false,
        }
    }

    /// The `{errorType, operation}` pairs of a failed run.
    #[must_use]
    pub fn error_pairs(&self) -> Vec<ErrorPair> {
        match self {
            Self::ExecutionFailed { error, .. }
            | Self::Unrecorded {
                outcome: RunOutcome::Failed(error),
                ..
            } => error.pairs(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyClaimed { workflow_id, owner } => {
                write!(f, "workflow job '{workflow_id}' is already claimed by worker '{owner}'")
            }
            Self::AlreadyRan {
                workflow_id,
                scheduled_for,
            } => write!(
                f,
                "workflow job '{workflow_id}' already ran for {scheduled_for}"
            ),
            Self::JobNotFound { workflow_id } => {
                write!(f, "workflow job '{workflow_id}' not found")
            }
            Self::Invalid {
                workflow_id,
                report,
            } => write!(
                f,
                "workflow job '{workflow_id}' is invalid ({} errors)",
                report.errors.len()
            ),
            Self::Reauthenticate { user_id } => {
                write!(f, "user '{user_id}' must re-authenticate")
            }
            Self::ExecutionFailed { run_id, error } => {
                write!(f, "workflow run '{run_id}' failed:\n{error}")
            }
            Self::Unrecorded {
                run_id, details, ..
            } => write!(
                f,
                "workflow run '{run_id}' finished but its status was not recorded: {details}"
            ),
            Self::Storage { details } => write!(f, "coordinator storage error: {details}"),
        }
    }
}

impl std::error::Error for CoordinatorError {}

impl From<ClaimError> for CoordinatorError {
    fn from(e: ClaimError) -> Self {
        match e {
            ClaimError::AlreadyClaimed { workflow_id, owner } => {
                Self::AlreadyClaimed { workflow_id, owner }
            }
            ClaimError::AlreadyRan {
                workflow_id,
                scheduled_for,
            } => Self::AlreadyRan {
                workflow_id,
                scheduled_for,
            },
        }
    }
}

impl From<StoreError> for CoordinatorError {
    fn from(e: StoreError) -> Self {
        Self::Storage {
            details: e.to_string(),
        }
    }
}

impl From<RecordError> for CoordinatorError {
    fn from(e: RecordError) -> Self {
        Self::Storage {
            details: e.to_string(),
        }
    }
}

/// Errors from status snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusError {
    /// A backing store failed.
    Storage { details: String },
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage { details } => write!(f, "status storage error: {details}"),
        }
    }
}

impl std::error::Error for StatusError {}

impl From<StoreError> for StatusError {
    fn from(e: StoreError) -> Self {
        Self::Storage {
            details: e.to_string(),
        }
    }
}
