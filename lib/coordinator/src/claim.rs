//! Exclusive job claims.
//!
//! A due job may be held by at most one worker. Claims are taken under a
//! single lock and released when the returned [`Claim`] is dropped.
//!
//! Scheduled claims also remember the latest occurrence claimed per job, so
//! a tick delivered twice runs once even if the first run already finished.

use crate::error::ClaimError;
use chrono::{DateTime, Utc};
use mixtape_core::{WorkerId, WorkflowId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Default)]
struct Ledger {
    held: HashMap<WorkflowId, WorkerId>,
    fired: HashMap<WorkflowId, DateTime<Utc>>,
}

/// The set of jobs currently being executed.
#[derive(Debug, Clone, Default)]
pub struct ClaimTable {
    ledger: Arc<Mutex<Ledger>>,
}

impl ClaimTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims a job for a worker.
    ///
    /// # Errors
    ///
    /// Returns `ClaimError::AlreadyClaimed` naming the current owner if the
    /// job is held, including by the same worker.
    pub fn try_claim(
        &self,
        workflow_id: WorkflowId,
        worker_id: WorkerId,
    ) -> Result<Claim, ClaimError> {
        self.claim(workflow_id, worker_id, None)
    }

    /// Claims one scheduled occurrence of a job.
    ///
    /// # Errors
    ///
    /// As [`ClaimTable::try_claim`], plus `ClaimError::AlreadyRan` if this
    /// occurrence or a later one was claimed before.
    pub fn try_claim_occurrence(
        &self,
        workflow_id: WorkflowId,
        worker_id: WorkerId,
        scheduled_for: DateTime<Utc>,
    ) -> Result<Claim, ClaimError> {
        self.claim(workflow_id, worker_id, Some(scheduled_for))
    }

    fn claim(
        &self,
        workflow_id: WorkflowId,
        worker_id: WorkerId,
        occurrence: Option<DateTime<Utc>>,
    ) -> Result<Claim, ClaimError> {
        let mut ledger = self.lock();
        if let Some(&owner) = ledger.held.get(&workflow_id) {
            return Err(ClaimError::AlreadyClaimed { workflow_id, owner });
        }
        if let Some(scheduled_for) = occurrence {
            if ledger
                .fired
                .get(&workflow_id)
                .is_some_and(|&last| last >= scheduled_for)
            {
                return Err(ClaimError::AlreadyRan {
                    workflow_id,
                    scheduled_for,
                });
            }
            ledger.fired.insert(workflow_id, scheduled_for);
        }
        ledger.held.insert(workflow_id, worker_id);
        debug!(%workflow_id, %worker_id, "job claimed");
        Ok(Claim {
            table: self.clone(),
            workflow_id,
            worker_id,
        })
    }

    #[must_use]
    pub fn owner(&self, workflow_id: WorkflowId) -> Option<WorkerId> {
        self.lock().held.get(&workflow_id).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().held.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().held.is_empty()
    }
}

/// A held claim. Dropping it releases the job.
#[derive(Debug)]
pub struct Claim {
    table: ClaimTable,
    workflow_id: WorkflowId,
    worker_id: WorkerId,
}

impl Claim {
    #[must_use]
    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    #[must_use]
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut ledger = self.table.lock();
        if ledger.held.get(&self.workflow_id) == Some(&self.worker_id) {
            ledger.held.remove(&self.workflow_id);
            debug!(workflow_id = %self.workflow_id, worker_id = %self.worker_id, "claim released");
        }
    }
}
