//! Due-job tracking.
//!
//! The scheduler holds one entry per scheduled job together with its
//! absolute next-run time. `due` fires every entry whose time has passed
//! exactly once, then recomputes the following run from the check time, so
//! a late check neither skips a run nor fires it twice.

use crate::schedule::CronSchedule;
use chrono::{DateTime, Utc};
use mixtape_core::WorkflowId;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// A job whose scheduled time has arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueJob {
    pub workflow_id: WorkflowId,
    /// The run time that was reached, which may be earlier than the check.
    pub scheduled_for: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Entry {
    schedule: CronSchedule,
    next_run: DateTime<Utc>,
}

/// Tracks the next run of every scheduled job.
#[derive(Debug, Default)]
pub struct Scheduler {
    entries: Mutex<HashMap<WorkflowId, Entry>>,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WorkflowId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedules or reschedules a job.
    ///
    /// An unset schedule removes the job. Returns the next run time, if any.
    pub fn upsert(
        &self,
        workflow_id: WorkflowId,
        schedule: CronSchedule,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let mut entries = self.lock();
        let Some(next_run) = schedule.next_after(now) else {
            if entries.remove(&workflow_id).is_some() {
                debug!(%workflow_id, "job no longer scheduled");
            }
            return None;
        };
        debug!(%workflow_id, %next_run, "job scheduled");
        entries.insert(workflow_id, Entry { schedule, next_run });
        Some(next_run)
    }

    /// Removes a job. Returns true if it was scheduled.
    pub fn cancel(&self, workflow_id: WorkflowId) -> bool {
        self.lock().remove(&workflow_id).is_some()
    }

    /// Returns every job due at `now`, ordered by scheduled time then id,
    /// and advances each to its next run after `now`.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<DueJob> {
        let mut entries = self.lock();
        let mut fired = Vec::new();
        let mut exhausted = Vec::new();

        for (&workflow_id, entry) in entries.iter_mut() {
            if entry.next_run > now {
                continue;
            }
            fired.push(DueJob {
                workflow_id,
                scheduled_for: entry.next_run,
            });
            match entry.schedule.next_after(now) {
                Some(next_run) => entry.next_run = next_run,
                None => exhausted.push(workflow_id),
            }
        }
        for workflow_id in exhausted {
            entries.remove(&workflow_id);
        }

        fired.sort_by_key(|job| (job.scheduled_for, job.workflow_id));
        if !fired.is_empty() {
            info!(count = fired.len(), "jobs due");
        }
        fired
    }

    #[must_use]
    pub fn next_run(&self, workflow_id: WorkflowId) -> Option<DateTime<Utc>> {
        self.lock().get(&workflow_id).map(|entry| entry.next_run)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
