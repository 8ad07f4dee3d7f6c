//! Scheduled workflow jobs.

use chrono::{DateTime, Utc};
use mixtape_core::{UserId, WorkflowId};
use mixtape_scheduler::{CronSchedule, DisplaySchedule, ScheduleError};
use mixtape_workflow::Workflow;
use serde::{Deserialize, Serialize};

/// A user's workflow together with its cron trigger.
///
/// The job id is the workflow id; saving a workflow with an existing id
/// replaces the embedded graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowJob {
    pub id: WorkflowId,
    pub user_id: UserId,
    /// `None` when the job is only run on demand.
    #[serde(default)]
    pub cron: Option<String>,
    pub workflow: Workflow,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkflowJob {
    #[must_use]
    pub fn new(user_id: UserId, workflow: Workflow, cron: Option<String>) -> Self {
        Self {
            id: workflow.id,
            user_id,
            cron,
            workflow,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Parses the job's cron expression.
    ///
    /// # Errors
    ///
    /// Returns `ScheduleError` if the stored expression is invalid.
    pub fn schedule(&self) -> Result<CronSchedule, ScheduleError> {
        CronSchedule::parse(self.cron.as_deref())
    }

    /// The schedule as shown to users. Invalid expressions display as unset.
    #[must_use]
    pub fn display_schedule(&self) -> DisplaySchedule {
        self.schedule()
            .map(|schedule| schedule.display())
            .unwrap_or_else(|_| DisplaySchedule::unset())
    }

    #[must_use]
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }
}
