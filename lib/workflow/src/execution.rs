//! Run lifecycle and execution reports.
//!
//! A `WorkflowRun` is created running and moves once to `succeeded` or
//! `failed`, never leaving a terminal status. `pending` only appears on
//! records written by other producers and cannot be completed. An
//! `ExecutionReport` describes what the engine did with each node during one
//! run.

use crate::content::Collection;
use crate::definition::NodeId;
use chrono::{DateTime, Utc};
use mixtape_core::{WorkflowId, WorkflowRunId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// The status of one workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    /// Returns true if this is a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A transition the lifecycle does not allow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub run_id: WorkflowRunId,
    pub from: RunStatus,
    pub to: RunStatus,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {} cannot move from {} to {}",
            self.run_id, self.from, self.to
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// A record of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub id: WorkflowRunId,
    pub workflow_id: WorkflowId,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    /// Serialized result; only set on success.
    pub return_values: Option<JsonValue>,
}

impl WorkflowRun {
    /// Creates a run that starts now.
    #[must_use]
    pub fn start(workflow_id: WorkflowId) -> Self {
        Self {
            id: WorkflowRunId::new(),
            workflow_id,
            started_at: Some(Utc::now()),
            completed_at: None,
            status: RunStatus::Running,
            return_values: None,
        }
    }

    /// Marks the run as succeeded with its serialized result.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the run is running.
    pub fn succeed(&mut self, return_values: JsonValue) -> Result<(), InvalidTransition> {
        self.transition(RunStatus::Succeeded)?;
        self.completed_at = Some(Utc::now());
        self.return_values = Some(return_values);
        Ok(())
    }

    /// Marks the run as failed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the run is running.
    pub fn fail(&mut self) -> Result<(), InvalidTransition> {
        self.transition(RunStatus::Failed)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, to: RunStatus) -> Result<(), InvalidTransition> {
        if self.status != RunStatus::Running || !to.is_terminal() {
            return Err(InvalidTransition {
                run_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// What happened to one node during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum NodeOutcome {
    /// Produced a collection of `count` tracks.
    Succeeded { count: usize },
    Failed { error_type: String, message: String },
    /// Not executed because `upstream` failed or was skipped.
    Skipped { upstream: NodeId },
}

/// Per-node results of one run, successful or not.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    /// Deterministic topological order the nodes were dispatched in.
    pub order: Vec<NodeId>,
    pub outcomes: BTreeMap<NodeId, NodeOutcome>,
    /// Output of every node that succeeded.
    pub outputs: BTreeMap<NodeId, Collection>,
    /// Outputs of terminal nodes that succeeded.
    pub terminal_outputs: BTreeMap<NodeId, Collection>,
}

impl ExecutionReport {
    #[must_use]
    pub fn outcome(&self, id: &str) -> Option<&NodeOutcome> {
        self.outcomes.get(id)
    }

    #[must_use]
    pub fn output(&self, id: &str) -> Option<&Collection> {
        self.outputs.get(id)
    }

    /// Ids of skipped nodes, ascending.
    #[must_use]
    pub fn skipped(&self) -> Vec<&NodeId> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, NodeOutcome::Skipped { .. }))
            .map(|(id, _)| id)
            .collect()
    }

    /// Ids of failed nodes, ascending.
    #[must_use]
    pub fn failed(&self) -> Vec<&NodeId> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, NodeOutcome::Failed { .. }))
            .map(|(id, _)| id)
            .collect()
    }
}

/// A successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    /// Terminal outputs concatenated in ascending terminal id order.
    pub output: Collection,
    pub report: ExecutionReport,
}

impl ExecutionResult {
    /// The value recorded as a run's `returnValues`.
    #[must_use]
    pub fn return_values(&self) -> JsonValue {
        serde_json::to_value(&self.output).unwrap_or(JsonValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_status_terminal() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn workflow_run_lifecycle() {
        let mut run = WorkflowRun::start(WorkflowId::new());
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.started_at.is_some());
        assert!(run.completed_at.is_none());

        run.succeed(json!([{"id": "t"}])).expect("succeed");
        assert_eq!(run.status, RunStatus::Succeeded);
        assert!(run.completed_at >= run.started_at);
        assert!(run.return_values.is_some());
    }

    #[test]
    fn terminal_run_cannot_transition_again() {
        let mut run = WorkflowRun::start(WorkflowId::new());
        run.fail().expect("fail");
        let completed_at = run.completed_at;

        let err = run.succeed(json!([])).unwrap_err();
        assert_eq!(err.from, RunStatus::Failed);
        assert_eq!(err.to, RunStatus::Succeeded);
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.completed_at, completed_at);
        assert!(run.return_values.is_none());
    }

    #[test]
    fn pending_run_cannot_complete() {
        let mut run = WorkflowRun {
            status: RunStatus::Pending,
            started_at: None,
            ..WorkflowRun::start(WorkflowId::new())
        };
        let err = run.fail().unwrap_err();
        assert_eq!(err.from, RunStatus::Pending);
        assert_eq!(run.status, RunStatus::Pending);
    }

    #[test]
    fn run_serializes_camel_case() {
        let run = WorkflowRun::start(WorkflowId::new());
        let value = serde_json::to_value(&run).expect("serialize");
        assert_eq!(value["status"], "running");
        assert!(value.get("startedAt").is_some());
        assert!(value.get("returnValues").is_some());
    }

    #[test]
    fn node_outcome_is_tagged_by_status() {
        let outcome = NodeOutcome::Failed {
            error_type: "Unauthorized".to_string(),
            message: "expired".to_string(),
        };
        let value = serde_json::to_value(&outcome).expect("serialize");
        assert_eq!(
            value,
            json!({"status": "failed", "errorType": "Unauthorized", "message": "expired"})
        );
    }

    #[test]
    fn report_lists_skipped_and_failed() {
        let mut report = ExecutionReport::default();
        report.outcomes.insert(
            NodeId::from("b"),
            NodeOutcome::Skipped {
                upstream: NodeId::from("a"),
            },
        );
        report.outcomes.insert(
            NodeId::from("a"),
            NodeOutcome::Failed {
                error_type: "Network Error".to_string(),
                message: "down".to_string(),
            },
        );
        report
            .outcomes
            .insert(NodeId::from("c"), NodeOutcome::Succeeded { count: 2 });

        assert_eq!(report.skipped(), vec![&NodeId::from("b")]);
        assert_eq!(report.failed(), vec![&NodeId::from("a")]);
        assert!(report.outcome("c").is_some());
    }
}
