//! Static checks over a workflow.
//!
//! Validation never stops at the first problem: every violation is collected
//! into a [`ValidationReport`] so all of them can be shown at once. A
//! workflow that passes is wrapped in a [`ValidatedWorkflow`], which the
//! engine executes without checking again.

use crate::definition::{Node, NodeId, Workflow};
use crate::graph::WorkflowGraph;
use crate::node::{NodeRegistry, NodeRole};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// The class of a validation defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    DuplicateNodeId,
    UnknownNodeReference,
    UpstreamMismatch,
    Cycle,
    InvalidParams,
    OrphanOperation,
    SourceHasInput,
    NoTerminalNode,
    EmptyGraph,
}

/// One semantic defect in a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    /// The node the defect is about; absent for graph-wide defects.
    pub node_id: Option<NodeId>,
    pub detail: String,
}

impl ValidationError {
    fn node(kind: ValidationErrorKind, node_id: &NodeId, detail: impl Into<String>) -> Self {
        Self {
            kind,
            node_id: Some(node_id.clone()),
            detail: detail.into(),
        }
    }

    fn graph(kind: ValidationErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            node_id: None,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(id) => write!(f, "{:?} at node '{id}': {}", self.kind, self.detail),
            None => write!(f, "{:?}: {}", self.kind, self.detail),
        }
    }
}

/// The outcome of validating one workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// True iff `errors` is empty.
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Errors of one kind.
    pub fn of_kind(&self, kind: ValidationErrorKind) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter().filter(move |e| e.kind == kind)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.valid {
            return write!(f, "workflow is valid");
        }
        let lines: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        write!(f, "{}", lines.join("\n"))
    }
}

impl std::error::Error for ValidationReport {}

/// A workflow that passed validation, with its adjacency and execution order.
#[derive(Debug, Clone)]
pub struct ValidatedWorkflow {
    workflow: Workflow,
    graph: WorkflowGraph,
    order: Vec<NodeId>,
}

impl ValidatedWorkflow {
    #[must_use]
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    #[must_use]
    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Deterministic topological order (ties by ascending id).
    #[must_use]
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }
}

/// Validates workflows against a node registry.
#[derive(Debug, Clone, Copy)]
pub struct Validator<'a> {
    registry: &'a NodeRegistry,
}

impl<'a> Validator<'a> {
    #[must_use]
    pub fn new(registry: &'a NodeRegistry) -> Self {
        Self { registry }
    }

    /// Collects every defect in `workflow`.
    #[must_use]
    pub fn validate(&self, workflow: &Workflow) -> ValidationReport {
        let graph = WorkflowGraph::from_workflow(workflow);
        ValidationReport::from_errors(self.collect(workflow, &graph).0)
    }

    /// Validates and, on success, wraps the workflow for execution.
    ///
    /// # Errors
    ///
    /// Returns the full report if any defect was found.
    pub fn check(&self, workflow: Workflow) -> Result<ValidatedWorkflow, ValidationReport> {
        let graph = WorkflowGraph::from_workflow(&workflow);
        let (errors, order) = self.collect(&workflow, &graph);
        match order {
            Some(order) if errors.is_empty() => Ok(ValidatedWorkflow {
                workflow,
                graph,
                order,
            }),
            _ => Err(ValidationReport::from_errors(errors)),
        }
    }

    fn collect(
        &self,
        workflow: &Workflow,
        graph: &WorkflowGraph,
    ) -> (Vec<ValidationError>, Option<Vec<NodeId>>) {
        use ValidationErrorKind as Kind;

        let mut errors = Vec::new();

        if workflow.node_count() == 0 {
            errors.push(ValidationError::graph(
                Kind::EmptyGraph,
                "workflow has no sources or operations",
            ));
        }

        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        for node in workflow.nodes() {
            if !seen.insert(node.id().clone()) && reported.insert(node.id().clone()) {
                errors.push(ValidationError::node(
                    Kind::DuplicateNodeId,
                    node.id(),
                    format!("node id '{}' is declared more than once", node.id()),
                ));
            }
        }

        let mut inbound: HashMap<&NodeId, Vec<NodeId>> = HashMap::new();
        for connection in &workflow.connections {
            for (end, id) in [("source", &connection.source), ("target", &connection.target)] {
                if !graph.contains(id) {
                    errors.push(ValidationError::node(
                        Kind::UnknownNodeReference,
                        id,
                        format!(
                            "connection '{}' {end} '{id}' does not exist",
                            connection.id
                        ),
                    ));
                }
            }
            inbound
                .entry(&connection.target)
                .or_default()
                .push(connection.source.clone());
        }

        for source in &workflow.sources {
            if let Some(from) = inbound.get(&source.id) {
                errors.push(ValidationError::node(
                    Kind::SourceHasInput,
                    &source.id,
                    format!("source has {} inbound connection(s)", from.len()),
                ));
            }
        }

        for operation in &workflow.operations {
            for upstream in &operation.sources {
                if !graph.contains(upstream) {
                    errors.push(ValidationError::node(
                        Kind::UnknownNodeReference,
                        &operation.id,
                        format!("declared upstream '{upstream}' does not exist"),
                    ));
                }
            }

            let mut declared = operation.sources.clone();
            declared.sort();
            let mut actual = inbound.get(&operation.id).cloned().unwrap_or_default();
            actual.sort();
            if !actual.is_empty() && declared != actual {
                errors.push(ValidationError::node(
                    Kind::UpstreamMismatch,
                    &operation.id,
                    format!(
                        "declared upstream [{}] but connected from [{}]",
                        join_ids(&declared),
                        join_ids(&actual)
                    ),
                ));
            }
        }

        let order = match graph.topological_order() {
            Ok(order) => Some(order),
            Err(cycle) => {
                let members = join_ids(&cycle.remaining);
                for id in &cycle.remaining {
                    errors.push(ValidationError::node(
                        Kind::Cycle,
                        id,
                        format!("node participates in a cycle among [{members}]"),
                    ));
                }
                None
            }
        };

        for node in workflow.nodes() {
            if let Err(detail) = self.check_kind(&node) {
                errors.push(ValidationError::node(Kind::InvalidParams, node.id(), detail));
            }
        }

        for operation in &workflow.operations {
            if !inbound.contains_key(&operation.id) {
                errors.push(ValidationError::node(
                    Kind::OrphanOperation,
                    &operation.id,
                    "operation has no inbound connections",
                ));
            }
        }

        if graph.node_count() > 0 && graph.terminal_nodes().is_empty() {
            errors.push(ValidationError::graph(
                Kind::NoTerminalNode,
                "every node has an outgoing connection",
            ));
        }

        (errors, order)
    }

    fn check_kind(&self, node: &Node) -> Result<(), String> {
        let Some(kind) = self.registry.get(node.kind()) else {
            return Err(format!("unknown node type '{}'", node.kind()));
        };

        let declared_as = if node.is_source() {
            NodeRole::Source
        } else {
            NodeRole::Operation
        };
        if kind.role() != declared_as {
            return Err(format!(
                "type '{}' is a {:?} kind but is declared as a {declared_as:?}",
                node.kind(),
                kind.role()
            ));
        }

        if !node.is_source() && !kind.arity().accepts(node.upstream().len()) {
            return Err(format!(
                "type '{}' takes {}, got {} upstream",
                node.kind(),
                kind.arity(),
                node.upstream().len()
            ));
        }

        kind.validate_params(node.params()).map_err(|e| e.reason)
    }
}

fn join_ids(ids: &[NodeId]) -> String {
    ids.iter().map(NodeId::as_str).collect::<Vec<_>>().join(", ")
}

/// Validates against the built-in registry.
#[must_use]
pub fn validate(workflow: &Workflow) -> ValidationReport {
    Validator::new(&NodeRegistry::shared_builtin()).validate(workflow)
}
