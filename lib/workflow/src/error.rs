//! Error types for the workflow crate.
//!
//! - `MalformedGraphError`: the serialized workflow could not be parsed
//! - `ParamError`: a node's params do not satisfy its kind's schema
//! - `NodeError`: one node failed while executing
//! - `AggregatedExecutionError`: every node failure from one run
//! - `RunError`: what `Engine::run` returns when a run does not succeed
//!
//! Validation defects are not errors here: they are collected into a
//! `ValidationReport` (see the validation module).

use crate::content::ContentError;
use crate::definition::Node;
use crate::execution::ExecutionReport;
use crate::validation::ValidationReport;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Separator between the error kind and the node definition in each line
/// of an aggregated execution error message.
pub const OPERATION_SEPARATOR: &str = " in operation: ";

/// Structural parse failure of a serialized workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedGraphError {
    /// Where in the document the problem was found, if known.
    pub path: Option<String>,
    /// What was wrong.
    pub reason: String,
}

impl MalformedGraphError {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            path: None,
            reason: reason.into(),
        }
    }

    pub(crate) fn at(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for MalformedGraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "malformed workflow graph at {path}: {}", self.reason),
            None => write!(f, "malformed workflow graph: {}", self.reason),
        }
    }
}

impl std::error::Error for MalformedGraphError {}

impl From<serde_json::Error> for MalformedGraphError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// A node's params violate the schema registered for its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamError {
    pub reason: String,
}

impl ParamError {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid params: {}", self.reason)
    }
}

impl std::error::Error for ParamError {}

/// A failure while executing a single node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The external content API rejected or failed the call.
    Content(ContentError),
    /// Params could not be decoded at execution time.
    InvalidParams(ParamError),
    /// A transform precondition did not hold for its inputs.
    Precondition { reason: String },
    /// No kind is registered for the node's type.
    UnknownKind { type_name: String },
}

impl NodeError {
    /// The error kind as it appears on the wire, before `" in operation: "`.
    #[must_use]
    pub fn kind_label(&self) -> String {
        match self {
            Self::Content(ContentError::AuthExpired) => "Unauthorized".to_string(),
            Self::Content(ContentError::RateLimited { .. }) => "Rate Limited".to_string(),
            Self::Content(ContentError::NotFound { resource, .. }) => {
                format!("Invalid {}", resource.label())
            }
            Self::Content(ContentError::Transient { .. }) => "Network Error".to_string(),
            Self::InvalidParams(_) => "Invalid Parameters".to_string(),
            Self::Precondition { .. } => "Invalid Input".to_string(),
            Self::UnknownKind { .. } => "Invalid Operation Type".to_string(),
        }
    }

    /// Returns true if the caller must re-authenticate before retrying.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Content(ContentError::AuthExpired))
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Content(e) => write!(f, "content api error: {e}"),
            Self::InvalidParams(e) => write!(f, "{e}"),
            Self::Precondition { reason } => write!(f, "precondition failed: {reason}"),
            Self::UnknownKind { type_name } => write!(f, "unknown node type '{type_name}'"),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<ContentError> for NodeError {
    fn from(e: ContentError) -> Self {
        Self::Content(e)
    }
}

impl From<ParamError> for NodeError {
    fn from(e: ParamError) -> Self {
        Self::InvalidParams(e)
    }
}

/// One failed node together with its definition.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeFailure {
    pub node: Node,
    pub error: NodeError,
}

impl NodeFailure {
    /// Formats the failure as one wire line: `"<Kind> in operation: <json>"`.
    #[must_use]
    pub fn to_line(&self) -> String {
        let definition = serde_json::to_string(&self.node).unwrap_or_else(|_| "{}".to_string());
        format!("{}{OPERATION_SEPARATOR}{definition}", self.error.kind_label())
    }
}

/// Every node-level failure from one run, plus the partial report.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedExecutionError {
    /// Failures ordered by node id.
    pub failures: Vec<NodeFailure>,
    /// Outcomes and outputs of every node, including branches that succeeded.
    pub report: ExecutionReport,
}

impl AggregatedExecutionError {
    /// Returns true if any node failed because the credential expired.
    #[must_use]
    pub fn requires_reauth(&self) -> bool {
        self.failures.iter().any(|f| f.error.is_auth())
    }

    /// Returns the structured `{errorType, operation}` pairs.
    #[must_use]
    pub fn pairs(&self) -> Vec<ErrorPair> {
        self.failures
            .iter()
            .map(|f| ErrorPair {
                error_type: strip_invalid_prefix(&f.error.kind_label()).to_string(),
                operation: serde_json::to_value(&f.node).unwrap_or(JsonValue::Null),
            })
            .collect()
    }

    /// Returns the newline-joined wire message.
    #[must_use]
    pub fn message(&self) -> String {
        self.failures
            .iter()
            .map(NodeFailure::to_line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for AggregatedExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for AggregatedExecutionError {}

/// A structured error recovered from an aggregated execution message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPair {
    pub error_type: String,
    pub operation: JsonValue,
}

fn strip_invalid_prefix(kind: &str) -> &str {
    kind.strip_prefix("Invalid ").unwrap_or(kind)
}

/// Parses an aggregated execution message back into `{errorType, operation}` pairs.
///
/// Lines without the separator are ignored. An operation that is not valid
/// JSON is kept as a string.
#[must_use]
pub fn parse_error_pairs(message: &str) -> Vec<ErrorPair> {
    message
        .lines()
        .filter_map(|line| line.split_once(OPERATION_SEPARATOR))
        .map(|(kind, operation)| ErrorPair {
            error_type: strip_invalid_prefix(kind).to_string(),
            operation: serde_json::from_str(operation)
                .unwrap_or_else(|_| JsonValue::String(operation.to_string())),
        })
        .collect()
}

/// Why a run did not produce a result.
#[derive(Debug, Clone, PartialEq)]
pub enum RunError {
    /// The workflow failed validation; nothing was executed.
    Invalid(ValidationReport),
    /// One or more nodes failed.
    Failed(AggregatedExecutionError),
}

impl RunError {
    /// Returns true if the run failed on an expired credential.
    #[must_use]
    pub fn requires_reauth(&self) -> bool {
        match self {
            Self::Invalid(_) => false,
            Self::Failed(e) => e.requires_reauth(),
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(report) => {
                write!(f, "workflow is invalid ({} errors)", report.errors.len())
            }
            Self::Failed(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RunError {}
