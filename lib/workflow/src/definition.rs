//! Workflow definition types.
//!
//! A workflow is the serialized form the editor saves:
//! - Sources: nodes that fetch an initial collection
//! - Operations: nodes that transform the outputs of their declared upstreams
//! - Connections: directed edges between node ids
//!
//! Parsing only checks structure. Semantic defects (dangling connections,
//! cycles, bad params) are reported by the validator.

use crate::error::MalformedGraphError;
use mixtape_core::WorkflowId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::borrow::Borrow;
use std::fmt;

/// A node identifier, unique within one workflow and chosen by its author.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

fn empty_params() -> JsonValue {
    JsonValue::Object(serde_json::Map::new())
}

/// A node with no inputs that fetches a collection from the content API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: NodeId,
    /// Registered source kind (e.g. "playlist").
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "empty_params")]
    pub params: JsonValue,
}

impl Source {
    #[must_use]
    pub fn new(id: impl Into<NodeId>, kind: impl Into<String>, params: JsonValue) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            params,
        }
    }
}

/// A node that transforms the outputs of its declared upstream nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: NodeId,
    /// Registered operation kind (e.g. "merge").
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "empty_params")]
    pub params: JsonValue,
    /// Upstream node ids, in the order their outputs are consumed.
    pub sources: Vec<NodeId>,
}

impl Operation {
    #[must_use]
    pub fn new(
        id: impl Into<NodeId>,
        kind: impl Into<String>,
        params: JsonValue,
        sources: Vec<NodeId>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            params,
            sources,
        }
    }
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
}

/// Either kind of workflow node.
///
/// Serializes as the underlying definition, which is the form embedded in
/// aggregated execution errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Node {
    Source(Source),
    Operation(Operation),
}

impl Node {
    #[must_use]
    pub fn id(&self) -> &NodeId {
        match self {
            Self::Source(s) => &s.id,
            Self::Operation(o) => &o.id,
        }
    }

    /// The registered type tag.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Source(s) => &s.kind,
            Self::Operation(o) => &o.kind,
        }
    }

    #[must_use]
    pub fn params(&self) -> &JsonValue {
        match self {
            Self::Source(s) => &s.params,
            Self::Operation(o) => &o.params,
        }
    }

    /// Declared upstream ids; always empty for sources.
    #[must_use]
    pub fn upstream(&self) -> &[NodeId] {
        match self {
            Self::Source(_) => &[],
            Self::Operation(o) => &o.sources,
        }
    }

    #[must_use]
    pub fn is_source(&self) -> bool {
        matches!(self, Self::Source(_))
    }
}

/// A complete workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub sources: Vec<Source>,
    pub operations: Vec<Operation>,
    pub connections: Vec<Connection>,
}

impl Workflow {
    /// Creates an empty workflow with a fresh id.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(WorkflowId::new(), name)
    }

    /// Creates an empty workflow with a specific id.
    #[must_use]
    pub fn with_id(id: WorkflowId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            sources: Vec::new(),
            operations: Vec::new(),
            connections: Vec::new(),
        }
    }

    /// Adds a source node.
    #[must_use]
    pub fn with_source(mut self, id: &str, kind: &str, params: JsonValue) -> Self {
        self.sources.push(Source::new(id, kind, params));
        self
    }

    /// Adds an operation and one connection from each declared upstream.
    #[must_use]
    pub fn with_operation(
        mut self,
        id: &str,
        kind: &str,
        params: JsonValue,
        sources: &[&str],
    ) -> Self {
        for source in sources {
            self.connect(source, id);
        }
        self.operations.push(Operation::new(
            id,
            kind,
            params,
            sources.iter().map(|s| NodeId::from(*s)).collect(),
        ));
        self
    }

    /// Appends a connection with a generated id.
    pub fn connect(&mut self, source: &str, target: &str) {
        let id = format!("{source}->{target}#{}", self.connections.len());
        self.connections.push(Connection {
            id,
            source: NodeId::from(source),
            target: NodeId::from(target),
        });
    }

    /// Parses a workflow from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns `MalformedGraphError` if required fields are absent or of the
    /// wrong shape.
    pub fn from_json(json: &str) -> Result<Self, MalformedGraphError> {
        let value: JsonValue = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parses a workflow from an already-decoded JSON value.
    ///
    /// # Errors
    ///
    /// Returns `MalformedGraphError` if required fields are absent or of the
    /// wrong shape.
    pub fn from_value(value: JsonValue) -> Result<Self, MalformedGraphError> {
        if !value.is_object() {
            return Err(MalformedGraphError::new("expected a JSON object"));
        }
        let workflow: Self = serde_json::from_value(value)?;

        for (i, source) in workflow.sources.iter().enumerate() {
            if !source.params.is_object() {
                return Err(MalformedGraphError::at(
                    format!("sources[{i}].params"),
                    "expected an object",
                ));
            }
        }
        for (i, operation) in workflow.operations.iter().enumerate() {
            if !operation.params.is_object() {
                return Err(MalformedGraphError::at(
                    format!("operations[{i}].params"),
                    "expected an object",
                ));
            }
        }

        Ok(workflow)
    }

    /// Serializes the workflow to JSON.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    /// Returns every node, sources first, in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = Node> + '_ {
        self.sources
            .iter()
            .cloned()
            .map(Node::Source)
            .chain(self.operations.iter().cloned().map(Node::Operation))
    }

    /// Returns the total number of declared nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.sources.len() + self.operations.len()
    }
}
