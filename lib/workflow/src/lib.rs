//! Workflow engine for the mixtape platform.
//!
//! This crate provides the core workflow graph engine, including:
//!
//! - **Graph Model**: workflow definitions and a petgraph adjacency view
//! - **Validation**: every semantic defect collected into one report
//! - **Node Kinds**: registrable sources and collection transforms
//! - **Execution**: deterministic, bounded-concurrency runs with aggregated failures
//! - **Run Lifecycle**: the `pending -> running -> succeeded | failed` record

pub mod content;
pub mod definition;
pub mod engine;
pub mod error;
pub mod execution;
pub mod graph;
pub mod node;
pub mod source;
pub mod transform;
pub mod validation;

pub use content::{
    Collection, ContentApi, ContentError, Credentials, InMemoryContentApi, ResourceKind, TimeRange,
    Track,
};
pub use definition::{Connection, Node, NodeId, Operation, Source, Workflow};
pub use engine::{Engine, EngineConfig};
pub use error::{
    AggregatedExecutionError, ErrorPair, MalformedGraphError, NodeError, NodeFailure, ParamError,
    RunError, parse_error_pairs,
};
pub use execution::{
    ExecutionReport, ExecutionResult, InvalidTransition, NodeOutcome, RunStatus, WorkflowRun,
};
pub use graph::{CycleError, WorkflowGraph};
pub use node::{Arity, ExecutionContext, NodeKind, NodeRegistry, NodeRole};
pub use validation::{
    ValidatedWorkflow, ValidationError, ValidationErrorKind, ValidationReport, Validator, validate,
};
