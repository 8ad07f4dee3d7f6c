//! The execution engine.
//!
//! Candidates are considered in the validated topological order. A node
//! starts once every declared upstream has finished and fewer than
//! `max_concurrency` nodes are running. A node whose upstream failed or was
//! skipped is itself skipped, while unrelated branches keep going. Every
//! failure in the run is collected into one `AggregatedExecutionError`.

use crate::content::{Collection, ContentApi, Credentials};
use crate::definition::{Node, NodeId, Workflow};
use crate::error::{AggregatedExecutionError, NodeError, NodeFailure, RunError};
use crate::execution::{ExecutionReport, ExecutionResult, NodeOutcome};
use crate::node::{ExecutionContext, NodeKind, NodeRegistry};
use crate::validation::{ValidatedWorkflow, ValidationReport, Validator};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Most nodes of one run executing at the same time.
    pub max_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_concurrency: 4 }
    }
}

/// Runs workflows against a content API.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<NodeRegistry>,
    content: Arc<dyn ContentApi>,
    config: EngineConfig,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

enum Dispatch {
    Ready(Vec<Collection>),
    Blocked(NodeId),
    Waiting,
}

impl Engine {
    /// Creates an engine with the built-in node kinds and default config.
    #[must_use]
    pub fn new(content: Arc<dyn ContentApi>) -> Self {
        Self {
            registry: NodeRegistry::shared_builtin(),
            content,
            config: EngineConfig::default(),
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: Arc<NodeRegistry>) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// Validates a workflow against this engine's registry.
    ///
    /// # Errors
    ///
    /// Returns the full validation report if the workflow is invalid.
    pub fn prepare(&self, workflow: Workflow) -> Result<ValidatedWorkflow, ValidationReport> {
        Validator::new(&self.registry).check(workflow)
    }

    /// Validates and executes a workflow.
    ///
    /// # Errors
    ///
    /// Returns `RunError::Invalid` without executing anything if validation
    /// fails, or `RunError::Failed` if any node failed.
    #[instrument(skip(self, workflow, credentials), fields(workflow_id = %workflow.id))]
    pub async fn run(
        &self,
        workflow: &Workflow,
        credentials: &Credentials,
    ) -> Result<ExecutionResult, RunError> {
        let validated = self.prepare(workflow.clone()).map_err(|report| {
            warn!(errors = report.errors.len(), "refusing to execute invalid workflow");
            RunError::Invalid(report)
        })?;
        self.execute(&validated, credentials)
            .await
            .map_err(RunError::Failed)
    }

    /// Executes an already-validated workflow.
    ///
    /// # Errors
    ///
    /// Returns `AggregatedExecutionError` carrying every node failure and the
    /// partial report if any node failed.
    #[instrument(
        skip(self, validated, credentials),
        fields(workflow_id = %validated.workflow().id)
    )]
    pub async fn execute(
        &self,
        validated: &ValidatedWorkflow,
        credentials: &Credentials,
    ) -> Result<ExecutionResult, AggregatedExecutionError> {
        let graph = validated.graph();
        let order = validated.order();
        let limit = self.config.max_concurrency.max(1);

        let mut report = ExecutionReport {
            order: order.to_vec(),
            ..ExecutionReport::default()
        };
        let mut errors: HashMap<NodeId, NodeError> = HashMap::new();
        let mut in_flight = FuturesUnordered::new();
        let mut pending: Vec<&NodeId> = order.iter().collect();

        loop {
            let mut waiting = Vec::with_capacity(pending.len());
            for id in pending {
                let Some(node) = graph.node(id) else {
                    continue;
                };
                if in_flight.len() >= limit {
                    waiting.push(id);
                    continue;
                }

                match dispatch(node, &report) {
                    Dispatch::Waiting => waiting.push(id),
                    Dispatch::Blocked(upstream) => {
                        debug!(node_id = %id, %upstream, "skipping node after upstream failure");
                        report
                            .outcomes
                            .insert(id.clone(), NodeOutcome::Skipped { upstream });
                    }
                    Dispatch::Ready(inputs) => match self.registry.get(node.kind()) {
                        Some(kind) => {
                            debug!(node_id = %id, kind = node.kind(), "starting node");
                            in_flight.push(run_node(
                                id.clone(),
                                kind,
                                node.params(),
                                inputs,
                                self.content.as_ref(),
                                credentials,
                            ));
                        }
                        None => {
                            let error = NodeError::UnknownKind {
                                type_name: node.kind().to_string(),
                            };
                            record_failure(&mut report, &mut errors, id.clone(), error);
                        }
                    },
                }
            }
            pending = waiting;

            let Some((id, result)) = in_flight.next().await else {
                break;
            };
            match result {
                Ok(collection) => {
                    debug!(node_id = %id, tracks = collection.len(), "node succeeded");
                    report.outcomes.insert(
                        id.clone(),
                        NodeOutcome::Succeeded {
                            count: collection.len(),
                        },
                    );
                    report.outputs.insert(id, collection);
                }
                Err(error) => {
                    warn!(node_id = %id, error = %error, "node failed");
                    record_failure(&mut report, &mut errors, id, error);
                }
            }
        }

        for terminal in graph.terminal_nodes() {
            if let Some(output) = report.outputs.get(terminal.id()) {
                report
                    .terminal_outputs
                    .insert(terminal.id().clone(), output.clone());
            }
        }

        if errors.is_empty() {
            let output: Collection = report.terminal_outputs.values().flatten().cloned().collect();
            info!(nodes = order.len(), tracks = output.len(), "workflow run succeeded");
            return Ok(ExecutionResult { output, report });
        }

        let mut failures: Vec<NodeFailure> = errors
            .into_iter()
            .filter_map(|(id, error)| {
                graph.node(&id).map(|node| NodeFailure {
                    node: node.clone(),
                    error,
                })
            })
            .collect();
        failures.sort_by(|a, b| a.node.id().cmp(b.node.id()));
        info!(
            failed = failures.len(),
            skipped = report.skipped().len(),
            "workflow run failed"
        );
        Err(AggregatedExecutionError { failures, report })
    }
}

fn dispatch(node: &Node, report: &ExecutionReport) -> Dispatch {
    let mut inputs = Vec::with_capacity(node.upstream().len());
    for upstream in node.upstream() {
        match report.outcomes.get(upstream) {
            None => return Dispatch::Waiting,
            Some(NodeOutcome::Failed { .. } | NodeOutcome::Skipped { .. }) => {
                return Dispatch::Blocked(upstream.clone());
            }
            Some(NodeOutcome::Succeeded { .. }) => {
                inputs.push(report.outputs.get(upstream).cloned().unwrap_or_default());
            }
        }
    }
    Dispatch::Ready(inputs)
}

fn record_failure(
    report: &mut ExecutionReport,
    errors: &mut HashMap<NodeId, NodeError>,
    id: NodeId,
    error: NodeError,
) {
    report.outcomes.insert(
        id.clone(),
        NodeOutcome::Failed {
            error_type: error.kind_label(),
            message: error.to_string(),
        },
    );
    errors.insert(id, error);
}

async fn run_node(
    id: NodeId,
    kind: Arc<dyn NodeKind>,
    params: &JsonValue,
    inputs: Vec<Collection>,
    content: &dyn ContentApi,
    credentials: &Credentials,
) -> (NodeId, Result<Collection, NodeError>) {
    let ctx = ExecutionContext {
        content,
        credentials,
    };
    let result = kind.execute(params, inputs, &ctx).await;
    (id, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentError, InMemoryContentApi, ResourceKind, TimeRange, Track};
    use crate::error::{OPERATION_SEPARATOR, parse_error_pairs};
    use crate::validation::ValidationErrorKind;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn creds() -> Credentials {
        Credentials::bearer("token")
    }

    fn tracks(prefix: &str, n: usize) -> Collection {
        (0..n)
            .map(|i| Track::new(format!("{prefix}{i}"), format!("{prefix} track {i}")))
            .collect()
    }

    fn api() -> InMemoryContentApi {
        InMemoryContentApi::new()
            .with_playlist("p1", tracks("a", 3))
            .with_playlist("p2", tracks("b", 2))
            .with_saved_tracks(tracks("s", 4))
    }

    fn engine(api: InMemoryContentApi) -> (Engine, Arc<InMemoryContentApi>) {
        let api = Arc::new(api);
        (Engine::new(api.clone()), api)
    }

    fn ids(collection: &Collection) -> Vec<&str> {
        collection.iter().map(|t| t.id.as_str()).collect()
    }

    #[tokio::test]
    async fn single_source_returns_its_collection_unchanged() {
        let (engine, _) = engine(api());
        let workflow =
            Workflow::new("identity").with_source("src", "playlist", json!({"playlistId": "p1"}));
        let result = engine.run(&workflow, &creds()).await.expect("run");
        assert_eq!(result.output, tracks("a", 3));
    }

    #[tokio::test]
    async fn merge_then_limit_produces_terminal_output() {
        let (engine, _) = engine(api());
        let workflow = Workflow::new("mix")
            .with_source("a", "playlist", json!({"playlistId": "p1"}))
            .with_source("b", "playlist", json!({"playlistId": "p2"}))
            .with_operation("m", "merge", json!({}), &["b", "a"])
            .with_operation("l", "limit", json!({"count": 4}), &["m"]);
        let result = engine.run(&workflow, &creds()).await.expect("run");
        assert_eq!(ids(&result.output), vec!["b0", "b1", "a0", "a1"]);
        assert_eq!(result.report.terminal_outputs.len(), 1);
    }

    #[tokio::test]
    async fn execution_order_is_deterministic() {
        let (engine, api) = engine(api());
        let workflow = Workflow::new("order")
            .with_source("z", "saved_tracks", json!({}))
            .with_source("a", "playlist", json!({"playlistId": "p1"}))
            .with_source("m", "playlist", json!({"playlistId": "p2"}))
            .with_operation("join", "merge", json!({}), &["z", "a", "m"]);

        let first = engine.run(&workflow, &creds()).await.expect("run");
        for _ in 0..5 {
            let again = engine.run(&workflow, &creds()).await.expect("run");
            assert_eq!(again.report.order, first.report.order);
            assert_eq!(again.output, first.output);
        }
        let order: Vec<&str> = first.report.order.iter().map(NodeId::as_str).collect();
        assert_eq!(order, vec!["a", "m", "z", "join"]);
        assert_eq!(api.calls().len(), 18);
    }

    #[tokio::test]
    async fn invalid_workflow_is_not_executed() {
        let (engine, api) = engine(api());
        let mut workflow =
            Workflow::new("bad").with_source("a", "playlist", json!({"playlistId": "p1"}));
        workflow.connect("a", "ghost");
        let err = engine.run(&workflow, &creds()).await.unwrap_err();
        match err {
            RunError::Invalid(report) => {
                assert_eq!(report.errors[0].kind, ValidationErrorKind::UnknownNodeReference);
            }
            RunError::Failed(e) => panic!("expected validation failure, got {e}"),
        }
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn two_failing_branches_produce_two_parseable_lines() {
        let (engine, _) = engine(api().with_failure(
            "saved",
            ContentError::RateLimited {
                retry_after_secs: None,
            },
        ));
        let workflow = Workflow::new("two failures")
            .with_source("x", "playlist", json!({"playlistId": "missing"}))
            .with_source("y", "saved_tracks", json!({}))
            .with_operation("m", "merge", json!({}), &["x", "y"]);

        let RunError::Failed(err) = engine.run(&workflow, &creds()).await.unwrap_err() else {
            panic!("expected execution failure");
        };
        let message = err.to_string();
        let lines: Vec<&str> = message.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.contains(OPERATION_SEPARATOR)));

        let pairs = parse_error_pairs(&message);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].error_type, "Playlist");
        assert_eq!(pairs[0].operation["id"], "x");
        assert_eq!(pairs[1].error_type, "Rate Limited");
        assert_eq!(pairs[1].operation["id"], "y");
        assert_eq!(pairs, err.pairs());

        assert_eq!(err.report.skipped(), vec![&NodeId::from("m")]);
    }

    #[tokio::test]
    async fn independent_branch_survives_sibling_failure() {
        let (engine, api) = engine(api());
        let workflow = Workflow::new("partial")
            .with_source("x", "playlist", json!({"playlistId": "missing"}))
            .with_operation("x_limit", "limit", json!({"count": 1}), &["x"])
            .with_operation("x_sorted", "sort", json!({"by": "name"}), &["x_limit"])
            .with_source("y", "playlist", json!({"playlistId": "p2"}))
            .with_operation("y_limit", "limit", json!({"count": 1}), &["y"]);

        let RunError::Failed(err) = engine.run(&workflow, &creds()).await.unwrap_err() else {
            panic!("expected execution failure");
        };
        assert_eq!(err.failures.len(), 1);
        assert_eq!(
            err.failures[0].error,
            NodeError::Content(ContentError::NotFound {
                resource: ResourceKind::Playlist,
                id: "missing".to_string()
            })
        );
        assert_eq!(
            err.report.terminal_outputs.get("y_limit").map(|c| ids(c)),
            Some(vec!["b0"])
        );
        assert_eq!(
            err.report.skipped(),
            vec![&NodeId::from("x_limit"), &NodeId::from("x_sorted")]
        );
        assert_eq!(
            err.report.outcome("x_sorted"),
            Some(&NodeOutcome::Skipped {
                upstream: NodeId::from("x_limit")
            })
        );
        assert!(!api.calls().iter().any(|c| c.starts_with("write")));
    }

    #[tokio::test]
    async fn expired_credential_requires_reauth() {
        let (engine, _) = engine(api().with_expired_token("stale"));
        let workflow =
            Workflow::new("auth").with_source("a", "playlist", json!({"playlistId": "p1"}));
        let err = engine
            .run(&workflow, &Credentials::bearer("stale"))
            .await
            .unwrap_err();
        assert!(err.requires_reauth());
        assert!(err.to_string().starts_with("Unauthorized in operation: "));
    }

    #[tokio::test]
    async fn multiple_terminals_are_concatenated_by_id() {
        let (engine, _) = engine(api().with_top_tracks(TimeRange::Short, tracks("t", 2)));
        let workflow = Workflow::new("fanout")
            .with_source("src", "top_tracks", json!({"timeRange": "short"}))
            .with_operation("z_out", "limit", json!({"count": 1}), &["src"])
            .with_operation("a_out", "sort", json!({"by": "name", "descending": true}), &["src"]);
        let result = engine.run(&workflow, &creds()).await.expect("run");
        assert_eq!(ids(&result.output), vec!["t1", "t0", "t0"]);
        assert_eq!(result.report.terminal_outputs.len(), 2);
    }

    #[tokio::test]
    async fn save_to_playlist_writes_result() {
        let (engine, api) = engine(api());
        let workflow = Workflow::new("save")
            .with_source("a", "playlist", json!({"playlistId": "p1"}))
            .with_operation("out", "save_to_playlist", json!({"playlistId": "target"}), &["a"]);
        let result = engine.run(&workflow, &creds()).await.expect("run");
        assert_eq!(result.output.len(), 3);
        assert_eq!(
            api.written("target"),
            Some(vec!["a0".to_string(), "a1".to_string(), "a2".to_string()])
        );
    }

    #[tokio::test]
    async fn prepared_workflow_executes_without_revalidating() {
        let (engine, _) = engine(api());
        let workflow =
            Workflow::new("fast").with_source("a", "playlist", json!({"playlistId": "p2"}));
        let validated = engine.prepare(workflow).expect("valid");
        let result = engine.execute(&validated, &creds()).await.expect("execute");
        assert_eq!(result.output.len(), 2);
    }

    struct SlowApi {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ContentApi for SlowApi {
        async fn playlist_tracks(
            &self,
            _credentials: &Credentials,
            playlist_id: &str,
        ) -> Result<Collection, ContentError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![Track::new(playlist_id, playlist_id)])
        }

        async fn saved_tracks(
            &self,
            _: &Credentials,
            _: usize,
        ) -> Result<Collection, ContentError> {
            Ok(Vec::new())
        }

        async fn top_tracks(
            &self,
            _: &Credentials,
            _: TimeRange,
            _: usize,
        ) -> Result<Collection, ContentError> {
            Ok(Vec::new())
        }

        async fn replace_playlist_tracks(
            &self,
            _: &Credentials,
            _: &str,
            _: &[String],
        ) -> Result<(), ContentError> {
            Ok(())
        }
    }

    async fn peak_concurrency(max_concurrency: usize) -> usize {
        let api = Arc::new(SlowApi {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let engine = Engine::new(api.clone()).with_config(EngineConfig { max_concurrency });
        let workflow = Workflow::new("wide")
            .with_source("a", "playlist", json!({"playlistId": "a"}))
            .with_source("b", "playlist", json!({"playlistId": "b"}))
            .with_source("c", "playlist", json!({"playlistId": "c"}))
            .with_operation("m", "merge", json!({}), &["a", "b", "c"]);
        let result = engine.run(&workflow, &creds()).await.expect("run");
        assert_eq!(ids(&result.output), vec!["a", "b", "c"]);
        api.peak.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn independent_branches_run_concurrently_within_limit() {
        assert_eq!(peak_concurrency(2).await, 2);
        assert_eq!(peak_concurrency(1).await, 1);
        assert_eq!(peak_concurrency(8).await, 3);
    }
}
