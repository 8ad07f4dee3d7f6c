//! Adjacency view of a workflow using petgraph.
//!
//! A `WorkflowGraph` is built once from a `Workflow` and never mutated
//! afterwards. Nodes live in the petgraph arena and edges are index-based,
//! weighted by the connection id they came from.
//!
//! Construction is lenient so the validator can inspect broken graphs:
//! the first node with a given id wins and connections whose endpoints do
//! not exist are left out.

use crate::definition::{Node, NodeId, Workflow};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, VecDeque};
use std::fmt;

/// Kahn's algorithm stopped with nodes still holding inbound edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    /// Every node that could not be ordered, ascending by id.
    pub remaining: Vec<NodeId>,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.remaining.iter().map(NodeId::as_str).collect();
        write!(f, "cycle among nodes: {}", ids.join(", "))
    }
}

impl std::error::Error for CycleError {}

/// An immutable directed graph over a workflow's nodes.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    graph: DiGraph<Node, String>,
    node_index_map: HashMap<NodeId, NodeIndex>,
}

impl WorkflowGraph {
    /// Builds the adjacency structure from a workflow's node and connection lists.
    #[must_use]
    pub fn from_workflow(workflow: &Workflow) -> Self {
        let mut graph = DiGraph::new();
        let mut node_index_map = HashMap::new();

        for node in workflow.nodes() {
            if node_index_map.contains_key(node.id()) {
                continue;
            }
            let id = node.id().clone();
            let index = graph.add_node(node);
            node_index_map.insert(id, index);
        }

        for connection in &workflow.connections {
            let (Some(&from), Some(&to)) = (
                node_index_map.get(&connection.source),
                node_index_map.get(&connection.target),
            ) else {
                continue;
            };
            graph.add_edge(from, to, connection.id.clone());
        }

        Self {
            graph,
            node_index_map,
        }
    }

    /// Returns a node by its id.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        let index = self.node_index_map.get(id)?;
        self.graph.node_weight(*index)
    }

    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.node_index_map.contains_key(id)
    }

    /// Returns all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Ids of the nodes with an edge into `id`, one entry per edge, sorted.
    #[must_use]
    pub fn inbound(&self, id: &NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Ids of the nodes `id` has an edge into, one entry per edge, sorted.
    #[must_use]
    pub fn outbound(&self, id: &NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &NodeId, direction: Direction) -> Vec<NodeId> {
        let Some(&index) = self.node_index_map.get(id) else {
            return Vec::new();
        };
        let mut ids: Vec<NodeId> = self
            .graph
            .edges_directed(index, direction)
            .map(|edge| {
                let other = match direction {
                    Direction::Incoming => edge.source(),
                    Direction::Outgoing => edge.target(),
                };
                self.graph[other].id().clone()
            })
            .collect();
        ids.sort();
        ids
    }

    /// Nodes with no inbound edges, ascending by id.
    #[must_use]
    pub fn entry_nodes(&self) -> Vec<&Node> {
        self.boundary_nodes(Direction::Incoming)
    }

    /// Nodes with no outbound edges, ascending by id.
    #[must_use]
    pub fn terminal_nodes(&self) -> Vec<&Node> {
        self.boundary_nodes(Direction::Outgoing)
    }

    fn boundary_nodes(&self, direction: Direction) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self
            .graph
            .node_indices()
            .filter(|&idx| self.graph.edges_directed(idx, direction).next().is_none())
            .map(|idx| &self.graph[idx])
            .collect();
        nodes.sort_by(|a, b| a.id().cmp(b.id()));
        nodes
    }

    /// Every node reachable from `id`, excluding `id` itself.
    #[must_use]
    pub fn descendants(&self, id: &NodeId) -> BTreeSet<NodeId> {
        let mut found = BTreeSet::new();
        let Some(&start) = self.node_index_map.get(id) else {
            return found;
        };
        let mut queue = VecDeque::from([start]);
        while let Some(index) = queue.pop_front() {
            for next in self.graph.neighbors_directed(index, Direction::Outgoing) {
                if found.insert(self.graph[next].id().clone()) {
                    queue.push_back(next);
                }
            }
        }
        found.remove(id);
        found
    }

    /// Orders every node so each edge points forward.
    ///
    /// Nodes whose in-degree reaches zero at the same time are emitted by
    /// ascending id, so a given graph always yields the same order.
    ///
    /// # Errors
    ///
    /// Returns `CycleError` naming every node left unordered.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, CycleError> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                (
                    idx,
                    self.graph.edges_directed(idx, Direction::Incoming).count(),
                )
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<(NodeId, NodeIndex)>> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&idx, _)| Reverse((self.graph[idx].id().clone(), idx)))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse((id, index))) = ready.pop() {
            order.push(id);
            for edge in self.graph.edges_directed(index, Direction::Outgoing) {
                let target = edge.target();
                if let Some(degree) = in_degree.get_mut(&target) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse((self.graph[target].id().clone(), target)));
                    }
                }
            }
        }

        if order.len() == self.graph.node_count() {
            return Ok(order);
        }

        let mut remaining: Vec<NodeId> = in_degree
            .into_iter()
            .filter(|&(_, degree)| degree > 0)
            .map(|(idx, _)| self.graph[idx].id().clone())
            .collect();
        remaining.sort();
        Err(CycleError { remaining })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn diamond() -> Workflow {
        Workflow::new("diamond")
            .with_source("a", "playlist", json!({"playlistId": "p1"}))
            .with_operation("c", "limit", json!({"count": 5}), &["a"])
            .with_operation("b", "limit", json!({"count": 5}), &["a"])
            .with_operation("d", "merge", json!({}), &["b", "c"])
    }

    fn id(s: &str) -> NodeId {
        NodeId::from(s)
    }

    #[test]
    fn adjacency_is_built_from_connections() {
        let graph = WorkflowGraph::from_workflow(&diamond());
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 4);
        assert_eq!(graph.inbound(&id("d")), vec![id("b"), id("c")]);
        assert_eq!(graph.outbound(&id("a")), vec![id("b"), id("c")]);
        assert!(graph.inbound(&id("missing")).is_empty());
    }

    #[test]
    fn entry_and_terminal_nodes() {
        let graph = WorkflowGraph::from_workflow(&diamond());
        let entries: Vec<&str> = graph.entry_nodes().iter().map(|n| n.id().as_str()).collect();
        let terminals: Vec<&str> = graph.terminal_nodes().iter().map(|n| n.id().as_str()).collect();
        assert_eq!(entries, vec!["a"]);
        assert_eq!(terminals, vec!["d"]);
    }

    #[test]
    fn topological_order_breaks_ties_by_id() {
        let graph = WorkflowGraph::from_workflow(&diamond());
        let order = graph.topological_order().expect("acyclic");
        assert_eq!(order, vec![id("a"), id("b"), id("c"), id("d")]);
    }

    #[test]
    fn topological_order_is_stable_across_calls() {
        let graph = WorkflowGraph::from_workflow(&diamond());
        let first = graph.topological_order().expect("acyclic");
        for _ in 0..10 {
            assert_eq!(graph.topological_order().expect("acyclic"), first);
        }
    }

    #[test]
    fn cycle_reports_remaining_nodes() {
        let workflow = Workflow::new("cycle")
            .with_source("s", "playlist", json!({"playlistId": "p"}))
            .with_operation("A", "merge", json!({}), &["s", "B"])
            .with_operation("B", "limit", json!({"count": 1}), &["A"]);
        let graph = WorkflowGraph::from_workflow(&workflow);
        let err = graph.topological_order().unwrap_err();
        assert_eq!(err.remaining, vec![id("A"), id("B")]);
    }

    #[test]
    fn dangling_connections_are_skipped() {
        let mut workflow = diamond();
        workflow.connect("d", "ghost");
        let graph = WorkflowGraph::from_workflow(&workflow);
        assert_eq!(graph.edge_count(), 4);
        assert!(!graph.contains(&id("ghost")));
    }

    #[test]
    fn first_duplicate_wins() {
        let workflow = Workflow::new("dup")
            .with_source("a", "playlist", json!({"playlistId": "first"}))
            .with_source("a", "playlist", json!({"playlistId": "second"}));
        let graph = WorkflowGraph::from_workflow(&workflow);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(
            graph.node(&id("a")).expect("node").params()["playlistId"],
            "first"
        );
    }

    #[test]
    fn descendants_follow_edges_transitively() {
        let graph = WorkflowGraph::from_workflow(&diamond());
        let below_b: Vec<NodeId> = graph.descendants(&id("b")).into_iter().collect();
        assert_eq!(below_b, vec![id("d")]);
        assert_eq!(graph.descendants(&id("a")).len(), 3);
        assert!(graph.descendants(&id("d")).is_empty());
    }
}
