//! Agent dependency graph
//!
//! Turns the connections of a `connect` block into a DAG between agents,
//! remembers which output feeds which input (`param_mapping`), and computes
//! an execution order with Kahn's algorithm. A cycle is a hard error: a
//! pipeline whose agents wait on each other has no order to run in.
//!
//! ```text
//! connect:
//!     c: int A.output.x -> B.input.y
//!
//! graph         = {"A": ["B"], "B": []}
//! param_mapping = {"B": {"y": ["A", "x"]}}
//! ```

use indexmap::IndexMap;
use pllm_ast::{AgentRef, Connection, Span};
use pllm_diagnostics::{Diagnostic, Stage};
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Where each input of an agent comes from: input field -> (source agent,
/// source output field).
pub type InputBindings = IndexMap<String, (String, String)>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Cyclic dependency between agents: {}", .cycle.join(" -> "))]
    CycleDetected {
        /// The agents on the cycle, first one repeated at the end
        cycle: Vec<String>,
        /// The connection that closes the cycle
        span: Span,
    },
}

impl GraphError {
    pub fn span(&self) -> Span {
        match self {
            GraphError::CycleDetected { span, .. } => *span,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GraphError::CycleDetected { .. } => "G0001",
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        self.span()
            .locate(Diagnostic::new(Stage::Graph, self.code(), self.to_string()))
    }
}

/// One connection between two agents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub span: Span,
}

/// The agents of a pipeline and the connections between them.
///
/// Nodes appear in the order they are first referenced; an agent with no
/// dependents still has an (empty) adjacency list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DependencyGraph {
    graph: IndexMap<String, Vec<String>>,
    #[serde(skip)]
    in_degree: IndexMap<String, usize>,
    param_mapping: IndexMap<String, InputBindings>,
    #[serde(skip)]
    edges: Vec<Edge>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph keyed by the agent name of each port.
    pub fn from_connections<'a>(connections: impl IntoIterator<Item = &'a Connection>) -> Self {
        Self::build(connections, |port| port.agent.node.to_string())
    }

    /// Builds the graph, naming nodes with `agent_name`.
    #[instrument(skip_all)]
    pub fn build<'a>(
        connections: impl IntoIterator<Item = &'a Connection>,
        agent_name: impl Fn(&AgentRef) -> String,
    ) -> Self {
        let mut graph = Self::new();
        for connection in connections {
            let source = agent_name(&connection.source);
            let target = agent_name(&connection.target);
            graph.bind_input(
                &target,
                connection.target.field.node.as_str(),
                &source,
                connection.source.field.node.as_str(),
            );
            graph.add_edge(source, target, connection.span);
        }
        debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "built dependency graph"
        );
        graph
    }

    /// Adds `source -> target`. Repeated edges are kept.
    pub fn add_edge(&mut self, source: impl Into<String>, target: impl Into<String>, span: Span) {
        let source = source.into();
        let target = target.into();

        self.graph.entry(source.clone()).or_default().push(target.clone());
        self.graph.entry(target.clone()).or_default();
        self.in_degree.entry(source.clone()).or_insert(0);
        *self.in_degree.entry(target.clone()).or_insert(0) += 1;
        self.edges.push(Edge {
            source,
            target,
            span,
        });
    }

    /// Records that `target.input.param` is fed by `source.output.output`.
    /// A later binding of the same input replaces an earlier one.
    pub fn bind_input(&mut self, target: &str, param: &str, source: &str, output: &str) {
        self.param_mapping
            .entry(target.to_string())
            .or_default()
            .insert(param.to_string(), (source.to_string(), output.to_string()));
    }

    pub fn graph(&self) -> &IndexMap<String, Vec<String>> {
        &self.graph
    }

    pub fn in_degree(&self) -> &IndexMap<String, usize> {
        &self.in_degree
    }

    pub fn param_mapping(&self) -> &IndexMap<String, InputBindings> {
        &self.param_mapping
    }

    /// Where the inputs of `agent` come from, if any are connected.
    pub fn inputs_of(&self, agent: &str) -> Option<&InputBindings> {
        self.param_mapping.get(agent)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.graph.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// Kahn's algorithm with a FIFO queue. The graph itself is left as is.
    pub fn topological_sort(&self) -> Result<Vec<String>, GraphError> {
        let mut in_degree = self.in_degree.clone();
        let mut queue: VecDeque<&str> = self
            .in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node, _)| node.as_str())
            .collect();
        let mut sorted = Vec::with_capacity(self.graph.len());

        while let Some(node) = queue.pop_front() {
            sorted.push(node.to_string());
            for neighbor in self.successors(node) {
                if let Some(degree) = in_degree.get_mut(neighbor.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(neighbor.as_str());
                    }
                }
            }
        }

        if sorted.len() != self.graph.len() {
            return Err(self.cycle_error(&in_degree));
        }
        Ok(sorted)
    }

    /// Kahn's algorithm one generation at a time: every agent of a layer
    /// depends only on agents of earlier layers, so a layer can run
    /// concurrently once the previous one has finished.
    pub fn layers(&self) -> Result<Vec<Vec<String>>, GraphError> {
        let mut in_degree = self.in_degree.clone();
        let mut layer: Vec<&str> = self
            .in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node, _)| node.as_str())
            .collect();
        let mut layers = Vec::new();
        let mut scheduled = 0;

        while !layer.is_empty() {
            let mut next = Vec::new();
            for node in &layer {
                for neighbor in self.successors(node) {
                    if let Some(degree) = in_degree.get_mut(neighbor.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(neighbor.as_str());
                        }
                    }
                }
            }
            scheduled += layer.len();
            layers.push(layer.iter().map(ToString::to_string).collect());
            layer = next;
        }

        if scheduled != self.graph.len() {
            return Err(self.cycle_error(&in_degree));
        }
        Ok(layers)
    }

    fn successors(&self, node: &str) -> impl Iterator<Item = &String> {
        self.graph.get(node).into_iter().flatten()
    }

    /// Builds the error from the in-degrees Kahn's algorithm left behind.
    ///
    /// Every node still holding a positive in-degree has a predecessor that
    /// is also left, so walking predecessors must come back to a node
    /// already visited.
    fn cycle_error(&self, in_degree: &IndexMap<String, usize>) -> GraphError {
        let left: FxHashSet<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(node, _)| node.as_str())
            .collect();
        let predecessor = |node: &str| {
            self.edges
                .iter()
                .find(|edge| edge.target == node && left.contains(edge.source.as_str()))
                .map(|edge| edge.source.as_str())
        };

        let mut walk: Vec<&str> = Vec::new();
        let mut current = self
            .graph
            .keys()
            .map(String::as_str)
            .find(|node| left.contains(node));
        let mut cycle: Vec<String> = Vec::new();
        while let Some(node) = current {
            if let Some(pos) = walk.iter().position(|seen| *seen == node) {
                cycle = walk[pos..].iter().rev().map(ToString::to_string).collect();
                break;
            }
            walk.push(node);
            current = predecessor(node);
        }

        // Start the cycle at its earliest-declared agent.
        if let Some(first) = cycle
            .iter()
            .enumerate()
            .min_by_key(|(_, node)| self.graph.get_index_of(node.as_str()))
            .map(|(idx, _)| idx)
        {
            cycle.rotate_left(first);
        }

        let span = match (cycle.last(), cycle.first()) {
            (Some(last), Some(first)) => self
                .edges
                .iter()
                .find(|edge| edge.source == *last && edge.target == *first)
                .map_or(Span::dummy(), |edge| edge.span),
            _ => Span::dummy(),
        };
        if let Some(first) = cycle.first().cloned() {
            cycle.push(first);
        }

        warn!(cycle = %cycle.join(" -> "), "dependency cycle");
        GraphError::CycleDetected { cycle, span }
    }

    /// `{"graph": ..., "param_mapping": ...}`
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn graph_of(edges: &[(&str, &str)]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for (source, target) in edges {
            graph.add_edge(*source, *target, Span::dummy());
        }
        graph
    }

    #[test]
    fn test_nodes_in_first_seen_order() {
        let graph = graph_of(&[("B", "C"), ("A", "B")]);
        let nodes: Vec<_> = graph.graph().keys().cloned().collect();
        assert_eq!(nodes, ["B", "C", "A"]);
        assert_eq!(graph.graph()["C"], Vec::<String>::new());
        assert_eq!(graph.in_degree()["B"], 1);
        assert_eq!(graph.in_degree()["A"], 0);
    }

    #[test]
    fn test_chain_sorts_in_dependency_order() {
        let graph = graph_of(&[("B", "C"), ("A", "B")]);
        assert_eq!(graph.topological_sort().unwrap(), ["A", "B", "C"]);
        assert_eq!(graph.layers().unwrap(), [["A"], ["B"], ["C"]]);
    }

    #[test]
    fn test_diamond() {
        let graph = graph_of(&[("A", "B"), ("A", "C"), ("B", "D"), ("C", "D")]);
        let order = graph.topological_sort().unwrap();
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert_eq!(order.len(), 4);
        assert_eq!(pos("A"), 0);
        assert!(pos("D") > pos("B"));
        assert!(pos("D") > pos("C"));

        assert_eq!(
            graph.layers().unwrap(),
            vec![vec!["A"], vec!["B", "C"], vec!["D"]]
        );
    }

    #[test]
    fn test_sort_does_not_consume_the_graph() {
        let graph = graph_of(&[("A", "B")]);
        assert_eq!(graph.topological_sort(), graph.topological_sort());
        assert_eq!(graph.in_degree()["B"], 1);
    }

    #[test]
    fn test_repeated_edges_are_not_a_cycle() {
        let graph = graph_of(&[("A", "B"), ("A", "B")]);
        assert_eq!(graph.graph()["A"], ["B", "B"]);
        assert_eq!(graph.in_degree()["B"], 2);
        assert_eq!(graph.topological_sort().unwrap(), ["A", "B"]);
    }

    #[test]
    fn test_cycle_is_detected() {
        let graph = graph_of(&[("A", "B"), ("B", "C"), ("C", "A")]);
        let err = graph.topological_sort().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cyclic dependency between agents: A -> B -> C -> A"
        );
        assert_eq!(graph.layers().unwrap_err(), err);
    }

    #[test]
    fn test_cycle_downstream_of_a_source() {
        let graph = graph_of(&[("S", "B"), ("B", "C"), ("C", "B"), ("C", "T")]);
        let GraphError::CycleDetected { cycle, .. } = graph.topological_sort().unwrap_err();
        assert_eq!(cycle, ["B", "C", "B"]);
    }

    #[test]
    fn test_self_loop() {
        let graph = graph_of(&[("A", "A")]);
        let GraphError::CycleDetected { cycle, .. } = graph.topological_sort().unwrap_err();
        assert_eq!(cycle, ["A", "A"]);
    }

    #[test]
    fn test_param_mapping_json() {
        let mut graph = graph_of(&[("A", "B")]);
        graph.bind_input("B", "y", "A", "x");
        insta::assert_snapshot!(graph.to_json().unwrap(), @r###"
        {
          "graph": {
            "A": [
              "B"
            ],
            "B": []
          },
          "param_mapping": {
            "B": {
              "y": [
                "A",
                "x"
              ]
            }
          }
        }
        "###);
    }

    #[test]
    fn test_empty_graph() {
        let graph = DependencyGraph::new();
        assert!(graph.is_empty());
        assert!(graph.topological_sort().unwrap().is_empty());
        assert!(graph.layers().unwrap().is_empty());
    }
}
