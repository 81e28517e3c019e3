#![allow(clippy::result_large_err)] // Graph operations return AppError to keep lookup diagnostics structured.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::backend::BackendHandle;
use crate::core::workflow::task::{StepSpec, TaskPayload};
use chrono::{DateTime, Utc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Execution state of a single node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    #[default]
    Defined,
    Submitted,
    Running,
    Succeeded,
    Failed,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Defined => "defined",
            NodeState::Submitted => "submitted",
            NodeState::Running => "running",
            NodeState::Succeeded => "succeeded",
            NodeState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Succeeded | NodeState::Failed)
    }

    /// Handed to the backend and not yet terminal.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, NodeState::Submitted | NodeState::Running)
    }
}

/// Graph vertex: one step of the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub task: TaskPayload,
    #[serde(default)]
    pub state: NodeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_handle: Option<BackendHandle>,
    pub defined_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Node {
    pub fn new(name: impl Into<String>, task: TaskPayload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            task,
            state: NodeState::Defined,
            result: None,
            backend_handle: None,
            defined_at: Utc::now(),
            submitted_at: None,
            finished_at: None,
        }
    }

    pub fn from_step(step: &StepSpec) -> Self {
        Self::new(step.name.clone(), step.task.clone())
    }

    pub fn has_result(&self) -> bool {
        self.task.prepublished.is_some() || self.state == NodeState::Succeeded
    }

    /// The prepublished result wins over anything the backend produced.
    pub fn result(&self) -> Option<&Value> {
        self.task.prepublished.as_ref().or(self.result.as_ref())
    }

    pub fn mark_submitted(&mut self, handle: BackendHandle) {
        self.state = NodeState::Submitted;
        self.backend_handle = Some(handle);
        self.submitted_at = Some(Utc::now());
    }

    /// Return to `Defined`, dropping execution results. Prepublished data stays with the payload.
    pub fn reset(&mut self) {
        self.state = NodeState::Defined;
        self.result = None;
        self.backend_handle = None;
        self.submitted_at = None;
        self.finished_at = None;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EdgeDocument {
    from: String,
    to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphDocument {
    nodes: Vec<Node>,
    edges: Vec<EdgeDocument>,
}

/// Directed acyclic graph of steps. Edges point from a dependency to its consumer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "GraphDocument", into = "GraphDocument")]
pub struct TaskGraph {
    graph: DiGraph<Node, ()>,
    index: HashMap<String, NodeIndex>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Insert a node with edges from every id in `depends_on`. All dependencies must exist.
    pub fn add_node(&mut self, node: Node, depends_on: &[String]) -> Result<String, AppError> {
        if self.index.contains_key(&node.id) {
            return Err(AppError::new(
                ErrorCategory::StateError,
                format!("node {} already present in graph", node.id),
            )
            .with_code("RF-GRAPH-001"));
        }
        let mut parents = Vec::with_capacity(depends_on.len());
        for dependency in depends_on {
            let parent = self.index.get(dependency).copied().ok_or_else(|| {
                AppError::new(
                    ErrorCategory::LookupError,
                    format!("dependency {} is not a node of this workflow", dependency),
                )
                .with_code("RF-GRAPH-002")
            })?;
            parents.push(parent);
        }
        let id = node.id.clone();
        let idx = self.graph.add_node(node);
        self.index.insert(id.clone(), idx);
        for parent in parents {
            self.graph.update_edge(parent, idx, ());
        }
        Ok(id)
    }

    /// Remove a node and its edges. The last node takes over the freed slot.
    pub fn remove_node(&mut self, id: &str) -> Option<Node> {
        let idx = self.index.remove(id)?;
        let node = self.graph.remove_node(idx)?;
        if let Some(moved) = self.graph.node_weight(idx) {
            self.index.insert(moved.id.clone(), idx);
        }
        Some(node)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|idx| &self.graph[*idx])
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        let idx = *self.index.get(id)?;
        Some(&mut self.graph[idx])
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_indices().map(move |idx| &self.graph[idx])
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.graph.node_weights_mut()
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes().map(|node| node.id.clone()).collect()
    }

    pub fn edges(&self) -> Vec<(String, String)> {
        self.graph
            .raw_edges()
            .iter()
            .map(|edge| {
                (
                    self.graph[edge.source()].id.clone(),
                    self.graph[edge.target()].id.clone(),
                )
            })
            .collect()
    }

    pub fn predecessors(&self, id: &str) -> Vec<&Node> {
        self.neighbors(id, Direction::Incoming)
    }

    pub fn successors(&self, id: &str) -> Vec<&Node> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<&Node> {
        let Some(idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<&Node> = self
            .graph
            .neighbors_directed(*idx, direction)
            .map(|n| &self.graph[n])
            .collect();
        // petgraph walks adjacency lists newest-first.
        out.reverse();
        out
    }

    /// Every node reachable downstream of `id`, excluding `id` itself.
    pub fn descendants(&self, id: &str) -> Vec<String> {
        let Some(start) = self.index.get(id).copied() else {
            return Vec::new();
        };
        let mut dfs = Dfs::new(&self.graph, start);
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        while let Some(idx) = dfs.next(&self.graph) {
            if idx == start {
                continue;
            }
            if seen.insert(idx) {
                out.push(self.graph[idx].id.clone());
            }
        }
        out
    }

    /// All upstream dependencies of `id` have a result.
    pub fn upstream_complete(&self, id: &str) -> bool {
        self.predecessors(id).iter().all(|node| node.has_result())
    }
}

impl From<TaskGraph> for GraphDocument {
    fn from(graph: TaskGraph) -> Self {
        let edges = graph
            .edges()
            .into_iter()
            .map(|(from, to)| EdgeDocument { from, to })
            .collect();
        let nodes = graph.nodes().cloned().collect();
        GraphDocument { nodes, edges }
    }
}

impl TryFrom<GraphDocument> for TaskGraph {
    type Error = AppError;

    fn try_from(document: GraphDocument) -> Result<Self, Self::Error> {
        let mut graph = TaskGraph::new();
        for node in document.nodes {
            graph.add_node(node, &[])?;
        }
        for edge in document.edges {
            let (Some(from), Some(to)) = (
                graph.index.get(&edge.from).copied(),
                graph.index.get(&edge.to).copied(),
            ) else {
                return Err(AppError::new(
                    ErrorCategory::SerializationError,
                    format!("edge {} -> {} references an unknown node", edge.from, edge.to),
                )
                .with_code("RF-GRAPH-003"));
            };
            graph.graph.update_edge(from, to, ());
        }
        Ok(graph)
    }
}
