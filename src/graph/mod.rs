//! Provenance graph structures.
//!
//! A provenance graph is a directed graph of system objects (processes,
//! files, registry keys) connected by the operations observed between them.
//! Node identity is `(kind, stable_key)` so that every event referring to the
//! same OS object within a window lands on the same node; edges between the
//! same pair of nodes accumulate their operation tags instead of duplicating.

pub mod builder;
pub mod generalize;

pub use builder::{GraphBuilder, NoiseFilter};
pub use generalize::PathGeneralizer;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Edge operation tag for process creation.
pub const OP_CREATE_PROCESS: &str = "CREATE_PROCESS";
/// Edge operation tag for file writes.
pub const OP_CREATE_FILE: &str = "CREATE_FILE";
/// Edge operation tag for registry mutations.
pub const OP_SET_REGISTRY: &str = "SET_REGISTRY";

/// The kind of system object a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    Process,
    File,
    Registry,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Process => write!(f, "Process"),
            NodeKind::File => write!(f, "File"),
            NodeKind::Registry => write!(f, "Registry"),
        }
    }
}

/// Node identity: kind plus a deterministic stable key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub kind: NodeKind,
    pub key: String,
}

impl NodeId {
    pub fn new(kind: NodeKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }

    pub fn process(key: impl Into<String>) -> Self {
        Self::new(NodeKind::Process, key)
    }

    pub fn file(key: impl Into<String>) -> Self {
        Self::new(NodeKind::File, key)
    }

    pub fn registry(key: impl Into<String>) -> Self {
        Self::new(NodeKind::Registry, key)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

/// A node in the provenance graph.
#[derive(Debug, Clone)]
pub struct ProvenanceNode {
    pub id: NodeId,
    /// Short display name (image basename, file name, last key segment).
    pub label: String,
    /// Environment-variable-normalized path of the underlying object.
    pub generalized_path: String,
    /// Command line, for process nodes.
    pub command_line: Option<String>,
}

impl ProvenanceNode {
    pub fn new(id: NodeId, label: impl Into<String>, generalized_path: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            generalized_path: generalized_path.into(),
            command_line: None,
        }
    }

    pub fn with_command_line(mut self, command_line: impl Into<String>) -> Self {
        self.command_line = Some(command_line.into());
        self
    }
}

/// A directed edge carrying the set of operations observed between two nodes.
#[derive(Debug, Clone)]
pub struct ProvenanceEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub operations: BTreeSet<String>,
}

/// Directed provenance graph with insertion-ordered nodes and edges.
///
/// Insertion order mirrors ingest order, which is the window's temporal
/// order; iteration is deterministic.
#[derive(Debug, Default)]
pub struct ProvenanceGraph {
    nodes: HashMap<NodeId, ProvenanceNode>,
    node_order: Vec<NodeId>,
    edges: HashMap<(NodeId, NodeId), ProvenanceEdge>,
    edge_order: Vec<(NodeId, NodeId)>,
    out_adj: HashMap<NodeId, BTreeSet<NodeId>>,
    in_adj: HashMap<NodeId, BTreeSet<NodeId>>,
}

impl ProvenanceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, or refresh the attributes of an existing one. Later
    /// events carry equally good or better attribute values, so non-empty
    /// incoming attributes win.
    pub fn upsert_node(&mut self, node: ProvenanceNode) {
        match self.nodes.get_mut(&node.id) {
            Some(existing) => {
                if !node.label.is_empty() {
                    existing.label = node.label;
                }
                if !node.generalized_path.is_empty() {
                    existing.generalized_path = node.generalized_path;
                }
                if node.command_line.is_some() {
                    existing.command_line = node.command_line;
                }
            }
            None => {
                self.node_order.push(node.id.clone());
                self.nodes.insert(node.id.clone(), node);
            }
        }
    }

    /// Add an operation-tagged edge. Self-loops and edges touching nodes not
    /// present in the graph are rejected. Repeated pairs accumulate into the
    /// existing edge's operation set.
    pub fn add_edge(&mut self, source: &NodeId, target: &NodeId, operation: &str) -> bool {
        if source == target || !self.nodes.contains_key(source) || !self.nodes.contains_key(target)
        {
            return false;
        }
        let key = (source.clone(), target.clone());
        if !self.edges.contains_key(&key) {
            self.edge_order.push(key.clone());
            self.out_adj
                .entry(source.clone())
                .or_default()
                .insert(target.clone());
            self.in_adj
                .entry(target.clone())
                .or_default()
                .insert(source.clone());
            self.edges.insert(
                key.clone(),
                ProvenanceEdge {
                    source: source.clone(),
                    target: target.clone(),
                    operations: BTreeSet::new(),
                },
            );
        }
        if let Some(edge) = self.edges.get_mut(&key) {
            edge.operations.insert(operation.to_string());
        }
        true
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &NodeId) -> Option<&ProvenanceNode> {
        self.nodes.get(id)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &ProvenanceNode> {
        self.node_order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &ProvenanceEdge> {
        self.edge_order.iter().filter_map(|key| self.edges.get(key))
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &ProvenanceNode> {
        self.nodes().filter(move |n| n.id.kind == kind)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn has_edge(&self, source: &NodeId, target: &NodeId) -> bool {
        self.out_adj.get(source).is_some_and(|s| s.contains(target))
    }

    pub fn out_neighbors(&self, id: &NodeId) -> impl Iterator<Item = &NodeId> {
        self.out_adj.get(id).into_iter().flatten()
    }

    pub fn in_neighbors(&self, id: &NodeId) -> impl Iterator<Item = &NodeId> {
        self.in_adj.get(id).into_iter().flatten()
    }

    /// Combined in-degree + out-degree.
    pub fn degree(&self, id: &NodeId) -> usize {
        self.out_adj.get(id).map_or(0, |s| s.len()) + self.in_adj.get(id).map_or(0, |s| s.len())
    }

    /// The set of node kinds present in the graph.
    pub fn node_kinds(&self) -> BTreeSet<NodeKind> {
        self.nodes.keys().map(|id| id.kind).collect()
    }

    /// Edge-to-node ratio, the structural density used by the matcher.
    pub fn density(&self) -> f64 {
        self.edge_count() as f64 / self.node_count().max(1) as f64
    }

    /// Drop nodes with no edges in either direction. Isolated nodes carry no
    /// provenance information and are not detection-relevant.
    pub fn remove_isolated(&mut self) {
        let isolated: Vec<NodeId> = self
            .node_order
            .iter()
            .filter(|id| self.degree(id) == 0)
            .cloned()
            .collect();
        for id in &isolated {
            self.nodes.remove(id);
        }
        self.node_order.retain(|id| self.nodes.contains_key(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process_node(key: &str, label: &str) -> ProvenanceNode {
        ProvenanceNode::new(NodeId::process(key), label, format!("%WINDIR%\\{}", label))
    }

    #[test]
    fn test_upsert_preserves_insertion_order() {
        let mut graph = ProvenanceGraph::new();
        graph.upsert_node(process_node("a", "a.exe"));
        graph.upsert_node(process_node("b", "b.exe"));
        graph.upsert_node(process_node("a", "a2.exe"));

        let order: Vec<&str> = graph.nodes().map(|n| n.id.key.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);
        assert_eq!(graph.node(&NodeId::process("a")).unwrap().label, "a2.exe");
    }

    #[test]
    fn test_no_self_loops() {
        let mut graph = ProvenanceGraph::new();
        graph.upsert_node(process_node("a", "a.exe"));
        assert!(!graph.add_edge(
            &NodeId::process("a"),
            &NodeId::process("a"),
            OP_CREATE_PROCESS
        ));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_edge_requires_both_endpoints() {
        let mut graph = ProvenanceGraph::new();
        graph.upsert_node(process_node("a", "a.exe"));
        assert!(!graph.add_edge(
            &NodeId::process("a"),
            &NodeId::file("missing"),
            OP_CREATE_FILE
        ));
    }

    #[test]
    fn test_parallel_events_accumulate_operations() {
        let mut graph = ProvenanceGraph::new();
        graph.upsert_node(process_node("a", "a.exe"));
        graph.upsert_node(ProvenanceNode::new(
            NodeId::file("f"),
            "x.txt",
            "%USERPROFILE%\\x.txt",
        ));

        let a = NodeId::process("a");
        let f = NodeId::file("f");
        assert!(graph.add_edge(&a, &f, OP_CREATE_FILE));
        assert!(graph.add_edge(&a, &f, "RENAME_FILE"));
        assert_eq!(graph.edge_count(), 1);

        let edge = graph.edges().next().unwrap();
        assert_eq!(edge.operations.len(), 2);
        assert!(edge.operations.contains(OP_CREATE_FILE));
    }

    #[test]
    fn test_remove_isolated() {
        let mut graph = ProvenanceGraph::new();
        graph.upsert_node(process_node("a", "a.exe"));
        graph.upsert_node(process_node("b", "b.exe"));
        graph.upsert_node(process_node("lonely", "c.exe"));
        graph.add_edge(
            &NodeId::process("a"),
            &NodeId::process("b"),
            OP_CREATE_PROCESS,
        );

        graph.remove_isolated();
        assert_eq!(graph.node_count(), 2);
        assert!(!graph.contains(&NodeId::process("lonely")));
    }

    #[test]
    fn test_density() {
        let mut graph = ProvenanceGraph::new();
        assert_eq!(graph.density(), 0.0);
        graph.upsert_node(process_node("a", "a.exe"));
        graph.upsert_node(process_node("b", "b.exe"));
        graph.add_edge(
            &NodeId::process("a"),
            &NodeId::process("b"),
            OP_CREATE_PROCESS,
        );
        assert!((graph.density() - 0.5).abs() < f64::EPSILON);
    }
}
