use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::GraphError;
use crate::types::{EdgeKind, GraphEdge, GraphNode, NodeKind};

/// Persisted form of a [`SymbolGraph`]: exactly `nodes` and `edges`.
///
/// This is the only contract between the graph producer (`repograph build`)
/// and its consumers. Unknown fields and unknown `type` values are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphDocument {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Serialize)]
struct GraphDocumentRef<'a> {
    nodes: &'a [GraphNode],
    edges: &'a [GraphEdge],
}

/// Neighbours of one id, in first-seen edge order.
#[derive(Debug, Default, Clone)]
struct Adjacent {
    order: Vec<String>,
    set: HashSet<String>,
}

impl Adjacent {
    fn insert(&mut self, id: &str) {
        if !self.set.contains(id) {
            self.set.insert(id.to_string());
            self.order.push(id.to_string());
        }
    }
}

/// Typed node/edge store with undirected adjacency lookup.
///
/// Nodes keep insertion order and the first insert of an id wins. Edges are an
/// ordered multiset. Adjacency is maintained on every `add_edge`, so a finished
/// graph is never mutated by reads and can be shared across threads as-is.
///
/// Graphs are only produced by [`crate::builder::SymbolGraphBuilder`] or by
/// deserializing a [`GraphDocument`]; there is no public mutation API.
#[derive(Debug, Default, Clone)]
pub struct SymbolGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<String, usize>,
    edges: Vec<GraphEdge>,
    adjacency: HashMap<String, Adjacent>,
}

impl SymbolGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a node unless its id is already present.
    ///
    /// Returns `false` (and leaves the existing node untouched) on collision.
    pub(crate) fn add_node(&mut self, node: GraphNode) -> bool {
        if self.index.contains_key(&node.id) {
            return false;
        }
        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        true
    }

    /// Append an edge. Endpoints are not checked against the node table.
    pub(crate) fn add_edge(&mut self, edge: GraphEdge) {
        self.adjacency
            .entry(edge.source.clone())
            .or_default()
            .insert(&edge.target);
        self.adjacency
            .entry(edge.target.clone())
            .or_default()
            .insert(&edge.source);
        self.edges.push(edge);
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// All edges in insertion order, duplicates included.
    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn edges_of_kind(&self, kind: EdgeKind) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().filter(move |e| e.kind == kind)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Undirected neighbours of `id`, in the order their edges were added.
    ///
    /// Total: ids without a node (unknown ids, dangling edge endpoints) have
    /// no neighbours.
    pub fn neighbors(&self, id: &str) -> &[String] {
        if !self.contains(id) {
            return &[];
        }
        self.adjacency
            .get(id)
            .map(|adj| adj.order.as_slice())
            .unwrap_or(&[])
    }

    /// Set-membership form of [`neighbors`](Self::neighbors). Symmetric for
    /// any two ids that both have nodes.
    pub fn is_neighbor(&self, id: &str, other: &str) -> bool {
        self.contains(id)
            && self
                .adjacency
                .get(id)
                .is_some_and(|adj| adj.set.contains(other))
    }

    /// Edges with at least one endpoint that has no node.
    pub fn dangling_edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.edges
            .iter()
            .filter(|e| !self.contains(&e.source) || !self.contains(&e.target))
    }

    /// Owned serializable form, nodes and edges in insertion order.
    pub fn to_serializable(&self) -> GraphDocument {
        GraphDocument {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    /// Rebuild a graph from its document, validating ids.
    ///
    /// A document with a duplicate node id is rejected rather than silently
    /// collapsed, so that a loaded graph always re-serializes to the same arrays.
    pub fn from_serializable(doc: GraphDocument) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for node in doc.nodes {
            if node.id.is_empty() {
                return Err(GraphError::EmptyId("node"));
            }
            let id = node.id.clone();
            if !graph.add_node(node) {
                return Err(GraphError::DuplicateNode(id));
            }
        }
        for edge in doc.edges {
            if edge.source.is_empty() || edge.target.is_empty() {
                return Err(GraphError::EmptyId("edge endpoint"));
            }
            graph.add_edge(edge);
        }
        Ok(graph)
    }

    pub fn to_json(&self) -> Result<String, GraphError> {
        Ok(serde_json::to_string_pretty(&self.as_document())?)
    }

    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        let doc: GraphDocument = serde_json::from_str(json)?;
        Self::from_serializable(doc)
    }

    /// Write the graph document, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), GraphError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| GraphError::io(dir, e))?;
        }
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|e| GraphError::io(path, e))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, GraphError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| GraphError::io(path, e))?;
        Self::from_json(&json)
    }

    /// SHA-256 of the compact document, hex-encoded. Used to tie a vector
    /// store to the graph it was embedded from.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        // Serializing owned strings and enums cannot fail.
        let bytes = serde_json::to_vec(&self.as_document()).unwrap_or_default();
        hasher.update(&bytes);
        format!("{:x}", hasher.finalize())
    }

    /// Node/edge totals with per-kind breakdowns.
    pub fn stats(&self) -> GraphStats {
        let mut node_kinds: Vec<(NodeKind, u32)> = Vec::new();
        for node in &self.nodes {
            bump(&mut node_kinds, node.kind);
        }
        let mut edge_kinds: Vec<(EdgeKind, u32)> = Vec::new();
        for edge in &self.edges {
            bump(&mut edge_kinds, edge.kind);
        }
        node_kinds.sort_by(|a, b| b.1.cmp(&a.1));
        edge_kinds.sort_by(|a, b| b.1.cmp(&a.1));

        GraphStats {
            num_nodes: self.nodes.len() as u32,
            num_edges: self.edges.len() as u32,
            num_dangling: self.dangling_edges().count() as u32,
            node_kinds: node_kinds
                .into_iter()
                .map(|(k, n)| (k.to_string(), n))
                .collect(),
            edge_kinds: edge_kinds
                .into_iter()
                .map(|(k, n)| (k.to_string(), n))
                .collect(),
        }
    }

    fn as_document(&self) -> GraphDocumentRef<'_> {
        GraphDocumentRef {
            nodes: &self.nodes,
            edges: &self.edges,
        }
    }
}

fn bump<K: PartialEq>(counts: &mut Vec<(K, u32)>, key: K) {
    match counts.iter_mut().find(|(k, _)| *k == key) {
        Some((_, n)) => *n += 1,
        None => counts.push((key, 1)),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub num_nodes: u32,
    pub num_edges: u32,
    pub num_dangling: u32,
    pub node_kinds: Vec<(String, u32)>,
    pub edge_kinds: Vec<(String, u32)>,
}
