// Copyright 2018 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
// Enable all clippy lints except for many of the pedantic ones. It's a shame this needs to be copied and pasted across crates, but there doesn't appear to be a way to include inner attributes from a common source.
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
// It is often more clear to show that nothing is being moved.
#![allow(clippy::match_ref_pats)]
// Subjective style.
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
// Default isn't as big a deal as people seem to think it is.
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
// Arc<Mutex> can be more clear than needing to grok Orderings:
#![allow(clippy::mutex_atomic)]

mod types;

pub use crate::types::{
    now_millis, Edge, EdgeType, GraphMetadata, Link, Node, NodeId, NodeMetadata, NodeStatus,
    NodeType, StorageRefs,
};

use std::fmt;
use std::sync::Arc;

use fnv::FnvHashMap as HashMap;
use parking_lot::Mutex;
use petgraph::graph::DiGraph;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

type EntryId = petgraph::graph::NodeIndex<u32>;
type PGraph = DiGraph<NodeId, (), u32>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GraphError {
    DependencyMissing(NodeId),
    CycleDetected,
    DuplicateNode(NodeId),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::DependencyMissing(id) => {
                write!(f, "node {id} references a dependency that is not in the graph")
            }
            GraphError::CycleDetected => write!(f, "adding that edge would create a cycle"),
            GraphError::DuplicateNode(id) => write!(f, "node {id} already exists in the graph"),
        }
    }
}

impl std::error::Error for GraphError {}

struct InnerGraph {
    nodes: HashMap<NodeId, Node>,
    entries: HashMap<NodeId, EntryId>,
    pg: PGraph,
    edges: Vec<Edge>,
    root_node_id: Option<NodeId>,
    metadata: GraphMetadata,
}

impl InnerGraph {
    fn insert_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        for &dep in &node.dependencies {
            if !self.nodes.contains_key(&dep) {
                return Err(GraphError::DependencyMissing(dep));
            }
        }

        let id = node.id;
        let entry_id = self.pg.add_node(id);
        self.entries.insert(id, entry_id);

        for &dep in &node.dependencies {
            let dep_entry = self.entries[&dep];
            self.pg.add_edge(dep_entry, entry_id, ());
        }

        if petgraph::algo::is_cyclic_directed(&self.pg) {
            // Roll back: a well-formed caller can only depend on nodes already present, so this
            // should be unreachable outside of a programming error.
            self.pg.remove_node(entry_id);
            self.entries.remove(&id);
            return Err(GraphError::CycleDetected);
        }

        self.nodes.insert(id, node);
        Ok(())
    }

    fn add_edge(&mut self, edge: Edge) -> Result<(), GraphError> {
        if !self.nodes.contains_key(&edge.source) {
            return Err(GraphError::DependencyMissing(edge.source));
        }
        if !self.nodes.contains_key(&edge.target) {
            return Err(GraphError::DependencyMissing(edge.target));
        }
        self.edges.push(edge);
        Ok(())
    }

    fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        let Some(&entry_id) = self.entries.get(&id) else {
            return Vec::new();
        };
        self.pg
            .neighbors_directed(entry_id, Direction::Outgoing)
            .map(|eid| self.pg[eid])
            .collect()
    }
}

///
/// A DAG of typed reasoning nodes, shared by the Engine, the Scheduler, and processors (which see
/// only a read-only view via `Graph::snapshot`/`Graph::node`).
///
/// Mutation is restricted to: inserting new nodes/edges (the processor-expansion path), and
/// updating the status/result/metadata of an existing node in place (the Scheduler's path). The
/// edge set formed by node `dependencies` is enforced to remain acyclic on every insertion.
///
#[derive(Clone)]
pub struct Graph {
    inner: Arc<Mutex<InnerGraph>>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph {
            inner: Arc::new(Mutex::new(InnerGraph {
                nodes: HashMap::default(),
                entries: HashMap::default(),
                pg: DiGraph::new(),
                edges: Vec::new(),
                root_node_id: None,
                metadata: GraphMetadata::default(),
            })),
        }
    }

    pub fn insert_node(&self, node: Node) -> Result<(), GraphError> {
        self.inner.lock().insert_node(node)
    }

    pub fn add_edge(&self, edge: Edge) -> Result<(), GraphError> {
        self.inner.lock().add_edge(edge)
    }

    pub fn set_root(&self, id: NodeId) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        if !inner.nodes.contains_key(&id) {
            return Err(GraphError::DependencyMissing(id));
        }
        inner.root_node_id = Some(id);
        Ok(())
    }

    pub fn set_metadata(&self, metadata: GraphMetadata) {
        self.inner.lock().metadata = metadata;
    }

    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.inner.lock().nodes.get(&id).cloned()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.inner.lock().nodes.contains_key(&id)
    }

    pub fn node_count(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    ///
    /// Applies `f` to the node with the given id, if present, persisting whatever mutation it
    /// makes. Used by the Scheduler to land status/result/metadata transitions.
    ///
    pub fn update_node(&self, id: NodeId, f: impl FnOnce(&mut Node)) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        let node = inner
            .nodes
            .get_mut(&id)
            .ok_or(GraphError::DependencyMissing(id))?;
        f(node);
        Ok(())
    }

    ///
    /// The nodes that list `id` among their `dependencies`.
    ///
    pub fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        self.inner.lock().dependents(id)
    }

    ///
    /// Scans the dependents of `completed_id` and promotes any whose dependencies are now all
    /// `Completed` from `Pending` to `Ready`, returning the promoted ids. Called by the Engine
    /// after a node completes (see §4.5 "Dependency resolution").
    ///
    pub fn promote_ready_successors(&self, completed_id: NodeId) -> Vec<NodeId> {
        let mut inner = self.inner.lock();
        let dependents = inner.dependents(completed_id);
        let mut promoted = Vec::new();
        for dependent_id in dependents {
            let all_deps_completed = {
                let dependent = &inner.nodes[&dependent_id];
                if dependent.status != NodeStatus::Pending {
                    continue;
                }
                dependent
                    .dependencies
                    .iter()
                    .all(|dep| inner.nodes.get(dep).map(|n| n.status == NodeStatus::Completed).unwrap_or(false))
            };
            if all_deps_completed {
                inner.nodes.get_mut(&dependent_id).unwrap().status = NodeStatus::Ready;
                promoted.push(dependent_id);
            }
        }
        promoted
    }

    pub fn conclusions(&self) -> Vec<Node> {
        self.inner
            .lock()
            .nodes
            .values()
            .filter(|n| n.node_type == NodeType::Conclusion && n.status == NodeStatus::Completed)
            .cloned()
            .collect()
    }

    pub fn failed_node_ids(&self) -> Vec<NodeId> {
        self.inner
            .lock()
            .nodes
            .values()
            .filter(|n| n.status == NodeStatus::Failed)
            .map(|n| n.id)
            .collect()
    }

    pub fn all_nodes(&self) -> Vec<Node> {
        self.inner.lock().nodes.values().cloned().collect()
    }

    pub fn root_node_id(&self) -> Option<NodeId> {
        self.inner.lock().root_node_id
    }

    /// A read-only view onto this graph, for handing to code (processors) that must not be able
    /// to mutate it.
    pub fn view(&self) -> GraphView<'_> {
        GraphView { inner: self }
    }

    ///
    /// Renders the graph into the canonical, sorted-key JSON document described in the graph
    /// serialisation format. `serde_json::Value`'s map is a `BTreeMap` (the `preserve_order`
    /// feature is not enabled anywhere in this workspace), so converting through `Value` is
    /// sufficient to get sorted object keys at every nesting level for free.
    ///
    pub fn to_canonical_document(&self) -> GraphDocument {
        let inner = self.inner.lock();
        let mut nodes: Vec<Node> = inner.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.to_string().cmp(&b.id.to_string()));
        GraphDocument {
            nodes,
            edges: inner.edges.clone(),
            root_node_id: inner.root_node_id,
            metadata: inner.metadata.clone(),
        }
    }

    pub fn from_canonical_document(doc: GraphDocument) -> Result<Graph, GraphError> {
        let graph = Graph::new();
        for node in doc.nodes {
            graph.insert_node(node)?;
        }
        for edge in doc.edges {
            graph.add_edge(edge)?;
        }
        if let Some(root) = doc.root_node_id {
            graph.set_root(root)?;
        }
        graph.set_metadata(doc.metadata);
        Ok(graph)
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

///
/// A read-only handle onto a `Graph`, handed to processors so that they can inspect dependency
/// content and results without gaining access to any of `Graph`'s mutating methods.
///
#[derive(Clone, Copy)]
pub struct GraphView<'a> {
    inner: &'a Graph,
}

impl<'a> GraphView<'a> {
    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.inner.node(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.inner.contains(id)
    }

    pub fn root_node_id(&self) -> Option<NodeId> {
        self.inner.root_node_id()
    }
}

///
/// The serialisable shape of a Graph, matching the external `{nodes, edges, root_node_id,
/// metadata}` wire format exactly.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphDocument {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub root_node_id: Option<NodeId>,
    pub metadata: GraphMetadata,
}

#[cfg(test)]
mod tests;
