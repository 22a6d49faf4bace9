// Copyright 2018 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use hashing::Cid;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

///
/// A process-unique identifier for a Node. Two NodeIds are equal iff they were derived from the
/// same call to `NodeId::new`.
///
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> NodeId {
        NodeId(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(NodeId(Uuid::parse_str(s)?))
    }
}

///
/// The closed set of reasoning-node roles. Each variant selects a processor in the dispatch table
/// (see `got_engine::processors`).
///
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Question,
    Hypothesis,
    Decomposition,
    Research,
    Analysis,
    Calculation,
    Evidence,
    Counterpoint,
    Synthesis,
    Conclusion,
    Validation,
    Reflection,
    Action,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

///
/// The lifecycle state of a Node. See the module docs on `Graph` for the transitions that are
/// legal between these states.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Ready,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

///
/// A directed labelled relationship between two nodes in the same Graph.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Decomposes,
    Supports,
    Contradicts,
    Synthesizes,
    Concludes,
    Generates,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    pub weight: f64,
}

///
/// The three content-addressed artifacts that may be associated with a Node: the instructions
/// given to the processor (typically the rendered prompt), the input data it operated on, and the
/// result it produced. Any of the three may be absent.
///
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageRefs {
    pub instructions_cid: Option<Cid>,
    pub data_cid: Option<Cid>,
    pub result_cid: Option<Cid>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub created_at_ms: i64,
    pub completed_at_ms: Option<i64>,
    pub confidence: Option<f64>,
    pub complexity: Option<u32>,
    pub execution_ms: Option<u64>,
    pub retry_count: u32,
    pub author: Option<String>,
    pub tags: Vec<String>,
}

impl NodeMetadata {
    pub fn new() -> NodeMetadata {
        NodeMetadata {
            created_at_ms: now_millis(),
            completed_at_ms: None,
            confidence: None,
            complexity: None,
            execution_ms: None,
            retry_count: 0,
            author: None,
            tags: Vec::new(),
        }
    }
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self::new()
    }
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as i64
}

///
/// A reference from a Node to either another Node in the same Graph, or to content that lives in
/// the CAS but was never promoted to a Node of its own (e.g. a piece of raw evidence text).
/// Exactly one of `target_id`/`target_cid` is set.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Link {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_cid: Option<Cid>,
    pub weight: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub content: String,
    pub dependencies: Vec<NodeId>,
    pub priority: i64,
    pub status: NodeStatus,
    pub result: Option<serde_json::Value>,
    pub metadata: NodeMetadata,
    pub storage: StorageRefs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<Link>>,
}

impl Node {
    pub fn new(node_type: NodeType, content: impl Into<String>, priority: i64) -> Node {
        Node {
            id: NodeId::new(),
            node_type,
            content: content.into(),
            dependencies: Vec::new(),
            priority,
            status: NodeStatus::Pending,
            result: None,
            metadata: NodeMetadata::new(),
            storage: StorageRefs::default(),
            links: None,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<NodeId>) -> Node {
        self.dependencies = dependencies;
        self
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub created_at_ms: Option<i64>,
    pub updated_at_ms: Option<i64>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}
