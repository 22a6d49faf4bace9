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

//!
//! The §4.3 Scheduler: a `NodeId -> Handle` index wrapped around a `FibonacciHeap`, driving node
//! execution through the CAS client and the node-processor dispatch table.

use std::fmt;
use std::sync::Arc;

use fnv::{FnvHashMap, FnvHashSet};
use parking_lot::Mutex;
use tokio::time::Instant;

use cas_client::CasClient;
use fibonacci_heap::{FibonacciHeap, Handle};
use graph::{Edge, Graph, GraphError, Node, NodeId, NodeStatus};
use processors::{LLMOracle, ProcessingResult, ProcessorContext, ProcessorError};
use workunit_store::{in_workunit, Level, Metric, ObservationMetric, RunningWorkunit};

/// `retry_count <= MAX_RETRY` (default 3); exceeding it transitions a node to `Failed`
/// permanently (§3 invariants).
pub const DEFAULT_MAX_RETRY: u32 = 3;

#[derive(Clone, Debug)]
pub struct SchedulerOptions {
    pub max_retry: u32,
}

impl SchedulerOptions {
    pub fn new() -> SchedulerOptions {
        SchedulerOptions {
            max_retry: DEFAULT_MAX_RETRY,
        }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SchedulerError {
    Graph(GraphError),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::Graph(err) => write!(f, "scheduler graph error: {err}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<GraphError> for SchedulerError {
    fn from(err: GraphError) -> SchedulerError {
        SchedulerError::Graph(err)
    }
}

/// The outcome of one `execute_next` call that actually dequeued a node: the node in its
/// post-attempt state (`Completed`, `Ready` if retried, or `Failed`), plus whatever the processor
/// produced on success (empty otherwise). The Engine's `handle_completed` only has new work to do
/// when `node.status == Completed`.
#[derive(Clone, Debug)]
pub struct ExecutedNode {
    pub node: Node,
    pub new_nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

struct SchedulerState {
    heap: FibonacciHeap<NodeId>,
    index: FnvHashMap<NodeId, Handle>,
    /// Nodes that have already missed one cooperative processor deadline (§7 `ProcessorTimeout`:
    /// "re-enqueued once, then Failed"). Not part of `Node` itself because it is scheduler-local
    /// bookkeeping, not reasoning-graph state.
    timed_out_once: FnvHashSet<NodeId>,
}

///
/// Wraps a `FibonacciHeap<NodeId>` with the `NodeId -> Handle` index described in §4.3, plus the
/// CAS client and oracle a processor invocation needs. Heap manipulations are synchronous and run
/// under `state`'s mutex; only the CAS fetch and the processor invocation in `execute_next` may
/// suspend (§5).
///
pub struct Scheduler {
    graph: Graph,
    cas: Arc<CasClient>,
    oracle: Arc<dyn LLMOracle>,
    options: SchedulerOptions,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    pub fn new(graph: Graph, cas: Arc<CasClient>, oracle: Arc<dyn LLMOracle>, options: SchedulerOptions) -> Scheduler {
        Scheduler {
            graph,
            cas,
            oracle,
            options,
            state: Mutex::new(SchedulerState {
                heap: FibonacciHeap::new(),
                index: FnvHashMap::default(),
                timed_out_once: FnvHashSet::default(),
            }),
        }
    }

    /// Enqueues `node` iff it is `Ready` and not already indexed. Idempotent (§4.3, §8 property 5).
    pub fn add_task(&self, node: &Node) -> bool {
        if node.status != NodeStatus::Ready {
            return false;
        }
        let mut state = self.state.lock();
        if state.index.contains_key(&node.id) {
            return false;
        }
        let handle = state.heap.insert(node.id, node.priority);
        state.index.insert(node.id, handle);
        true
    }

    /// Decreases only: a `new_priority` that wouldn't decrease the key is silently refused (§4.3,
    /// §8 property 6).
    pub fn update_priority(&self, node_id: NodeId, new_priority: i64) -> bool {
        let mut state = self.state.lock();
        let Some(&handle) = state.index.get(&node_id) else {
            return false;
        };
        state.heap.decrease_key(handle, new_priority)
    }

    pub fn has_pending(&self) -> bool {
        !self.state.lock().heap.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().heap.size()
    }

    fn pop_ready(&self) -> Option<NodeId> {
        let mut state = self.state.lock();
        let (node_id, _key) = state.heap.extract_min()?;
        state.index.remove(&node_id);
        Some(node_id)
    }

    /// Returns `node_id` to `Ready` and re-enqueues it at its current priority. Used both by the
    /// deadline-exceeded path and by the retry path.
    fn reinsert_as_ready(&self, node_id: NodeId) -> Result<(), SchedulerError> {
        self.graph.update_node(node_id, |n| n.status = NodeStatus::Ready)?;
        let node = self.graph.node(node_id).expect("node just updated to Ready");
        self.add_task(&node);
        Ok(())
    }

    async fn fetch_storage(&self, node: &Node) -> Result<(Option<bytes::Bytes>, Option<bytes::Bytes>), ProcessorError> {
        let data = match &node.storage.data_cid {
            Some(cid) => Some(self.cas.get(cid).await?),
            None => None,
        };
        let instructions = match &node.storage.instructions_cid {
            Some(cid) => Some(self.cas.get(cid).await?),
            None => None,
        };
        Ok((data, instructions))
    }

    ///
    /// Extracts the minimum-priority `Ready` node (if any), marks it `InProgress`, fetches its
    /// `data_cid`/`instructions_cid` through the CAS client, invokes its processor, and lands the
    /// resulting status transition. `deadline` bounds both the CAS fetch and the processor call;
    /// exceeding it mid-fetch returns the node to `Ready` and yields `None` (§4.3 "Cancellation").
    ///
    pub async fn execute_next(&self, deadline: Instant) -> Result<Option<ExecutedNode>, SchedulerError> {
        let Some(node_id) = self.pop_ready() else {
            return Ok(None);
        };

        if Instant::now() >= deadline {
            self.reinsert_as_ready(node_id)?;
            return Ok(None);
        }

        self.graph.update_node(node_id, |n| n.status = NodeStatus::InProgress)?;
        let node = self.graph.node(node_id).expect("node just transitioned to InProgress");
        let started = Instant::now();

        in_workunit!(
            "scheduler_execute_next",
            Level::Debug,
            desc = Some(format!("execute {} ({})", node.id, node.node_type)),
            |workunit| async move {
                workunit.increment_counter(Metric::SchedulerExtractions, 1);

                let (data, instructions) = match tokio::time::timeout_at(deadline, self.fetch_storage(&node)).await {
                    Ok(Ok(pair)) => pair,
                    Ok(Err(err)) => return self.fail_or_retry(node_id, &err, workunit),
                    Err(_elapsed) => {
                        self.reinsert_as_ready(node_id)?;
                        return Ok(None);
                    }
                };

                let context = ProcessorContext {
                    cas: self.cas.as_ref(),
                    oracle: self.oracle.as_ref(),
                    data,
                    instructions,
                };
                let view = self.graph.view();

                match tokio::time::timeout_at(deadline, processors::process(&node, &view, &context)).await {
                    Ok(Ok(result)) => self.complete(node, result, started, workunit).await,
                    Ok(Err(err)) => self.fail_or_retry(node_id, &err, workunit),
                    Err(_elapsed) => self.processor_timed_out(node_id, workunit),
                }
            }
        )
        .await
    }

    async fn complete(
        &self,
        node: Node,
        result: ProcessingResult,
        started: Instant,
        workunit: &mut RunningWorkunit,
    ) -> Result<Option<ExecutedNode>, SchedulerError> {
        let node_id = node.id;
        let execution_ms = started.elapsed().as_millis() as u64;

        let result_cid = match &result.result {
            Some(value) => {
                let bytes = serde_json::to_vec(value).expect("serde_json::Value always serializes");
                match self.cas.put(bytes.into()).await {
                    Ok(cid) => Some(cid),
                    Err(err) => return Ok(self.fail_or_retry(node_id, &ProcessorError::Cas(err), workunit)?),
                }
            }
            None => None,
        };

        let result_value = result.result.clone();
        self.graph.update_node(node_id, |n| {
            n.status = NodeStatus::Completed;
            n.metadata.completed_at_ms = Some(graph::now_millis());
            n.metadata.execution_ms = Some(execution_ms);
            n.storage.result_cid = result_cid;
            if let Some(confidence) = result_value.as_ref().and_then(|r| r.get("confidence")).and_then(|v| v.as_f64())
            {
                n.metadata.confidence = Some(confidence);
            }
            n.result = result_value;
        })?;
        let node = self.graph.node(node_id).expect("node just marked Completed");

        workunit.increment_counter(Metric::NodesCompleted, 1);
        workunit.record_observation(ObservationMetric::NodeExecutionTimeMicros, execution_ms * 1000);

        Ok(Some(ExecutedNode {
            node,
            new_nodes: result.new_nodes,
            edges: result.edges,
        }))
    }

    /// Increments `retry_count` and either re-enqueues as `Ready` (if a retryable error and still
    /// under `MAX_RETRY`) or marks `Failed` permanently (§3, §4.3, §7). A `Precondition` violation
    /// is never retried: it reflects a malformed graph, which repeating the attempt cannot fix.
    fn fail_or_retry(
        &self,
        node_id: NodeId,
        err: &ProcessorError,
        workunit: &mut RunningWorkunit,
    ) -> Result<Option<ExecutedNode>, SchedulerError> {
        log::debug!("scheduler: node {node_id} failed: {err}");
        let retryable = !matches!(err, ProcessorError::Precondition(_));
        let max_retry = self.options.max_retry;
        self.graph.update_node(node_id, |n| {
            n.metadata.retry_count += 1;
            n.status = if retryable && n.metadata.retry_count < max_retry {
                NodeStatus::Ready
            } else {
                NodeStatus::Failed
            };
        })?;
        let node = self.graph.node(node_id).expect("node just updated");

        if node.status == NodeStatus::Ready {
            self.add_task(&node);
            workunit.increment_counter(Metric::NodesRetried, 1);
        } else {
            workunit.increment_counter(Metric::NodesFailed, 1);
        }

        Ok(Some(ExecutedNode {
            node,
            new_nodes: Vec::new(),
            edges: Vec::new(),
        }))
    }

    /// `ProcessorTimeout` (§7): the first cooperative-deadline miss re-enqueues once; a second
    /// miss for the same node is permanent.
    fn processor_timed_out(
        &self,
        node_id: NodeId,
        workunit: &mut RunningWorkunit,
    ) -> Result<Option<ExecutedNode>, SchedulerError> {
        let first_timeout = {
            let mut state = self.state.lock();
            state.timed_out_once.insert(node_id)
        };

        if first_timeout {
            self.reinsert_as_ready(node_id)?;
            let node = self.graph.node(node_id).expect("node just reinserted");
            workunit.increment_counter(Metric::NodesRetried, 1);
            Ok(Some(ExecutedNode {
                node,
                new_nodes: Vec::new(),
                edges: Vec::new(),
            }))
        } else {
            self.graph.update_node(node_id, |n| n.status = NodeStatus::Failed)?;
            let node = self.graph.node(node_id).expect("node just marked Failed");
            workunit.increment_counter(Metric::NodesFailed, 1);
            Ok(Some(ExecutedNode {
                node,
                new_nodes: Vec::new(),
                edges: Vec::new(),
            }))
        }
    }
}

#[cfg(test)]
mod tests;
