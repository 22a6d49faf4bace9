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
//! The §4.5 GoT Engine: owns exactly one `Graph` and one `Scheduler`, and drives a single query
//! from root `Question` to a synthesised conclusion.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use cas_client::{CasClient, CasError, Cid};
use coordinator::Coordinator;
use graph::{Graph, GraphError, Node, NodeId, NodeStatus, NodeType};
use processors::LLMOracle;
use scheduler::{ExecutedNode, Scheduler, SchedulerError, SchedulerOptions};
use tokio::time::{Duration, Instant};
use workunit_store::{in_workunit, Level};

/// `timeout_ms` (§5 "Cancellation and timeouts", default 60 000) and the `Scheduler`'s own
/// retry limit.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    pub timeout_ms: u64,
    pub max_retry: u32,
}

impl EngineOptions {
    pub fn new() -> EngineOptions {
        EngineOptions {
            timeout_ms: 60_000,
            max_retry: scheduler::DEFAULT_MAX_RETRY,
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EngineError {
    Graph(GraphError),
    Scheduler(SchedulerError),
    Cas(CasError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Graph(err) => write!(f, "{err}"),
            EngineError::Scheduler(err) => write!(f, "{err}"),
            EngineError::Cas(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<GraphError> for EngineError {
    fn from(err: GraphError) -> EngineError {
        EngineError::Graph(err)
    }
}

impl From<SchedulerError> for EngineError {
    fn from(err: SchedulerError) -> EngineError {
        EngineError::Scheduler(err)
    }
}

impl From<CasError> for EngineError {
    fn from(err: CasError) -> EngineError {
        EngineError::Cas(err)
    }
}

/// What a `process_query` call produced (§4.5 step 5). `conclusions` is ordered by
/// `(confidence descending, node_id ascending)` — the resolved tiebreak for synthesis (§9).
#[derive(Clone, Debug)]
pub struct ProcessQueryResult {
    pub answer: String,
    pub confidence: f64,
    pub graph_cid: Cid,
    pub node_count: usize,
    pub elapsed_ms: u64,
    pub conclusions: Vec<NodeId>,
    pub failed_node_ids: Vec<NodeId>,
    pub deadline_exceeded: bool,
}

///
/// Owns exactly one `Graph` and one `Scheduler` (§4.5). A fresh `GotEngine` is meant for exactly
/// one `process_query` call; its `Graph` is discarded once the final `graph_cid` is persisted
/// (§3 "Lifecycle").
///
pub struct GotEngine {
    graph: Graph,
    scheduler: Scheduler,
    cas: Arc<CasClient>,
    coordinator: Option<Arc<Coordinator>>,
}

impl GotEngine {
    pub fn new(cas: Arc<CasClient>, oracle: Arc<dyn LLMOracle>, options: EngineOptions) -> GotEngine {
        let graph = Graph::new();
        let scheduler_options = SchedulerOptions {
            max_retry: options.max_retry,
        };
        let scheduler = Scheduler::new(graph.clone(), Arc::clone(&cas), oracle, scheduler_options);
        GotEngine {
            graph,
            scheduler,
            cas,
            coordinator: None,
        }
    }

    ///
    /// Wires a §4.6 Distributed Coordinator into this Engine: every node that becomes `Ready` is
    /// announced on it, and results that a remote peer is elected to execute are re-injected by
    /// whichever `RemoteCompletionSink` the coordinator was constructed with (typically an
    /// `Arc<GotEngine>`-wrapping `CoordinatorSink`, see below).
    ///
    pub fn with_coordinator(
        cas: Arc<CasClient>,
        oracle: Arc<dyn LLMOracle>,
        options: EngineOptions,
        coordinator: Arc<Coordinator>,
    ) -> GotEngine {
        let mut engine = GotEngine::new(cas, oracle, options);
        engine.coordinator = Some(coordinator);
        engine
    }

    /// Exposes the underlying graph for inspection (e.g. by a caller that wants to render
    /// intermediate state, or by the Coordinator re-injecting a remotely-completed node).
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    ///
    /// Decomposes `query` into a graph of reasoning nodes and drives it to completion or
    /// `options.timeout_ms`, whichever comes first, then synthesises a final answer (§4.5).
    ///
    pub async fn process_query(&self, query: &str, options: EngineOptions) -> Result<ProcessQueryResult, EngineError> {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(options.timeout_ms);
        let run_id = uuid::Uuid::new_v4();

        let data_cid = self.cas.put(Bytes::copy_from_slice(query.as_bytes())).await?;

        let mut root = Node::new(NodeType::Question, query, 0);
        root.status = NodeStatus::Completed;
        root.metadata.completed_at_ms = Some(graph::now_millis());
        root.storage.data_cid = Some(data_cid);
        let root_id = root.id;
        self.graph.insert_node(root)?;
        self.graph.set_root(root_id)?;

        let mut decomposition = Node::new(NodeType::Decomposition, query, processors::DECOMPOSITION_PRIORITY)
            .with_dependencies(vec![root_id]);
        decomposition.status = NodeStatus::Ready;
        self.graph.insert_node(decomposition.clone())?;
        self.scheduler.add_task(&decomposition);
        self.announce(&decomposition).await;

        in_workunit!(
            "got_engine_process_query",
            Level::Info,
            desc = Some(format!("process_query run={run_id}")),
            |_workunit| async move {
                loop {
                    match self.scheduler.execute_next(deadline).await? {
                        Some(executed) => self.handle_completed(&executed).await?,
                        None => break,
                    }
                }
                Ok::<(), EngineError>(())
            }
        )
        .await?;

        let deadline_exceeded = Instant::now() >= deadline;
        let conclusions = self.synthesize()?;
        let chosen = conclusions.first();

        let answer = chosen
            .and_then(|n| n.result.as_ref())
            .and_then(|r| r.get("answer"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let confidence = chosen.and_then(|n| n.metadata.confidence).unwrap_or(0.0);

        let document = self.graph.to_canonical_document();
        let graph_cid = self.cas.put_graph(&document).await?;

        Ok(ProcessQueryResult {
            answer,
            confidence,
            graph_cid,
            node_count: self.graph.node_count(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            conclusions: conclusions.iter().map(|n| n.id).collect(),
            failed_node_ids: self.graph.failed_node_ids(),
            deadline_exceeded,
        })
    }

    ///
    /// Splices a completed node's expansion into the graph and enqueues whatever it newly makes
    /// `Ready` (§4.5 "Dependency resolution"). A no-op for nodes that didn't complete (retried or
    /// permanently failed nodes carry no `new_nodes`/`edges`).
    ///
    async fn handle_completed(&self, executed: &ExecutedNode) -> Result<(), EngineError> {
        if executed.node.status != NodeStatus::Completed {
            return Ok(());
        }
        for node in &executed.new_nodes {
            self.graph.insert_node(node.clone())?;
        }
        for edge in &executed.edges {
            self.graph.add_edge(edge.clone())?;
        }
        for promoted_id in self.graph.promote_ready_successors(executed.node.id) {
            let promoted = self.graph.node(promoted_id).expect("node just promoted to Ready");
            self.scheduler.add_task(&promoted);
            self.announce(&promoted).await;
        }
        Ok(())
    }

    /// Announces a newly-`Ready` node on the Coordinator, if one is wired up (§4.6). A no-op for
    /// an Engine constructed with `GotEngine::new`.
    async fn announce(&self, node: &Node) {
        if let Some(coordinator) = &self.coordinator {
            coordinator.announce_task(node.id, node.storage.instructions_cid.clone()).await;
        }
    }

    ///
    /// Splices a result that a remotely-elected peer produced into this Engine's graph, as if it
    /// had been executed locally (§4.6, §9 "Async control flow"). A no-op for a node this Engine
    /// no longer knows about (e.g. one that belongs to a different query's graph) or that is
    /// already `Completed` — the first `Complete` observed for a task wins (see
    /// `coordinator::TaskRegistry::record_complete`).
    ///
    pub async fn apply_remote_completion(&self, node_id: NodeId, result_cid: Cid) -> Result<(), EngineError> {
        let Some(node) = self.graph.node(node_id) else {
            return Ok(());
        };
        if node.status == NodeStatus::Completed {
            return Ok(());
        }

        let bytes = self.cas.get(&result_cid).await?;
        let result: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|err| EngineError::Cas(CasError::Serialization(err.to_string())))?;
        let confidence = result.get("confidence").and_then(serde_json::Value::as_f64);

        self.graph.update_node(node_id, |n| {
            n.status = NodeStatus::Completed;
            n.metadata.completed_at_ms = Some(graph::now_millis());
            n.metadata.confidence = confidence;
            n.storage.result_cid = Some(result_cid.clone());
            n.result = Some(result);
        })?;

        for promoted_id in self.graph.promote_ready_successors(node_id) {
            let promoted = self.graph.node(promoted_id).expect("node just promoted to Ready");
            self.scheduler.add_task(&promoted);
            self.announce(&promoted).await;
        }
        Ok(())
    }

    ///
    /// Collects all `Completed` `Conclusion` nodes, ordering by `(confidence descending, node_id
    /// ascending)` (§9). If none exist, synthesises and inserts a placeholder conclusion with
    /// `confidence = 0.5` (§4.5 step 4) so the result always names a conclusion node.
    ///
    fn synthesize(&self) -> Result<Vec<Node>, EngineError> {
        let mut conclusions = self.graph.conclusions();
        if conclusions.is_empty() {
            let mut synthetic = Node::new(NodeType::Conclusion, "no conclusion reached", processors::CONCLUSION_PRIORITY);
            synthetic.status = NodeStatus::Completed;
            synthetic.metadata.completed_at_ms = Some(graph::now_millis());
            synthetic.metadata.confidence = Some(0.5);
            synthetic.result = Some(serde_json::json!({
                "answer": "no conclusion reached",
                "confidence": 0.5,
            }));
            self.graph.insert_node(synthetic.clone())?;
            conclusions.push(synthetic);
        }
        conclusions.sort_by(|a, b| {
            let confidence_a = a.metadata.confidence.unwrap_or(0.0);
            let confidence_b = b.metadata.confidence.unwrap_or(0.0);
            confidence_b
                .partial_cmp(&confidence_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.to_string().cmp(&b.id.to_string()))
        });
        Ok(conclusions)
    }
}

///
/// Adapts a `GotEngine` to `coordinator::RemoteCompletionSink`. `RemoteCompletionSink::
/// remote_completed` is a synchronous callback invoked directly from the Coordinator's dispatch
/// loop, but landing a result requires an async CAS fetch, so this hands the work off to an
/// `Executor` rather than blocking the Coordinator's own task (§9 "Async control flow").
///
pub struct CoordinatorSink {
    engine: Arc<GotEngine>,
    executor: task_executor::Executor,
}

impl CoordinatorSink {
    pub fn new(engine: Arc<GotEngine>, executor: task_executor::Executor) -> CoordinatorSink {
        CoordinatorSink { engine, executor }
    }
}

impl coordinator::RemoteCompletionSink for CoordinatorSink {
    fn remote_completed(&self, task_id: NodeId, result_cid: Cid) {
        let engine = Arc::clone(&self.engine);
        self.executor.native_spawn(async move {
            if let Err(err) = engine.apply_remote_completion(task_id, result_cid).await {
                log::warn!("got_engine: failed to apply remote completion for {task_id}: {err}");
            }
        });
    }
}
