use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use hashing::Digest;
use url::Url;

use cas_client::{CasClient, CasClientOptions};
use graph::{Graph, Node, NodeStatus, NodeType};
use processors::{LLMOracle, OracleError};
use workunit_store::WorkunitStore;

use crate::{Scheduler, SchedulerOptions};

#[derive(Clone, Default)]
struct Store {
    blobs: Arc<StdMutex<std::collections::HashMap<String, Bytes>>>,
}

#[derive(Clone)]
struct HandlerState {
    store: Store,
    put_calls: Arc<AtomicU32>,
}

async fn add_handler(State(state): State<HandlerState>, body: Bytes) -> impl IntoResponse {
    state.put_calls.fetch_add(1, Ordering::SeqCst);
    let cid = Digest::of_bytes(&body).hash.to_hex();
    state.store.blobs.lock().unwrap().insert(cid.clone(), body);
    axum::Json(serde_json::json!({ "cid": cid }))
}

#[derive(serde::Deserialize)]
struct CidQuery {
    cid: String,
}

async fn cat_handler(State(state): State<HandlerState>, Query(query): Query<CidQuery>) -> impl IntoResponse {
    match state.store.blobs.lock().unwrap().get(&query.cid).cloned() {
        Some(bytes) => bytes.into_response(),
        None => axum::http::StatusCode::NOT_FOUND.into_response(),
    }
}

/// A trivial in-process CAS: enough for the Scheduler's `complete()` to have somewhere to put
/// a node's result, without pulling the retry/caching machinery under test.
struct MockCas {
    base_url: Url,
    put_calls: Arc<AtomicU32>,
}

impl MockCas {
    async fn start() -> MockCas {
        let listener = std::net::TcpListener::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap()).unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        let put_calls = Arc::new(AtomicU32::new(0));
        let state = HandlerState {
            store: Store::default(),
            put_calls: Arc::clone(&put_calls),
        };
        let router = Router::new()
            .route("/ipfs/add", post(add_handler))
            .route("/ipfs/cat", get(cat_handler))
            .with_state(state);

        tokio::spawn(async move {
            axum_server::from_tcp(listener)
                .expect("Unable to create Server from std::net::TcpListener")
                .serve(router.into_make_service())
                .await
                .unwrap();
        });

        MockCas {
            base_url: Url::parse(&format!("http://127.0.0.1:{}/", addr.port())).unwrap(),
            put_calls,
        }
    }

    fn client(&self) -> Arc<CasClient> {
        Arc::new(CasClient::new(CasClientOptions::new(self.base_url.clone())).unwrap())
    }
}

/// Always answers with the same scripted responses, in order; returns an error once exhausted.
/// Used where a test's processor (e.g. `Decomposition`) needs an oracle at all, but the exact
/// wording doesn't matter.
struct ScriptedOracle {
    responses: StdMutex<Vec<Result<String, OracleError>>>,
}

impl ScriptedOracle {
    fn new(responses: Vec<Result<String, OracleError>>) -> ScriptedOracle {
        ScriptedOracle {
            responses: StdMutex::new(responses),
        }
    }

    fn always_malformed() -> ScriptedOracle {
        ScriptedOracle::new(vec![
            Ok("not json".to_string()),
            Ok("not json".to_string()),
            Ok("not json".to_string()),
            Ok("not json".to_string()),
        ])
    }
}

#[async_trait::async_trait]
impl LLMOracle for ScriptedOracle {
    async fn complete(&self, _prompt: &str) -> Result<String, OracleError> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Err(OracleError("no more scripted responses".into()))
        } else {
            responses.remove(0)
        }
    }
}

fn far_deadline() -> tokio::time::Instant {
    tokio::time::Instant::now() + std::time::Duration::from_secs(60)
}

/// A node of a "terminal" `NodeType` (no oracle call, no new nodes) at the given priority,
/// optionally depending on `deps`.
fn terminal_node(content: &str, priority: i64, deps: Vec<graph::NodeId>) -> Node {
    Node::new(NodeType::Evidence, content, priority).with_dependencies(deps)
}

#[tokio::test]
async fn dependency_gate_blocks_successor_until_dependency_completes() {
    let (_store, _workunit) = WorkunitStore::setup_for_tests();
    let cas = MockCas::start().await;

    let graph = Graph::new();
    let root = Node::new(NodeType::Question, "root question", 0);
    let root_id = root.id;
    graph.insert_node(root).unwrap();
    graph.set_root(root_id).unwrap();
    graph.update_node(root_id, |n| n.status = NodeStatus::Completed).unwrap();

    let d = terminal_node("d", 5, vec![root_id]);
    let d_id = d.id;
    graph.insert_node(d).unwrap();
    assert_eq!(graph.promote_ready_successors(root_id), vec![d_id]);

    let s = terminal_node("s", 5, vec![d_id]);
    let s_id = s.id;
    graph.insert_node(s).unwrap();

    let scheduler = Scheduler::new(
        graph.clone(),
        cas.client(),
        Arc::new(ScriptedOracle::new(vec![])),
        SchedulerOptions::default(),
    );

    assert!(scheduler.add_task(&graph.node(d_id).unwrap()));
    // s is still Pending: the scheduler refuses to enqueue it.
    assert!(!scheduler.add_task(&graph.node(s_id).unwrap()));
    assert_eq!(scheduler.pending_count(), 1);

    let executed = scheduler.execute_next(far_deadline()).await.unwrap().unwrap();
    assert_eq!(executed.node.id, d_id);
    assert_eq!(executed.node.status, NodeStatus::Completed);
    assert!(!scheduler.has_pending());

    // Only once d completes does promotion make s eligible.
    assert_eq!(graph.promote_ready_successors(d_id), vec![s_id]);
    assert!(scheduler.add_task(&graph.node(s_id).unwrap()));
    assert!(scheduler.has_pending());
}

#[tokio::test]
async fn repeated_add_task_on_the_same_ready_node_is_idempotent() {
    let (_store, _workunit) = WorkunitStore::setup_for_tests();
    let cas = MockCas::start().await;
    let graph = Graph::new();
    let node = terminal_node("only", 5, vec![]);
    let node = Node { status: NodeStatus::Ready, ..node };
    let node_id = node.id;
    graph.insert_node(node.clone()).unwrap();

    let scheduler = Scheduler::new(
        graph.clone(),
        cas.client(),
        Arc::new(ScriptedOracle::new(vec![])),
        SchedulerOptions::default(),
    );

    assert!(scheduler.add_task(&node));
    assert!(!scheduler.add_task(&node));
    assert!(!scheduler.add_task(&node));
    assert_eq!(scheduler.pending_count(), 1);
    let _ = node_id;
}

#[tokio::test]
async fn update_priority_refuses_a_non_decreasing_key() {
    let (_store, _workunit) = WorkunitStore::setup_for_tests();
    let cas = MockCas::start().await;
    let graph = Graph::new();
    let node = terminal_node("only", 5, vec![]);
    let node = Node { status: NodeStatus::Ready, ..node };
    let node_id = node.id;
    graph.insert_node(node.clone()).unwrap();

    let scheduler = Scheduler::new(
        graph,
        cas.client(),
        Arc::new(ScriptedOracle::new(vec![])),
        SchedulerOptions::default(),
    );
    scheduler.add_task(&node);

    assert!(!scheduler.update_priority(node_id, 5));
    assert!(!scheduler.update_priority(node_id, 9));
    assert!(scheduler.update_priority(node_id, 1));
}

#[tokio::test]
async fn a_failing_processor_is_retried_up_to_max_retry_then_marked_failed() {
    let (_store, _workunit) = WorkunitStore::setup_for_tests();
    let cas = MockCas::start().await;
    let graph = Graph::new();

    let question = Node::new(NodeType::Question, "q", 0);
    let question_id = question.id;
    graph.insert_node(question).unwrap();

    let mut decomposition = Node::new(NodeType::Decomposition, "decompose", processors::DECOMPOSITION_PRIORITY)
        .with_dependencies(vec![question_id]);
    decomposition.status = NodeStatus::Ready;
    let decomposition_id = decomposition.id;
    graph.insert_node(decomposition.clone()).unwrap();

    let scheduler = Scheduler::new(
        graph.clone(),
        cas.client(),
        Arc::new(ScriptedOracle::always_malformed()),
        SchedulerOptions { max_retry: 3 },
    );
    scheduler.add_task(&decomposition);

    for expected_retry_count in 1..3 {
        let executed = scheduler.execute_next(far_deadline()).await.unwrap().unwrap();
        assert_eq!(executed.node.id, decomposition_id);
        assert_eq!(executed.node.status, NodeStatus::Ready);
        assert_eq!(executed.node.metadata.retry_count, expected_retry_count);
        assert!(scheduler.has_pending());
    }

    let executed = scheduler.execute_next(far_deadline()).await.unwrap().unwrap();
    assert_eq!(executed.node.status, NodeStatus::Failed);
    assert_eq!(executed.node.metadata.retry_count, 3);
    assert!(!scheduler.has_pending());
}

#[tokio::test]
async fn a_completed_terminal_node_persists_its_result_to_the_cas() {
    let (_store, _workunit) = WorkunitStore::setup_for_tests();
    let cas = MockCas::start().await;
    let graph = Graph::new();
    let mut node = terminal_node("echo me", 5, vec![]);
    node.status = NodeStatus::Ready;
    graph.insert_node(node.clone()).unwrap();

    let scheduler = Scheduler::new(
        graph,
        cas.client(),
        Arc::new(ScriptedOracle::new(vec![])),
        SchedulerOptions::default(),
    );
    scheduler.add_task(&node);

    let executed = scheduler.execute_next(far_deadline()).await.unwrap().unwrap();
    assert_eq!(executed.node.status, NodeStatus::Completed);
    assert!(executed.node.storage.result_cid.is_some());
    assert_eq!(cas.put_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn a_node_that_misses_its_deadline_is_returned_to_ready_and_reported_as_none() {
    let (_store, _workunit) = WorkunitStore::setup_for_tests();
    let cas = MockCas::start().await;
    let graph = Graph::new();
    let mut node = terminal_node("slow", 5, vec![]);
    node.status = NodeStatus::Ready;
    graph.insert_node(node.clone()).unwrap();

    let scheduler = Scheduler::new(
        graph.clone(),
        cas.client(),
        Arc::new(ScriptedOracle::new(vec![])),
        SchedulerOptions::default(),
    );
    scheduler.add_task(&node);

    let already_expired = tokio::time::Instant::now() - std::time::Duration::from_secs(1);
    let executed = scheduler.execute_next(already_expired).await.unwrap();
    assert!(executed.is_none());
    assert_eq!(graph.node(node.id).unwrap().status, NodeStatus::Ready);
    assert!(scheduler.has_pending());
}

#[tokio::test]
async fn an_empty_scheduler_returns_none_without_touching_the_graph() {
    let (_store, _workunit) = WorkunitStore::setup_for_tests();
    let cas = MockCas::start().await;
    let graph = Graph::new();
    let scheduler = Scheduler::new(
        graph,
        cas.client(),
        Arc::new(ScriptedOracle::new(vec![])),
        SchedulerOptions::default(),
    );

    assert!(scheduler.execute_next(far_deadline()).await.unwrap().is_none());
    assert!(!scheduler.has_pending());
}
