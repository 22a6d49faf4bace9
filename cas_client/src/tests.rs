use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use hashing::Digest;
use url::Url;
use workunit_store::WorkunitStore;

use crate::{CasClient, CasClientOptions, CasError};

/// Behavior a single mock-CAS route should exhibit on its next call.
#[derive(Clone)]
enum Script {
    Ok,
    ServerError,
    ClientError,
}

#[derive(Clone, Default)]
struct Store {
    blobs: Arc<Mutex<std::collections::HashMap<String, Bytes>>>,
}

#[derive(Clone)]
struct HandlerState {
    store: Store,
    put_calls: Arc<AtomicU32>,
    get_calls: Arc<AtomicU32>,
    script: Arc<Mutex<Vec<Script>>>,
}

impl HandlerState {
    fn next_script(&self) -> Script {
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            Script::Ok
        } else {
            script.remove(0)
        }
    }
}

async fn add_handler(State(state): State<HandlerState>, body: Bytes) -> impl IntoResponse {
    state.put_calls.fetch_add(1, Ordering::SeqCst);
    match state.next_script() {
        Script::ServerError => (StatusCode::BAD_GATEWAY, "server error").into_response(),
        Script::ClientError => (StatusCode::BAD_REQUEST, "rejected").into_response(),
        Script::Ok => {
            let cid = Digest::of_bytes(&body).hash.to_hex();
            state.store.blobs.lock().unwrap().insert(cid.clone(), body);
            axum::Json(serde_json::json!({ "cid": cid })).into_response()
        }
    }
}

#[derive(serde::Deserialize)]
struct CidQuery {
    cid: String,
}

async fn cat_handler(State(state): State<HandlerState>, Query(query): Query<CidQuery>) -> impl IntoResponse {
    state.get_calls.fetch_add(1, Ordering::SeqCst);
    match state.next_script() {
        Script::ServerError => (StatusCode::BAD_GATEWAY, "server error").into_response(),
        Script::ClientError => (StatusCode::BAD_REQUEST, "rejected").into_response(),
        Script::Ok => match state.store.blobs.lock().unwrap().get(&query.cid).cloned() {
            Some(bytes) => bytes.into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
    }
}

struct MockCas {
    base_url: Url,
    put_calls: Arc<AtomicU32>,
    get_calls: Arc<AtomicU32>,
    script: Arc<Mutex<Vec<Script>>>,
}

impl MockCas {
    async fn start() -> MockCas {
        let bind_addr = "127.0.0.1:0".parse::<SocketAddr>().unwrap();
        let listener = std::net::TcpListener::bind(bind_addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        let state = HandlerState {
            store: Store::default(),
            put_calls: Arc::new(AtomicU32::new(0)),
            get_calls: Arc::new(AtomicU32::new(0)),
            script: Arc::new(Mutex::new(Vec::new())),
        };
        let put_calls = Arc::clone(&state.put_calls);
        let get_calls = Arc::clone(&state.get_calls);
        let script = Arc::clone(&state.script);

        let router = Router::new()
            .route("/ipfs/add", post(add_handler))
            .route("/ipfs/cat", get(cat_handler))
            .route("/ipld/store", post(add_handler))
            .route("/ipld/load", get(cat_handler))
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
            get_calls,
            script,
        }
    }

    fn script_next(&self, scripted: Vec<Script>) {
        *self.script.lock().unwrap() = scripted;
    }

    fn client(&self) -> CasClient {
        CasClient::new(CasClientOptions::new(self.base_url.clone())).unwrap()
    }
}

#[tokio::test]
async fn put_is_idempotent_and_cached() {
    let (_store, _workunit) = WorkunitStore::setup_for_tests();
    let cas = MockCas::start().await;
    let client = cas.client();

    let cid1 = client.put(Bytes::from_static(b"hello")).await.unwrap();
    let cid2 = client.put(Bytes::from_static(b"hello")).await.unwrap();

    assert_eq!(cid1, cid2);
    assert_eq!(cas.put_calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.cached_entry_count(), 1);
}

#[tokio::test]
async fn get_serves_from_cache_after_put() {
    let (_store, _workunit) = WorkunitStore::setup_for_tests();
    let cas = MockCas::start().await;
    let client = cas.client();

    let cid = client.put(Bytes::from_static(b"xyzzy")).await.unwrap();
    let fetched = client.get(&cid).await.unwrap();

    assert_eq!(fetched, Bytes::from_static(b"xyzzy"));
    assert_eq!(cas.get_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn get_fetches_over_the_network_on_a_cold_client() {
    let (_store, _workunit) = WorkunitStore::setup_for_tests();
    let cas = MockCas::start().await;

    let cid = cas.client().put(Bytes::from_static(b"cold fetch")).await.unwrap();

    let cold_client = cas.client();
    let fetched = cold_client.get(&cid).await.unwrap();

    assert_eq!(fetched, Bytes::from_static(b"cold fetch"));
    assert_eq!(cas.get_calls.load(Ordering::SeqCst), 1);
    // A second get on the same (now warm) client must not hit the network again.
    cold_client.get(&cid).await.unwrap();
    assert_eq!(cas.get_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn get_unknown_cid_returns_not_found_without_retrying() {
    let (_store, _workunit) = WorkunitStore::setup_for_tests();
    let cas = MockCas::start().await;
    let client = cas.client();

    let unknown: crate::Cid = "not-a-real-cid".parse().unwrap();
    let err = client.get(&unknown).await.unwrap_err();

    assert!(matches!(err, CasError::NotFound(_)));
    assert_eq!(cas.get_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn put_retries_transient_server_errors_then_succeeds() {
    let (_store, _workunit) = WorkunitStore::setup_for_tests();
    let cas = MockCas::start().await;
    cas.script_next(vec![Script::ServerError, Script::Ok]);
    let client = cas.client();

    let cid = client.put(Bytes::from_static(b"retry me")).await.unwrap();

    assert_eq!(cas.put_calls.load(Ordering::SeqCst), 2);
    assert_eq!(client.get(&cid).await.unwrap(), Bytes::from_static(b"retry me"));
}

#[tokio::test]
async fn put_does_not_retry_semantic_rejections() {
    let (_store, _workunit) = WorkunitStore::setup_for_tests();
    let cas = MockCas::start().await;
    cas.script_next(vec![Script::ClientError]);
    let client = cas.client();

    let err = client.put(Bytes::from_static(b"bad content")).await.unwrap_err();

    assert!(matches!(err, CasError::Rejected(_)));
    assert_eq!(cas.put_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn put_graph_and_get_graph_roundtrip() {
    let (_store, _workunit) = WorkunitStore::setup_for_tests();
    let cas = MockCas::start().await;
    let client = cas.client();

    let node = graph::Node::new(graph::NodeType::Question, "what is the answer?", 0);
    let root = node.id;
    let graph = graph::Graph::new();
    graph.insert_node(node).unwrap();
    graph.set_root(root).unwrap();
    let document = graph.to_canonical_document();

    let cid = client.put_graph(&document).await.unwrap();
    let fetched = client.get_graph(&cid).await.unwrap();

    assert_eq!(fetched.root_node_id, Some(root));
    assert_eq!(fetched.nodes.len(), 1);
    assert_eq!(fetched.nodes[0].content, "what is the answer?");
}

#[tokio::test]
async fn cache_evicts_oldest_entry_once_over_capacity() {
    let (_store, _workunit) = WorkunitStore::setup_for_tests();
    let cas = MockCas::start().await;
    let mut options = CasClientOptions::new(cas.base_url.clone());
    options.max_cache_bytes = 12;
    let client = CasClient::new(options).unwrap();

    client.put(Bytes::from_static(b"0123456789")).await.unwrap();
    assert_eq!(client.cached_entry_count(), 1);

    // Adding a second, equally-sized blob overflows the 12-byte budget and evicts the first.
    client.put(Bytes::from_static(b"9876543210")).await.unwrap();
    assert_eq!(client.cached_entry_count(), 1);
    assert_eq!(client.cached_bytes(), 10);
}
