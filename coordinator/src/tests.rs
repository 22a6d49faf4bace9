use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use graph::NodeId;
use hashing::{Cid, Digest};

use crate::{Coordinator, CoordinatorOptions, HashChainClock, PeerId, RemoteCompletionSink, TaskExecutor};

type Handler = Box<dyn Fn(PeerId, Bytes) + Send + Sync>;

/// An in-process fan-out bus standing in for a real `PubSub` fabric: every `publish` from one
/// peer is delivered to every *other* peer's subscribers, mirroring the common behavior of real
/// pubsub implementations not echoing a publisher's own messages back to itself.
#[derive(Default)]
struct Bus {
    handlers: Mutex<Vec<(PeerId, String, Handler)>>,
}

impl Bus {
    fn new() -> Arc<Bus> {
        Arc::new(Bus::default())
    }
}

struct BusPeer {
    bus: Arc<Bus>,
    id: PeerId,
    peers: Mutex<Vec<PeerId>>,
}

impl BusPeer {
    fn new(bus: Arc<Bus>, id: PeerId, peers: Vec<PeerId>) -> Arc<BusPeer> {
        Arc::new(BusPeer {
            bus,
            id,
            peers: Mutex::new(peers),
        })
    }
}

#[async_trait::async_trait]
impl crate::PubSub for BusPeer {
    async fn publish(&self, topic: &str, payload: Bytes) {
        let handlers = self.bus.handlers.lock().unwrap();
        for (peer_id, registered_topic, handler) in handlers.iter() {
            if registered_topic == topic && *peer_id != self.id {
                handler(self.id.clone(), payload.clone());
            }
        }
    }

    fn subscribe(&self, topic: &str, handler: Handler) {
        self.bus.handlers.lock().unwrap().push((self.id.clone(), topic.to_owned(), handler));
    }

    fn peers(&self) -> Vec<PeerId> {
        self.peers.lock().unwrap().clone()
    }

    fn local_peer_id(&self) -> PeerId {
        self.id.clone()
    }
}

struct StubExecutor {
    calls: Arc<AtomicU32>,
    result_cid: Cid,
}

#[async_trait::async_trait]
impl TaskExecutor for StubExecutor {
    async fn execute(&self, _task_id: NodeId) -> Result<Cid, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.result_cid.clone())
    }
}

struct RecordingSink {
    completed: Arc<Mutex<Vec<(NodeId, Cid)>>>,
}

impl RemoteCompletionSink for RecordingSink {
    fn remote_completed(&self, task_id: NodeId, result_cid: Cid) {
        self.completed.lock().unwrap().push((task_id, result_cid));
    }
}

fn cid_of(s: &str) -> Cid {
    Cid::from_digest(&Digest::of_bytes(s.as_bytes()))
}

fn fast_options() -> CoordinatorOptions {
    CoordinatorOptions {
        heartbeat_delay: Duration::from_millis(5),
        takeover_timeout: Duration::from_millis(30),
    }
}

#[tokio::test]
async fn two_peer_network_elects_and_completes_a_task() {
    let (_store, _running) = workunit_store::WorkunitStore::setup_for_tests();

    let bus = Bus::new();
    let peer_a = PeerId::new("0001");
    let peer_b = PeerId::new("0010");

    let a_calls = Arc::new(AtomicU32::new(0));
    let b_calls = Arc::new(AtomicU32::new(0));
    let completed = Arc::new(Mutex::new(Vec::new()));

    let bus_a = BusPeer::new(bus.clone(), peer_a.clone(), vec![peer_b.clone()]);
    let bus_b = BusPeer::new(bus.clone(), peer_b.clone(), vec![peer_a.clone()]);

    let (coord_a, rx_a) = Coordinator::new(
        bus_a,
        Arc::new(HashChainClock::new()),
        Some(Arc::new(StubExecutor {
            calls: a_calls.clone(),
            result_cid: cid_of("result-from-a"),
        })),
        Some(Arc::new(RecordingSink { completed: completed.clone() })),
        fast_options(),
    );
    let (coord_b, rx_b) = Coordinator::new(
        bus_b,
        Arc::new(HashChainClock::new()),
        Some(Arc::new(StubExecutor {
            calls: b_calls.clone(),
            result_cid: cid_of("result-from-b"),
        })),
        Some(Arc::new(RecordingSink { completed: completed.clone() })),
        fast_options(),
    );

    tokio::spawn({
        let coord_a = coord_a.clone();
        async move { coord_a.run(rx_a).await }
    });
    tokio::spawn({
        let coord_b = coord_b.clone();
        async move { coord_b.run(rx_b).await }
    });

    let task_id = NodeId::new();
    coord_a.announce_task(task_id, None).await;

    // Give both peers' spawned election/heartbeat/execution tasks time to run.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Exactly one of the two peers should have executed the task.
    let total_calls = a_calls.load(Ordering::SeqCst) + b_calls.load(Ordering::SeqCst);
    assert_eq!(total_calls, 1, "exactly one peer should have executed the task");

    assert!(coord_a.registry().is_completed(task_id));
    assert!(coord_b.registry().is_completed(task_id));
}

#[tokio::test]
async fn duplicate_announce_does_not_re_elect() {
    let (_store, _running) = workunit_store::WorkunitStore::setup_for_tests();
    let bus = Bus::new();
    let peer_a = PeerId::new("peer-a");
    let bus_a = BusPeer::new(bus.clone(), peer_a.clone(), vec![]);
    let (coord, _rx) = Coordinator::new(bus_a, Arc::new(HashChainClock::new()), None, None, fast_options());

    let task_id = NodeId::new();
    assert!(coord.registry().elected(task_id).is_none());
    coord.announce_task(task_id, None).await;
    let first_election = coord.registry().elected(task_id);
    assert_eq!(first_election, Some(peer_a.clone()));

    // A second announce for the same task (e.g. a retried broadcast) must not resurrect a
    // completed task nor change its recorded state in a way observers would see as a reset.
    coord.announce_task(task_id, None).await;
    assert_eq!(coord.registry().elected(task_id), Some(peer_a));
}

#[test]
fn hamming_scenario_f_lexicographic_tiebreak() {
    let candidates = vec![PeerId::new("0001"), PeerId::new("0010"), PeerId::new("0100")];
    let clock_head = crate::ClockHead("0000".to_owned());
    let winner = crate::elect(&candidates, &clock_head).expect("non-empty candidate list");
    assert_eq!(winner, PeerId::new("0001"));
}
