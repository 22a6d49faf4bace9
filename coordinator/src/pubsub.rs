use bytes::Bytes;

use crate::peer::PeerId;

/// The three topics the coordinator protocol speaks on (§4.6 "Topics").
pub const TOPIC_ANNOUNCE: &str = "tasks/announce";
pub const TOPIC_HEARTBEAT: &str = "tasks/heartbeat";
pub const TOPIC_COMPLETE: &str = "tasks/complete";

///
/// The external peer-discovery/broadcast collaborator (§4.6 "Assumptions", §6 "PubSub
/// contract"). The core consumes this abstraction rather than implementing a peer-discovery
/// stack itself (§1 "Non-goals").
///
/// `subscribe`'s handler is invoked asynchronously per the contract; in this workspace that means
/// the `PubSub` implementation is expected to push `(sender, payload)` pairs onto whatever queue
/// the handler closure feeds (see `Coordinator::new`, which hands `subscribe` a closure that
/// forwards into an internal `tokio::sync::mpsc` channel, per §9 "Async control flow").
///
#[async_trait::async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes);

    fn subscribe(&self, topic: &str, handler: Box<dyn Fn(PeerId, Bytes) + Send + Sync>);

    fn peers(&self) -> Vec<PeerId>;

    fn local_peer_id(&self) -> PeerId;
}
