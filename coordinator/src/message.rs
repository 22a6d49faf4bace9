use graph::NodeId;
use hashing::Cid;
use serde::{Deserialize, Serialize};

use crate::clock::ClockHead;
use crate::peer::PeerId;

/// Published on `tasks/announce` when a task becomes available for distributed execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Announce {
    pub task_id: NodeId,
    pub clock_head: ClockHead,
    /// The content a remote executor needs to run the task; out of scope to interpret further
    /// (§1 "Out of scope": node-processor content is an `LLMOracle` concern). Opaque from the
    /// coordinator's point of view.
    pub instructions_cid: Option<Cid>,
}

/// Published on `tasks/heartbeat` by the peer that elected itself responsible, within 1s of
/// election (§4.6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Heartbeat {
    pub task_id: NodeId,
    pub executor: PeerId,
}

/// Published on `tasks/complete` once the responsible peer (or whichever peer takes over after a
/// missed heartbeat) finishes the task.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Complete {
    pub task_id: NodeId,
    pub result_cid: Cid,
    pub clock_head: ClockHead,
    pub executor: PeerId,
}

/// The envelope actually sent over the wire: one JSON value per topic, tagged so a single
/// `subscribe` handler covering all three topics (as `Coordinator::new` installs) can recover
/// which one it is.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireMessage {
    Announce(Announce),
    Heartbeat(Heartbeat),
    Complete(Complete),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageError(pub String);

impl std::fmt::Display for MessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed coordinator message: {}", self.0)
    }
}

impl std::error::Error for MessageError {}

impl WireMessage {
    pub fn encode(&self) -> bytes::Bytes {
        bytes::Bytes::from(serde_json::to_vec(self).expect("WireMessage always serializes"))
    }

    pub fn decode(bytes: &[u8]) -> Result<WireMessage, MessageError> {
        serde_json::from_slice(bytes).map_err(|err| MessageError(err.to_string()))
    }
}
