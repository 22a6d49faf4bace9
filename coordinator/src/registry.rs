use fnv::FnvHashMap as HashMap;
use graph::NodeId;
use hashing::Cid;
use parking_lot::Mutex;

use crate::clock::ClockHead;
use crate::peer::PeerId;

#[derive(Clone, Debug)]
pub enum TaskState {
    /// Announced but not (yet, locally) known to be complete. `elected` is this node's most
    /// recent responsibility verdict for the task (§4.6 "Responsibility rule"); `heartbeat_seen`
    /// records whether *any* heartbeat (not necessarily from the elected peer) has been observed,
    /// which gates the 3s takeover timer (§4.6 "Failure semantics").
    Announced {
        clock_head: ClockHead,
        elected: Option<PeerId>,
        heartbeat_seen: bool,
    },
    Completed {
        result_cid: Cid,
        clock_head: ClockHead,
        executor: PeerId,
    },
}

///
/// The Coordinator's shadow copy of in-flight distributed tasks (§5 "Shared-resource policy": "a
/// shared map under the Coordinator, mutated only on pubsub callbacks"). Distinct from the
/// Engine's own `Graph`, which the Coordinator never touches directly — it only ever calls back
/// into the Engine through the `on_remote_complete` hook (§4.6, §9 "Async control flow").
///
pub struct TaskRegistry {
    tasks: Mutex<HashMap<NodeId, TaskState>>,
}

impl TaskRegistry {
    pub fn new() -> TaskRegistry {
        TaskRegistry {
            tasks: Mutex::new(HashMap::default()),
        }
    }

    /// Returns `false` if the task is already known to be `Completed` (a late or duplicate
    /// announce should not resurrect it).
    pub fn record_announce(&self, task_id: NodeId, clock_head: ClockHead) -> bool {
        let mut tasks = self.tasks.lock();
        match tasks.get(&task_id) {
            Some(TaskState::Completed { .. }) => false,
            _ => {
                tasks.insert(
                    task_id,
                    TaskState::Announced {
                        clock_head,
                        elected: None,
                        heartbeat_seen: false,
                    },
                );
                true
            }
        }
    }

    pub fn set_elected(&self, task_id: NodeId, peer: PeerId) {
        let mut tasks = self.tasks.lock();
        if let Some(TaskState::Announced { elected, .. }) = tasks.get_mut(&task_id) {
            *elected = Some(peer);
        }
    }

    pub fn record_heartbeat(&self, task_id: NodeId) {
        let mut tasks = self.tasks.lock();
        if let Some(TaskState::Announced { heartbeat_seen, .. }) = tasks.get_mut(&task_id) {
            *heartbeat_seen = true;
        }
    }

    pub fn has_heartbeat(&self, task_id: NodeId) -> bool {
        matches!(
            self.tasks.lock().get(&task_id),
            Some(TaskState::Announced { heartbeat_seen: true, .. })
        )
    }

    pub fn elected(&self, task_id: NodeId) -> Option<PeerId> {
        match self.tasks.lock().get(&task_id) {
            Some(TaskState::Announced { elected, .. }) => elected.clone(),
            _ => None,
        }
    }

    pub fn clock_head_of(&self, task_id: NodeId) -> Option<ClockHead> {
        match self.tasks.lock().get(&task_id) {
            Some(TaskState::Announced { clock_head, .. }) => Some(clock_head.clone()),
            Some(TaskState::Completed { clock_head, .. }) => Some(clock_head.clone()),
            None => None,
        }
    }

    ///
    /// Records a completion, first-writer-wins (§4.6 "the result with the earliest `clock_head`
    /// wins on merge" — resolved here as "first observed", since the hash-chained `MerkleClock`
    /// does not expose a globally-comparable sequence number across peers; see DESIGN.md). Returns
    /// `true` iff this call is the one that actually recorded the completion (i.e. the caller
    /// should re-inject the result into the Engine).
    ///
    pub fn record_complete(&self, task_id: NodeId, result_cid: Cid, clock_head: ClockHead, executor: PeerId) -> bool {
        let mut tasks = self.tasks.lock();
        if matches!(tasks.get(&task_id), Some(TaskState::Completed { .. })) {
            return false;
        }
        tasks.insert(
            task_id,
            TaskState::Completed {
                result_cid,
                clock_head,
                executor,
            },
        );
        true
    }

    pub fn is_completed(&self, task_id: NodeId) -> bool {
        matches!(self.tasks.lock().get(&task_id), Some(TaskState::Completed { .. }))
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
