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
//! The §4.6 Distributed Coordinator: an announce/heartbeat/complete protocol over an external
//! `PubSub` fabric that elects at-most-one executor per task by Hamming distance to a
//! `MerkleClock` head, and re-injects remotely-completed results back into whatever local sink
//! (typically a `got_engine::GotEngine`) is wired up to receive them.
//!
//! The Coordinator never touches a `graph::Graph` directly (§5 "Shared-resource policy"): it owns
//! only its own `TaskRegistry`, a shadow copy of task state, and calls back into its owner through
//! the `RemoteCompletionSink` hook on every *newly observed* `Complete` message.

mod clock;
mod message;
mod peer;
mod registry;

pub use clock::{ClockHead, HashChainClock, MerkleClock};
pub use message::{Announce, Complete, Heartbeat, MessageError, WireMessage};
pub use peer::{hamming, normalize, PeerId};
pub use pubsub::PubSub;
pub use registry::{TaskRegistry, TaskState};

mod pubsub;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use graph::NodeId;
use hashing::Cid;
use tokio::sync::mpsc;
use workunit_store::{in_workunit, Level, Metric};

const DEFAULT_HEARTBEAT_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_TAKEOVER_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone, Debug)]
pub struct CoordinatorOptions {
    pub heartbeat_delay: Duration,
    pub takeover_timeout: Duration,
}

impl CoordinatorOptions {
    pub fn new() -> CoordinatorOptions {
        CoordinatorOptions {
            heartbeat_delay: DEFAULT_HEARTBEAT_DELAY,
            takeover_timeout: DEFAULT_TAKEOVER_TIMEOUT,
        }
    }
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CoordinatorError {
    Message(MessageError),
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorError::Message(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CoordinatorError {}

impl From<MessageError> for CoordinatorError {
    fn from(err: MessageError) -> CoordinatorError {
        CoordinatorError::Message(err)
    }
}

///
/// Runs a distributed task's actual work once this node has been elected responsible for it.
/// Kept as a narrow trait (rather than depending on `scheduler`/`got_engine` directly) so the
/// Coordinator stays a leaf crate that the Engine composes, instead of the other way around (§9
/// "Global state": no process-wide dependency direction is baked in).
///
#[async_trait::async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task_id: NodeId) -> Result<Cid, String>;
}

/// Invoked once per task the first time this node observes (from a remote peer, or from its own
/// takeover/execution path) that the task is `Completed`, so the owning `got_engine::GotEngine`
/// can splice the result into its graph and promote dependents (§4.6, §9).
pub trait RemoteCompletionSink: Send + Sync {
    fn remote_completed(&self, task_id: NodeId, result_cid: Cid);
}

fn elect(candidates: &[PeerId], clock_head: &ClockHead) -> Option<PeerId> {
    candidates
        .iter()
        .min_by(|a, b| {
            let da = hamming(a.as_str(), clock_head.as_str());
            let db = hamming(b.as_str(), clock_head.as_str());
            da.cmp(&db).then_with(|| a.as_str().cmp(b.as_str()))
        })
        .cloned()
}

struct Inner {
    pubsub: Arc<dyn PubSub>,
    clock: Arc<dyn MerkleClock>,
    registry: TaskRegistry,
    executor: Option<Arc<dyn TaskExecutor>>,
    sink: Option<Arc<dyn RemoteCompletionSink>>,
    options: CoordinatorOptions,
}

///
/// The distributed coordinator for one logical peer. Owns a `TaskRegistry` shadowing the status
/// of every task it has seen announced, and drives the announce/heartbeat/complete protocol
/// described in §4.6 over its `PubSub` and `MerkleClock` collaborators.
///
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    ///
    /// Subscribes to all three coordinator topics, forwarding incoming `(sender, payload)` pairs
    /// onto an internal queue; `run` must be polled (typically spawned on an `Executor`) to drain
    /// it. This decouples pubsub's push-style callback from the coordinator's own async logic
    /// (§9 "Async control flow").
    ///
    pub fn new(
        pubsub: Arc<dyn PubSub>,
        clock: Arc<dyn MerkleClock>,
        executor: Option<Arc<dyn TaskExecutor>>,
        sink: Option<Arc<dyn RemoteCompletionSink>>,
        options: CoordinatorOptions,
    ) -> (Coordinator, mpsc::UnboundedReceiver<(PeerId, Bytes)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        for topic in [pubsub::TOPIC_ANNOUNCE, pubsub::TOPIC_HEARTBEAT, pubsub::TOPIC_COMPLETE] {
            let tx = tx.clone();
            pubsub.subscribe(
                topic,
                Box::new(move |sender, payload| {
                    let _ = tx.send((sender, payload));
                }),
            );
        }
        let coordinator = Coordinator {
            inner: Arc::new(Inner {
                pubsub,
                clock,
                registry: TaskRegistry::new(),
                executor,
                sink,
                options,
            }),
        };
        (coordinator, rx)
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.inner.pubsub.local_peer_id()
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    ///
    /// Drains the queue populated by the `subscribe` callbacks installed in `new`, dispatching
    /// each message by topic. Intended to be spawned as a long-lived background task; returns
    /// once the channel's sender half (held by the `PubSub` closures) is dropped.
    ///
    pub async fn run(&self, mut rx: mpsc::UnboundedReceiver<(PeerId, Bytes)>) {
        while let Some((sender, payload)) = rx.recv().await {
            if let Err(err) = self.dispatch(sender, &payload).await {
                log::warn!("coordinator: dropping malformed message: {err}");
            }
        }
    }

    async fn dispatch(&self, _sender: PeerId, payload: &[u8]) -> Result<(), CoordinatorError> {
        match WireMessage::decode(payload)? {
            WireMessage::Announce(msg) => self.handle_announce(msg).await,
            WireMessage::Heartbeat(msg) => self.handle_heartbeat(msg),
            WireMessage::Complete(msg) => self.handle_complete(msg),
        }
        Ok(())
    }

    ///
    /// Announces that `task_id` is available for distributed execution (§4.6), ticking the clock
    /// for the announce event and processing the resulting election locally as well as publishing
    /// it — the originating node is itself a candidate for responsibility, so it must not wait for
    /// its own broadcast to loop back through `PubSub` (real fabrics vary on whether a publisher
    /// observes its own messages).
    ///
    pub async fn announce_task(&self, task_id: NodeId, instructions_cid: Option<Cid>) {
        let clock_head = self.inner.clock.tick(&format!("{task_id}:announce"));
        let msg = Announce {
            task_id,
            clock_head: clock_head.clone(),
            instructions_cid,
        };
        self.inner
            .pubsub
            .publish(pubsub::TOPIC_ANNOUNCE, WireMessage::Announce(msg.clone()).encode())
            .await;
        self.handle_announce(msg).await;
    }

    async fn handle_announce(&self, announce: Announce) {
        let task_id = announce.task_id;
        let is_new = self.inner.registry.record_announce(task_id, announce.clock_head.clone());
        if !is_new {
            return;
        }

        in_workunit!(
            "coordinator_handle_announce",
            Level::Debug,
            desc = Some(format!("coordinator announce {task_id}")),
            |workunit| async move {
                workunit.increment_counter(Metric::CoordinatorTasksAnnounced, 1);
                Ok::<(), CoordinatorError>(())
            }
        )
        .await
        .ok();

        let mut candidates = self.inner.pubsub.peers();
        let local = self.inner.pubsub.local_peer_id();
        candidates.push(local.clone());

        let Some(winner) = elect(&candidates, &announce.clock_head) else {
            return;
        };
        self.inner.registry.set_elected(task_id, winner.clone());

        if winner == local {
            let this = self.clone();
            tokio::spawn(async move { this.assume_responsibility(task_id, false).await });
        } else {
            let this = self.clone();
            let clock_head = announce.clock_head.clone();
            tokio::spawn(async move { this.watch_for_takeover(task_id, clock_head, winner).await });
        }
    }

    /// Waits the heartbeat grace period, then (unless the task completed underneath us) publishes
    /// a heartbeat, executes the task, and publishes its completion (§4.6).
    async fn assume_responsibility(&self, task_id: NodeId, is_takeover: bool) {
        if is_takeover {
            in_workunit!(
                "coordinator_takeover",
                Level::Debug,
                desc = Some(format!("coordinator takeover {task_id}")),
                |workunit| async move {
                    workunit.increment_counter(Metric::CoordinatorTasksTakenOver, 1);
                    Ok::<(), CoordinatorError>(())
                }
            )
            .await
            .ok();
        } else {
            in_workunit!(
                "coordinator_elected",
                Level::Debug,
                desc = Some(format!("coordinator elected {task_id}")),
                |workunit| async move {
                    workunit.increment_counter(Metric::CoordinatorTasksElected, 1);
                    Ok::<(), CoordinatorError>(())
                }
            )
            .await
            .ok();
        }

        tokio::time::sleep(self.inner.options.heartbeat_delay).await;
        if self.inner.registry.is_completed(task_id) {
            return;
        }

        let local = self.inner.pubsub.local_peer_id();
        let heartbeat = Heartbeat {
            task_id,
            executor: local.clone(),
        };
        self.inner
            .pubsub
            .publish(pubsub::TOPIC_HEARTBEAT, WireMessage::Heartbeat(heartbeat).encode())
            .await;
        self.inner.registry.record_heartbeat(task_id);

        let Some(executor) = self.inner.executor.clone() else {
            log::debug!("coordinator: elected for {task_id} but no TaskExecutor is configured");
            return;
        };

        match executor.execute(task_id).await {
            Ok(result_cid) => {
                let completed_head = self.inner.clock.tick(&format!("{task_id}:complete"));
                self.land_complete(task_id, result_cid, completed_head, local).await;
            }
            Err(err) => log::warn!("coordinator: executing {task_id} failed: {err}"),
        }
    }

    /// If, after the takeover window, nobody has heartbeated for `task_id`, re-elects among the
    /// known peers minus the non-responsive one (§4.6 "Failure semantics").
    async fn watch_for_takeover(&self, task_id: NodeId, clock_head: ClockHead, non_responsive: PeerId) {
        tokio::time::sleep(self.inner.options.takeover_timeout).await;
        if self.inner.registry.is_completed(task_id) || self.inner.registry.has_heartbeat(task_id) {
            return;
        }

        let local = self.inner.pubsub.local_peer_id();
        let candidates: Vec<PeerId> = self
            .inner
            .pubsub
            .peers()
            .into_iter()
            .chain(std::iter::once(local.clone()))
            .filter(|p| *p != non_responsive)
            .collect();
        let Some(winner) = elect(&candidates, &clock_head) else {
            return;
        };
        self.inner.registry.set_elected(task_id, winner.clone());
        if winner == local {
            self.assume_responsibility(task_id, true).await;
        }
    }

    fn handle_heartbeat(&self, heartbeat: Heartbeat) {
        self.inner.registry.record_heartbeat(heartbeat.task_id);
    }

    fn handle_complete(&self, complete: Complete) {
        self.inner.clock.merge(complete.clock_head.clone());
        let task_id = complete.task_id;
        let result_cid = complete.result_cid.clone();
        let recorded = self.inner.registry.record_complete(
            task_id,
            complete.result_cid,
            complete.clock_head,
            complete.executor,
        );
        if recorded {
            if let Some(sink) = &self.inner.sink {
                sink.remote_completed(task_id, result_cid);
            }
        }
    }

    /// Shared tail of both the local-execution and (conceptually) remote-observation paths:
    /// records the completion, publishes it, and notifies the sink if this call is the one that
    /// actually recorded it.
    async fn land_complete(&self, task_id: NodeId, result_cid: Cid, clock_head: ClockHead, executor: PeerId) {
        let recorded = self
            .inner
            .registry
            .record_complete(task_id, result_cid.clone(), clock_head.clone(), executor.clone());
        let complete = Complete {
            task_id,
            result_cid: result_cid.clone(),
            clock_head,
            executor,
        };
        self.inner
            .pubsub
            .publish(pubsub::TOPIC_COMPLETE, WireMessage::Complete(complete).encode())
            .await;
        if recorded {
            if let Some(sink) = &self.inner.sink {
                sink.remote_completed(task_id, result_cid);
            }
        }
    }
}

#[cfg(test)]
mod tests;
