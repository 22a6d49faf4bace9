use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use hashing::{Digest, Fingerprint};
use parking_lot::Mutex;

///
/// A hash-chained logical clock value (§4.6, GLOSSARY "Merkle clock head"): the digest of the
/// previous head concatenated with the event that advanced it. Comparable by `hamming` (via its
/// hex-string `Display`) the same way a `PeerId` is.
///
#[derive(Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ClockHead(pub String);

impl ClockHead {
    pub fn genesis() -> ClockHead {
        ClockHead(Fingerprint::from_bytes_unsafe(&[0u8; 32]).to_hex())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClockHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ClockHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClockHead({})", self.0)
    }
}

///
/// The external logical-clock collaborator (§4.6 "Assumptions"): `tick` advances the clock for a
/// local event and returns the new head; `merge` folds in a head learned from a remote peer. Both
/// operations are monotonic in the sense that the resulting head is always derived from whichever
/// of the two predecessor heads came later in this node's own observation order — the clock does
/// not attempt to reconstruct a total order across partitions (§4.6 "Failure semantics": "the
/// result with the earliest `clock_head` wins on merge" is a property of *callers* comparing
/// heads, not of the clock itself).
///
pub trait MerkleClock: Send + Sync {
    fn tick(&self, event_id: &str) -> ClockHead;
    fn merge(&self, head: ClockHead);
    fn head(&self) -> ClockHead;
}

///
/// The workspace's concrete `MerkleClock`: each tick hashes `(generation, previous head bytes,
/// event id bytes)` with SHA-256 (reusing the `hashing` crate's digest primitive rather than
/// rolling a second hash implementation) to produce the next head. `merge` folds a remote head in
/// by hashing it together with the local head, so that a merge is itself an event the chain can
/// later be distinguished by.
///
pub struct HashChainClock {
    generation: AtomicU64,
    head: Mutex<ClockHead>,
}

impl HashChainClock {
    pub fn new() -> HashChainClock {
        HashChainClock {
            generation: AtomicU64::new(0),
            head: Mutex::new(ClockHead::genesis()),
        }
    }

    fn advance(&self, mixed_in: &str) -> ClockHead {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let mut head = self.head.lock();
        let mut buf = Vec::with_capacity(head.0.len() + mixed_in.len() + 8);
        buf.extend_from_slice(&generation.to_be_bytes());
        buf.extend_from_slice(head.0.as_bytes());
        buf.extend_from_slice(mixed_in.as_bytes());
        let next = ClockHead(Digest::of_bytes(&buf).hash.to_hex());
        *head = next.clone();
        next
    }
}

impl Default for HashChainClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MerkleClock for HashChainClock {
    fn tick(&self, event_id: &str) -> ClockHead {
        self.advance(event_id)
    }

    fn merge(&self, head: ClockHead) {
        let _ = self.advance(head.as_str());
    }

    fn head(&self) -> ClockHead {
        self.head.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_advances_monotonically_and_is_deterministic_given_the_same_history() {
        let clock = HashChainClock::new();
        let genesis = clock.head();
        let h1 = clock.tick("event-a");
        assert_ne!(h1, genesis);
        let h2 = clock.tick("event-b");
        assert_ne!(h2, h1);
    }

    #[test]
    fn merge_changes_the_head() {
        let clock = HashChainClock::new();
        let before = clock.head();
        clock.merge(ClockHead("deadbeef".to_owned()));
        assert_ne!(clock.head(), before);
    }
}
