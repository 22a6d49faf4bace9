// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use hashing::{Cid, Fingerprint};

struct Entry {
    bytes: Bytes,
    cid: Cid,
    expires_at: Instant,
}

///
/// An in-memory, two-index cache in front of the remote CAS.
///
/// The primary index is keyed by content hash (so that two `put`s of identical bytes never hit
/// the network twice); the secondary index maps a CID back to that same hash so that `get` can
/// serve a previously-seen blob directly. Eviction is approximate LRU: entries are evicted in
/// order of `expires_at`, and every cache hit pushes `expires_at` back out by `ttl`, so
/// frequently-requested blobs are the ones least likely to be evicted.
///
pub(crate) struct Cache {
    by_hash: HashMap<Fingerprint, Entry>,
    hash_by_cid: HashMap<Cid, Fingerprint>,
    total_bytes: u64,
    max_bytes: u64,
    ttl: Duration,
}

impl Cache {
    pub(crate) fn new(max_bytes: u64, ttl: Duration) -> Cache {
        Cache {
            by_hash: HashMap::new(),
            hash_by_cid: HashMap::new(),
            total_bytes: 0,
            max_bytes,
            ttl,
        }
    }

    pub(crate) fn get_by_hash(&mut self, hash: &Fingerprint) -> Option<(Bytes, Cid)> {
        let ttl = self.ttl;
        let entry = self.by_hash.get_mut(hash)?;
        entry.expires_at = Instant::now() + ttl;
        Some((entry.bytes.clone(), entry.cid.clone()))
    }

    pub(crate) fn get_by_cid(&mut self, cid: &Cid) -> Option<Bytes> {
        let hash = *self.hash_by_cid.get(cid)?;
        self.get_by_hash(&hash).map(|(bytes, _)| bytes)
    }

    pub(crate) fn insert(&mut self, hash: Fingerprint, bytes: Bytes, cid: Cid) {
        if self.by_hash.contains_key(&hash) {
            return;
        }
        let len = bytes.len() as u64;
        self.evict_to_fit(len);
        self.hash_by_cid.insert(cid.clone(), hash);
        self.total_bytes += len;
        self.by_hash.insert(
            hash,
            Entry {
                bytes,
                cid,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub(crate) fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub(crate) fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Evicts the entries with the oldest `expires_at` until `additional_bytes` would fit under
    /// `max_bytes`, or the cache is empty. A linear scan is acceptable here: the cache holds a
    /// bounded working set of reasoning-graph artifacts, not an unbounded object store.
    fn evict_to_fit(&mut self, additional_bytes: u64) {
        while self.total_bytes + additional_bytes > self.max_bytes && !self.by_hash.is_empty() {
            let oldest = self
                .by_hash
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(hash, _)| *hash);
            let Some(hash) = oldest else { break };
            if let Some(entry) = self.by_hash.remove(&hash) {
                self.total_bytes -= entry.bytes.len() as u64;
                self.hash_by_cid.remove(&entry.cid);
            }
        }
    }
}
