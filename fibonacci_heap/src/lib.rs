// Copyright 2018 Pants project contributors (see CONTRIBUTORS.md).
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
//! An amortised-optimal priority queue ordered by an `i64` key, smaller key is higher priority.
//!
//! Rather than the classical pointer-chasing representation (parent/child/sibling pointers into
//! individually heap-allocated nodes), entries live in a single arena `Vec`, addressed by stable
//! integer indices (see `Handle`). This sidesteps the aliasing and lifetime issues that the
//! textbook representation runs into in a borrow-checked language, at the cost of never shrinking
//! the arena: an extracted or deleted entry's slot becomes a tombstone (`None`) rather than being
//! reclaimed. For the sizes this heap is used at (per-query scheduler state, not a long-lived
//! shared structure) that tradeoff is a non-issue.
//!
//! A `Handle` stays valid from `insert` until the value is `extract_min`'d or `delete`d; using it
//! afterwards is a programming error and the mutating methods return `false`/`None` rather than
//! panicking, so a caller that races itself fails softly instead of corrupting the heap.

use std::fmt;

/// A stable reference to a value inserted into a `FibonacciHeap`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Handle(usize);

struct Entry<T> {
    value: T,
    key: i64,
    parent: Option<usize>,
    child: Option<usize>,
    // Siblings in whichever circular doubly-linked list this entry currently belongs to: the
    // root list if `parent.is_none()`, otherwise `parent`'s child list.
    left: usize,
    right: usize,
    degree: usize,
    mark: bool,
}

///
/// A forest of min-heap-ordered trees, as described in CLRS chapter 19.
///
/// `insert` and `decrease_key` are amortised O(1); `extract_min` is amortised O(log n) because it
/// pays for the lazy consolidation that every preceding `insert`/`decrease_key` deferred.
///
pub struct FibonacciHeap<T> {
    arena: Vec<Option<Entry<T>>>,
    min: Option<usize>,
    size: usize,
}

impl<T> FibonacciHeap<T> {
    pub fn new() -> FibonacciHeap<T> {
        FibonacciHeap {
            arena: Vec::new(),
            min: None,
            size: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns the key of the current minimum, without removing it.
    pub fn peek_min_key(&self) -> Option<i64> {
        self.min.map(|idx| self.entry(idx).key)
    }

    fn entry(&self, idx: usize) -> &Entry<T> {
        self.arena[idx].as_ref().expect("dangling heap index")
    }

    fn entry_mut(&mut self, idx: usize) -> &mut Entry<T> {
        self.arena[idx].as_mut().expect("dangling heap index")
    }

    ///
    /// Inserts `value` with the given key and returns a `Handle` that can later be passed to
    /// `decrease_key`/`delete`.
    ///
    pub fn insert(&mut self, value: T, key: i64) -> Handle {
        let idx = self.arena.len();
        self.arena.push(Some(Entry {
            value,
            key,
            parent: None,
            child: None,
            left: idx,
            right: idx,
            degree: 0,
            mark: false,
        }));
        self.size += 1;

        match self.min {
            None => self.min = Some(idx),
            Some(min_idx) => {
                splice_circular_lists(&mut self.arena, min_idx, idx);
                if key < self.entry(min_idx).key {
                    self.min = Some(idx);
                }
            }
        }

        Handle(idx)
    }

    ///
    /// Removes and returns the minimum (value, key) pair, or `None` if the heap is empty.
    ///
    pub fn extract_min(&mut self) -> Option<(T, i64)> {
        let z_idx = self.min?;

        // Promote every child of the minimum to a root.
        if let Some(child) = self.entry(z_idx).child {
            let children = collect_circular_list(&self.arena, child);
            for c in &children {
                self.entry_mut(*c).parent = None;
                self.entry_mut(*c).mark = false;
            }
            for c in &children {
                splice_circular_lists(&mut self.arena, z_idx, *c);
            }
            self.entry_mut(z_idx).child = None;
        }

        // Remove z from the root list.
        let z_right = self.entry(z_idx).right;
        let new_min_seed = if z_right == z_idx {
            None
        } else {
            remove_from_circular_list(&mut self.arena, z_idx);
            Some(z_right)
        };

        let z = self.arena[z_idx].take().expect("dangling heap index");
        self.size -= 1;

        self.min = new_min_seed;
        if self.min.is_some() {
            self.consolidate();
        }

        Some((z.value, z.key))
    }

    fn consolidate(&mut self) {
        let Some(start) = self.min else { return };
        let roots = collect_circular_list(&self.arena, start);

        // `degree` of a node with n total nodes is bounded by floor(log2(n)) + 1.
        let max_degree = (64 - (self.size.max(1) as u64).leading_zeros()) as usize + 2;
        let mut by_degree: Vec<Option<usize>> = vec![None; max_degree];

        for &root in &roots {
            // A previous iteration of this loop may have already linked `root` under another
            // root; skip entries that are no longer roots.
            if self.entry(root).parent.is_some() {
                continue;
            }
            let mut x = root;
            let mut d = self.entry(x).degree;
            while d >= by_degree.len() {
                by_degree.push(None);
            }
            while let Some(y) = by_degree[d] {
                let (mut x_idx, mut y_idx) = (x, y);
                if self.entry(y_idx).key < self.entry(x_idx).key {
                    std::mem::swap(&mut x_idx, &mut y_idx);
                }
                self.link(y_idx, x_idx);
                x = x_idx;
                by_degree[d] = None;
                d = self.entry(x).degree;
                while d >= by_degree.len() {
                    by_degree.push(None);
                }
            }
            by_degree[d] = Some(x);
        }

        // Rebuild the root list and the min pointer from whatever survived consolidation.
        self.min = None;
        for slot in by_degree.into_iter().flatten() {
            self.entry_mut(slot).left = slot;
            self.entry_mut(slot).right = slot;
            match self.min {
                None => self.min = Some(slot),
                Some(min_idx) => {
                    splice_circular_lists(&mut self.arena, min_idx, slot);
                    if self.entry(slot).key < self.entry(min_idx).key {
                        self.min = Some(slot);
                    }
                }
            }
        }
    }

    /// Makes `child_idx` a child of `parent_idx`. `child_idx` must currently be a root.
    fn link(&mut self, child_idx: usize, parent_idx: usize) {
        remove_from_circular_list(&mut self.arena, child_idx);
        self.entry_mut(child_idx).left = child_idx;
        self.entry_mut(child_idx).right = child_idx;
        self.entry_mut(child_idx).parent = Some(parent_idx);
        self.entry_mut(child_idx).mark = false;

        match self.entry(parent_idx).child {
            None => self.entry_mut(parent_idx).child = Some(child_idx),
            Some(existing_child) => {
                splice_circular_lists(&mut self.arena, existing_child, child_idx);
            }
        }
        self.entry_mut(parent_idx).degree += 1;
    }

    ///
    /// Decreases the key of the value behind `handle` to `new_key`. Returns `false` without
    /// mutating the heap if `new_key >= ` the current key, or if `handle` no longer refers to a
    /// live entry (already extracted/deleted).
    ///
    pub fn decrease_key(&mut self, handle: Handle, new_key: i64) -> bool {
        let idx = handle.0;
        let Some(Some(current)) = self.arena.get(idx) else {
            return false;
        };
        if new_key >= current.key {
            return false;
        }
        self.decrease_key_to(idx, new_key);
        true
    }

    fn decrease_key_to(&mut self, idx: usize, new_key: i64) {
        self.entry_mut(idx).key = new_key;
        let parent = self.entry(idx).parent;
        if let Some(parent_idx) = parent {
            if new_key < self.entry(parent_idx).key {
                self.cut(idx, parent_idx);
                self.cascading_cut(parent_idx);
            }
        }
        if let Some(min_idx) = self.min {
            if new_key < self.entry(min_idx).key {
                self.min = Some(idx);
            }
        } else {
            self.min = Some(idx);
        }
    }

    /// Detaches `child_idx` from `parent_idx`'s child list and adds it to the root list.
    fn cut(&mut self, child_idx: usize, parent_idx: usize) {
        let was_only_child = self.entry(child_idx).left == child_idx;
        if self.entry(parent_idx).child == Some(child_idx) {
            self.entry_mut(parent_idx).child = if was_only_child {
                None
            } else {
                Some(self.entry(child_idx).right)
            };
        }
        remove_from_circular_list(&mut self.arena, child_idx);
        self.entry_mut(parent_idx).degree -= 1;

        self.entry_mut(child_idx).left = child_idx;
        self.entry_mut(child_idx).right = child_idx;
        self.entry_mut(child_idx).parent = None;
        self.entry_mut(child_idx).mark = false;

        let min_idx = self.min.expect("cut is only called while the heap is non-empty");
        splice_circular_lists(&mut self.arena, min_idx, child_idx);
    }

    fn cascading_cut(&mut self, idx: usize) {
        let Some(parent_idx) = self.entry(idx).parent else {
            return;
        };
        if !self.entry(idx).mark {
            self.entry_mut(idx).mark = true;
        } else {
            self.cut(idx, parent_idx);
            self.cascading_cut(parent_idx);
        }
    }

    ///
    /// Removes the value behind `handle` from the heap entirely, equivalent to decreasing its key
    /// to negative infinity and extracting it. Returns the removed value, or `None` if `handle`
    /// was already stale.
    ///
    pub fn delete(&mut self, handle: Handle) -> Option<T> {
        let idx = handle.0;
        if !matches!(self.arena.get(idx), Some(Some(_))) {
            return None;
        }
        self.decrease_key_to(idx, i64::MIN);
        debug_assert_eq!(self.min, Some(idx));
        self.extract_min().map(|(value, _)| value)
    }

    ///
    /// Merges `other` into `self` in O(1), consuming it. The resulting heap's minimum is whichever
    /// of the two heaps' minimums is smaller.
    ///
    pub fn merge(&mut self, other: FibonacciHeap<T>) {
        if other.size == 0 {
            return;
        }
        let offset = self.arena.len();
        let other_min = other.min.map(|m| m + offset);
        for slot in other.arena {
            let remapped = slot.map(|e| Entry {
                value: e.value,
                key: e.key,
                parent: e.parent.map(|p| p + offset),
                child: e.child.map(|c| c + offset),
                left: e.left + offset,
                right: e.right + offset,
                degree: e.degree,
                mark: e.mark,
            });
            self.arena.push(remapped);
        }
        self.size += other.size;

        match (self.min, other_min) {
            (None, m) => self.min = m,
            (Some(_), None) => {}
            (Some(self_min), Some(other_min)) => {
                splice_circular_lists(&mut self.arena, self_min, other_min);
                if self.entry(other_min).key < self.entry(self_min).key {
                    self.min = Some(other_min);
                }
            }
        }
    }
}

impl<T> Default for FibonacciHeap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for FibonacciHeap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FibonacciHeap")
            .field("size", &self.size)
            .field("min_key", &self.peek_min_key())
            .finish()
    }
}

/// Splices the circular doubly-linked list containing `b` in immediately after `a`, merging the
/// two (previously disjoint) lists into one.
fn splice_circular_lists<T>(arena: &mut [Option<Entry<T>>], a: usize, b: usize) {
    let a_right = arena[a].as_ref().unwrap().right;
    let b_left = arena[b].as_ref().unwrap().left;

    arena[a].as_mut().unwrap().right = b;
    arena[b].as_mut().unwrap().left = a;
    arena[a_right].as_mut().unwrap().left = b_left;
    arena[b_left].as_mut().unwrap().right = a_right;
}

/// Removes `idx` from whatever circular doubly-linked list it currently belongs to, leaving its
/// neighbours correctly linked to each other. `idx`'s own `left`/`right` fields are left stale and
/// must be reset by the caller if it is reused as a singleton list.
fn remove_from_circular_list<T>(arena: &mut [Option<Entry<T>>], idx: usize) {
    let left = arena[idx].as_ref().unwrap().left;
    let right = arena[idx].as_ref().unwrap().right;
    arena[left].as_mut().unwrap().right = right;
    arena[right].as_mut().unwrap().left = left;
}

/// Collects the indices of every entry in the circular list starting at `start`, in list order.
fn collect_circular_list<T>(arena: &[Option<Entry<T>>], start: usize) -> Vec<usize> {
    let mut out = vec![start];
    let mut cur = arena[start].as_ref().unwrap().right;
    while cur != start {
        out.push(cur);
        cur = arena[cur].as_ref().unwrap().right;
    }
    out
}

#[cfg(test)]
mod tests;
