// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Fragment Map
//!
//! This module tracks which byte ranges of each logical entity have been
//! observed across archive fragments. A single file may span several
//! fragments in one archive (or across archives), and workers complete
//! fragments in arbitrary order. The map answers "is this entity
//! complete?", "does this range overlap something already seen?", and
//! "how many bytes are covered?" under a single caller-held lock.
//!
//! ## Overview
//!
//! Every tracked entity is a [`FragmentNode`]:
//!
//! - **Name**: the entity's archive name (lookup key)
//! - **Total size**: the declared size of the whole entity
//! - **User data**: opaque owned bytes the caller wants back at sweep time
//!   (restore stores serialized file metadata here so a partial file still
//!   receives ownership and timestamps)
//! - **Lock count**: an atomic pin count; a node pinned by more than one
//!   holder is never reported complete
//! - **Ranges**: the covered `[offset, offset+length)` intervals, kept
//!   sorted, pairwise disjoint and non-touching
//!
//! ## Invariants
//!
//! 1. Every stored range has `length > 0`
//! 2. Ranges are sorted by offset and pairwise disjoint; adjacent ranges
//!    never touch (touching ranges are merged on insert)
//! 3. The covered sum equals the sum of all range lengths; it is maintained
//!    incrementally on every mutation, never recomputed by scanning
//!
//! ## Lifecycle
//!
//! Nodes are discarded the instant they become complete, so the map stays
//! bounded by the number of in-flight incomplete entities rather than by
//! archive size. Whatever is left at the end of a job is reported as
//! incomplete.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// One covered byte range `[offset, offset + length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentRange {
    pub offset: u64,
    pub length: u64,
}

impl FragmentRange {
    /// Exclusive end of the range.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Per-entity record of observed byte ranges.
#[derive(Debug)]
pub struct FragmentNode {
    name: String,
    total_size: u64,
    user_data: Vec<u8>,
    lock_count: AtomicU32,
    ranges: Vec<FragmentRange>,
    covered: u64,
}

impl FragmentNode {
    fn new(name: String, total_size: u64, user_data: Vec<u8>, lock_count: u32) -> Self {
        Self {
            name,
            total_size,
            user_data,
            lock_count: AtomicU32::new(lock_count),
            ranges: Vec::new(),
            covered: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn user_data(&self) -> &[u8] {
        &self.user_data
    }

    /// Bytes covered by all ranges together.
    pub fn covered(&self) -> u64 {
        self.covered
    }

    /// The stored ranges, sorted by offset.
    pub fn ranges(&self) -> &[FragmentRange] {
        &self.ranges
    }

    /// Pins the node; a node with more than one pin is never complete.
    pub fn lock(&self) {
        self.lock_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Releases one pin.
    pub fn unlock(&self) {
        let previous = self.lock_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "unlock without matching lock");
    }

    pub fn lock_count(&self) -> u32 {
        self.lock_count.load(Ordering::SeqCst)
    }

    /// Records one observed range.
    ///
    /// A zero-length range is ignored. The new range absorbs every stored
    /// range it overlaps or touches, so the range list stays sorted,
    /// disjoint and non-touching. The covered sum is adjusted by the net
    /// change; recomputing it would be O(n) per insert on the hot path.
    pub fn add_range(&mut self, offset: u64, length: u64) {
        if length == 0 {
            return;
        }
        let end = offset + length;

        // Index of the first stored range that overlaps or touches the new
        // one, and one past the last such range. Touching counts: [0,8) and
        // [8,4) merge into [0,12).
        let lo = self.ranges.partition_point(|range| range.end() < offset);
        let hi = self.ranges.partition_point(|range| range.offset <= end);

        if lo == hi {
            // no neighbor, plain insert
            self.ranges.insert(lo, FragmentRange { offset, length });
            self.covered += length;
        } else {
            let merged_offset = self.ranges[lo].offset.min(offset);
            let merged_end = self.ranges[hi - 1].end().max(end);
            let absorbed: u64 = self.ranges[lo..hi].iter().map(|range| range.length).sum();

            self.ranges.drain(lo + 1..hi);
            self.ranges[lo] = FragmentRange {
                offset: merged_offset,
                length: merged_end - merged_offset,
            };
            self.covered += (merged_end - merged_offset) - absorbed;
        }

        debug_assert!(self.check_invariants());
    }

    /// True iff any stored range intersects `[offset, offset + length)`.
    /// A zero-length query degrades to a point query at `offset`.
    pub fn range_exists(&self, offset: u64, length: u64) -> bool {
        let end = if length > 0 { offset + length } else { offset + 1 };
        self.ranges
            .iter()
            .any(|range| range.offset < end && offset < range.end())
    }

    /// Completion rule: not pinned by anyone else, and either the entity is
    /// empty or a single range starting at zero covers the declared size.
    pub fn is_complete(&self) -> bool {
        self.lock_count() <= 1
            && (self.total_size == 0
                || (self.ranges.len() == 1 && self.ranges[0].offset == 0 && self.ranges[0].length >= self.total_size))
    }

    /// The uncovered gaps up to the declared total size, for incomplete-entry
    /// reporting.
    pub fn missing_ranges(&self) -> Vec<FragmentRange> {
        let mut missing = Vec::new();
        let mut cursor = 0u64;
        for range in &self.ranges {
            if range.offset > cursor {
                missing.push(FragmentRange {
                    offset: cursor,
                    length: range.offset - cursor,
                });
            }
            cursor = cursor.max(range.end());
        }
        if cursor < self.total_size {
            missing.push(FragmentRange {
                offset: cursor,
                length: self.total_size - cursor,
            });
        }
        missing
    }

    fn check_invariants(&self) -> bool {
        let mut sum = 0u64;
        for window in self.ranges.windows(2) {
            // sorted, disjoint, non-touching
            if window[0].end() >= window[1].offset {
                return false;
            }
        }
        for range in &self.ranges {
            if range.length == 0 {
                return false;
            }
            sum += range.length;
        }
        sum == self.covered
    }
}

/// The fragment tracker: a map from entity name to its [`FragmentNode`].
///
/// All mutation happens under a tracker-wide lock held by the caller
/// (typically a worker, via `Mutex<FragmentMap>`); the map itself spawns no
/// threads and takes no locks.
#[derive(Debug, Default)]
pub struct FragmentMap {
    nodes: BTreeMap<String, FragmentNode>,
}

impl FragmentMap {
    pub fn new() -> Self {
        Self { nodes: BTreeMap::new() }
    }

    /// Inserts a new node with no ranges and returns it.
    pub fn add(&mut self, name: &str, total_size: u64, user_data: Vec<u8>, lock_count: u32) -> &mut FragmentNode {
        self.nodes
            .entry(name.to_string())
            .or_insert_with(|| FragmentNode::new(name.to_string(), total_size, user_data, lock_count))
    }

    pub fn find(&self, name: &str) -> Option<&FragmentNode> {
        self.nodes.get(name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut FragmentNode> {
        self.nodes.get_mut(name)
    }

    /// Removes and returns a node.
    pub fn discard(&mut self, name: &str) -> Option<FragmentNode> {
        self.nodes.remove(name)
    }

    /// Iterates nodes in name order.
    pub fn iter(&self) -> impl Iterator<Item = &FragmentNode> {
        self.nodes.values()
    }

    /// Drains all nodes in name order.
    pub fn drain(&mut self) -> impl Iterator<Item = FragmentNode> {
        std::mem::take(&mut self.nodes).into_values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn node(total_size: u64) -> FragmentNode {
        FragmentNode::new("test".to_string(), total_size, Vec::new(), 0)
    }

    // Insertion-order grids over a six-byte entity, as the permutations the
    // worker pool actually produces.

    #[test]
    fn test_complete_in_order() {
        let mut n = node(6);
        n.add_range(0, 2);
        n.add_range(2, 2);
        n.add_range(4, 2);
        assert!(n.is_complete());
    }

    #[test]
    fn test_complete_reverse_order() {
        let mut n = node(6);
        n.add_range(4, 2);
        n.add_range(2, 2);
        n.add_range(0, 2);
        assert!(n.is_complete());
    }

    #[test]
    fn test_complete_gap_filled_last() {
        let mut n = node(6);
        n.add_range(0, 2);
        n.add_range(4, 2);
        n.add_range(2, 2);
        assert!(n.is_complete());
    }

    #[test]
    fn test_complete_overlapping_fragments() {
        let mut n = node(6);
        n.add_range(0, 3);
        n.add_range(4, 2);
        n.add_range(3, 3);
        assert!(n.is_complete());
        assert_eq!(n.covered(), 6);
    }

    #[test]
    fn test_complete_overlap_pair() {
        let mut n = node(6);
        n.add_range(0, 3);
        n.add_range(2, 4);
        assert!(n.is_complete());

        let mut n = node(6);
        n.add_range(2, 4);
        n.add_range(0, 3);
        assert!(n.is_complete());
    }

    #[test]
    fn test_covering_insert_absorbs_existing() {
        let mut n = node(6);
        n.add_range(4, 2);
        n.add_range(0, 6);
        assert!(n.is_complete());
        assert_eq!(n.ranges().len(), 1);

        let mut n = node(6);
        n.add_range(0, 6);
        n.add_range(4, 2);
        assert!(n.is_complete());
        assert_eq!(n.covered(), 6);
    }

    #[test]
    fn test_incomplete_with_gap() {
        let mut n = node(6);
        n.add_range(0, 2);
        n.add_range(4, 2);
        assert!(!n.is_complete());
        assert_eq!(n.covered(), 4);
        assert_eq!(n.ranges().len(), 2);

        let missing = n.missing_ranges();
        assert_eq!(missing, vec![FragmentRange { offset: 2, length: 2 }]);
    }

    #[test]
    fn test_incomplete_three_islands() {
        let mut n = node(6);
        n.add_range(0, 1);
        n.add_range(2, 2);
        n.add_range(5, 1);
        assert!(!n.is_complete());
        assert_eq!(n.ranges().len(), 3);
        assert_eq!(n.covered(), 4);
    }

    #[test]
    fn test_zero_length_range_ignored() {
        let mut n = node(6);
        n.add_range(3, 0);
        assert_eq!(n.ranges().len(), 0);
        assert_eq!(n.covered(), 0);
    }

    #[test]
    fn test_zero_size_entity_completes_immediately() {
        let n = node(0);
        assert!(n.is_complete());
    }

    #[test]
    fn test_lock_count_blocks_completion() {
        let mut n = FragmentNode::new("pinned".to_string(), 4, Vec::new(), 1);
        n.add_range(0, 4);
        assert!(n.is_complete());

        n.lock();
        assert_eq!(n.lock_count(), 2);
        assert!(!n.is_complete());
        n.unlock();
        assert!(n.is_complete());
    }

    #[test]
    fn test_range_exists_intersection() {
        let mut n = node(100);
        n.add_range(10, 10);

        assert!(n.range_exists(10, 10));
        assert!(n.range_exists(15, 1));
        assert!(n.range_exists(5, 6));
        assert!(n.range_exists(19, 5));
        // a stored range strictly inside the query is still an overlap
        assert!(n.range_exists(0, 100));

        assert!(!n.range_exists(0, 10));
        assert!(!n.range_exists(20, 5));
        assert!(n.range_exists(10, 0));
        assert!(!n.range_exists(20, 0));
    }

    #[test]
    fn test_map_add_find_discard() {
        let mut map = FragmentMap::new();
        assert!(map.is_empty());

        map.add("/etc/hostname", 12, Vec::new(), 0);
        assert_eq!(map.len(), 1);
        assert!(map.find("/etc/hostname").is_some());
        assert!(map.find("/etc/hosts").is_none());

        // add on an existing name returns the existing node
        map.add("/etc/hostname", 12, Vec::new(), 0).add_range(0, 8);
        assert_eq!(map.find("/etc/hostname").unwrap().covered(), 8);

        let node = map.discard("/etc/hostname").unwrap();
        assert_eq!(node.covered(), 8);
        assert!(map.is_empty());
    }

    #[test]
    fn test_user_data_round_trip() {
        let mut map = FragmentMap::new();
        map.add("entry", 4, vec![1, 2, 3], 0);
        assert_eq!(map.find("entry").unwrap().user_data(), &[1, 2, 3]);
    }

    proptest! {
        // After any insertion sequence the ranges are sorted, strictly
        // disjoint, non-touching, and the covered sum matches.
        #[test]
        fn prop_invariants_hold(ranges in proptest::collection::vec((0u64..256, 0u64..64), 0..40)) {
            let mut n = node(1 << 20);
            for (offset, length) in ranges {
                n.add_range(offset, length);
            }
            prop_assert!(n.check_invariants());
        }

        // Inserting the same range twice is the same as inserting it once.
        #[test]
        fn prop_add_range_idempotent(
            setup in proptest::collection::vec((0u64..256, 1u64..64), 0..16),
            offset in 0u64..256,
            length in 1u64..64,
        ) {
            let mut once = node(1 << 20);
            for (o, l) in &setup {
                once.add_range(*o, *l);
            }
            let mut twice = FragmentNode::new("test".to_string(), 1 << 20, Vec::new(), 0);
            for (o, l) in &setup {
                twice.add_range(*o, *l);
            }
            once.add_range(offset, length);
            twice.add_range(offset, length);
            twice.add_range(offset, length);
            prop_assert_eq!(once.ranges(), twice.ranges());
            prop_assert_eq!(once.covered(), twice.covered());
        }

        // For any permutation of disjoint ranges covering [0, total), the
        // node is complete exactly after the final insert.
        #[test]
        fn prop_completion_commutes(permutation in Just(vec![(0u64,3u64),(3,2),(5,5),(10,1),(11,9)]).prop_shuffle()) {
            let total: u64 = permutation.iter().map(|(_, l)| l).sum();
            let mut n = FragmentNode::new("test".to_string(), total, Vec::new(), 0);
            for (offset, length) in &permutation {
                prop_assert!(!n.is_complete());
                n.add_range(*offset, *length);
            }
            prop_assert!(n.is_complete());
        }

        // range_exists agrees with a naive intersection check.
        #[test]
        fn prop_range_exists_matches_naive(
            stored in proptest::collection::vec((0u64..128, 1u64..32), 0..16),
            offset in 0u64..160,
            length in 1u64..32,
        ) {
            let mut n = node(1 << 20);
            for (o, l) in &stored {
                n.add_range(*o, *l);
            }
            let naive = n.ranges().iter().any(|r| r.offset < offset + length && offset < r.end());
            prop_assert_eq!(n.range_exists(offset, length), naive);
        }
    }
}
