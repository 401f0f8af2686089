// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Include / Exclude Evaluation
//!
//! This module provides the two list types workers consult before touching
//! an entry: [`EntrySelector`] (include list, scoped by entry kind) and
//! [`PatternList`] (exclude list). Both are the disjunction of their member
//! patterns, short-circuiting on the first hit.
//!
//! An empty list returns the identity for its context: an empty include
//! list means "process everything", an empty exclude list means "exclude
//! nothing". The decision is made at the call site, as both lists only
//! answer "does anything match?".

use crate::value_objects::entry_type::{EntryKind, EntryKindMask};
use crate::value_objects::pattern::{MatchMode, Pattern};

/// Ordered list of `(entry-kind-mask, pattern)` include rules.
#[derive(Debug, Clone, Default)]
pub struct EntrySelector {
    entries: Vec<(EntryKindMask, Pattern)>,
}

impl EntrySelector {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Adds a rule matching any entry kind.
    pub fn push(&mut self, pattern: Pattern) {
        self.entries.push((EntryKindMask::ALL, pattern));
    }

    /// Adds a rule scoped to the given kinds.
    pub fn push_scoped(&mut self, mask: EntryKindMask, pattern: Pattern) {
        self.entries.push((mask, pattern));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if any rule matches the name, ignoring kind scoping.
    pub fn matches(&self, name: &str, mode: MatchMode) -> bool {
        self.entries.iter().any(|(_, pattern)| pattern.is_match(name, mode))
    }

    /// True if any rule scoped to `kind` matches the name.
    pub fn matches_kind(&self, kind: EntryKind, name: &str, mode: MatchMode) -> bool {
        self.entries
            .iter()
            .any(|(mask, pattern)| mask.contains(kind) && pattern.is_match(name, mode))
    }
}

/// Plain ordered pattern list (exclude rules).
#[derive(Debug, Clone, Default)]
pub struct PatternList {
    patterns: Vec<Pattern>,
}

impl PatternList {
    pub fn new() -> Self {
        Self { patterns: Vec::new() }
    }

    pub fn push(&mut self, pattern: Pattern) {
        self.patterns.push(pattern);
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// True if any pattern matches the name.
    pub fn matches(&self, name: &str, mode: MatchMode) -> bool {
        self.patterns.iter().any(|pattern| pattern.is_match(name, mode))
    }
}

/// Include/exclude decision as every worker applies it: process the entry
/// iff the include list is empty or matches, and the exclude list does not
/// match.
pub fn entry_selected(include: &EntrySelector, exclude: &PatternList, name: &str) -> bool {
    (include.is_empty() || include.matches(name, MatchMode::Exact)) && !exclude.matches(name, MatchMode::Exact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::pattern::{PatternKind, PatternOptions};

    fn glob(source: &str) -> Pattern {
        Pattern::compile(source, PatternKind::Glob, PatternOptions::default()).unwrap()
    }

    #[test]
    fn test_empty_lists_are_identity() {
        let include = EntrySelector::new();
        let exclude = PatternList::new();
        assert!(entry_selected(&include, &exclude, "/etc/hostname"));
    }

    #[test]
    fn test_include_disjunction() {
        let mut include = EntrySelector::new();
        include.push(glob("*.conf"));
        include.push(glob("/etc/*"));
        let exclude = PatternList::new();

        assert!(entry_selected(&include, &exclude, "/etc/hostname"));
        assert!(entry_selected(&include, &exclude, "nginx.conf"));
        assert!(!entry_selected(&include, &exclude, "/var/log/messages"));
    }

    #[test]
    fn test_exclude_wins() {
        let include = EntrySelector::new();
        let mut exclude = PatternList::new();
        exclude.push(glob("*.tmp"));

        assert!(entry_selected(&include, &exclude, "data.bin"));
        assert!(!entry_selected(&include, &exclude, "scratch.tmp"));
    }

    #[test]
    fn test_kind_scoping() {
        let mut include = EntrySelector::new();
        include.push_scoped(EntryKindMask::only(EntryKind::Image), glob("/dev/*"));

        assert!(include.matches_kind(EntryKind::Image, "/dev/sda1", MatchMode::Exact));
        assert!(!include.matches_kind(EntryKind::File, "/dev/sda1", MatchMode::Exact));
        // unscoped check still sees the pattern
        assert!(include.matches("/dev/sda1", MatchMode::Exact));
    }
}
