// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Archive Entry Kind
//!
//! Tagged classification of the typed entries an archive is decomposed
//! into. `File`, `Image` and `HardLink` entries carry a payload; the rest
//! carry only metadata. `Signature`, `Salt` and `Key` entries are archive
//! infrastructure handled by the pipeline itself, never by workers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a single archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Image,
    Directory,
    Link,
    HardLink,
    Special,
    Meta,
    Signature,
    Salt,
    Key,
    Unknown,
}

impl EntryKind {
    /// Entries of this kind carry a byte payload.
    pub fn has_payload(&self) -> bool {
        matches!(self, EntryKind::File | EntryKind::Image | EntryKind::HardLink)
    }

    /// Entries of this kind are archive infrastructure consumed by the
    /// pipeline, not dispatched to workers.
    pub fn is_control(&self) -> bool {
        matches!(self, EntryKind::Signature | EntryKind::Salt | EntryKind::Key)
    }

    fn bit(&self) -> u16 {
        match self {
            EntryKind::File => 1 << 0,
            EntryKind::Image => 1 << 1,
            EntryKind::Directory => 1 << 2,
            EntryKind::Link => 1 << 3,
            EntryKind::HardLink => 1 << 4,
            EntryKind::Special => 1 << 5,
            EntryKind::Meta => 1 << 6,
            EntryKind::Signature => 1 << 7,
            EntryKind::Salt => 1 << 8,
            EntryKind::Key => 1 << 9,
            EntryKind::Unknown => 1 << 10,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryKind::File => "file",
            EntryKind::Image => "image",
            EntryKind::Directory => "directory",
            EntryKind::Link => "link",
            EntryKind::HardLink => "hardlink",
            EntryKind::Special => "special",
            EntryKind::Meta => "meta",
            EntryKind::Signature => "signature",
            EntryKind::Salt => "salt",
            EntryKind::Key => "key",
            EntryKind::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// A set of entry kinds, used to scope include-list patterns to specific
/// entry types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryKindMask(u16);

impl EntryKindMask {
    /// Empty mask matching no kind.
    pub const NONE: EntryKindMask = EntryKindMask(0);
    /// Mask matching every kind.
    pub const ALL: EntryKindMask = EntryKindMask(u16::MAX);

    /// Mask with a single kind set.
    pub fn only(kind: EntryKind) -> Self {
        EntryKindMask(kind.bit())
    }

    /// Returns this mask with `kind` added.
    pub fn with(self, kind: EntryKind) -> Self {
        EntryKindMask(self.0 | kind.bit())
    }

    /// Membership check.
    pub fn contains(&self, kind: EntryKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl Default for EntryKindMask {
    fn default() -> Self {
        EntryKindMask::ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_kinds() {
        assert!(EntryKind::File.has_payload());
        assert!(EntryKind::Image.has_payload());
        assert!(EntryKind::HardLink.has_payload());
        assert!(!EntryKind::Directory.has_payload());
        assert!(!EntryKind::Meta.has_payload());
    }

    #[test]
    fn test_control_kinds() {
        assert!(EntryKind::Signature.is_control());
        assert!(EntryKind::Salt.is_control());
        assert!(EntryKind::Key.is_control());
        assert!(!EntryKind::File.is_control());
    }

    #[test]
    fn test_mask() {
        let mask = EntryKindMask::only(EntryKind::File).with(EntryKind::HardLink);
        assert!(mask.contains(EntryKind::File));
        assert!(mask.contains(EntryKind::HardLink));
        assert!(!mask.contains(EntryKind::Image));
        assert!(EntryKindMask::ALL.contains(EntryKind::Unknown));
        assert!(EntryKindMask::NONE.is_empty());
    }
}
