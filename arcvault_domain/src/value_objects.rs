// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Value objects of the arcvault domain: immutable, self-validating types
//! compared by value rather than identity.

pub mod compression;
pub mod conflict_policy;
pub mod crypto;
pub mod entry_filter;
pub mod entry_type;
pub mod pattern;

pub use compression::CompressionAlgorithm;
pub use conflict_policy::ConflictPolicy;
pub use crypto::{CryptAlgorithm, CryptoContext, Password, SignatureState};
pub use entry_filter::{EntrySelector, PatternList};
pub use entry_type::{EntryKind, EntryKindMask};
pub use pattern::{MatchMode, Pattern, PatternKind, PatternOptions};
