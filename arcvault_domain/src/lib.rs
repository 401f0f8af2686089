// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Arcvault Domain
//!
//! The arcvault domain represents the core business logic and rules of the
//! archive processing engine, independent of storage backends, archive
//! encodings, file systems, or user interfaces.
//!
//! ## Module Structure
//!
//! ### Value Objects
//! Immutable objects defined by their attributes:
//!
//! - `Pattern`: compiled include/exclude and storage-name patterns
//! - `EntryKind` / `EntryKindMask`: typed classification of archive entries
//! - `EntrySelector` / `PatternList`: include/exclude rule lists
//! - `CompressionAlgorithm`, `CryptAlgorithm`, `CryptoContext`,
//!   `SignatureState`, `Password`: codec and crypt identifiers
//! - `ConflictPolicy`: restore collision handling
//!
//! ### Entities
//! Identified, mutable state shared across one job run:
//!
//! - `FragmentMap` / `FragmentNode`: which byte ranges of each logical
//!   entity have been observed across fragments
//! - `NameRegistry`: destination paths reserved by this run
//! - `RunningInfo`: aggregate progress counters
//!
//! ### Services
//! Collaborator contracts the processing core consumes, implemented by
//! infrastructure adapters and injected into the drivers:
//!
//! - `ArchiveFormat` / `ArchiveReader` / `ArchiveCursor` / `ArchiveWriter`
//! - `Storage` / `StorageFactory` and the storage specifier grammar
//! - `FileSystem` / `FileWriter` and file metadata
//!
//! ## Business Rules
//!
//! - Fragment ranges are sorted, disjoint and non-touching; the covered sum
//!   is maintained incrementally (never recomputed by scanning)
//! - A fragment node is complete only when a single range from offset zero
//!   covers the declared size and nobody else pins it; complete nodes are
//!   discarded immediately so the tracker stays bounded by in-flight work
//! - A destination path is a collision as soon as any worker reserves it,
//!   independent of filesystem state
//! - Hardlink entries carry a non-empty ordered name list sharing one
//!   payload

pub mod entities;
pub mod error;
pub mod services;
pub mod value_objects;

pub use error::ArchiveError;

pub use entities::{FragmentMap, FragmentNode, FragmentRange, NameRegistry, ProgressVolume, RunningInfo};
pub use services::{
    ArchiveCreateOptions, ArchiveCursor, ArchiveFormat, ArchiveReader, ArchiveWriter, DirectoryEntry,
    DirectoryEntryHeader, EntryEnvelope, ExtendedAttribute, FileEntryHeader, FileKind, FileMetadata, FileSystem,
    FileWriter, ImageEntryHeader, LinkEntryHeader, MetaEntryHeader, SpecialEntryHeader, SpecialKind, Storage,
    StorageFactory, StorageSink, StorageSource, StorageSpecifier, StoreCallback,
};
pub use value_objects::{
    CompressionAlgorithm, ConflictPolicy, CryptAlgorithm, CryptoContext, EntryKind, EntryKindMask, EntrySelector,
    MatchMode, Password, Pattern, PatternKind, PatternList, PatternOptions, SignatureState,
};
