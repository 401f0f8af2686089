// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Domain service contracts: the collaborator interfaces the processing
//! core consumes. Implementations live in the application crate's
//! infrastructure layer (or in a caller's own adapters) and are injected
//! into the drivers.

pub mod archive_service;
pub mod file_service;
pub mod storage_service;

pub use archive_service::{
    ArchiveCreateOptions, ArchiveCursor, ArchiveFormat, ArchiveReader, ArchiveWriter, DirectoryEntryHeader,
    EntryEnvelope, FileEntryHeader, ImageEntryHeader, LinkEntryHeader, MetaEntryHeader, SpecialEntryHeader,
    StoreCallback,
};
pub use file_service::{ExtendedAttribute, FileKind, FileMetadata, FileSystem, FileWriter, SpecialKind};
pub use storage_service::{DirectoryEntry, Storage, StorageFactory, StorageSink, StorageSource, StorageSpecifier};
