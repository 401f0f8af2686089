// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Archive Layer Contract
//!
//! This module defines the typed entry-iterator interface the processing
//! core consumes. The archive chunk format itself is an adapter concern;
//! the core only sees entry kinds, headers, payload streams and signature
//! verification outcomes.
//!
//! ## Handle vs Cursor
//!
//! One archive is opened once into an [`ArchiveReader`] (the shared
//! handle). Every thread that reads entries, the pipeline producer and
//! each worker alike, opens its own [`ArchiveCursor`] from the handle and owns
//! its position, decompressor and crypto state independently. The handle
//! stays open until the pipeline reports end-of-stream and all workers
//! have drained; cursors drop independently.
//!
//! ## Entry Protocol
//!
//! A cursor alternates between *navigation* (`next_entry`, `seek`,
//! `skip_entry`) and an *open entry* (`read_*_entry` followed by
//! `read_data`/`eof_data` and a final `close_entry`). Payload reads never
//! cross entry boundaries.

use std::path::Path;
use std::sync::Arc;

use crate::error::ArchiveError;
use crate::services::file_service::FileMetadata;
use crate::value_objects::compression::CompressionAlgorithm;
use crate::value_objects::crypto::{CryptAlgorithm, CryptoContext, Password, SignatureState};
use crate::value_objects::entry_type::EntryKind;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header of a file entry; also used for hardlink entries, where `names`
/// holds every link name sharing the one payload (never empty).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntryHeader {
    pub names: Vec<String>,
    pub metadata: FileMetadata,
    /// Byte offset of this fragment within the logical file.
    pub fragment_offset: u64,
    /// Byte length of this fragment.
    pub fragment_size: u64,
    pub delta_compression: CompressionAlgorithm,
    pub byte_compression: CompressionAlgorithm,
    pub crypt_algorithm: CryptAlgorithm,
}

impl FileEntryHeader {
    /// The primary name (include/exclude evaluation, fragment tracking).
    pub fn name(&self) -> &str {
        &self.names[0]
    }
}

/// Header of an image (block device) entry. Offsets and counts are in
/// blocks; the fragment tracker records them in byte units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageEntryHeader {
    pub name: String,
    /// Total device size in bytes.
    pub device_size: u64,
    pub block_size: u64,
    pub block_offset: u64,
    pub block_count: u64,
    pub byte_compression: CompressionAlgorithm,
    pub crypt_algorithm: CryptAlgorithm,
}

impl ImageEntryHeader {
    pub fn fragment_offset(&self) -> u64 {
        self.block_offset * self.block_size
    }

    pub fn fragment_size(&self) -> u64 {
        self.block_count * self.block_size
    }
}

/// Header of a directory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntryHeader {
    pub name: String,
    pub metadata: FileMetadata,
}

/// Header of a symlink entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkEntryHeader {
    pub name: String,
    pub target: String,
    pub metadata: FileMetadata,
}

/// Header of a special entry (device node, fifo, socket).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialEntryHeader {
    pub name: String,
    pub metadata: FileMetadata,
}

/// Header of the archive meta entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaEntryHeader {
    pub host_name: String,
    pub user_name: String,
    pub job_uuid: Option<Uuid>,
    pub schedule_uuid: Option<Uuid>,
    pub archive_kind: String,
    pub created_at: DateTime<Utc>,
    pub comment: String,
}

/// What `next_entry` yields: the entry kind, the crypto context in force,
/// and the archive offset a worker must seek to before reading it.
#[derive(Debug, Clone)]
pub struct EntryEnvelope {
    pub kind: EntryKind,
    pub crypto: Arc<CryptoContext>,
    pub offset: u64,
}

/// Shared handle on one open archive.
pub trait ArchiveReader: Send + Sync {
    /// Human-readable storage name for status lines and errors.
    fn printable_name(&self) -> String;

    /// Total archive size in bytes.
    fn size(&self) -> u64;

    /// The crypto context in force for this archive's entries.
    fn crypto_context(&self) -> Arc<CryptoContext>;

    /// Opens an independently positioned cursor over this archive.
    fn open_cursor(&self) -> Result<Box<dyn ArchiveCursor>, ArchiveError>;

    /// Verifies the archive signatures up to the first content entry.
    /// `Err(NoPublicSignatureKey)` when signatures are keyed and no
    /// verification key is available.
    fn verify_signatures(&self) -> Result<SignatureState, ArchiveError>;
}

/// One thread's position within an archive.
pub trait ArchiveCursor: Send {
    fn seek(&mut self, offset: u64) -> Result<(), ArchiveError>;
    fn tell(&mut self) -> Result<u64, ArchiveError>;
    fn is_eof(&mut self) -> Result<bool, ArchiveError>;

    /// Applies the crypto context a descriptor carries. Must be called
    /// after re-opening a cursor at a new archive epoch.
    fn apply_crypto_context(&mut self, context: &CryptoContext) -> Result<(), ArchiveError>;

    /// Peeks the entry at the current position without consuming its body.
    /// `None` at end of archive. Unknown chunks are skipped when the
    /// archive was opened with skip-unknown set.
    fn next_entry(&mut self) -> Result<Option<EntryEnvelope>, ArchiveError>;

    /// Advances past the entry at the current position.
    fn skip_entry(&mut self) -> Result<(), ArchiveError>;

    /// Verifies the signature entry at the current position against the
    /// archive bytes `[from_offset, entry start)`.
    fn verify_signature_entry(&mut self, from_offset: u64) -> Result<SignatureState, ArchiveError>;

    fn read_file_entry(&mut self) -> Result<FileEntryHeader, ArchiveError>;
    fn read_image_entry(&mut self) -> Result<ImageEntryHeader, ArchiveError>;
    fn read_directory_entry(&mut self) -> Result<DirectoryEntryHeader, ArchiveError>;
    fn read_link_entry(&mut self) -> Result<LinkEntryHeader, ArchiveError>;
    fn read_hardlink_entry(&mut self) -> Result<FileEntryHeader, ArchiveError>;
    fn read_special_entry(&mut self) -> Result<SpecialEntryHeader, ArchiveError>;
    fn read_meta_entry(&mut self) -> Result<MetaEntryHeader, ArchiveError>;

    /// Reads exactly `buffer.len()` payload bytes of the open entry.
    fn read_data(&mut self, buffer: &mut [u8]) -> Result<(), ArchiveError>;

    /// True when the open entry's payload stream is exhausted.
    fn eof_data(&mut self) -> Result<bool, ArchiveError>;

    /// Closes the open entry and positions after it.
    fn close_entry(&mut self) -> Result<(), ArchiveError>;
}

/// Invoked by a writer whenever an intermediate part file is complete and
/// ownership of it passes to the caller.
pub type StoreCallback = Box<dyn Fn(&Path, u64) -> Result<(), ArchiveError> + Send + Sync>;

/// Options for creating a destination archive.
#[derive(Clone)]
pub struct ArchiveCreateOptions {
    pub compression: CompressionAlgorithm,
    pub crypt: CryptAlgorithm,
    pub password: Option<Password>,
    /// Directory intermediate part files are materialized in.
    pub temp_directory: std::path::PathBuf,
}

/// Writer over a destination archive under construction.
///
/// Entries with a payload follow `begin_* -> write_data* -> end_entry`;
/// metadata-only entries are single calls. `finish` flushes the final
/// intermediate part and hands it to the store callback.
pub trait ArchiveWriter: Send {
    fn begin_file_entry(&mut self, header: &FileEntryHeader) -> Result<(), ArchiveError>;
    fn begin_image_entry(&mut self, header: &ImageEntryHeader) -> Result<(), ArchiveError>;
    fn begin_hardlink_entry(&mut self, header: &FileEntryHeader) -> Result<(), ArchiveError>;
    fn write_data(&mut self, buffer: &[u8]) -> Result<(), ArchiveError>;
    fn end_entry(&mut self) -> Result<(), ArchiveError>;

    fn write_directory_entry(&mut self, header: &DirectoryEntryHeader) -> Result<(), ArchiveError>;
    fn write_link_entry(&mut self, header: &LinkEntryHeader) -> Result<(), ArchiveError>;
    fn write_special_entry(&mut self, header: &SpecialEntryHeader) -> Result<(), ArchiveError>;
    fn write_meta_entry(&mut self, header: &MetaEntryHeader) -> Result<(), ArchiveError>;

    fn finish(&mut self) -> Result<(), ArchiveError>;
}

/// Factory over one archive format: opens existing archives for reading
/// and creates destination archives for writing.
pub trait ArchiveFormat: Send + Sync {
    /// Opens an archive stored under `name` on the given storage.
    fn open(
        &self,
        storage: &Arc<dyn crate::services::storage_service::Storage>,
        name: &str,
        password: Option<&Password>,
    ) -> Result<Arc<dyn ArchiveReader>, ArchiveError>;

    /// Creates a destination archive writer. Completed intermediate parts
    /// are announced through `store`.
    fn create(&self, options: &ArchiveCreateOptions, store: StoreCallback) -> Result<Box<dyn ArchiveWriter>, ArchiveError>;
}
