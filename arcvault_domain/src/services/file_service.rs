// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # File Layer Contract
//!
//! The low-level filesystem primitives restore and the storage writer
//! consume. The engine never touches `std::fs` directly outside the
//! adapters implementing this trait, which keeps the restore paths
//! testable against an in-memory filesystem and keeps platform quirks
//! (network filesystems, devices, xattrs) behind one seam.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ArchiveError;

/// Kind of a filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Special,
}

/// Special-node flavor carried by special entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SpecialKind {
    CharDevice { major: u32, minor: u32 },
    BlockDevice { major: u32, minor: u32 },
    Fifo,
    Socket,
}

/// One extended attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedAttribute {
    pub name: String,
    pub value: Vec<u8>,
}

/// File metadata as stored in archive entry headers and applied on
/// restore completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub kind: FileKind,
    pub size: u64,
    pub permissions: u32,
    pub user_id: u32,
    pub group_id: u32,
    /// Seconds since the Unix epoch.
    pub modified: i64,
    pub accessed: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<ExtendedAttribute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special: Option<SpecialKind>,
}

impl FileMetadata {
    /// Metadata of a plain regular file with the given size.
    pub fn regular(size: u64) -> Self {
        Self {
            kind: FileKind::File,
            size,
            permissions: 0o644,
            user_id: 0,
            group_id: 0,
            modified: 0,
            accessed: 0,
            attributes: Vec::new(),
            special: None,
        }
    }
}

/// An open destination file.
pub trait FileWriter: Send {
    fn seek(&mut self, offset: u64) -> Result<(), ArchiveError>;
    fn truncate(&mut self, size: u64) -> Result<(), ArchiveError>;
    fn write_all(&mut self, buffer: &[u8]) -> Result<(), ArchiveError>;
    fn size(&mut self) -> Result<u64, ArchiveError>;
    /// Flushes and closes. Errors here are real write errors and must not
    /// be swallowed.
    fn close(&mut self) -> Result<(), ArchiveError>;
}

/// Low-level filesystem operations, injected into the restore driver and
/// the storage writer.
pub trait FileSystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
    fn metadata(&self, path: &Path) -> Result<FileMetadata, ArchiveError>;

    /// Opens (creating if needed) a file for writing. With `sparse` the
    /// adapter may punch holes instead of writing zero runs.
    fn open_write(&self, path: &Path, sparse: bool) -> Result<Box<dyn FileWriter>, ArchiveError>;

    /// Opens a file for reading (used when draining intermediate files).
    fn open_read(&self, path: &Path) -> Result<Box<dyn std::io::Read + Send>, ArchiveError>;

    /// Creates the file empty, truncating an existing one.
    fn truncate_create(&self, path: &Path) -> Result<(), ArchiveError>;

    fn make_directory(&self, path: &Path, permissions: u32) -> Result<(), ArchiveError>;
    fn make_symlink(&self, target: &Path, link: &Path) -> Result<(), ArchiveError>;
    fn make_hardlink(&self, original: &Path, link: &Path) -> Result<(), ArchiveError>;
    fn make_special(&self, path: &Path, kind: &SpecialKind, permissions: u32) -> Result<(), ArchiveError>;

    fn set_owner(&self, path: &Path, user_id: u32, group_id: u32) -> Result<(), ArchiveError>;
    fn set_permissions(&self, path: &Path, permissions: u32) -> Result<(), ArchiveError>;
    fn set_timestamps(&self, path: &Path, modified: i64, accessed: i64) -> Result<(), ArchiveError>;
    fn set_attributes(&self, path: &Path, attributes: &[ExtendedAttribute]) -> Result<(), ArchiveError>;

    fn delete(&self, path: &Path) -> Result<(), ArchiveError>;
    fn rename(&self, from: &Path, to: &Path) -> Result<(), ArchiveError>;

    /// True when the path lives on a network filesystem; ownership and
    /// attribute failures there downgrade to warnings.
    fn is_network_filesystem(&self, path: &Path) -> bool;

    /// True when the path is a block or character device.
    fn is_device(&self, path: &Path) -> bool;
}
