// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Storage Layer Contract
//!
//! A storage is where archives live: a local directory, a network share, a
//! removable medium. The core consumes a small surface: existence checks,
//! rename/delete for the writer's rollback protocol, streaming create for
//! uploads, and a directory listing for pattern-resolved storage names.
//!
//! ## Storage specifiers
//!
//! A storage name either addresses a single archive
//! (`/backups/full.arcv`) or a directory of archives via a glob in the
//! last component (`/backups/job-*.arcv`). [`StorageSpecifier::parse`]
//! splits the two cases; the driver iterates the directory listing for
//! the latter.

use std::path::{Path, PathBuf};

use crate::error::ArchiveError;
use crate::services::file_service::FileKind;
use crate::value_objects::pattern::{Pattern, PatternKind, PatternOptions};

/// Parsed storage name.
#[derive(Debug, Clone)]
pub struct StorageSpecifier {
    /// Directory part of the name.
    pub location: PathBuf,
    /// Archive file name, when the name addresses a single archive.
    pub archive_name: Option<String>,
    /// Compiled pattern, when the last component contains glob
    /// metacharacters.
    pub archive_pattern: Option<Pattern>,
}

impl StorageSpecifier {
    /// Parses a storage name, compiling the trailing component as a glob
    /// when it contains unescaped metacharacters.
    pub fn parse(name: &str) -> Result<Self, ArchiveError> {
        if name.is_empty() {
            return Err(ArchiveError::storage_error("empty storage name"));
        }
        let path = Path::new(name);
        let file_name = path.file_name().and_then(|part| part.to_str());

        match file_name {
            Some(last) if Pattern::is_pattern(last) => {
                let pattern = Pattern::compile(last, PatternKind::Glob, PatternOptions::default())?;
                let location = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
                Ok(Self {
                    location,
                    archive_name: None,
                    archive_pattern: Some(pattern),
                })
            }
            Some(last) => Ok(Self {
                location: path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(".")),
                archive_name: Some(last.to_string()),
                archive_pattern: None,
            }),
            None => Ok(Self {
                location: path.to_path_buf(),
                archive_name: None,
                archive_pattern: None,
            }),
        }
    }

    /// True when this specifier selects archives by pattern.
    pub fn is_pattern(&self) -> bool {
        self.archive_pattern.is_some()
    }

    /// Printable form, optionally overriding the archive name.
    pub fn printable_name(&self, archive_name: Option<&str>) -> String {
        let name = archive_name.or(self.archive_name.as_deref());
        match name {
            Some(name) => self.location.join(name).display().to_string(),
            None => self.location.display().to_string(),
        }
    }
}

/// One entry of a storage directory listing.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub name: String,
    pub kind: FileKind,
}

/// Streaming writer onto a storage destination.
pub trait StorageSink: Send {
    fn write(&mut self, buffer: &[u8]) -> Result<(), ArchiveError>;
    fn close(&mut self) -> Result<(), ArchiveError>;
}

/// Streaming, seekable reader off a storage source.
pub trait StorageSource: std::io::Read + std::io::Seek + Send {}

impl<T: std::io::Read + std::io::Seek + Send> StorageSource for T {}

/// One initialized storage.
pub trait Storage: Send + Sync {
    /// Printable name of an archive on this storage (or of the storage
    /// itself).
    fn printable_name(&self, archive_name: Option<&str>) -> String;

    fn exists(&self, name: &str) -> bool;
    fn size(&self, name: &str) -> Result<u64, ArchiveError>;
    fn rename(&self, from: &str, to: &str) -> Result<(), ArchiveError>;
    fn delete(&self, name: &str) -> Result<(), ArchiveError>;

    /// Creates (or with `force` overwrites) an archive and returns a sink
    /// streaming into it.
    fn create(&self, name: &str, size_hint: u64, force: bool) -> Result<Box<dyn StorageSink>, ArchiveError>;

    /// Opens an archive for reading.
    fn open_read(&self, name: &str) -> Result<Box<dyn StorageSource>, ArchiveError>;

    /// A sibling name usable for the writer's rename-aside rollback.
    fn temp_name(&self) -> String;

    /// Lists the storage directory.
    fn list_directory(&self) -> Result<Vec<DirectoryEntry>, ArchiveError>;
}

/// Builds storages from parsed specifiers; the one seam where transport
/// backends plug in.
pub trait StorageFactory: Send + Sync {
    fn open(&self, specifier: &StorageSpecifier) -> Result<std::sync::Arc<dyn Storage>, ArchiveError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_archive() {
        let specifier = StorageSpecifier::parse("/backups/full.arcv").unwrap();
        assert_eq!(specifier.location, PathBuf::from("/backups"));
        assert_eq!(specifier.archive_name.as_deref(), Some("full.arcv"));
        assert!(!specifier.is_pattern());
    }

    #[test]
    fn test_parse_pattern() {
        let specifier = StorageSpecifier::parse("/backups/job-*.arcv").unwrap();
        assert_eq!(specifier.location, PathBuf::from("/backups"));
        assert!(specifier.archive_name.is_none());
        let pattern = specifier.archive_pattern.as_ref().unwrap();
        assert!(pattern.is_match("job-0007.arcv", crate::value_objects::MatchMode::Exact));
        assert!(!pattern.is_match("other.arcv", crate::value_objects::MatchMode::Exact));
    }

    #[test]
    fn test_parse_bare_name() {
        let specifier = StorageSpecifier::parse("full.arcv").unwrap();
        assert_eq!(specifier.location, PathBuf::from(""));
        assert_eq!(specifier.archive_name.as_deref(), Some("full.arcv"));
    }

    #[test]
    fn test_parse_empty_rejected() {
        assert!(StorageSpecifier::parse("").is_err());
    }

    #[test]
    fn test_printable_name_override() {
        let specifier = StorageSpecifier::parse("/backups/job-*.arcv").unwrap();
        assert_eq!(
            specifier.printable_name(Some("job-0001.arcv")),
            "/backups/job-0001.arcv"
        );
    }
}
