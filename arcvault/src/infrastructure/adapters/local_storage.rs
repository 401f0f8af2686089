// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Local Filesystem Storage
//!
//! Storage backend rooted in one local directory. This is the only backend
//! shipped in-tree; network and removable-media backends plug in through
//! the same `Storage` trait.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arcvault_domain::services::storage_service::{
    DirectoryEntry, Storage, StorageFactory, StorageSink, StorageSource, StorageSpecifier,
};
use arcvault_domain::{ArchiveError, FileKind};

/// Storage over one local directory.
pub struct LocalStorage {
    root: PathBuf,
    temp_counter: AtomicU64,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            temp_counter: AtomicU64::new(0),
        }
    }

    fn full_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Storage for LocalStorage {
    fn printable_name(&self, archive_name: Option<&str>) -> String {
        match archive_name {
            Some(name) => self.full_path(name).display().to_string(),
            None => self.root.display().to_string(),
        }
    }

    fn exists(&self, name: &str) -> bool {
        self.full_path(name).exists()
    }

    fn size(&self, name: &str) -> Result<u64, ArchiveError> {
        let metadata = fs::metadata(self.full_path(name))
            .map_err(|err| ArchiveError::storage_error(format!("cannot stat '{name}': {err}")))?;
        Ok(metadata.len())
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), ArchiveError> {
        fs::rename(self.full_path(from), self.full_path(to))
            .map_err(|err| ArchiveError::storage_error(format!("cannot rename '{from}' to '{to}': {err}")))
    }

    fn delete(&self, name: &str) -> Result<(), ArchiveError> {
        fs::remove_file(self.full_path(name))
            .map_err(|err| ArchiveError::storage_error(format!("cannot delete '{name}': {err}")))
    }

    fn create(&self, name: &str, _size_hint: u64, force: bool) -> Result<Box<dyn StorageSink>, ArchiveError> {
        let path = self.full_path(name);
        if !force && path.exists() {
            return Err(ArchiveError::FileExists(path.display().to_string()));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| ArchiveError::storage_error(format!("cannot create '{}': {err}", parent.display())))?;
        }
        let file = fs::File::create(&path).map_err(ArchiveError::from)?;
        Ok(Box::new(LocalSink { file: Some(file) }))
    }

    fn open_read(&self, name: &str) -> Result<Box<dyn StorageSource>, ArchiveError> {
        let path = self.full_path(name);
        let file = fs::File::open(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ArchiveError::ArchiveNotFound(path.display().to_string())
            } else {
                ArchiveError::from(err)
            }
        })?;
        Ok(Box::new(file))
    }

    fn temp_name(&self) -> String {
        let sequence = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        format!(".arcvault-{}-{sequence}.tmp", std::process::id())
    }

    fn list_directory(&self) -> Result<Vec<DirectoryEntry>, ArchiveError> {
        let read_dir = fs::read_dir(&self.root)
            .map_err(|err| ArchiveError::storage_error(format!("cannot list '{}': {err}", self.root.display())))?;
        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(ArchiveError::from)?;
            let file_type = entry.file_type().map_err(ArchiveError::from)?;
            let kind = if file_type.is_dir() {
                FileKind::Directory
            } else if file_type.is_symlink() {
                FileKind::Symlink
            } else {
                FileKind::File
            };
            entries.push(DirectoryEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

struct LocalSink {
    file: Option<fs::File>,
}

impl StorageSink for LocalSink {
    fn write(&mut self, buffer: &[u8]) -> Result<(), ArchiveError> {
        match self.file.as_mut() {
            Some(file) => file.write_all(buffer).map_err(ArchiveError::from),
            None => Err(ArchiveError::internal_error("write on closed storage sink")),
        }
    }

    fn close(&mut self) -> Result<(), ArchiveError> {
        if let Some(mut file) = self.file.take() {
            file.flush().map_err(ArchiveError::from)?;
            file.sync_all().map_err(ArchiveError::from)?;
        }
        Ok(())
    }
}

/// Factory producing [`LocalStorage`] for every specifier.
#[derive(Default)]
pub struct LocalStorageFactory;

impl LocalStorageFactory {
    pub fn new() -> Self {
        Self
    }
}

impl StorageFactory for LocalStorageFactory {
    fn open(&self, specifier: &StorageSpecifier) -> Result<Arc<dyn Storage>, ArchiveError> {
        let root: &Path = &specifier.location;
        let root = if root.as_os_str().is_empty() {
            Path::new(".")
        } else {
            root
        };
        Ok(Arc::new(LocalStorage::new(root)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        let mut sink = storage.create("a.arcv", 0, false).unwrap();
        sink.write(b"hello").unwrap();
        sink.close().unwrap();

        assert!(storage.exists("a.arcv"));
        assert_eq!(storage.size("a.arcv").unwrap(), 5);

        let mut source = storage.open_read("a.arcv").unwrap();
        let mut content = Vec::new();
        std::io::Read::read_to_end(&mut source, &mut content).unwrap();
        assert_eq!(content, b"hello");
    }

    #[test]
    fn test_create_without_force_rejects_existing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage.create("a.arcv", 0, false).unwrap().close().unwrap();

        assert!(matches!(
            storage.create("a.arcv", 0, false),
            Err(ArchiveError::FileExists(_))
        ));
        assert!(storage.create("a.arcv", 0, true).is_ok());
    }

    #[test]
    fn test_rename_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage.create("a.arcv", 0, false).unwrap().close().unwrap();

        storage.rename("a.arcv", "b.arcv").unwrap();
        assert!(!storage.exists("a.arcv"));
        assert!(storage.exists("b.arcv"));
        storage.delete("b.arcv").unwrap();
        assert!(!storage.exists("b.arcv"));
    }

    #[test]
    fn test_open_read_missing_is_archive_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        assert!(matches!(
            storage.open_read("missing.arcv"),
            Err(ArchiveError::ArchiveNotFound(_))
        ));
    }

    #[test]
    fn test_list_directory_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        for name in ["c.arcv", "a.arcv", "b.arcv"] {
            storage.create(name, 0, false).unwrap().close().unwrap();
        }
        let names: Vec<_> = storage.list_directory().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a.arcv", "b.arcv", "c.arcv"]);
    }

    #[test]
    fn test_temp_names_unique() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        assert_ne!(storage.temp_name(), storage.temp_name());
    }
}
