// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Shared fixtures for the integration tests: builds `.arcv` archives in
//! temp directories through the production writer, and wires quiet
//! reporters into the drivers.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use arcvault::application::services::reporter::ConsoleReporter;
use arcvault::application::use_cases::{ConvertArchives, RestoreArchives, TestArchives};
use arcvault::JobMonitor;
use arcvault_domain::services::archive_service::{
    ArchiveCreateOptions, ArchiveFormat, DirectoryEntryHeader, FileEntryHeader, LinkEntryHeader, MetaEntryHeader,
    StoreCallback,
};
use arcvault_domain::services::file_service::{FileMetadata, FileSystem};
use arcvault_domain::{ArchiveError, CompressionAlgorithm, CryptAlgorithm, Password, RunningInfo};

use arcvault::infrastructure::adapters::{ArcvFormat, LocalStorageFactory, StdFileSystem};

/// One entry to place into a fixture archive.
pub enum FixtureEntry {
    /// A fragment `[offset, offset+data.len())` of a file totalling
    /// `total` bytes.
    FileFragment {
        name: &'static str,
        total: u64,
        offset: u64,
        data: Vec<u8>,
    },
    /// A hardlink set sharing one payload.
    HardLinks {
        names: Vec<&'static str>,
        data: Vec<u8>,
    },
    Directory {
        name: &'static str,
    },
    Link {
        name: &'static str,
        target: &'static str,
    },
    Meta {
        comment: &'static str,
    },
}

/// Metadata stamped onto fixture entries: owned by the current user so
/// restore can re-apply it without privileges.
pub fn fixture_metadata(size: u64) -> FileMetadata {
    let mut metadata = FileMetadata::regular(size);
    metadata.user_id = arcvault_bootstrap::platform::effective_user_id();
    metadata.group_id = arcvault_bootstrap::platform::effective_group_id();
    metadata.modified = 1_700_000_000;
    metadata.accessed = 1_700_000_000;
    metadata
}

/// Writes a fixture archive `archive_name` into `directory`.
pub fn build_archive(directory: &Path, archive_name: &str, entries: Vec<FixtureEntry>) {
    build_archive_with(
        directory,
        archive_name,
        entries,
        CompressionAlgorithm::Zstd,
        CryptAlgorithm::None,
        None,
    );
}

/// Fixture builder with explicit codec settings.
pub fn build_archive_with(
    directory: &Path,
    archive_name: &str,
    entries: Vec<FixtureEntry>,
    compression: CompressionAlgorithm,
    crypt: CryptAlgorithm,
    password: Option<Password>,
) {
    let format = ArcvFormat::new();
    let destination = directory.join(archive_name);
    let store: StoreCallback = Box::new(move |part, _size| {
        std::fs::rename(part, &destination).map_err(ArchiveError::from)
    });
    let mut writer = format
        .create(
            &ArchiveCreateOptions {
                compression,
                crypt,
                password,
                temp_directory: directory.to_path_buf(),
            },
            store,
        )
        .expect("create fixture archive");

    for entry in entries {
        match entry {
            FixtureEntry::FileFragment {
                name,
                total,
                offset,
                data,
            } => {
                writer
                    .begin_file_entry(&FileEntryHeader {
                        names: vec![name.to_string()],
                        metadata: fixture_metadata(total),
                        fragment_offset: offset,
                        fragment_size: data.len() as u64,
                        delta_compression: CompressionAlgorithm::None,
                        byte_compression: CompressionAlgorithm::None,
                        crypt_algorithm: CryptAlgorithm::None,
                    })
                    .unwrap();
                writer.write_data(&data).unwrap();
                writer.end_entry().unwrap();
            }
            FixtureEntry::HardLinks { names, data } => {
                writer
                    .begin_hardlink_entry(&FileEntryHeader {
                        names: names.iter().map(|name| name.to_string()).collect(),
                        metadata: fixture_metadata(data.len() as u64),
                        fragment_offset: 0,
                        fragment_size: data.len() as u64,
                        delta_compression: CompressionAlgorithm::None,
                        byte_compression: CompressionAlgorithm::None,
                        crypt_algorithm: CryptAlgorithm::None,
                    })
                    .unwrap();
                writer.write_data(&data).unwrap();
                writer.end_entry().unwrap();
            }
            FixtureEntry::Directory { name } => {
                let mut metadata = fixture_metadata(0);
                metadata.kind = arcvault_domain::FileKind::Directory;
                metadata.permissions = 0o755;
                writer
                    .write_directory_entry(&DirectoryEntryHeader {
                        name: name.to_string(),
                        metadata,
                    })
                    .unwrap();
            }
            FixtureEntry::Link { name, target } => {
                let mut metadata = fixture_metadata(0);
                metadata.kind = arcvault_domain::FileKind::Symlink;
                writer
                    .write_link_entry(&LinkEntryHeader {
                        name: name.to_string(),
                        target: target.to_string(),
                        metadata,
                    })
                    .unwrap();
            }
            FixtureEntry::Meta { comment } => {
                writer
                    .write_meta_entry(&MetaEntryHeader {
                        host_name: "backup01".to_string(),
                        user_name: "operator".to_string(),
                        job_uuid: Some(uuid::Uuid::new_v4()),
                        schedule_uuid: None,
                        archive_kind: "full".to_string(),
                        created_at: chrono::Utc::now(),
                        comment: comment.to_string(),
                    })
                    .unwrap();
            }
        }
    }

    writer.finish().expect("finish fixture archive");
}

/// A test driver trio wired with quiet reporters.
pub fn quiet_test_driver() -> TestArchives {
    TestArchives::new(Arc::new(ArcvFormat::new()), Arc::new(LocalStorageFactory::new()))
        .with_reporter(ConsoleReporter::quiet())
}

pub fn quiet_restore_driver() -> RestoreArchives {
    let filesystem: Arc<dyn FileSystem> = Arc::new(StdFileSystem::new());
    RestoreArchives::new(
        Arc::new(ArcvFormat::new()),
        Arc::new(LocalStorageFactory::new()),
        filesystem,
    )
    .with_reporter(ConsoleReporter::quiet())
}

pub fn quiet_convert_driver() -> ConvertArchives {
    let filesystem: Arc<dyn FileSystem> = Arc::new(StdFileSystem::new());
    ConvertArchives::new(
        Arc::new(ArcvFormat::new()),
        Arc::new(LocalStorageFactory::new()),
        filesystem,
    )
    .with_reporter(ConsoleReporter::quiet())
}

/// A monitor capturing the latest running-info snapshot.
pub fn capturing_monitor() -> (JobMonitor, Arc<Mutex<RunningInfo>>) {
    let captured = Arc::new(Mutex::new(RunningInfo::default()));
    let monitor = JobMonitor {
        running_info: Some(Arc::new({
            let captured = Arc::clone(&captured);
            move |info: &RunningInfo| {
                *captured.lock().unwrap() = info.clone();
            }
        })),
        ..JobMonitor::default()
    };
    (monitor, captured)
}

/// The storage-name argument for an archive in `directory`.
pub fn storage_name(directory: &Path, archive_name: &str) -> Vec<String> {
    vec![directory.join(archive_name).display().to_string()]
}

/// Leftover intermediate part files in a directory.
pub fn leftover_parts(directory: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(directory)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("arcvault-part-"))
        })
        .collect()
}
