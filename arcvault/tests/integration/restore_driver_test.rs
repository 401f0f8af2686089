// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! End-to-end tests of the restore driver.

use std::sync::Arc;

use crate::common::{build_archive, capturing_monitor, quiet_restore_driver, storage_name, FixtureEntry};
use arcvault::{JobMonitor, JobOptions};
use arcvault_domain::{ArchiveError, ConflictPolicy, EntrySelector, PatternList};

fn no_selection() -> (EntrySelector, PatternList) {
    (EntrySelector::new(), PatternList::new())
}

fn restore_options(destination: &std::path::Path) -> JobOptions {
    JobOptions {
        destination: Some(destination.to_path_buf()),
        ..JobOptions::default()
    }
}

#[test]
fn test_restore_two_fragment_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    build_archive(
        dir.path(),
        "full.arcv",
        vec![
            FixtureEntry::FileFragment {
                name: "/etc/hostname",
                total: 12,
                offset: 0,
                data: b"archive-".to_vec(),
            },
            FixtureEntry::FileFragment {
                name: "/etc/hostname",
                total: 12,
                offset: 8,
                data: b"host".to_vec(),
            },
        ],
    );

    let (include, exclude) = no_selection();
    let result = quiet_restore_driver().execute(
        &storage_name(dir.path(), "full.arcv"),
        &include,
        &exclude,
        &restore_options(out.path()),
        &JobMonitor::default(),
    );

    assert!(result.is_ok(), "restore failed: {result:?}");
    let restored = out.path().join("etc/hostname");
    assert_eq!(std::fs::read(&restored).unwrap(), b"archive-host");
    let metadata = std::fs::metadata(&restored).unwrap();
    assert_eq!(metadata.len(), 12);
}

#[test]
fn test_restore_directory_and_link() {
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    build_archive(
        dir.path(),
        "tree.arcv",
        vec![
            FixtureEntry::Directory { name: "/var/log" },
            FixtureEntry::FileFragment {
                name: "/var/log/messages",
                total: 5,
                offset: 0,
                data: b"hello".to_vec(),
            },
            FixtureEntry::Link {
                name: "/var/log/latest",
                target: "messages",
            },
        ],
    );

    let (include, exclude) = no_selection();
    let result = quiet_restore_driver().execute(
        &storage_name(dir.path(), "tree.arcv"),
        &include,
        &exclude,
        &restore_options(out.path()),
        &JobMonitor::default(),
    );

    assert!(result.is_ok(), "restore failed: {result:?}");
    assert!(out.path().join("var/log").is_dir());
    assert_eq!(std::fs::read(out.path().join("var/log/messages")).unwrap(), b"hello");
    let link = out.path().join("var/log/latest");
    assert_eq!(std::fs::read_link(&link).unwrap(), std::path::PathBuf::from("messages"));
}

#[test]
fn test_restore_hardlink_set() {
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    build_archive(
        dir.path(),
        "links.arcv",
        vec![FixtureEntry::HardLinks {
            names: vec!["/data/first", "/data/second"],
            data: b"shared".to_vec(),
        }],
    );

    let (include, exclude) = no_selection();
    let result = quiet_restore_driver().execute(
        &storage_name(dir.path(), "links.arcv"),
        &include,
        &exclude,
        &restore_options(out.path()),
        &JobMonitor::default(),
    );

    assert!(result.is_ok(), "restore failed: {result:?}");
    let first = out.path().join("data/first");
    let second = out.path().join("data/second");
    assert_eq!(std::fs::read(&first).unwrap(), b"shared");
    assert_eq!(std::fs::read(&second).unwrap(), b"shared");
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        assert_eq!(
            std::fs::metadata(&first).unwrap().ino(),
            std::fs::metadata(&second).unwrap().ino()
        );
    }
}

// Conflict policy Rename: the colliding entry lands in a numbered
// sibling and both names are reserved.
#[test]
fn test_restore_rename_on_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    std::fs::write(out.path().join("a.log"), b"already here").unwrap();

    build_archive(
        dir.path(),
        "one.arcv",
        vec![FixtureEntry::FileFragment {
            name: "a.log",
            total: 5,
            offset: 0,
            data: b"fresh".to_vec(),
        }],
    );

    let (include, exclude) = no_selection();
    let options = JobOptions {
        conflict_policy: ConflictPolicy::Rename,
        ..restore_options(out.path())
    };
    let result = quiet_restore_driver().execute(
        &storage_name(dir.path(), "one.arcv"),
        &include,
        &exclude,
        &options,
        &JobMonitor::default(),
    );

    assert!(result.is_ok(), "restore failed: {result:?}");
    assert_eq!(std::fs::read(out.path().join("a.log")).unwrap(), b"already here");
    assert_eq!(std::fs::read(out.path().join("a-0.log")).unwrap(), b"fresh");
}

// Conflict policy Stop with no_stop_on_error: the entry is counted as an
// error, the job still exits clean.
#[test]
fn test_restore_stop_policy_downgraded() {
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    std::fs::write(out.path().join("a.log"), b"already here").unwrap();

    build_archive(
        dir.path(),
        "one.arcv",
        vec![FixtureEntry::FileFragment {
            name: "a.log",
            total: 5,
            offset: 0,
            data: b"fresh".to_vec(),
        }],
    );

    let (include, exclude) = no_selection();
    let (monitor, captured) = capturing_monitor();
    let options = JobOptions {
        conflict_policy: ConflictPolicy::Stop,
        no_stop_on_error: true,
        ..restore_options(out.path())
    };
    let result = quiet_restore_driver().execute(
        &storage_name(dir.path(), "one.arcv"),
        &include,
        &exclude,
        &options,
        &monitor,
    );

    assert!(result.is_ok(), "job must exit clean: {result:?}");
    assert_eq!(std::fs::read(out.path().join("a.log")).unwrap(), b"already here");
    assert_eq!(captured.lock().unwrap().error_count, 1);
}

// Conflict policy Stop without tolerance: FileExists terminates the job.
#[test]
fn test_restore_stop_policy_fails_job() {
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    std::fs::write(out.path().join("a.log"), b"already here").unwrap();

    build_archive(
        dir.path(),
        "one.arcv",
        vec![FixtureEntry::FileFragment {
            name: "a.log",
            total: 5,
            offset: 0,
            data: b"fresh".to_vec(),
        }],
    );

    let (include, exclude) = no_selection();
    let options = JobOptions {
        conflict_policy: ConflictPolicy::Stop,
        ..restore_options(out.path())
    };
    let result = quiet_restore_driver().execute(
        &storage_name(dir.path(), "one.arcv"),
        &include,
        &exclude,
        &options,
        &JobMonitor::default(),
    );
    assert!(matches!(result, Err(ArchiveError::FileExists(_))));
}

#[test]
fn test_restore_overwrite_policy() {
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    std::fs::write(out.path().join("a.log"), b"a much longer original").unwrap();

    build_archive(
        dir.path(),
        "one.arcv",
        vec![FixtureEntry::FileFragment {
            name: "a.log",
            total: 5,
            offset: 0,
            data: b"fresh".to_vec(),
        }],
    );

    let (include, exclude) = no_selection();
    let options = JobOptions {
        conflict_policy: ConflictPolicy::Overwrite,
        ..restore_options(out.path())
    };
    let result = quiet_restore_driver().execute(
        &storage_name(dir.path(), "one.arcv"),
        &include,
        &exclude,
        &options,
        &JobMonitor::default(),
    );

    assert!(result.is_ok(), "restore failed: {result:?}");
    assert_eq!(std::fs::read(out.path().join("a.log")).unwrap(), b"fresh");
}

#[test]
fn test_restore_skip_existing_policy() {
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    std::fs::write(out.path().join("a.log"), b"already here").unwrap();

    build_archive(
        dir.path(),
        "one.arcv",
        vec![FixtureEntry::FileFragment {
            name: "a.log",
            total: 5,
            offset: 0,
            data: b"fresh".to_vec(),
        }],
    );

    let (include, exclude) = no_selection();
    let options = JobOptions {
        conflict_policy: ConflictPolicy::SkipExisting,
        ..restore_options(out.path())
    };
    let result = quiet_restore_driver().execute(
        &storage_name(dir.path(), "one.arcv"),
        &include,
        &exclude,
        &options,
        &JobMonitor::default(),
    );

    assert!(result.is_ok(), "restore failed: {result:?}");
    assert_eq!(std::fs::read(out.path().join("a.log")).unwrap(), b"already here");
    assert!(!out.path().join("a-0.log").exists());
}

// Dry run touches nothing on disk.
#[test]
fn test_restore_dry_run_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    build_archive(
        dir.path(),
        "one.arcv",
        vec![FixtureEntry::FileFragment {
            name: "/data/file",
            total: 4,
            offset: 0,
            data: b"data".to_vec(),
        }],
    );

    let (include, exclude) = no_selection();
    let options = JobOptions {
        dry_run: true,
        ..restore_options(out.path())
    };
    let result = quiet_restore_driver().execute(
        &storage_name(dir.path(), "one.arcv"),
        &include,
        &exclude,
        &options,
        &JobMonitor::default(),
    );

    assert!(result.is_ok(), "restore failed: {result:?}");
    assert!(!out.path().join("data").exists());
}

#[test]
fn test_restore_strip_count() {
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    build_archive(
        dir.path(),
        "one.arcv",
        vec![FixtureEntry::FileFragment {
            name: "/deep/nested/file.txt",
            total: 4,
            offset: 0,
            data: b"data".to_vec(),
        }],
    );

    let (include, exclude) = no_selection();
    let options = JobOptions {
        directory_strip_count: 1,
        ..restore_options(out.path())
    };
    let result = quiet_restore_driver().execute(
        &storage_name(dir.path(), "one.arcv"),
        &include,
        &exclude,
        &options,
        &JobMonitor::default(),
    );

    assert!(result.is_ok(), "restore failed: {result:?}");
    assert_eq!(std::fs::read(out.path().join("nested/file.txt")).unwrap(), b"data");
}

// Abort before the first descriptor: nothing is written, the job reports
// `Aborted`.
#[test]
fn test_restore_abort_leaves_no_partial_files() {
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    build_archive(
        dir.path(),
        "one.arcv",
        vec![FixtureEntry::FileFragment {
            name: "/data/file",
            total: 4,
            offset: 0,
            data: b"data".to_vec(),
        }],
    );

    let monitor = JobMonitor {
        is_aborted: Some(Arc::new(|| true)),
        ..JobMonitor::default()
    };
    let (include, exclude) = no_selection();
    let result = quiet_restore_driver().execute(
        &storage_name(dir.path(), "one.arcv"),
        &include,
        &exclude,
        &restore_options(out.path()),
        &monitor,
    );

    assert!(matches!(result, Err(ArchiveError::Aborted)));
    assert!(std::fs::read_dir(out.path()).unwrap().next().is_none());
}

// An incomplete restore still counts as a job error by default.
#[test]
fn test_restore_incomplete_entry_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    build_archive(
        dir.path(),
        "partial.arcv",
        vec![FixtureEntry::FileFragment {
            name: "/data/file",
            total: 12,
            offset: 0,
            data: b"archive-".to_vec(),
        }],
    );

    let (include, exclude) = no_selection();
    let result = quiet_restore_driver().execute(
        &storage_name(dir.path(), "partial.arcv"),
        &include,
        &exclude,
        &restore_options(out.path()),
        &JobMonitor::default(),
    );
    assert!(matches!(result, Err(ArchiveError::EntryIncomplete(_))));

    // the partial file is on disk with the restored prefix
    assert_eq!(std::fs::read(out.path().join("data/file")).unwrap(), b"archive-");
}
