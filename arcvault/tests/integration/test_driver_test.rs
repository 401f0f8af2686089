// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! End-to-end tests of the test driver.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::common::{build_archive, capturing_monitor, quiet_test_driver, storage_name, FixtureEntry};
use arcvault::{JobMonitor, JobOptions};
use arcvault_domain::{ArchiveError, EntrySelector, MatchMode, Pattern, PatternKind, PatternList, PatternOptions};

fn no_selection() -> (EntrySelector, PatternList) {
    (EntrySelector::new(), PatternList::new())
}

// A file split into two fragments tests clean and leaves no incomplete
// entries behind.
#[test]
fn test_two_fragment_file_is_complete() {
    let dir = tempfile::tempdir().unwrap();
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
    let (monitor, captured) = capturing_monitor();
    let result = quiet_test_driver().execute(
        &storage_name(dir.path(), "full.arcv"),
        &include,
        &exclude,
        &JobOptions::default(),
        &monitor,
    );

    assert!(result.is_ok(), "test failed: {result:?}");
    let info = captured.lock().unwrap();
    assert_eq!(info.done_count, 2);
    assert_eq!(info.error_count, 0);
}

// Only the first 8 of 12 bytes arrive: the driver must report the entry
// as incomplete.
#[test]
fn test_missing_fragment_reports_incomplete() {
    let dir = tempfile::tempdir().unwrap();
    build_archive(
        dir.path(),
        "partial.arcv",
        vec![FixtureEntry::FileFragment {
            name: "/etc/hostname",
            total: 12,
            offset: 0,
            data: b"archive-".to_vec(),
        }],
    );

    let (include, exclude) = no_selection();
    let result = quiet_test_driver().execute(
        &storage_name(dir.path(), "partial.arcv"),
        &include,
        &exclude,
        &JobOptions::default(),
        &JobMonitor::default(),
    );
    assert!(matches!(result, Err(ArchiveError::EntryIncomplete(name)) if name == "/etc/hostname"));

    // the fragment check can be disabled
    let result = quiet_test_driver().execute(
        &storage_name(dir.path(), "partial.arcv"),
        &include,
        &exclude,
        &JobOptions {
            no_fragment_check: true,
            ..JobOptions::default()
        },
        &JobMonitor::default(),
    );
    assert!(result.is_ok());
}

#[test]
fn test_exclude_pattern_skips_entries() {
    let dir = tempfile::tempdir().unwrap();
    build_archive(
        dir.path(),
        "mixed.arcv",
        vec![
            FixtureEntry::FileFragment {
                name: "/data/keep.txt",
                total: 4,
                offset: 0,
                data: b"keep".to_vec(),
            },
            FixtureEntry::FileFragment {
                name: "/data/drop.tmp",
                total: 4,
                offset: 0,
                data: b"drop".to_vec(),
            },
        ],
    );

    let include = EntrySelector::new();
    let mut exclude = PatternList::new();
    exclude.push(Pattern::compile("*.tmp", PatternKind::Glob, PatternOptions::default()).unwrap());
    assert!(exclude.matches("/data/drop.tmp", MatchMode::Exact));

    let (monitor, captured) = capturing_monitor();
    let result = quiet_test_driver().execute(
        &storage_name(dir.path(), "mixed.arcv"),
        &include,
        &exclude,
        &JobOptions::default(),
        &monitor,
    );

    assert!(result.is_ok(), "test failed: {result:?}");
    let info = captured.lock().unwrap();
    assert_eq!(info.done_count, 1);
    assert_eq!(info.skipped_count, 1);
}

#[test]
fn test_missing_archive_is_archive_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (include, exclude) = no_selection();
    let result = quiet_test_driver().execute(
        &storage_name(dir.path(), "absent.arcv"),
        &include,
        &exclude,
        &JobOptions::default(),
        &JobMonitor::default(),
    );
    assert!(matches!(result, Err(ArchiveError::ArchiveNotFound(_))));
}

#[test]
fn test_directory_pattern_selects_archives() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["job-0001.arcv", "job-0002.arcv"] {
        build_archive(
            dir.path(),
            name,
            vec![FixtureEntry::FileFragment {
                name: "/data/file",
                total: 2,
                offset: 0,
                data: b"ab".to_vec(),
            }],
        );
    }
    build_archive(
        dir.path(),
        "other.arcv",
        vec![FixtureEntry::FileFragment {
            name: "/data/file",
            total: 2,
            offset: 0,
            data: b"ab".to_vec(),
        }],
    );

    let (include, exclude) = no_selection();
    let (monitor, captured) = capturing_monitor();
    let pattern = dir.path().join("job-*.arcv").display().to_string();
    let result = quiet_test_driver().execute(
        &[pattern],
        &include,
        &exclude,
        &JobOptions::default(),
        &monitor,
    );

    assert!(result.is_ok(), "test failed: {result:?}");
    // two matching archives, one file entry each
    assert_eq!(captured.lock().unwrap().done_count, 2);
}

// Abort before the first descriptor: the job ends with `Aborted` and the
// workers drain cleanly.
#[test]
fn test_abort_wins_over_success() {
    let dir = tempfile::tempdir().unwrap();
    build_archive(
        dir.path(),
        "abort.arcv",
        vec![FixtureEntry::FileFragment {
            name: "/data/file",
            total: 4,
            offset: 0,
            data: b"data".to_vec(),
        }],
    );

    let polls = Arc::new(AtomicUsize::new(0));
    let monitor = JobMonitor {
        is_aborted: Some(Arc::new({
            let polls = Arc::clone(&polls);
            move || {
                polls.fetch_add(1, Ordering::SeqCst);
                true
            }
        })),
        ..JobMonitor::default()
    };

    let (include, exclude) = no_selection();
    let result = quiet_test_driver().execute(
        &storage_name(dir.path(), "abort.arcv"),
        &include,
        &exclude,
        &JobOptions::default(),
        &monitor,
    );
    assert!(matches!(result, Err(ArchiveError::Aborted)));
    assert!(polls.load(Ordering::SeqCst) > 0);
}

// Signature verification can be skipped entirely.
#[test]
fn test_skip_signatures() {
    let dir = tempfile::tempdir().unwrap();
    build_archive(
        dir.path(),
        "signed.arcv",
        vec![FixtureEntry::FileFragment {
            name: "/data/file",
            total: 4,
            offset: 0,
            data: b"data".to_vec(),
        }],
    );

    let (include, exclude) = no_selection();
    let result = quiet_test_driver().execute(
        &storage_name(dir.path(), "signed.arcv"),
        &include,
        &exclude,
        &JobOptions {
            skip_verify_signatures: true,
            ..JobOptions::default()
        },
        &JobMonitor::default(),
    );
    assert!(result.is_ok());
}

// A flipped payload byte fails chunk authentication or the crc and the
// job reports corrupt data.
#[test]
fn test_corrupted_archive_fails() {
    let dir = tempfile::tempdir().unwrap();
    build_archive(
        dir.path(),
        "corrupt.arcv",
        vec![FixtureEntry::FileFragment {
            name: "/data/file",
            total: 64,
            offset: 0,
            data: vec![0x5a; 64],
        }],
    );

    let path = dir.path().join("corrupt.arcv");
    let mut bytes = std::fs::read(&path).unwrap();
    let index = bytes.len() / 2;
    bytes[index] ^= 0xff;
    std::fs::write(&path, &bytes).unwrap();

    let (include, exclude) = no_selection();
    let result = quiet_test_driver().execute(
        &storage_name(dir.path(), "corrupt.arcv"),
        &include,
        &exclude,
        &JobOptions {
            // the signature over the tampered span must already fail
            force_verify_signatures: true,
            ..JobOptions::default()
        },
        &JobMonitor::default(),
    );
    assert!(result.is_err());
}
