// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! End-to-end tests of the convert driver.

use std::sync::Arc;

use crate::common::{
    build_archive, build_archive_with, leftover_parts, quiet_convert_driver, quiet_restore_driver, quiet_test_driver,
    storage_name, FixtureEntry,
};
use arcvault::application::use_cases::ConvertOverrides;
use arcvault::{JobMonitor, JobOptions};
use arcvault_domain::services::archive_service::ArchiveFormat;
use arcvault_domain::services::storage_service::Storage;
use arcvault_domain::{
    ArchiveError, CompressionAlgorithm, CryptAlgorithm, EntrySelector, Password, PatternList,
};

use arcvault::infrastructure::adapters::{ArcvFormat, LocalStorage};

fn no_selection() -> (EntrySelector, PatternList) {
    (EntrySelector::new(), PatternList::new())
}

fn two_fragment_entries() -> Vec<FixtureEntry> {
    vec![
        FixtureEntry::Meta { comment: "nightly" },
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
    ]
}

fn convert_options(temp: &std::path::Path) -> JobOptions {
    JobOptions {
        temp_directory: temp.to_path_buf(),
        ..JobOptions::default()
    }
}

// Converting a plaintext archive to an encrypted one: the destination
// decrypts under the new algorithm, fragment boundaries preserved, the
// intermediate part deleted after commit.
#[test]
fn test_convert_to_encrypted_archive() {
    let dir = tempfile::tempdir().unwrap();
    build_archive(dir.path(), "job.arcv", two_fragment_entries());

    let password = Password::new("vault password");
    let monitor = JobMonitor {
        password: Some(Arc::new({
            let password = password.clone();
            move || Some(password.clone())
        })),
        ..JobMonitor::default()
    };
    let options = JobOptions {
        new_crypt: Some(CryptAlgorithm::Aes256Gcm),
        new_compression: Some(CompressionAlgorithm::Deflate),
        ..convert_options(dir.path())
    };

    let result = quiet_convert_driver().execute(
        &storage_name(dir.path(), "job.arcv"),
        &ConvertOverrides::default(),
        &options,
        &monitor,
    );
    assert!(result.is_ok(), "convert failed: {result:?}");
    assert!(leftover_parts(dir.path()).is_empty(), "intermediate parts left behind");

    // the converted archive is encrypted now
    let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new(dir.path()));
    let format = ArcvFormat::new();
    assert!(matches!(
        format.open(&storage, "job.arcv", None),
        Err(ArchiveError::Crypt(_))
    ));

    let reader = format.open(&storage, "job.arcv", Some(&password)).unwrap();
    assert_eq!(reader.crypto_context().algorithm, CryptAlgorithm::Aes256Gcm);

    // fragment boundaries survive: a full test over the converted archive
    // finds the same complete 12-byte entity
    let (include, exclude) = no_selection();
    let result = quiet_test_driver().execute(
        &storage_name(dir.path(), "job.arcv"),
        &include,
        &exclude,
        &options,
        &monitor,
    );
    assert!(result.is_ok(), "converted archive does not verify: {result:?}");

    // and the content restores bit-identically
    let out = tempfile::tempdir().unwrap();
    let restore_options = JobOptions {
        destination: Some(out.path().to_path_buf()),
        ..JobOptions::default()
    };
    let result = quiet_restore_driver().execute(
        &storage_name(dir.path(), "job.arcv"),
        &include,
        &exclude,
        &restore_options,
        &monitor,
    );
    assert!(result.is_ok(), "restore of converted archive failed: {result:?}");
    assert_eq!(std::fs::read(out.path().join("etc/hostname")).unwrap(), b"archive-host");
}

// Decrypting on convert: encrypted source, plaintext destination.
#[test]
fn test_convert_to_plaintext_archive() {
    let dir = tempfile::tempdir().unwrap();
    let password = Password::new("old secret");
    build_archive_with(
        dir.path(),
        "secret.arcv",
        two_fragment_entries(),
        CompressionAlgorithm::Zstd,
        CryptAlgorithm::XChaCha20Poly1305,
        Some(password.clone()),
    );

    let monitor = JobMonitor {
        password: Some(Arc::new(move || Some(password.clone()))),
        ..JobMonitor::default()
    };
    let options = JobOptions {
        new_crypt: Some(CryptAlgorithm::None),
        ..convert_options(dir.path())
    };
    let result = quiet_convert_driver().execute(
        &storage_name(dir.path(), "secret.arcv"),
        &ConvertOverrides::default(),
        &options,
        &monitor,
    );
    assert!(result.is_ok(), "convert failed: {result:?}");

    // opens without a password now
    let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new(dir.path()));
    let reader = ArcvFormat::new().open(&storage, "secret.arcv", None).unwrap();
    assert_eq!(reader.crypto_context().algorithm, CryptAlgorithm::None);
}

// Meta identity overrides reach the destination meta entry; everything
// else is carried over.
#[test]
fn test_convert_meta_overrides() {
    let dir = tempfile::tempdir().unwrap();
    build_archive(dir.path(), "job.arcv", two_fragment_entries());

    let new_job_uuid = uuid::Uuid::new_v4();
    let new_created = chrono::DateTime::parse_from_rfc3339("2026-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    let overrides = ConvertOverrides {
        job_uuid: Some(new_job_uuid),
        schedule_uuid: None,
        created_at: Some(new_created),
        comment: Some("converted".to_string()),
    };

    let result = quiet_convert_driver().execute(
        &storage_name(dir.path(), "job.arcv"),
        &overrides,
        &convert_options(dir.path()),
        &JobMonitor::default(),
    );
    assert!(result.is_ok(), "convert failed: {result:?}");

    let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new(dir.path()));
    let reader = ArcvFormat::new().open(&storage, "job.arcv", None).unwrap();
    let mut cursor = reader.open_cursor().unwrap();
    let mut meta = None;
    while let Some(envelope) = cursor.next_entry().unwrap() {
        if envelope.kind == arcvault_domain::EntryKind::Meta {
            cursor.seek(envelope.offset).unwrap();
            meta = Some(cursor.read_meta_entry().unwrap());
            cursor.close_entry().unwrap();
            break;
        }
        cursor.skip_entry().unwrap();
    }
    let meta = meta.expect("converted archive has no meta entry");
    assert_eq!(meta.job_uuid, Some(new_job_uuid));
    assert_eq!(meta.created_at, new_created);
    assert_eq!(meta.comment, "converted");
    // untouched fields survive the conversion
    assert_eq!(meta.host_name, "backup01");
    assert_eq!(meta.user_name, "operator");
}

// A local destination directory bypasses the storage backend; the source
// archive stays untouched.
#[test]
fn test_convert_to_local_destination() {
    let dir = tempfile::tempdir().unwrap();
    let exported = tempfile::tempdir().unwrap();
    build_archive(dir.path(), "job.arcv", two_fragment_entries());
    let original = std::fs::read(dir.path().join("job.arcv")).unwrap();

    let options = JobOptions {
        destination: Some(exported.path().to_path_buf()),
        ..convert_options(dir.path())
    };
    let result = quiet_convert_driver().execute(
        &storage_name(dir.path(), "job.arcv"),
        &ConvertOverrides::default(),
        &options,
        &JobMonitor::default(),
    );
    assert!(result.is_ok(), "convert failed: {result:?}");

    assert_eq!(std::fs::read(dir.path().join("job.arcv")).unwrap(), original);
    let exported_archive = exported.path().join("job.arcv");
    assert!(exported_archive.exists());

    // the exported archive verifies clean
    let (include, exclude) = no_selection();
    let result = quiet_test_driver().execute(
        &[exported_archive.display().to_string()],
        &include,
        &exclude,
        &JobOptions::default(),
        &JobMonitor::default(),
    );
    assert!(result.is_ok(), "exported archive does not verify: {result:?}");
}

// Abort: no destination archive is committed and no intermediate part
// remains.
#[test]
fn test_convert_abort_commits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    build_archive(dir.path(), "job.arcv", two_fragment_entries());
    let original = std::fs::read(dir.path().join("job.arcv")).unwrap();

    let monitor = JobMonitor {
        is_aborted: Some(Arc::new(|| true)),
        ..JobMonitor::default()
    };
    let result = quiet_convert_driver().execute(
        &storage_name(dir.path(), "job.arcv"),
        &ConvertOverrides::default(),
        &convert_options(dir.path()),
        &monitor,
    );

    assert!(matches!(result, Err(ArchiveError::Aborted)));
    assert_eq!(std::fs::read(dir.path().join("job.arcv")).unwrap(), original);
    assert!(leftover_parts(dir.path()).is_empty(), "intermediate parts left behind");
}
