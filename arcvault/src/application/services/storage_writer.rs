// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Storage Writer
//!
//! The single consumer of the storage queue in convert mode. Each message
//! is one fully materialized intermediate archive part; the writer owns
//! the file from dequeue to deletion.
//!
//! ## Commit protocol
//!
//! 1. Stat the intermediate file; a failure here fails the job.
//! 2. If the destination already exists, rename it to a temp sibling kept
//!    for rollback.
//! 3. Stream to the destination: through the storage backend with bounded
//!    retry (3 attempts, `NoSpace` never retries), or, when the job names
//!    a plain local destination path, through the file layer without
//!    retry.
//! 4. On success delete the rollback sibling; on failure delete the
//!    partial destination and put the sibling back.
//! 5. Delete the intermediate file in all cases.
//!
//! After the queue closes, leftover messages are drained and their
//! intermediate files deleted.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arcvault_domain::services::file_service::FileSystem;
use arcvault_domain::services::storage_service::Storage;
use arcvault_domain::ArchiveError;

use crate::application::services::job_state::JobState;
use crate::infrastructure::runtime::MessageQueue;

const MAX_RETRIES: u32 = 3;

/// One completed intermediate part handed to the storage writer. The
/// receiver owns the file at `intermediate_path`.
pub struct StorageMessage {
    pub intermediate_path: PathBuf,
    pub size: u64,
}

/// Destination of the converted archive.
pub enum ConvertDestination {
    /// Upload through the storage backend under this archive name.
    Storage { archive_name: String },
    /// Write to a plain local path through the file layer, bypassing the
    /// storage backend (and its retry protocol).
    LocalFile { path: PathBuf },
}

/// Runs the storage writer until the queue closes or the job fails.
pub fn run_storage_writer(
    queue: &MessageQueue<StorageMessage>,
    storage: &Arc<dyn Storage>,
    destination: &ConvertDestination,
    filesystem: &Arc<dyn FileSystem>,
    state: &JobState,
    buffer_size: usize,
) {
    while state.should_continue(false) {
        let Some(message) = queue.get() else {
            break;
        };

        if let Err(error) = store_one(&message, storage, destination, filesystem, state, buffer_size) {
            tracing::error!(
                "cannot store '{}': {error}",
                storage.printable_name(destination_name(destination))
            );
            state.set_fail_error(error);
        }

        remove_intermediate(filesystem, &message.intermediate_path);
    }

    // whatever is still queued will never be stored
    while let Some(message) = queue.try_get() {
        remove_intermediate(filesystem, &message.intermediate_path);
    }
}

fn destination_name(destination: &ConvertDestination) -> Option<&str> {
    match destination {
        ConvertDestination::Storage { archive_name } => Some(archive_name.as_str()),
        ConvertDestination::LocalFile { .. } => None,
    }
}

fn remove_intermediate(filesystem: &Arc<dyn FileSystem>, path: &Path) {
    if let Err(error) = filesystem.delete(path) {
        tracing::warn!("cannot delete intermediate file '{}': {error}", path.display());
    }
}

fn store_one(
    message: &StorageMessage,
    storage: &Arc<dyn Storage>,
    destination: &ConvertDestination,
    filesystem: &Arc<dyn FileSystem>,
    state: &JobState,
    buffer_size: usize,
) -> Result<(), ArchiveError> {
    // the intermediate must be intact before the destination is touched
    let info = filesystem.metadata(&message.intermediate_path)?;
    if info.size != message.size {
        return Err(ArchiveError::internal_error(format!(
            "intermediate file '{}' has size {}, expected {}",
            message.intermediate_path.display(),
            info.size,
            message.size
        )));
    }

    match destination {
        ConvertDestination::Storage { archive_name } => {
            // keep the original aside for rollback
            let rollback_name = if storage.exists(archive_name) {
                let temp_name = storage.temp_name();
                storage.rename(archive_name, &temp_name)?;
                Some(temp_name)
            } else {
                None
            };

            let result = upload_with_retry(message, storage, archive_name, filesystem, state, buffer_size);

            match (&result, &rollback_name) {
                (Ok(()), Some(rollback)) => {
                    storage.delete(rollback)?;
                }
                (Err(_), rollback) => {
                    let _ = storage.delete(archive_name);
                    if let Some(rollback) = rollback {
                        if let Err(error) = storage.rename(rollback, archive_name) {
                            tracing::warn!("cannot restore original archive from '{rollback}': {error}");
                        }
                    }
                }
                (Ok(()), None) => {}
            }
            result
        }
        ConvertDestination::LocalFile { path } => copy_to_local_file(message, path, filesystem, buffer_size),
    }
}

fn upload_with_retry(
    message: &StorageMessage,
    storage: &Arc<dyn Storage>,
    archive_name: &str,
    filesystem: &Arc<dyn FileSystem>,
    state: &JobState,
    buffer_size: usize,
) -> Result<(), ArchiveError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match upload_once(message, storage, archive_name, filesystem, buffer_size) {
            Ok(()) => return Ok(()),
            Err(error) => {
                // a full target stays full; retrying is pointless
                let retryable = !matches!(error, ArchiveError::NoSpace(_));
                if !retryable || attempt >= MAX_RETRIES || !state.should_continue(false) {
                    return Err(error);
                }
                tracing::warn!(
                    "storing '{}' failed (attempt {attempt}/{MAX_RETRIES}): {error}",
                    storage.printable_name(Some(archive_name))
                );
            }
        }
    }
}

fn upload_once(
    message: &StorageMessage,
    storage: &Arc<dyn Storage>,
    archive_name: &str,
    filesystem: &Arc<dyn FileSystem>,
    buffer_size: usize,
) -> Result<(), ArchiveError> {
    let mut source = filesystem.open_read(&message.intermediate_path)?;
    let mut sink = storage.create(archive_name, message.size, true)?;
    let mut buffer = vec![0u8; buffer_size];
    loop {
        let read = source.read(&mut buffer).map_err(ArchiveError::from)?;
        if read == 0 {
            break;
        }
        sink.write(&buffer[..read])?;
    }
    sink.close()
}

fn copy_to_local_file(
    message: &StorageMessage,
    path: &Path,
    filesystem: &Arc<dyn FileSystem>,
    buffer_size: usize,
) -> Result<(), ArchiveError> {
    let mut source = filesystem.open_read(&message.intermediate_path)?;
    filesystem.truncate_create(path)?;
    let mut writer = filesystem.open_write(path, false)?;
    let mut buffer = vec![0u8; buffer_size];
    loop {
        let read = source.read(&mut buffer).map_err(ArchiveError::from)?;
        if read == 0 {
            break;
        }
        writer.write_all(&buffer[..read])?;
    }
    writer.close()
}
