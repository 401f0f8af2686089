// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Convert Archives Use Case
//!
//! Re-encodes archives: every entry of the source archive is read,
//! decoded, and written into a destination archive with new compression,
//! crypt, and meta identity. The destination is materialized as an
//! intermediate part file and committed by the storage writer thread only
//! after it is complete, so an interrupted convert never clobbers the
//! original.
//!
//! ## Thread inventory per archive
//!
//! - 1 entry pipeline (producer)
//! - N convert workers (entry queue consumers; destination writes are
//!   serialized through the writer lock because entries are contiguous in
//!   the destination encoding)
//! - 1 storage writer (consumer of the storage queue)

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

use arcvault_domain::services::archive_service::{
    ArchiveCreateOptions, ArchiveCursor, ArchiveFormat, ArchiveWriter, StoreCallback,
};
use arcvault_domain::services::file_service::FileSystem;
use arcvault_domain::services::storage_service::{Storage, StorageFactory, StorageSpecifier};
use arcvault_domain::{ArchiveError, CompressionAlgorithm, EntryKind, Password};

use crate::application::commands::{JobMonitor, JobOptions};
use crate::application::services::entry_pipeline::{run_entry_pipeline, verify_archive_signatures, EntryMessage};
use crate::application::services::job_state::JobState;
use crate::application::services::reporter::ConsoleReporter;
use crate::application::services::storage_writer::{run_storage_writer, ConvertDestination, StorageMessage};
use crate::application::services::worker::WorkerCursor;
use crate::application::use_cases::test_archive::resolve_archive_names;
use crate::infrastructure::runtime::{MessageQueue, WorkerPool};

/// Identity overrides applied to the converted archive's meta entry.
#[derive(Debug, Clone, Default)]
pub struct ConvertOverrides {
    pub job_uuid: Option<Uuid>,
    pub schedule_uuid: Option<Uuid>,
    pub created_at: Option<DateTime<Utc>>,
    pub comment: Option<String>,
}

/// Use case for re-encoding archives with new compression, crypt and
/// identity.
pub struct ConvertArchives {
    format: Arc<dyn ArchiveFormat>,
    storage_factory: Arc<dyn StorageFactory>,
    filesystem: Arc<dyn FileSystem>,
    reporter: ConsoleReporter,
}

impl ConvertArchives {
    pub fn new(
        format: Arc<dyn ArchiveFormat>,
        storage_factory: Arc<dyn StorageFactory>,
        filesystem: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            format,
            storage_factory,
            filesystem,
            reporter: ConsoleReporter::new(false),
        }
    }

    pub fn with_reporter(mut self, reporter: ConsoleReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Converts every archive selected by `storage_names`.
    pub fn execute(
        &self,
        storage_names: &[String],
        overrides: &ConvertOverrides,
        options: &JobOptions,
        monitor: &JobMonitor,
    ) -> Result<(), ArchiveError> {
        let state = Arc::new(JobState::new(monitor.clone()));
        let options = Arc::new(options.clone());
        let overrides = Arc::new(overrides.clone());

        let mut some_storage_found = false;
        for storage_name in storage_names {
            if state.aborted() {
                break;
            }
            let specifier = match StorageSpecifier::parse(storage_name) {
                Ok(specifier) => specifier,
                Err(error) => {
                    tracing::error!("invalid storage '{storage_name}': {error}");
                    state.set_fail_error(error);
                    continue;
                }
            };
            let storage = match self.storage_factory.open(&specifier) {
                Ok(storage) => storage,
                Err(error) => {
                    tracing::error!("cannot initialize storage '{storage_name}': {error}");
                    state.set_fail_error(error);
                    continue;
                }
            };

            let archive_names = match resolve_archive_names(&specifier, &storage, &state) {
                Ok(names) => names,
                Err(error) => {
                    tracing::error!("cannot list storage '{storage_name}': {error}");
                    state.set_fail_error(error);
                    continue;
                }
            };
            for archive_name in archive_names {
                if state.aborted() {
                    break;
                }
                match self.convert_archive(&storage, &archive_name, &state, &overrides, &options) {
                    Ok(()) => some_storage_found = true,
                    Err(error) => {
                        tracing::error!(
                            "cannot convert storage '{}': {error}",
                            storage.printable_name(Some(&archive_name))
                        );
                        state.set_fail_error(error);
                    }
                }
            }
        }

        if !some_storage_found && !storage_names.is_empty() && !state.has_failed() {
            tracing::error!("no matching storage archives found");
            state.set_fail_error(ArchiveError::FileNotFound("no matching storage archives".into()));
        }

        if state.aborted() {
            state.override_fail_error(ArchiveError::Aborted);
        }
        match state.fail_error() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn convert_archive(
        &self,
        storage: &Arc<dyn Storage>,
        archive_name: &str,
        state: &Arc<JobState>,
        overrides: &Arc<ConvertOverrides>,
        options: &Arc<JobOptions>,
    ) -> Result<(), ArchiveError> {
        let printable_name = storage.printable_name(Some(archive_name));
        if !storage.exists(archive_name) {
            return Err(ArchiveError::ArchiveNotFound(printable_name));
        }

        let password = state.monitor().request_password();
        let source = self.format.open(storage, archive_name, password.as_ref())?;
        verify_archive_signatures(&source, options)?;

        state.update_running(false, |info| info.storage.start(&printable_name, source.size()));
        self.reporter.storage_begin("Convert", &printable_name);

        // destination writer; intermediate parts flow through the storage queue
        let storage_queue = Arc::new(MessageQueue::<StorageMessage>::unbounded());
        let writer = self.create_destination_writer(&source, &storage_queue, password, options)?;
        let writer = Arc::new(Mutex::new(writer));

        // storage writer thread
        let destination = match &options.destination {
            Some(directory) => ConvertDestination::LocalFile {
                path: directory.join(archive_name),
            },
            None => ConvertDestination::Storage {
                archive_name: archive_name.to_string(),
            },
        };
        let mut storage_pool = WorkerPool::new("storage-writer");
        {
            let storage_queue = Arc::clone(&storage_queue);
            let storage = Arc::clone(storage);
            let filesystem = Arc::clone(&self.filesystem);
            let state = Arc::clone(state);
            let buffer_size = options.buffer_size;
            storage_pool.run(move || {
                run_storage_writer(&storage_queue, &storage, &destination, &filesystem, &state, buffer_size)
            });
        }

        // convert workers
        let entry_queue = Arc::new(MessageQueue::<EntryMessage>::bounded(options.entry_queue_capacity));
        let mut pool = WorkerPool::new("convert-worker");
        for _ in 0..options.worker_count() {
            let entry_queue = Arc::clone(&entry_queue);
            let state = Arc::clone(state);
            let options = Arc::clone(options);
            let overrides = Arc::clone(overrides);
            let writer = Arc::clone(&writer);
            let reporter = self.reporter.clone();
            pool.run(move || convert_worker(&entry_queue, &state, &options, &overrides, &writer, &reporter));
        }

        let pipeline_result = run_entry_pipeline(&source, &entry_queue, state, options);
        entry_queue.close();
        pool.join_all();

        if let Err(error) = pipeline_result {
            state.set_fail_error(error);
        }

        // commit the destination only for a clean run; an abandoned writer
        // removes its intermediate part on drop
        if !state.has_failed() && !state.aborted() {
            if let Err(error) = writer.lock().finish() {
                state.set_fail_error(error);
            }
        }
        drop(writer);

        storage_queue.close();
        storage_pool.join_all();

        state.update_running(true, |info| info.storage.done = source.size());
        self.reporter.storage_summary(&printable_name, !state.has_failed());
        Ok(())
    }

    fn create_destination_writer(
        &self,
        source: &Arc<dyn arcvault_domain::ArchiveReader>,
        storage_queue: &Arc<MessageQueue<StorageMessage>>,
        password: Option<Password>,
        options: &JobOptions,
    ) -> Result<Box<dyn ArchiveWriter>, ArchiveError> {
        let crypt = options.new_crypt.unwrap_or(source.crypto_context().algorithm);
        let compression = options.new_compression.unwrap_or(CompressionAlgorithm::Zstd);
        if crypt.is_encrypted() && password.is_none() {
            return Err(ArchiveError::crypt_error("converting to an encrypted archive requires a password"));
        }

        let create_options = ArchiveCreateOptions {
            compression,
            crypt,
            password,
            temp_directory: options.temp_directory.clone(),
        };

        let store: StoreCallback = {
            let storage_queue = Arc::clone(storage_queue);
            let filesystem = Arc::clone(&self.filesystem);
            Box::new(move |part, size| {
                let message = StorageMessage {
                    intermediate_path: part.to_path_buf(),
                    size,
                };
                if storage_queue.put(message) {
                    Ok(())
                } else {
                    let _ = filesystem.delete(part);
                    Err(ArchiveError::storage_error("storage queue closed"))
                }
            })
        };

        self.format.create(&create_options, store)
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

type SharedWriter = Arc<Mutex<Box<dyn ArchiveWriter>>>;

fn convert_worker(
    queue: &MessageQueue<EntryMessage>,
    state: &JobState,
    options: &JobOptions,
    overrides: &ConvertOverrides,
    writer: &SharedWriter,
    reporter: &ConsoleReporter,
) {
    let mut buffer = vec![0u8; options.buffer_size];
    let mut worker_cursor = WorkerCursor::new();

    while !state.aborted() {
        let Some(message) = queue.get() else {
            break;
        };
        if !state.should_continue(options.no_stop_on_error) {
            continue;
        }

        let result = worker_cursor
            .prepare(&message)
            .and_then(|cursor| convert_entry(cursor, &message, state, overrides, writer, reporter, &mut buffer));

        if let Err(error) = result {
            state.set_fail_error(error);
            break;
        }

        state.update_running(false, |info| {
            if message.offset > info.storage.done {
                info.storage.done = message.offset;
            }
        });
    }

    while queue.get().is_some() {}
}

fn convert_entry(
    cursor: &mut dyn ArchiveCursor,
    message: &EntryMessage,
    state: &JobState,
    overrides: &ConvertOverrides,
    writer: &SharedWriter,
    reporter: &ConsoleReporter,
    buffer: &mut [u8],
) -> Result<(), ArchiveError> {
    match message.kind {
        EntryKind::File => convert_payload_entry(cursor, false, state, writer, reporter, buffer),
        EntryKind::HardLink => convert_payload_entry(cursor, true, state, writer, reporter, buffer),
        EntryKind::Image => convert_image_entry(cursor, state, writer, reporter, buffer),
        EntryKind::Directory => {
            let header = cursor.read_directory_entry()?;
            writer.lock().write_directory_entry(&header)?;
            reporter.entry_ok("Convert", "directory", &header.name, 0, None, false);
            state.update_running(false, |info| info.count_done(0));
            cursor.close_entry()
        }
        EntryKind::Link => {
            let header = cursor.read_link_entry()?;
            writer.lock().write_link_entry(&header)?;
            reporter.entry_ok("Convert", "link", &header.name, 0, None, false);
            state.update_running(false, |info| info.count_done(0));
            cursor.close_entry()
        }
        EntryKind::Special => {
            let header = cursor.read_special_entry()?;
            writer.lock().write_special_entry(&header)?;
            reporter.entry_ok("Convert", "special", &header.name, 0, None, false);
            state.update_running(false, |info| info.count_done(0));
            cursor.close_entry()
        }
        EntryKind::Meta => convert_meta_entry(cursor, state, overrides, writer, reporter),
        EntryKind::Signature | EntryKind::Salt | EntryKind::Key => cursor.skip_entry(),
        EntryKind::Unknown => Err(ArchiveError::internal_error("unknown entry kind on entry queue")),
    }
}

fn convert_payload_entry(
    cursor: &mut dyn ArchiveCursor,
    hardlink: bool,
    state: &JobState,
    writer: &SharedWriter,
    reporter: &ConsoleReporter,
    buffer: &mut [u8],
) -> Result<(), ArchiveError> {
    let kind_text = if hardlink { "hardlink" } else { "file" };
    let header = if hardlink {
        cursor.read_hardlink_entry()?
    } else {
        cursor.read_file_entry()?
    };
    let name = header.name().to_string();

    state.update_running(false, |info| {
        info.entry.start(&name, header.fragment_size);
    });

    // entries are contiguous in the destination encoding, so the writer
    // stays locked from begin to end
    {
        let mut writer = writer.lock();
        if hardlink {
            writer.begin_hardlink_entry(&header)?;
        } else {
            writer.begin_file_entry(&header)?;
        }

        let mut length = 0u64;
        while length < header.fragment_size {
            let step = (header.fragment_size - length).min(buffer.len() as u64) as usize;
            if let Err(error) = cursor.read_data(&mut buffer[..step]) {
                reporter.entry_failed("Convert", kind_text, &name);
                let _ = writer.end_entry();
                let _ = cursor.close_entry();
                return Err(error);
            }
            if let Err(error) = writer.write_data(&buffer[..step]) {
                reporter.entry_failed("Convert", kind_text, &name);
                let _ = cursor.close_entry();
                return Err(error);
            }
            length += step as u64;
            state.update_running(false, |info| info.entry.done = length);
        }

        writer.end_entry()?;
    }

    if !header.delta_compression.is_compressed()
        && !header.byte_compression.is_compressed()
        && !cursor.eof_data()?
    {
        tracing::warn!("unexpected data at end of {kind_text} entry '{name}'");
    }

    state.update_running(true, |info| info.count_done(header.fragment_size));
    reporter.entry_ok(
        "Convert",
        kind_text,
        &name,
        header.metadata.size,
        Some((header.fragment_offset, header.fragment_size)),
        false,
    );
    cursor.close_entry()?;
    Ok(())
}

fn convert_image_entry(
    cursor: &mut dyn ArchiveCursor,
    state: &JobState,
    writer: &SharedWriter,
    reporter: &ConsoleReporter,
    buffer: &mut [u8],
) -> Result<(), ArchiveError> {
    let header = cursor.read_image_entry()?;
    let name = header.name.clone();

    if header.block_size == 0 || header.block_size > buffer.len() as u64 {
        let _ = cursor.close_entry();
        return Err(ArchiveError::InvalidDeviceBlockSize {
            name,
            block_size: header.block_size,
        });
    }

    state.update_running(false, |info| {
        info.entry.start(&name, header.fragment_size());
    });

    {
        let mut writer = writer.lock();
        writer.begin_image_entry(&header)?;

        let blocks_per_buffer = buffer.len() as u64 / header.block_size;
        let mut blocks_done = 0u64;
        while blocks_done < header.block_count {
            let step_blocks = (header.block_count - blocks_done).min(blocks_per_buffer);
            let step = (step_blocks * header.block_size) as usize;
            if let Err(error) = cursor.read_data(&mut buffer[..step]) {
                reporter.entry_failed("Convert", "image", &name);
                let _ = writer.end_entry();
                let _ = cursor.close_entry();
                return Err(error);
            }
            if let Err(error) = writer.write_data(&buffer[..step]) {
                reporter.entry_failed("Convert", "image", &name);
                let _ = cursor.close_entry();
                return Err(error);
            }
            blocks_done += step_blocks;
            state.update_running(false, |info| info.entry.done += step as u64);
        }

        writer.end_entry()?;
    }

    state.update_running(true, |info| info.count_done(header.fragment_size()));
    reporter.entry_ok(
        "Convert",
        "image",
        &name,
        header.device_size,
        Some((header.fragment_offset(), header.fragment_size())),
        false,
    );
    cursor.close_entry()?;
    Ok(())
}

fn convert_meta_entry(
    cursor: &mut dyn ArchiveCursor,
    state: &JobState,
    overrides: &ConvertOverrides,
    writer: &SharedWriter,
    reporter: &ConsoleReporter,
) -> Result<(), ArchiveError> {
    let mut header = cursor.read_meta_entry()?;

    if let Some(job_uuid) = overrides.job_uuid {
        header.job_uuid = Some(job_uuid);
    }
    if let Some(schedule_uuid) = overrides.schedule_uuid {
        header.schedule_uuid = Some(schedule_uuid);
    }
    if let Some(created_at) = overrides.created_at {
        header.created_at = created_at;
    }
    if let Some(comment) = &overrides.comment {
        header.comment = comment.clone();
    }
    state.update_running(false, |info| info.count_done(0));

    writer.lock().write_meta_entry(&header)?;
    reporter.entry_ok("Convert", "meta", "", 0, None, false);

    if !cursor.eof_data()? {
        tracing::warn!("unexpected data at end of meta entry");
    }
    cursor.close_entry()?;
    Ok(())
}
