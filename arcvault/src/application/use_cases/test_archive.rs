// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Test Archives Use Case
//!
//! Verifies archive integrity without touching any destination: every
//! entry is decoded, its payload streamed and discarded, and its fragment
//! recorded. A file that is still incomplete when every input storage has
//! been processed is reported as `EntryIncomplete`.
//!
//! ## Flow
//!
//! For each input storage name: resolve it (single archive, or a
//! directory scanned with the name pattern), open the archive, pre-verify
//! signatures, then run the entry pipeline against a worker pool. Workers
//! drain the entry queue, each with its own archive cursor.

use std::sync::Arc;

use arcvault_domain::services::archive_service::{ArchiveCursor, ArchiveFormat};
use arcvault_domain::services::storage_service::{Storage, StorageFactory, StorageSpecifier};
use arcvault_domain::value_objects::entry_filter::entry_selected;
use arcvault_domain::{
    ArchiveError, EntryKind, EntrySelector, FileKind, MatchMode, PatternList, SignatureState,
};

use crate::application::commands::{JobMonitor, JobOptions};
use crate::application::services::entry_pipeline::{run_entry_pipeline, verify_archive_signatures, EntryMessage};
use crate::application::services::job_state::JobState;
use crate::application::services::reporter::ConsoleReporter;
use crate::application::services::worker::WorkerCursor;
use crate::infrastructure::runtime::{MessageQueue, WorkerPool};

/// Use case for verifying the integrity of backup archives.
pub struct TestArchives {
    format: Arc<dyn ArchiveFormat>,
    storage_factory: Arc<dyn StorageFactory>,
    reporter: ConsoleReporter,
}

impl TestArchives {
    pub fn new(format: Arc<dyn ArchiveFormat>, storage_factory: Arc<dyn StorageFactory>) -> Self {
        Self {
            format,
            storage_factory,
            reporter: ConsoleReporter::new(false),
        }
    }

    pub fn with_reporter(mut self, reporter: ConsoleReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Tests every archive selected by `storage_names`.
    ///
    /// Returns the first terminal error, `Aborted` when the abort callback
    /// fired, or `Ok` on success.
    pub fn execute(
        &self,
        storage_names: &[String],
        include: &EntrySelector,
        exclude: &PatternList,
        options: &JobOptions,
        monitor: &JobMonitor,
    ) -> Result<(), ArchiveError> {
        let state = Arc::new(JobState::new(monitor.clone()));
        let include = Arc::new(include.clone());
        let exclude = Arc::new(exclude.clone());
        let options = Arc::new(options.clone());

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
                match self.test_archive(&storage, &archive_name, &state, &include, &exclude, &options) {
                    Ok(()) => some_storage_found = true,
                    Err(error) => {
                        tracing::error!("cannot test storage '{}': {error}", storage.printable_name(Some(&archive_name)));
                        state.set_fail_error(error);
                    }
                }
            }
        }

        if !some_storage_found && !storage_names.is_empty() && !state.has_failed() {
            tracing::error!("no matching storage archives found");
            state.set_fail_error(ArchiveError::FileNotFound("no matching storage archives".into()));
        }

        sweep_incomplete_entries(&state, &options, &self.reporter, |_node| {});

        if state.aborted() {
            state.override_fail_error(ArchiveError::Aborted);
        }
        match state.fail_error() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn test_archive(
        &self,
        storage: &Arc<dyn Storage>,
        archive_name: &str,
        state: &Arc<JobState>,
        include: &Arc<EntrySelector>,
        exclude: &Arc<PatternList>,
        options: &Arc<JobOptions>,
    ) -> Result<(), ArchiveError> {
        let printable_name = storage.printable_name(Some(archive_name));
        if !storage.exists(archive_name) {
            return Err(ArchiveError::ArchiveNotFound(printable_name));
        }

        let password = state.monitor().request_password();
        let archive = self.format.open(storage, archive_name, password.as_ref())?;
        let mut signature_state = verify_archive_signatures(&archive, options)?;

        state.update_running(false, |info| info.storage.start(&printable_name, archive.size()));
        self.reporter.storage_begin("Test", &printable_name);

        let queue = Arc::new(MessageQueue::<EntryMessage>::bounded(options.entry_queue_capacity));
        let mut pool = WorkerPool::new("test-worker");
        for _ in 0..options.worker_count() {
            let queue = Arc::clone(&queue);
            let state = Arc::clone(state);
            let include = Arc::clone(include);
            let exclude = Arc::clone(exclude);
            let options = Arc::clone(options);
            let reporter = self.reporter.clone();
            pool.run(move || test_worker(&queue, &state, &include, &exclude, &options, &reporter));
        }

        let pipeline_result = run_entry_pipeline(&archive, &queue, state, options);
        queue.close();
        pool.join_all();

        signature_state = match pipeline_result {
            Ok(streamed_state) => signature_state.combine(streamed_state),
            Err(error) => {
                state.set_fail_error(error);
                signature_state
            }
        };

        state.update_running(true, |info| info.storage.done = archive.size());

        if !signature_state.is_valid() {
            if options.force_verify_signatures {
                state.set_fail_error(ArchiveError::InvalidSignature(printable_name.clone()));
            } else {
                tracing::warn!("invalid signature in '{printable_name}'");
            }
        }

        let ok = !state.has_failed() && signature_state.is_valid();
        self.reporter.storage_summary(&printable_name, ok);
        Ok(())
    }
}

/// Expands a storage specifier into the archive names to process: the
/// named archive, or every file/link in the directory matching the
/// pattern.
pub fn resolve_archive_names(
    specifier: &StorageSpecifier,
    storage: &Arc<dyn Storage>,
    state: &JobState,
) -> Result<Vec<String>, ArchiveError> {
    match (&specifier.archive_name, &specifier.archive_pattern) {
        (Some(name), _) => Ok(vec![name.clone()]),
        (None, Some(pattern)) => {
            let mut names = Vec::new();
            for entry in storage.list_directory()? {
                if state.aborted() {
                    break;
                }
                if !matches!(entry.kind, FileKind::File | FileKind::Symlink) {
                    continue;
                }
                if pattern.is_match(&entry.name, MatchMode::Exact) {
                    names.push(entry.name);
                }
            }
            Ok(names)
        }
        (None, None) => Err(ArchiveError::storage_error(format!(
            "storage '{}' names no archive",
            specifier.printable_name(None)
        ))),
    }
}

/// Reports every incomplete fragment node, calling `on_incomplete` for
/// driver-specific cleanup, and records `EntryIncomplete` as the job error
/// when none is set yet.
pub fn sweep_incomplete_entries<F>(
    state: &JobState,
    options: &JobOptions,
    reporter: &ConsoleReporter,
    mut on_incomplete: F,
) where
    F: FnMut(&arcvault_domain::FragmentNode),
{
    if options.no_fragment_check {
        return;
    }
    let fragments = state.lock_fragments();
    let mut first_incomplete = None;
    for node in fragments.iter() {
        if !node.is_complete() {
            reporter.incomplete_entry(node.name(), node.covered(), node.total_size());
            on_incomplete(node);
            if first_incomplete.is_none() {
                first_incomplete = Some(node.name().to_string());
            }
        }
    }
    drop(fragments);
    if let Some(name) = first_incomplete {
        state.set_fail_error(ArchiveError::EntryIncomplete(name));
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

fn test_worker(
    queue: &MessageQueue<EntryMessage>,
    state: &JobState,
    include: &EntrySelector,
    exclude: &PatternList,
    options: &JobOptions,
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
            .and_then(|cursor| test_entry(cursor, &message, state, include, exclude, options, reporter, &mut buffer));

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

    // discard whatever is still queued so the producer never blocks
    while queue.get().is_some() {}
}

#[allow(clippy::too_many_arguments)]
fn test_entry(
    cursor: &mut dyn ArchiveCursor,
    message: &EntryMessage,
    state: &JobState,
    include: &EntrySelector,
    exclude: &PatternList,
    options: &JobOptions,
    reporter: &ConsoleReporter,
    buffer: &mut [u8],
) -> Result<(), ArchiveError> {
    match message.kind {
        EntryKind::File => test_file_entry(cursor, false, state, include, exclude, options, reporter, buffer),
        EntryKind::HardLink => test_file_entry(cursor, true, state, include, exclude, options, reporter, buffer),
        EntryKind::Image => test_image_entry(cursor, state, include, exclude, options, reporter, buffer),
        EntryKind::Directory => {
            let header = cursor.read_directory_entry()?;
            test_plain_entry(cursor, "directory", &header.name, include, exclude, state, reporter)
        }
        EntryKind::Link => {
            let header = cursor.read_link_entry()?;
            test_plain_entry(cursor, "link", &header.name, include, exclude, state, reporter)
        }
        EntryKind::Special => {
            let header = cursor.read_special_entry()?;
            test_plain_entry(cursor, "special", &header.name, include, exclude, state, reporter)
        }
        EntryKind::Meta => cursor.skip_entry(),
        EntryKind::Signature | EntryKind::Salt | EntryKind::Key => cursor.skip_entry(),
        EntryKind::Unknown => Err(ArchiveError::internal_error("unknown entry kind on entry queue")),
    }
}

#[allow(clippy::too_many_arguments)]
fn test_file_entry(
    cursor: &mut dyn ArchiveCursor,
    hardlink: bool,
    state: &JobState,
    include: &EntrySelector,
    exclude: &PatternList,
    options: &JobOptions,
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

    if entry_selected(include, exclude, &name) {
        state.update_running(false, |info| {
            info.entry.start(&name, header.fragment_offset + header.fragment_size);
        });

        // stream the payload, discarding the bytes
        let mut length = 0u64;
        while !state.aborted() && length < header.fragment_size {
            let step = (header.fragment_size - length).min(buffer.len() as u64) as usize;
            if let Err(error) = cursor.read_data(&mut buffer[..step]) {
                reporter.entry_failed("Test", kind_text, &name);
                let _ = cursor.close_entry();
                return Err(error);
            }
            length += step as u64;
            state.update_running(false, |info| {
                info.entry.done = header.fragment_offset + length;
            });
        }
        if state.aborted() {
            let _ = cursor.close_entry();
            return Err(ArchiveError::Aborted);
        }

        if !options.no_fragment_check {
            let mut fragments = state.lock_fragments();
            let node = fragments.add(&name, header.metadata.size, Vec::new(), 0);
            node.add_range(header.fragment_offset, header.fragment_size);
            if node.is_complete() {
                fragments.discard(&name);
            }
        }

        // with both compressions off the payload stream must end exactly
        // at the fragment boundary
        if !header.delta_compression.is_compressed()
            && !header.byte_compression.is_compressed()
            && !cursor.eof_data()?
        {
            reporter.entry_failed("Test", kind_text, &name);
            let _ = cursor.close_entry();
            return Err(ArchiveError::CorruptData(name));
        }

        state.update_running(true, |info| {
            info.entry.done = header.fragment_offset + header.fragment_size;
            info.count_done(header.metadata.size);
        });
        reporter.entry_ok(
            "Test",
            kind_text,
            &name,
            header.metadata.size,
            Some((header.fragment_offset, header.fragment_size)),
            false,
        );
    } else {
        reporter.entry_skipped("Test", kind_text, &name, "excluded");
        state.update_running(false, |info| info.count_skipped(header.metadata.size));
    }

    cursor.close_entry()?;
    Ok(())
}

fn test_image_entry(
    cursor: &mut dyn ArchiveCursor,
    state: &JobState,
    include: &EntrySelector,
    exclude: &PatternList,
    options: &JobOptions,
    reporter: &ConsoleReporter,
    buffer: &mut [u8],
) -> Result<(), ArchiveError> {
    let header = cursor.read_image_entry()?;
    let name = header.name.clone();

    if entry_selected(include, exclude, &name) {
        if header.block_size == 0 || header.block_size > buffer.len() as u64 {
            let _ = cursor.close_entry();
            return Err(ArchiveError::InvalidDeviceBlockSize {
                name,
                block_size: header.block_size,
            });
        }

        state.update_running(false, |info| {
            info.entry.start(&name, header.fragment_offset() + header.fragment_size());
        });

        let blocks_per_buffer = buffer.len() as u64 / header.block_size;
        let mut blocks_read = 0u64;
        while !state.aborted() && blocks_read < header.block_count {
            let step_blocks = (header.block_count - blocks_read).min(blocks_per_buffer);
            let step = (step_blocks * header.block_size) as usize;
            if let Err(error) = cursor.read_data(&mut buffer[..step]) {
                reporter.entry_failed("Test", "image", &name);
                let _ = cursor.close_entry();
                return Err(error);
            }
            blocks_read += step_blocks;
            state.update_running(false, |info| {
                info.entry.done = header.fragment_offset() + blocks_read * header.block_size;
            });
        }
        if state.aborted() {
            let _ = cursor.close_entry();
            return Err(ArchiveError::Aborted);
        }

        if !options.no_fragment_check {
            let mut fragments = state.lock_fragments();
            let node = fragments.add(&name, header.device_size, Vec::new(), 0);
            node.add_range(header.fragment_offset(), header.fragment_size());
            if node.is_complete() {
                fragments.discard(&name);
            }
        }

        state.update_running(true, |info| {
            info.entry.done = header.fragment_offset() + header.fragment_size();
            info.count_done(header.fragment_size());
        });
        reporter.entry_ok(
            "Test",
            "image",
            &name,
            header.device_size,
            Some((header.fragment_offset(), header.fragment_size())),
            false,
        );
    } else {
        reporter.entry_skipped("Test", "image", &name, "excluded");
        state.update_running(false, |info| info.count_skipped(header.fragment_size()));
    }

    cursor.close_entry()?;
    Ok(())
}

fn test_plain_entry(
    cursor: &mut dyn ArchiveCursor,
    kind_text: &str,
    name: &str,
    include: &EntrySelector,
    exclude: &PatternList,
    state: &JobState,
    reporter: &ConsoleReporter,
) -> Result<(), ArchiveError> {
    if entry_selected(include, exclude, name) {
        state.update_running(true, |info| {
            info.entry.start(name, 0);
            info.count_done(0);
        });
        reporter.entry_ok("Test", kind_text, name, 0, None, false);
    } else {
        reporter.entry_skipped("Test", kind_text, name, "excluded");
        state.update_running(false, |info| info.count_skipped(0));
    }
    cursor.close_entry()?;
    Ok(())
}
