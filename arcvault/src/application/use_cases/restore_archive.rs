// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Restore Archives Use Case
//!
//! Reconstructs files, directories, links, special nodes and device
//! images from archive entries. Workers restore fragments out of order
//! into independently opened destination files; the fragment map decides
//! when an entity is complete and final metadata (ownership, permissions,
//! timestamps, extended attributes) may be applied.
//!
//! ## Collisions
//!
//! A destination path is contested when it exists on disk or when another
//! entry of this run already reserved it. The conflict policy decides:
//! stop with `FileExists`, rename to a unique sibling, overwrite, or skip
//! the entry. Fragment-level collisions (the same byte range restored
//! twice) run through the same policy.
//!
//! ## Downgrades
//!
//! Ownership, permission and attribute failures degrade to warnings under
//! the matching `no_stop_on_*` flags and on network filesystems, so a
//! restore onto NFS does not die on the first `chown`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arcvault_domain::services::archive_service::{ArchiveCursor, ArchiveFormat};
use arcvault_domain::services::file_service::{FileMetadata, FileSystem};
use arcvault_domain::services::storage_service::{Storage, StorageFactory, StorageSpecifier};
use arcvault_domain::value_objects::entry_filter::entry_selected;
use arcvault_domain::{ArchiveError, ConflictPolicy, EntryKind, EntrySelector, PatternList};

use crate::application::commands::{JobMonitor, JobOptions};
use crate::application::services::entry_pipeline::{run_entry_pipeline, verify_archive_signatures, EntryMessage};
use crate::application::services::job_state::JobState;
use crate::application::services::reporter::ConsoleReporter;
use crate::application::services::worker::{split_extension, WorkerCursor};
use crate::application::use_cases::test_archive::{resolve_archive_names, sweep_incomplete_entries};
use crate::infrastructure::runtime::{MessageQueue, WorkerPool};

/// Use case for restoring archive contents onto a filesystem.
pub struct RestoreArchives {
    format: Arc<dyn ArchiveFormat>,
    storage_factory: Arc<dyn StorageFactory>,
    filesystem: Arc<dyn FileSystem>,
    reporter: ConsoleReporter,
}

impl RestoreArchives {
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

    /// Restores every archive selected by `storage_names`.
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
                match self.restore_archive(&storage, &archive_name, &state, &include, &exclude, &options) {
                    Ok(()) => some_storage_found = true,
                    Err(error) => {
                        tracing::error!(
                            "cannot restore storage '{}': {error}",
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

        // Incomplete entries still get the metadata captured at first
        // sight, so a partial file is not left owned by root with mode 600.
        let filesystem = Arc::clone(&self.filesystem);
        let sweep_options = Arc::clone(&options);
        sweep_incomplete_entries(&state, &options, &self.reporter, |node| {
            if sweep_options.dry_run {
                return;
            }
            let Ok(metadata) = serde_json::from_slice::<FileMetadata>(node.user_data()) else {
                return;
            };
            let destination = destination_path(
                node.name(),
                sweep_options.destination.as_deref(),
                sweep_options.directory_strip_count,
            );
            if filesystem.exists(&destination) {
                apply_metadata_best_effort(filesystem.as_ref(), &destination, &metadata, &sweep_options);
            }
        });

        if state.aborted() {
            state.override_fail_error(ArchiveError::Aborted);
        }
        match state.fail_error() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn restore_archive(
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
        verify_archive_signatures(&archive, options)?;

        state.update_running(false, |info| info.storage.start(&printable_name, archive.size()));
        self.reporter.storage_begin("Restore", &printable_name);

        let queue = Arc::new(MessageQueue::<EntryMessage>::bounded(options.entry_queue_capacity));
        let mut pool = WorkerPool::new("restore-worker");
        for _ in 0..options.worker_count() {
            let queue = Arc::clone(&queue);
            let state = Arc::clone(state);
            let include = Arc::clone(include);
            let exclude = Arc::clone(exclude);
            let options = Arc::clone(options);
            let filesystem = Arc::clone(&self.filesystem);
            let reporter = self.reporter.clone();
            let storage_name = printable_name.clone();
            pool.run(move || {
                restore_worker(&queue, &state, &include, &exclude, &options, &filesystem, &reporter, &storage_name)
            });
        }

        let pipeline_result = run_entry_pipeline(&archive, &queue, state, options);
        queue.close();
        pool.join_all();

        if let Err(error) = pipeline_result {
            state.set_fail_error(error);
        }

        state.update_running(true, |info| info.storage.done = archive.size());
        self.reporter.storage_summary(&printable_name, !state.has_failed());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Destination helpers
// ---------------------------------------------------------------------------

/// Maps an archive entry name onto the destination filesystem: strip the
/// first `strip` path components, then root the rest under `destination`.
pub fn destination_path(entry_name: &str, destination: Option<&Path>, strip: usize) -> PathBuf {
    match destination {
        Some(destination) => {
            let relative: PathBuf = Path::new(entry_name)
                .components()
                .filter(|component| matches!(component, std::path::Component::Normal(_)))
                .skip(strip)
                .collect();
            destination.join(relative)
        }
        None if strip == 0 => PathBuf::from(entry_name),
        None => {
            let stripped: PathBuf = Path::new(entry_name)
                .components()
                .filter(|component| matches!(component, std::path::Component::Normal(_)))
                .skip(strip)
                .collect();
            stripped
        }
    }
}

/// Registers all ancestors in the name registry and creates the missing
/// ones, propagating ownership.
fn create_parent_directories(
    state: &JobState,
    filesystem: &dyn FileSystem,
    destination: &Path,
    user_id: u32,
    group_id: u32,
) -> Result<(), ArchiveError> {
    let Some(parent) = destination.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    {
        let mut names = state.lock_names();
        let mut ancestor = parent;
        loop {
            names.insert(ancestor);
            match ancestor.parent() {
                Some(next) if !next.as_os_str().is_empty() => ancestor = next,
                _ => break,
            }
        }
    }

    if !filesystem.exists(parent) {
        filesystem.make_directory(parent, 0o755)?;
        filesystem.set_owner(parent, user_id, group_id)?;
    }
    Ok(())
}

/// Resolved ownership for a destination: the job override, or the
/// archived owner.
fn resolved_owner(metadata: &FileMetadata, options: &JobOptions) -> (u32, u32) {
    options.owner.unwrap_or((metadata.user_id, metadata.group_id))
}

fn resolved_permissions(metadata: &FileMetadata, options: &JobOptions) -> u32 {
    options.permissions.unwrap_or(metadata.permissions)
}

/// Applies final metadata with the per-class downgrade rules. Returns the
/// first error that is not downgraded.
fn apply_entry_metadata(
    filesystem: &dyn FileSystem,
    destination: &Path,
    metadata: &FileMetadata,
    options: &JobOptions,
    state: &JobState,
    storage_name: &str,
) -> Result<(), ArchiveError> {
    let on_network_fs = filesystem.is_network_filesystem(destination);
    let destination_text = destination.display().to_string();

    // timestamps and permissions
    let info_result = filesystem
        .set_timestamps(destination, metadata.modified, metadata.accessed)
        .and_then(|()| filesystem.set_permissions(destination, resolved_permissions(metadata, options)));
    if let Err(error) = info_result {
        if !options.no_stop_on_error && !on_network_fs {
            if let Some(error) = state.handle_error(storage_name, Some(&destination_text), error) {
                return Err(error);
            }
        } else {
            tracing::warn!("cannot set file info of '{destination_text}': {error}");
        }
    }

    // ownership
    let (user_id, group_id) = resolved_owner(metadata, options);
    if let Err(error) = filesystem.set_owner(destination, user_id, group_id) {
        if !options.no_stop_on_owner_error && !on_network_fs {
            if let Some(error) = state.handle_error(storage_name, Some(&destination_text), error) {
                return Err(error);
            }
        } else {
            tracing::warn!("cannot set owner/group of '{destination_text}': {error}");
        }
    }

    // extended attributes
    if let Err(error) = filesystem.set_attributes(destination, &metadata.attributes) {
        if !options.no_stop_on_attribute_error && !on_network_fs {
            if let Some(error) = state.handle_error(storage_name, Some(&destination_text), error) {
                return Err(error);
            }
        } else {
            tracing::warn!("cannot set attributes of '{destination_text}': {error}");
        }
    }

    Ok(())
}

/// Sweep-time variant: everything downgrades to warnings.
fn apply_metadata_best_effort(
    filesystem: &dyn FileSystem,
    destination: &Path,
    metadata: &FileMetadata,
    options: &JobOptions,
) {
    if let Err(error) = filesystem.set_timestamps(destination, metadata.modified, metadata.accessed) {
        tracing::warn!("cannot set file info of '{}': {error}", destination.display());
    }
    if let Err(error) = filesystem.set_permissions(destination, resolved_permissions(metadata, options)) {
        tracing::warn!("cannot set permissions of '{}': {error}", destination.display());
    }
    let (user_id, group_id) = resolved_owner(metadata, options);
    if let Err(error) = filesystem.set_owner(destination, user_id, group_id) {
        tracing::warn!("cannot set owner/group of '{}': {error}", destination.display());
    }
}

// ---------------------------------------------------------------------------
// Collision handling
// ---------------------------------------------------------------------------

enum Collision {
    /// Write to this (possibly renamed) destination.
    Proceed(PathBuf),
    /// Skip the entry, reporting success.
    Skip(&'static str),
    /// Stop-policy hit; the caller routes `FileExists` through the error
    /// handler.
    Stop(PathBuf),
}

/// Destination-name collision check under the name-registry lock.
///
/// A name already reserved by this run is *not* re-contested: further
/// fragments of the same entity legitimately share the destination, and
/// duplicate ranges are caught by the fragment check.
fn check_name_collision(
    state: &JobState,
    filesystem: &dyn FileSystem,
    options: &JobOptions,
    destination: PathBuf,
    truncate_on_overwrite: bool,
) -> Result<Collision, ArchiveError> {
    let mut names = state.lock_names();
    if names.contains(&destination) {
        return Ok(Collision::Proceed(destination));
    }

    let mut destination = destination;
    if filesystem.exists(&destination) {
        match options.conflict_policy {
            ConflictPolicy::Stop => return Ok(Collision::Stop(destination)),
            ConflictPolicy::Rename => {
                // the contested name stays reserved too, so a later entry
                // for it goes straight to its own numbered sibling
                names.insert(&destination);
                destination = unique_on_disk(&destination, filesystem, &names);
            }
            ConflictPolicy::Overwrite => {
                if truncate_on_overwrite && !options.dry_run {
                    filesystem.truncate_create(&destination)?;
                }
            }
            ConflictPolicy::SkipExisting => return Ok(Collision::Skip("file exists")),
        }
    }

    names.insert(&destination);
    Ok(Collision::Proceed(destination))
}

/// Rename target search usable while the names lock is already held.
fn unique_on_disk(
    destination: &Path,
    filesystem: &dyn FileSystem,
    names: &arcvault_domain::NameRegistry,
) -> PathBuf {
    let taken = |candidate: &Path| filesystem.exists(candidate) || names.contains(candidate);
    let text = destination.to_string_lossy();
    let (stem, extension) = split_extension(&text);
    let mut counter = 0u32;
    loop {
        let candidate = PathBuf::from(format!("{stem}-{counter}{extension}"));
        if !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Fragment-range collision check under the fragment-map lock; creates the
/// tracking node on first sight, capturing the entry metadata as user
/// data.
fn check_fragment_collision(
    state: &JobState,
    filesystem: &dyn FileSystem,
    options: &JobOptions,
    entry_name: &str,
    metadata: &FileMetadata,
    fragment_offset: u64,
    fragment_size: u64,
    destination: PathBuf,
) -> Result<Collision, ArchiveError> {
    if options.no_fragment_check {
        return Ok(Collision::Proceed(destination));
    }
    let mut fragments = state.lock_fragments();
    match fragments.find_mut(entry_name) {
        Some(node) => {
            if node.range_exists(fragment_offset, fragment_size) {
                match options.conflict_policy {
                    ConflictPolicy::Stop => return Ok(Collision::Stop(destination)),
                    ConflictPolicy::Rename => {
                        // on-disk uniqueness only: the names lock is not
                        // taken while the fragment lock is held
                        let text = destination.to_string_lossy();
                        let (stem, extension) = split_extension(&text);
                        let mut counter = 0u32;
                        let renamed = loop {
                            let candidate = PathBuf::from(format!("{stem}-{counter}{extension}"));
                            if !filesystem.exists(&candidate) {
                                break candidate;
                            }
                            counter += 1;
                        };
                        return Ok(Collision::Proceed(renamed));
                    }
                    ConflictPolicy::Overwrite => {}
                    ConflictPolicy::SkipExisting => return Ok(Collision::Skip("file part exists")),
                }
            }
        }
        None => {
            let user_data = serde_json::to_vec(metadata).unwrap_or_default();
            fragments.add(entry_name, metadata.size, user_data, 0);
        }
    }
    Ok(Collision::Proceed(destination))
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn restore_worker(
    queue: &MessageQueue<EntryMessage>,
    state: &JobState,
    include: &EntrySelector,
    exclude: &PatternList,
    options: &JobOptions,
    filesystem: &Arc<dyn FileSystem>,
    reporter: &ConsoleReporter,
    storage_name: &str,
) {
    let mut buffer = vec![0u8; options.buffer_size];
    let mut worker_cursor = WorkerCursor::new();
    let context = RestoreContext {
        state,
        include,
        exclude,
        options,
        filesystem: filesystem.as_ref(),
        reporter,
        storage_name,
    };

    while !state.aborted() {
        let Some(message) = queue.get() else {
            break;
        };
        if !state.should_continue(options.no_stop_on_error) {
            continue;
        }

        let result = worker_cursor
            .prepare(&message)
            .and_then(|cursor| restore_entry(cursor, &message, &context, &mut buffer));

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

struct RestoreContext<'a> {
    state: &'a JobState,
    include: &'a EntrySelector,
    exclude: &'a PatternList,
    options: &'a JobOptions,
    filesystem: &'a dyn FileSystem,
    reporter: &'a ConsoleReporter,
    storage_name: &'a str,
}

impl RestoreContext<'_> {
    /// Routes a per-entry error through the handler; `Ok` means the job
    /// may continue (downgraded or tolerated), `Err` stops it.
    fn fail_entry(&self, destination: Option<&Path>, error: ArchiveError) -> Result<(), ArchiveError> {
        let destination_text = destination.map(|path| path.display().to_string());
        match self.state.handle_error(self.storage_name, destination_text.as_deref(), error) {
            None => Ok(()),
            Some(error) => {
                if self.options.no_stop_on_error {
                    Ok(())
                } else {
                    Err(error)
                }
            }
        }
    }
}

fn restore_entry(
    cursor: &mut dyn ArchiveCursor,
    message: &EntryMessage,
    context: &RestoreContext<'_>,
    buffer: &mut [u8],
) -> Result<(), ArchiveError> {
    match message.kind {
        EntryKind::File => restore_file_entry(cursor, false, context, buffer),
        EntryKind::HardLink => restore_file_entry(cursor, true, context, buffer),
        EntryKind::Image => restore_image_entry(cursor, context, buffer),
        EntryKind::Directory => restore_directory_entry(cursor, context),
        EntryKind::Link => restore_link_entry(cursor, context),
        EntryKind::Special => restore_special_entry(cursor, context),
        EntryKind::Meta => cursor.skip_entry(),
        EntryKind::Signature | EntryKind::Salt | EntryKind::Key => cursor.skip_entry(),
        EntryKind::Unknown => Err(ArchiveError::internal_error("unknown entry kind on entry queue")),
    }
}

fn restore_file_entry(
    cursor: &mut dyn ArchiveCursor,
    hardlink: bool,
    context: &RestoreContext<'_>,
    buffer: &mut [u8],
) -> Result<(), ArchiveError> {
    let kind_text = if hardlink { "hardlink" } else { "file" };
    let header = if hardlink {
        cursor.read_hardlink_entry()?
    } else {
        cursor.read_file_entry()?
    };
    let name = header.name().to_string();
    let options = context.options;
    let state = context.state;
    let filesystem = context.filesystem;

    if !entry_selected(context.include, context.exclude, &name) {
        context.reporter.entry_skipped("Restore", kind_text, &name, "excluded");
        state.update_running(false, |info| info.count_skipped(header.metadata.size));
        cursor.close_entry()?;
        return Ok(());
    }

    let destination = destination_path(&name, options.destination.as_deref(), options.directory_strip_count);
    state.update_running(true, |info| {
        info.entry.start(&destination.display().to_string(), header.fragment_size);
    });

    // destination name collision
    let destination =
        match check_name_collision(state, filesystem, options, destination, true)? {
            Collision::Proceed(destination) => destination,
            Collision::Skip(reason) => {
                context.reporter.entry_skipped("Restore", kind_text, &name, reason);
                cursor.close_entry()?;
                return Ok(());
            }
            Collision::Stop(destination) => {
                context
                    .reporter
                    .entry_stopped("Restore", kind_text, &destination.display().to_string(), "file exists");
                let result = context.fail_entry(
                    Some(&destination),
                    ArchiveError::FileExists(destination.display().to_string()),
                );
                cursor.close_entry()?;
                return result;
            }
        };

    // fragment collision
    let destination = match check_fragment_collision(
        state,
        filesystem,
        options,
        &name,
        &header.metadata,
        header.fragment_offset,
        header.fragment_size,
        destination,
    )? {
        Collision::Proceed(destination) => destination,
        Collision::Skip(reason) => {
            context.reporter.entry_skipped("Restore", kind_text, &name, reason);
            cursor.close_entry()?;
            return Ok(());
        }
        Collision::Stop(destination) => {
            context
                .reporter
                .entry_stopped("Restore", kind_text, &destination.display().to_string(), "file part exists");
            let result = context.fail_entry(
                Some(&destination),
                ArchiveError::FileExists(destination.display().to_string()),
            );
            cursor.close_entry()?;
            return result;
        }
    };

    // parent directories
    if !options.dry_run {
        let (user_id, group_id) = resolved_owner(&header.metadata, options);
        if let Err(error) = create_parent_directories(state, filesystem, &destination, user_id, group_id) {
            if !options.no_stop_on_error {
                context.reporter.entry_failed("Restore", kind_text, &name);
                let result = context.fail_entry(Some(&destination), error);
                cursor.close_entry()?;
                return result;
            }
            tracing::warn!(
                "cannot create parent directory for '{}': {error}",
                destination.display()
            );
        }
    }

    // open the destination
    let mut writer = if !options.dry_run {
        if filesystem.exists(&destination) {
            // temporarily widen access so an earlier restrictive restore
            // cannot block this fragment (errors intentionally ignored)
            let _ = filesystem.set_permissions(&destination, 0o600);
            let _ = filesystem.set_owner(
                &destination,
                arcvault_bootstrap::platform::effective_user_id(),
                arcvault_bootstrap::platform::effective_group_id(),
            );
        }
        let mut writer = match filesystem.open_write(&destination, options.sparse_files) {
            Ok(writer) => writer,
            Err(error) => {
                context.reporter.entry_failed("Restore", kind_text, &name);
                let result = context.fail_entry(Some(&destination), error);
                cursor.close_entry()?;
                return result;
            }
        };
        if options.sparse_files {
            writer.truncate(header.metadata.size)?;
        }
        writer.seek(header.fragment_offset)?;
        Some(writer)
    } else {
        None
    };

    // stream the fragment payload
    let mut length = 0u64;
    let mut stream_error = None;
    while !state.aborted() && length < header.fragment_size {
        state.wait_while_paused();
        let step = (header.fragment_size - length).min(buffer.len() as u64) as usize;
        if let Err(error) = cursor.read_data(&mut buffer[..step]) {
            stream_error = Some(error);
            break;
        }
        if let Some(writer) = writer.as_mut() {
            if let Err(error) = writer.write_all(&buffer[..step]) {
                stream_error = Some(error);
                break;
            }
        }
        length += step as u64;
        state.update_running(false, |info| info.entry.done += step as u64);
    }
    if let Some(error) = stream_error {
        context.reporter.entry_failed("Restore", kind_text, &name);
        let result = context.fail_entry(Some(&destination), error);
        cursor.close_entry()?;
        return result;
    }
    if state.aborted() {
        cursor.close_entry()?;
        return Err(ArchiveError::Aborted);
    }

    // out-of-order fragments may have pushed the file past its real size
    if let Some(writer) = writer.as_mut() {
        if writer.size()? > header.metadata.size {
            writer.truncate(header.metadata.size)?;
        }
        if let Err(error) = writer.close() {
            context.reporter.entry_failed("Restore", kind_text, &name);
            return context.fail_entry(Some(&destination), error).and_then(|()| cursor.close_entry());
        }
    }

    // record the fragment; apply metadata once the entity is complete
    let is_complete = if options.no_fragment_check {
        true
    } else {
        let mut fragments = state.lock_fragments();
        match fragments.find_mut(&name) {
            Some(node) => {
                node.add_range(header.fragment_offset, header.fragment_size);
                if node.is_complete() {
                    fragments.discard(&name);
                    true
                } else {
                    false
                }
            }
            None => true,
        }
    };

    if is_complete && !options.dry_run {
        apply_entry_metadata(filesystem, &destination, &header.metadata, options, state, context.storage_name)?;
    }

    if !header.delta_compression.is_compressed()
        && !header.byte_compression.is_compressed()
        && !cursor.eof_data()?
    {
        tracing::warn!("unexpected data at end of {kind_text} entry '{name}'");
    }

    state.update_running(true, |info| {
        info.count_done(header.fragment_size);
    });
    context.reporter.entry_ok(
        "Restore",
        kind_text,
        &destination.display().to_string(),
        header.metadata.size,
        Some((header.fragment_offset, header.fragment_size)),
        options.dry_run,
    );

    // remaining hardlink names become links to the restored target
    if hardlink {
        for link_name in header.names.iter().skip(1) {
            let link_destination =
                destination_path(link_name, options.destination.as_deref(), options.directory_strip_count);
            match check_name_collision(state, filesystem, options, link_destination, false)? {
                Collision::Proceed(link_destination) => {
                    if !options.dry_run {
                        if filesystem.exists(&link_destination) {
                            let _ = filesystem.delete(&link_destination);
                        }
                        if let Err(error) = filesystem.make_hardlink(&destination, &link_destination) {
                            context
                                .reporter
                                .entry_failed("Restore", "hardlink", &link_destination.display().to_string());
                            let result = context.fail_entry(Some(&link_destination), error);
                            if result.is_err() {
                                cursor.close_entry()?;
                                return result;
                            }
                            continue;
                        }
                    }
                    context.reporter.entry_ok(
                        "Restore",
                        "hardlink",
                        &link_destination.display().to_string(),
                        header.metadata.size,
                        None,
                        options.dry_run,
                    );
                }
                Collision::Skip(reason) => {
                    context
                        .reporter
                        .entry_skipped("Restore", "hardlink", link_name, reason);
                }
                Collision::Stop(link_destination) => {
                    context.reporter.entry_stopped(
                        "Restore",
                        "hardlink",
                        &link_destination.display().to_string(),
                        "file exists",
                    );
                    let result = context.fail_entry(
                        Some(&link_destination),
                        ArchiveError::FileExists(link_destination.display().to_string()),
                    );
                    if result.is_err() {
                        cursor.close_entry()?;
                        return result;
                    }
                }
            }
        }
    }

    cursor.close_entry()?;
    Ok(())
}

fn restore_image_entry(
    cursor: &mut dyn ArchiveCursor,
    context: &RestoreContext<'_>,
    buffer: &mut [u8],
) -> Result<(), ArchiveError> {
    let header = cursor.read_image_entry()?;
    let name = header.name.clone();
    let options = context.options;
    let state = context.state;
    let filesystem = context.filesystem;

    if !entry_selected(context.include, context.exclude, &name) {
        context.reporter.entry_skipped("Restore", "image", &name, "excluded");
        state.update_running(false, |info| info.count_skipped(header.fragment_size()));
        cursor.close_entry()?;
        return Ok(());
    }

    if header.block_size == 0 || header.block_size > buffer.len() as u64 {
        let _ = cursor.close_entry();
        return Err(ArchiveError::InvalidDeviceBlockSize {
            name,
            block_size: header.block_size,
        });
    }

    let destination = destination_path(&name, options.destination.as_deref(), options.directory_strip_count);
    state.update_running(true, |info| {
        info.entry.start(&destination.display().to_string(), header.fragment_size());
    });

    // a real device target is written in place; a regular file target runs
    // through the collision rules like any file
    let destination = if filesystem.is_device(&destination) {
        destination
    } else {
        match check_name_collision(state, filesystem, options, destination, false)? {
            Collision::Proceed(destination) => destination,
            Collision::Skip(reason) => {
                context.reporter.entry_skipped("Restore", "image", &name, reason);
                cursor.close_entry()?;
                return Ok(());
            }
            Collision::Stop(destination) => {
                context
                    .reporter
                    .entry_stopped("Restore", "image", &destination.display().to_string(), "file exists");
                let result = context.fail_entry(
                    Some(&destination),
                    ArchiveError::FileExists(destination.display().to_string()),
                );
                cursor.close_entry()?;
                return result;
            }
        }
    };

    let destination = match check_fragment_collision(
        state,
        filesystem,
        options,
        &name,
        &FileMetadata::regular(header.device_size),
        header.fragment_offset(),
        header.fragment_size(),
        destination,
    )? {
        Collision::Proceed(destination) => destination,
        Collision::Skip(reason) => {
            context.reporter.entry_skipped("Restore", "image", &name, reason);
            cursor.close_entry()?;
            return Ok(());
        }
        Collision::Stop(destination) => {
            context
                .reporter
                .entry_stopped("Restore", "image", &destination.display().to_string(), "image part exists");
            let result = context.fail_entry(
                Some(&destination),
                ArchiveError::FileExists(destination.display().to_string()),
            );
            cursor.close_entry()?;
            return result;
        }
    };

    let mut writer = if !options.dry_run {
        match filesystem.open_write(&destination, false) {
            Ok(mut writer) => {
                writer.seek(header.fragment_offset())?;
                Some(writer)
            }
            Err(error) => {
                context.reporter.entry_failed("Restore", "image", &name);
                let result = context.fail_entry(Some(&destination), error);
                cursor.close_entry()?;
                return result;
            }
        }
    } else {
        None
    };

    let blocks_per_buffer = buffer.len() as u64 / header.block_size;
    let mut blocks_done = 0u64;
    let mut stream_error = None;
    while !state.aborted() && blocks_done < header.block_count {
        state.wait_while_paused();
        let step_blocks = (header.block_count - blocks_done).min(blocks_per_buffer);
        let step = (step_blocks * header.block_size) as usize;
        if let Err(error) = cursor.read_data(&mut buffer[..step]) {
            stream_error = Some(error);
            break;
        }
        if let Some(writer) = writer.as_mut() {
            if let Err(error) = writer.write_all(&buffer[..step]) {
                stream_error = Some(error);
                break;
            }
        }
        blocks_done += step_blocks;
        state.update_running(false, |info| info.entry.done += step as u64);
    }
    if let Some(error) = stream_error {
        context.reporter.entry_failed("Restore", "image", &name);
        let result = context.fail_entry(Some(&destination), error);
        cursor.close_entry()?;
        return result;
    }
    if state.aborted() {
        cursor.close_entry()?;
        return Err(ArchiveError::Aborted);
    }

    if let Some(writer) = writer.as_mut() {
        writer.close()?;
    }

    if !options.no_fragment_check {
        let mut fragments = state.lock_fragments();
        if let Some(node) = fragments.find_mut(&name) {
            node.add_range(header.fragment_offset(), header.fragment_size());
            if node.is_complete() {
                fragments.discard(&name);
            }
        }
    }

    state.update_running(true, |info| info.count_done(header.fragment_size()));
    context.reporter.entry_ok(
        "Restore",
        "image",
        &destination.display().to_string(),
        header.device_size,
        Some((header.fragment_offset(), header.fragment_size())),
        options.dry_run,
    );
    cursor.close_entry()?;
    Ok(())
}

fn restore_directory_entry(cursor: &mut dyn ArchiveCursor, context: &RestoreContext<'_>) -> Result<(), ArchiveError> {
    let header = cursor.read_directory_entry()?;
    let name = header.name.clone();
    let options = context.options;
    let state = context.state;
    let filesystem = context.filesystem;

    if !entry_selected(context.include, context.exclude, &name) {
        context.reporter.entry_skipped("Restore", "directory", &name, "excluded");
        state.update_running(false, |info| info.count_skipped(0));
        cursor.close_entry()?;
        return Ok(());
    }

    let destination = destination_path(&name, options.destination.as_deref(), options.directory_strip_count);

    // an existing directory is merged into, never contested
    state.lock_names().insert(&destination);

    if !options.dry_run {
        if !filesystem.exists(&destination) {
            if let Err(error) = filesystem.make_directory(&destination, resolved_permissions(&header.metadata, options)) {
                context.reporter.entry_failed("Restore", "directory", &name);
                let result = context.fail_entry(Some(&destination), error);
                cursor.close_entry()?;
                return result;
            }
        }
        apply_entry_metadata(filesystem, &destination, &header.metadata, options, state, context.storage_name)?;
    }

    state.update_running(true, |info| info.count_done(0));
    context.reporter.entry_ok(
        "Restore",
        "directory",
        &destination.display().to_string(),
        0,
        None,
        options.dry_run,
    );
    cursor.close_entry()?;
    Ok(())
}

fn restore_link_entry(cursor: &mut dyn ArchiveCursor, context: &RestoreContext<'_>) -> Result<(), ArchiveError> {
    let header = cursor.read_link_entry()?;
    let name = header.name.clone();
    let options = context.options;
    let state = context.state;
    let filesystem = context.filesystem;

    if !entry_selected(context.include, context.exclude, &name) {
        context.reporter.entry_skipped("Restore", "link", &name, "excluded");
        state.update_running(false, |info| info.count_skipped(0));
        cursor.close_entry()?;
        return Ok(());
    }

    let destination = destination_path(&name, options.destination.as_deref(), options.directory_strip_count);
    let destination = match check_name_collision(state, filesystem, options, destination, false)? {
        Collision::Proceed(destination) => destination,
        Collision::Skip(reason) => {
            context.reporter.entry_skipped("Restore", "link", &name, reason);
            cursor.close_entry()?;
            return Ok(());
        }
        Collision::Stop(destination) => {
            context
                .reporter
                .entry_stopped("Restore", "link", &destination.display().to_string(), "file exists");
            let result = context.fail_entry(
                Some(&destination),
                ArchiveError::FileExists(destination.display().to_string()),
            );
            cursor.close_entry()?;
            return result;
        }
    };

    if !options.dry_run {
        let (user_id, group_id) = resolved_owner(&header.metadata, options);
        if let Err(error) = create_parent_directories(state, filesystem, &destination, user_id, group_id) {
            tracing::warn!("cannot create parent directory for '{}': {error}", destination.display());
        }
        if filesystem.exists(&destination) && options.conflict_policy == ConflictPolicy::Overwrite {
            let _ = filesystem.delete(&destination);
        }
        if let Err(error) = filesystem.make_symlink(Path::new(&header.target), &destination) {
            context.reporter.entry_failed("Restore", "link", &name);
            let result = context.fail_entry(Some(&destination), error);
            cursor.close_entry()?;
            return result;
        }
    }

    state.update_running(true, |info| info.count_done(0));
    context.reporter.entry_ok(
        "Restore",
        "link",
        &destination.display().to_string(),
        0,
        None,
        options.dry_run,
    );
    cursor.close_entry()?;
    Ok(())
}

fn restore_special_entry(cursor: &mut dyn ArchiveCursor, context: &RestoreContext<'_>) -> Result<(), ArchiveError> {
    let header = cursor.read_special_entry()?;
    let name = header.name.clone();
    let options = context.options;
    let state = context.state;
    let filesystem = context.filesystem;

    if !entry_selected(context.include, context.exclude, &name) {
        context.reporter.entry_skipped("Restore", "special", &name, "excluded");
        state.update_running(false, |info| info.count_skipped(0));
        cursor.close_entry()?;
        return Ok(());
    }

    let Some(special_kind) = header.metadata.special else {
        let _ = cursor.close_entry();
        return Err(ArchiveError::CorruptData(format!(
            "special entry '{name}' carries no node type"
        )));
    };

    let destination = destination_path(&name, options.destination.as_deref(), options.directory_strip_count);
    let destination = match check_name_collision(state, filesystem, options, destination, false)? {
        Collision::Proceed(destination) => destination,
        Collision::Skip(reason) => {
            context.reporter.entry_skipped("Restore", "special", &name, reason);
            cursor.close_entry()?;
            return Ok(());
        }
        Collision::Stop(destination) => {
            context
                .reporter
                .entry_stopped("Restore", "special", &destination.display().to_string(), "file exists");
            let result = context.fail_entry(
                Some(&destination),
                ArchiveError::FileExists(destination.display().to_string()),
            );
            cursor.close_entry()?;
            return result;
        }
    };

    if !options.dry_run {
        let (user_id, group_id) = resolved_owner(&header.metadata, options);
        if let Err(error) = create_parent_directories(state, filesystem, &destination, user_id, group_id) {
            tracing::warn!("cannot create parent directory for '{}': {error}", destination.display());
        }
        if filesystem.exists(&destination) && options.conflict_policy == ConflictPolicy::Overwrite {
            let _ = filesystem.delete(&destination);
        }
        if let Err(error) =
            filesystem.make_special(&destination, &special_kind, resolved_permissions(&header.metadata, options))
        {
            context.reporter.entry_failed("Restore", "special", &name);
            let result = context.fail_entry(Some(&destination), error);
            cursor.close_entry()?;
            return result;
        }
        apply_entry_metadata(filesystem, &destination, &header.metadata, options, state, context.storage_name)?;
    }

    state.update_running(true, |info| info.count_done(0));
    context.reporter.entry_ok(
        "Restore",
        "special",
        &destination.display().to_string(),
        0,
        None,
        options.dry_run,
    );
    cursor.close_entry()?;
    Ok(())
}
