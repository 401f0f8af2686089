// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Arcvault
//!
//! Concurrent backup archive engine. An existing archive is read, its
//! typed entries streamed through a worker pool, and written back out:
//! verifying integrity (`test`), reconstructing files on disk (`restore`),
//! or producing a new archive with different compression, crypt and
//! identity (`convert`).
//!
//! ## Architecture
//!
//! - **Domain** (`arcvault-domain`): errors, value objects, the fragment
//!   map, and the collaborator contracts (archive, storage, file system)
//! - **Application** (this crate): the entry pipeline, the worker bodies,
//!   the storage writer, and the three drivers
//! - **Infrastructure** (this crate): the `.arcv` container format, local
//!   storage, the std filesystem adapter, configuration and logging
//! - **Bootstrap** (`arcvault-bootstrap`): signals, platform facts
//!
//! ## Data flow
//!
//! ```text
//! pipeline -> entry queue -> N workers -> (convert) intermediate file
//!                                         -> storage queue -> storage writer
//! ```
//!
//! ## Embedding
//!
//! The three convenience functions mirror the CLI surface; callers with
//! their own storage backends or archive formats construct the use-case
//! structs directly and inject their adapters.

pub mod application;
pub mod infrastructure;
pub mod presentation;

use std::sync::Arc;

use arcvault_domain::services::file_service::FileSystem;
use arcvault_domain::{ArchiveError, EntrySelector, PatternList};

pub use application::commands::{JobMonitor, JobOptions};
pub use application::use_cases::{ConvertArchives, ConvertOverrides, RestoreArchives, TestArchives};
pub use arcvault_domain as domain;

use application::services::reporter::ConsoleReporter;
use infrastructure::adapters::{ArcvFormat, LocalStorageFactory, StdFileSystem};

/// Tests the given archives with the default adapters.
pub fn test(
    storage_names: &[String],
    include: &EntrySelector,
    exclude: &PatternList,
    options: &JobOptions,
    monitor: &JobMonitor,
) -> Result<(), ArchiveError> {
    TestArchives::new(Arc::new(ArcvFormat::new()), Arc::new(LocalStorageFactory::new()))
        .with_reporter(ConsoleReporter::new(options.human_sizes))
        .execute(storage_names, include, exclude, options, monitor)
}

/// Restores the given archives with the default adapters.
pub fn restore(
    storage_names: &[String],
    include: &EntrySelector,
    exclude: &PatternList,
    options: &JobOptions,
    monitor: &JobMonitor,
) -> Result<(), ArchiveError> {
    let filesystem: Arc<dyn FileSystem> = Arc::new(StdFileSystem::new());
    RestoreArchives::new(
        Arc::new(ArcvFormat::new()),
        Arc::new(LocalStorageFactory::new()),
        filesystem,
    )
    .with_reporter(ConsoleReporter::new(options.human_sizes))
    .execute(storage_names, include, exclude, options, monitor)
}

/// Converts the given archives with the default adapters.
pub fn convert(
    storage_names: &[String],
    overrides: &ConvertOverrides,
    options: &JobOptions,
    monitor: &JobMonitor,
) -> Result<(), ArchiveError> {
    let filesystem: Arc<dyn FileSystem> = Arc::new(StdFileSystem::new());
    ConvertArchives::new(
        Arc::new(ArcvFormat::new()),
        Arc::new(LocalStorageFactory::new()),
        filesystem,
    )
    .with_reporter(ConsoleReporter::new(options.human_sizes))
    .execute(storage_names, overrides, options, monitor)
}
