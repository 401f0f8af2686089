// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Application services shared by the drivers: the job state, the entry
//! pipeline, the per-worker cursor cache, the storage writer, and the
//! console reporter.

pub mod entry_pipeline;
pub mod job_state;
pub mod reporter;
pub mod storage_writer;
pub mod worker;

pub use entry_pipeline::{run_entry_pipeline, verify_archive_signatures, EntryMessage};
pub use job_state::JobState;
pub use reporter::ConsoleReporter;
pub use storage_writer::{run_storage_writer, ConvertDestination, StorageMessage};
pub use worker::WorkerCursor;
