// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Job Commands
//!
//! The options and callback bundle every driver consumes. `JobOptions` is
//! a read-only view passed by reference through the whole pipeline; no
//! processing code reads process-wide state. `JobMonitor` carries the
//! caller's callbacks: progress polling, pause/abort flags, the password
//! provider, and the error handler that may downgrade per-entry failures.

use std::path::PathBuf;
use std::sync::Arc;

use arcvault_domain::{
    ArchiveError, CompressionAlgorithm, ConflictPolicy, CryptAlgorithm, Password, RunningInfo,
};

use crate::infrastructure::config::{DEFAULT_BUFFER_SIZE, DEFAULT_ENTRY_QUEUE_CAPACITY};

/// Options of one test/restore/convert job.
#[derive(Clone)]
pub struct JobOptions {
    /// Restore: destination root. Convert: local output directory that
    /// bypasses the storage backend.
    pub destination: Option<PathBuf>,
    /// Leading path components stripped from entry names on restore.
    pub directory_strip_count: usize,
    pub conflict_policy: ConflictPolicy,
    pub dry_run: bool,
    pub sparse_files: bool,
    pub no_fragment_check: bool,
    pub no_stop_on_error: bool,
    pub no_stop_on_owner_error: bool,
    pub no_stop_on_attribute_error: bool,
    pub skip_verify_signatures: bool,
    pub force_verify_signatures: bool,
    /// Ownership override `(uid, gid)` applied instead of archived owners.
    pub owner: Option<(u32, u32)>,
    /// Permission override applied instead of archived permissions.
    pub permissions: Option<u32>,
    pub max_threads: Option<usize>,
    pub buffer_size: usize,
    pub entry_queue_capacity: usize,
    pub human_sizes: bool,
    pub temp_directory: PathBuf,
    /// Convert: byte compression of the destination archive.
    pub new_compression: Option<CompressionAlgorithm>,
    /// Convert: crypt algorithm of the destination archive.
    pub new_crypt: Option<CryptAlgorithm>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            destination: None,
            directory_strip_count: 0,
            conflict_policy: ConflictPolicy::default(),
            dry_run: false,
            sparse_files: false,
            no_fragment_check: false,
            no_stop_on_error: false,
            no_stop_on_owner_error: false,
            no_stop_on_attribute_error: false,
            skip_verify_signatures: false,
            force_verify_signatures: false,
            owner: None,
            permissions: None,
            max_threads: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            entry_queue_capacity: DEFAULT_ENTRY_QUEUE_CAPACITY,
            human_sizes: false,
            temp_directory: std::env::temp_dir(),
            new_compression: None,
            new_crypt: None,
        }
    }
}

impl JobOptions {
    /// Worker count for one archive: explicit override or one per core.
    pub fn worker_count(&self) -> usize {
        self.max_threads
            .unwrap_or_else(crate::infrastructure::runtime::default_worker_count)
            .max(1)
    }
}

pub type RunningInfoFn = Arc<dyn Fn(&RunningInfo) + Send + Sync>;
pub type FlagFn = Arc<dyn Fn() -> bool + Send + Sync>;
pub type PasswordFn = Arc<dyn Fn() -> Option<Password> + Send + Sync>;

/// Error handler: may consume the error (downgrade to success) by
/// returning `None`, replace it, or pass it through.
pub type ErrorHandlerFn = Arc<dyn Fn(&str, Option<&str>, &ArchiveError) -> Option<ArchiveError> + Send + Sync>;

/// The caller's callback bundle. Every member is optional; a missing
/// callback means "no progress consumer", "never paused", "never
/// aborted", "no password available", "no downgrading".
#[derive(Clone, Default)]
pub struct JobMonitor {
    pub running_info: Option<RunningInfoFn>,
    pub error_handler: Option<ErrorHandlerFn>,
    pub password: Option<PasswordFn>,
    pub is_paused: Option<FlagFn>,
    pub is_aborted: Option<FlagFn>,
}

impl JobMonitor {
    pub fn aborted(&self) -> bool {
        self.is_aborted.as_ref().map(|callback| callback()).unwrap_or(false)
    }

    pub fn paused(&self) -> bool {
        self.is_paused.as_ref().map(|callback| callback()).unwrap_or(false)
    }

    pub fn request_password(&self) -> Option<Password> {
        self.password.as_ref().and_then(|callback| callback())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = JobOptions::default();
        assert_eq!(options.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(options.conflict_policy, ConflictPolicy::Stop);
        assert!(options.worker_count() >= 1);
    }

    #[test]
    fn test_worker_count_override() {
        let options = JobOptions {
            max_threads: Some(3),
            ..JobOptions::default()
        };
        assert_eq!(options.worker_count(), 3);
    }

    #[test]
    fn test_monitor_defaults() {
        let monitor = JobMonitor::default();
        assert!(!monitor.aborted());
        assert!(!monitor.paused());
        assert!(monitor.request_password().is_none());
    }

    #[test]
    fn test_monitor_callbacks() {
        let monitor = JobMonitor {
            is_aborted: Some(Arc::new(|| true)),
            password: Some(Arc::new(|| Some(Password::new("pw")))),
            ..JobMonitor::default()
        };
        assert!(monitor.aborted());
        assert_eq!(monitor.request_password().unwrap().expose(), "pw");
    }
}
