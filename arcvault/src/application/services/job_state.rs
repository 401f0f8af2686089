// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Shared Job State
//!
//! The state one job run shares between the pipeline producer, the
//! workers, and the storage writer: the first-writer-wins fail error, the
//! fragment map, the destination name registry, and the running info with
//! its throttled update callback.
//!
//! ## Locking discipline
//!
//! Each resource has its own lock; holders never take a second one while
//! holding the first:
//!
//! | Resource | Lock | Held across |
//! |----------|------|-------------|
//! | fragment map | `fragments` | one find → mutate pair |
//! | name registry | `names` | one check → reserve pair |
//! | running info | `running` | one mutation plus (on forced updates) the callback |
//! | fail error | `fail_error` | one compare-and-set |

use parking_lot::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use arcvault_domain::{ArchiveError, FragmentMap, NameRegistry, RunningInfo};

use crate::application::commands::JobMonitor;

/// Minimum spacing of non-forced running-info callbacks.
const RUNNING_INFO_INTERVAL: Duration = Duration::from_millis(500);

/// Sleep slice while the job is paused.
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(500);

struct RunningState {
    info: RunningInfo,
    last_update: Instant,
}

/// State shared by every thread of one job.
pub struct JobState {
    fail_error: Mutex<Option<ArchiveError>>,
    pub fragments: Mutex<FragmentMap>,
    pub names: Mutex<NameRegistry>,
    running: Mutex<RunningState>,
    monitor: JobMonitor,
}

impl JobState {
    pub fn new(monitor: JobMonitor) -> Self {
        Self {
            fail_error: Mutex::new(None),
            fragments: Mutex::new(FragmentMap::new()),
            names: Mutex::new(NameRegistry::new()),
            running: Mutex::new(RunningState {
                info: RunningInfo::new(),
                last_update: Instant::now()
                    .checked_sub(RUNNING_INFO_INTERVAL)
                    .unwrap_or_else(Instant::now),
            }),
            monitor,
        }
    }

    pub fn monitor(&self) -> &JobMonitor {
        &self.monitor
    }

    /// Records the job's terminal error; the first writer wins.
    pub fn set_fail_error(&self, error: ArchiveError) {
        let mut fail_error = self.fail_error.lock();
        if fail_error.is_none() {
            *fail_error = Some(error);
        }
    }

    /// Replaces whatever error is stored. Used for `Aborted`, which
    /// dominates every other outcome.
    pub fn override_fail_error(&self, error: ArchiveError) {
        *self.fail_error.lock() = Some(error);
    }

    pub fn fail_error(&self) -> Option<ArchiveError> {
        self.fail_error.lock().clone()
    }

    pub fn has_failed(&self) -> bool {
        self.fail_error.lock().is_some()
    }

    /// Whether processing should go on: not failed (or failures are
    /// non-fatal for this job) and not aborted.
    pub fn should_continue(&self, no_stop_on_error: bool) -> bool {
        if self.aborted() {
            return false;
        }
        no_stop_on_error || !self.has_failed()
    }

    pub fn aborted(&self) -> bool {
        self.monitor.aborted()
    }

    /// Blocks while the job is paused, waking every 500 ms; returns early
    /// on abort.
    pub fn wait_while_paused(&self) {
        while self.monitor.paused() && !self.aborted() {
            std::thread::sleep(PAUSE_POLL_INTERVAL);
        }
    }

    /// Mutates the running info and invokes the update callback: always
    /// when `force` is set, otherwise at most every 500 ms.
    pub fn update_running<F>(&self, force: bool, mutate: F)
    where
        F: FnOnce(&mut RunningInfo),
    {
        let mut running = self.running.lock();
        mutate(&mut running.info);
        let due = force || running.last_update.elapsed() >= RUNNING_INFO_INTERVAL;
        if due {
            running.last_update = Instant::now();
            if let Some(callback) = &self.monitor.running_info {
                callback(&running.info);
            }
        }
    }

    /// Snapshot of the running counters.
    pub fn running_info(&self) -> RunningInfo {
        self.running.lock().info.clone()
    }

    /// Routes a per-entry failure through the caller's error handler. The
    /// entry is counted as an error either way; `None` means the handler
    /// downgraded the failure and processing may go on.
    pub fn handle_error(
        &self,
        storage_name: &str,
        entry_name: Option<&str>,
        error: ArchiveError,
    ) -> Option<ArchiveError> {
        self.update_running(false, |info| info.count_error());
        match &self.monitor.error_handler {
            Some(handler) => handler(storage_name, entry_name, &error),
            None => Some(error),
        }
    }

    /// Locked access to the fragment map.
    pub fn lock_fragments(&self) -> MutexGuard<'_, FragmentMap> {
        self.fragments.lock()
    }

    /// Locked access to the name registry.
    pub fn lock_names(&self) -> MutexGuard<'_, NameRegistry> {
        self.names.lock()
    }
}
