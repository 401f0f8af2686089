// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Worker Pool
//!
//! Thin wrapper over OS threads for the per-archive worker inventory:
//! `run` spawns a named worker, `join_all` waits for every spawned worker
//! to terminate. Workers coordinate through the message queue and the
//! job's shared state, never through the pool itself.

use std::thread::{Builder, JoinHandle};

/// A set of joinable worker threads.
pub struct WorkerPool {
    name: String,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handles: Vec::new(),
        }
    }

    /// Spawns one worker running `body`.
    pub fn run<F>(&mut self, body: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let name = format!("{}-{}", self.name, self.handles.len());
        let handle = Builder::new()
            .name(name.clone())
            .spawn(body)
            .unwrap_or_else(|err| panic!("cannot spawn worker thread '{name}': {err}"));
        self.handles.push(handle);
    }

    /// Waits for all spawned workers. A panicked worker is logged and does
    /// not poison the join of the others.
    pub fn join_all(&mut self) {
        for handle in self.handles.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                tracing::error!("worker thread '{name}' panicked");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.join_all();
    }
}

/// Number of logical CPU cores, the default worker count per archive.
pub fn default_worker_count() -> usize {
    arcvault_bootstrap::platform::cpu_count()
}
