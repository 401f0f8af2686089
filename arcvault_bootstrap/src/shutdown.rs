// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Shutdown Coordination
//!
//! Signal-driven cooperative shutdown. The engine's cancellation model is
//! a polled `is_aborted` callback; this module provides the flag behind
//! that callback and installs SIGINT/SIGTERM handlers that set it.
//!
//! ## Design
//!
//! - **Atomic state**: a process-wide `AtomicBool`; the handler only
//!   stores, everything else polls
//! - **Cooperative**: nothing is torn down from the signal context; the
//!   drivers observe the flag between queue operations and drain cleanly
//! - **Idempotent**: installing twice or receiving repeated signals is
//!   harmless
//!
//! ## Usage
//!
//! ```rust
//! use arcvault_bootstrap::shutdown::ShutdownFlag;
//!
//! let flag = ShutdownFlag::install();
//! let is_aborted = {
//!     let flag = flag.clone();
//!     move || flag.is_triggered()
//! };
//! assert!(!is_aborted());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

static ABORT_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Handle on the process-wide abort flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShutdownFlag;

impl ShutdownFlag {
    /// Creates the handle without installing signal handlers (tests, or
    /// callers that trigger the flag themselves).
    pub fn new() -> Self {
        ShutdownFlag
    }

    /// Creates the handle and installs SIGINT/SIGTERM handlers.
    pub fn install() -> Self {
        install_signal_handlers();
        ShutdownFlag
    }

    /// True once a shutdown signal was received or `trigger` was called.
    pub fn is_triggered(&self) -> bool {
        ABORT_REQUESTED.load(Ordering::SeqCst)
    }

    /// Requests shutdown programmatically.
    pub fn trigger(&self) {
        ABORT_REQUESTED.store(true, Ordering::SeqCst);
    }

    /// Clears the flag. Test support only; production code never rearms.
    pub fn reset(&self) {
        ABORT_REQUESTED.store(false, Ordering::SeqCst);
    }
}

#[cfg(unix)]
fn install_signal_handlers() {
    extern "C" fn handle_signal(_signal: libc::c_int) {
        ABORT_REQUESTED.store(true, Ordering::SeqCst);
    }

    let handler = handle_signal as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }
}

#[cfg(not(unix))]
fn install_signal_handlers() {
    // No signal wiring on this platform; the flag can still be triggered
    // programmatically.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_and_reset() {
        let flag = ShutdownFlag::new();
        flag.reset();
        assert!(!flag.is_triggered());
        flag.trigger();
        assert!(flag.is_triggered());
        // clones observe the same process-wide state
        let clone = flag;
        assert!(clone.is_triggered());
        flag.reset();
    }
}
