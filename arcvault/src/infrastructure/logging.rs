// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Logging Setup
//!
//! Installs the tracing subscriber for the whole process. Filtering comes
//! from `RUST_LOG` with an `info` default; `--quiet` narrows to warnings,
//! `--verbose` widens to debug. Per-entry status lines are *not* log
//! events (they go through the console reporter), so log output stays
//! machine-filterable.

use tracing_subscriber::{fmt, EnvFilter};

/// Verbosity selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

/// Installs the global tracing subscriber. Safe to call once per process;
/// later calls are ignored (tests may race to install).
pub fn init_logging(verbosity: Verbosity) {
    let default_directive = match verbosity {
        Verbosity::Quiet => "warn",
        Verbosity::Normal => "info",
        Verbosity::Verbose => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
