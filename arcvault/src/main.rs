// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Binary entry point: installs the signal-driven abort flag, parses the
//! command line, and runs the selected use case.

use clap::Parser;

use arcvault::presentation::{run, Cli};
use arcvault_bootstrap::shutdown::ShutdownFlag;

fn main() {
    let cli = Cli::parse();
    let shutdown = ShutdownFlag::install();
    let exit_code = run(cli, move || shutdown.is_triggered());
    std::process::exit(exit_code);
}
