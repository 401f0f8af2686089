// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Console Reporter
//!
//! Per-entry status lines and the per-archive summary. This output is the
//! user-facing result of a job (one line per entry, one closing line per
//! archive) and deliberately bypasses the log stream so it stays stable
//! for scripting while logging stays filterable.

use std::io::Write;

/// Formats and prints job status lines.
#[derive(Clone)]
pub struct ConsoleReporter {
    human_sizes: bool,
    quiet: bool,
}

impl ConsoleReporter {
    pub fn new(human_sizes: bool) -> Self {
        Self {
            human_sizes,
            quiet: false,
        }
    }

    /// A reporter that swallows all output (library embedding, tests).
    pub fn quiet() -> Self {
        Self {
            human_sizes: false,
            quiet: true,
        }
    }

    fn size_string(&self, size: u64) -> String {
        if self.human_sizes {
            byte_unit::Byte::from_u64(size)
                .get_appropriate_unit(byte_unit::UnitType::Decimal)
                .to_string()
        } else {
            size.to_string()
        }
    }

    fn fragment_string(&self, total_size: u64, fragment_offset: u64, fragment_size: u64) -> String {
        // annotate only when the entry is a true fragment of the entity
        if fragment_size < total_size {
            let end = if fragment_size > 0 {
                fragment_offset + fragment_size - 1
            } else {
                fragment_offset
            };
            format!(", fragment {fragment_offset}..{end}")
        } else {
            String::new()
        }
    }

    fn print(&self, line: &str) {
        if !self.quiet {
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "{line}");
        }
    }

    /// `  Test file '/etc/hostname'...OK (12 bytes)`
    pub fn entry_ok(
        &self,
        action: &str,
        kind: &str,
        name: &str,
        total_size: u64,
        fragment: Option<(u64, u64)>,
        dry_run: bool,
    ) {
        let fragment_text = fragment
            .map(|(offset, size)| self.fragment_string(total_size, offset, size))
            .unwrap_or_default();
        let dry_run_text = if dry_run { ", dry-run" } else { "" };
        self.print(&format!(
            "  {action} {kind:9} '{name}'...OK ({} bytes{fragment_text}{dry_run_text})",
            self.size_string(total_size)
        ));
    }

    pub fn entry_skipped(&self, action: &str, kind: &str, name: &str, reason: &str) {
        self.print(&format!("  {action} {kind:9} '{name}'...skipped ({reason})"));
    }

    pub fn entry_stopped(&self, action: &str, kind: &str, name: &str, reason: &str) {
        self.print(&format!("  {action} {kind:9} '{name}'...stopped ({reason})"));
    }

    pub fn entry_failed(&self, action: &str, kind: &str, name: &str) {
        self.print(&format!("  {action} {kind:9} '{name}'...FAIL!"));
    }

    pub fn storage_begin(&self, action: &str, printable_name: &str) {
        self.print(&format!("{action} storage '{printable_name}':"));
    }

    pub fn storage_summary(&self, printable_name: &str, ok: bool) {
        if ok {
            self.print(&format!("{printable_name}: OK"));
        } else {
            self.print(&format!("{printable_name}: FAIL!"));
        }
    }

    pub fn incomplete_entry(&self, name: &str, covered: u64, total: u64) {
        self.print(&format!(
            "Warning: incomplete entry '{name}' ({} of {} bytes)",
            self.size_string(covered),
            self.size_string(total)
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_string_plain_and_human() {
        let plain = ConsoleReporter::quiet();
        assert_eq!(plain.size_string(1500), "1500");

        let human = ConsoleReporter {
            human_sizes: true,
            quiet: true,
        };
        assert!(human.size_string(1500).contains("1.5"));
    }

    #[test]
    fn test_fragment_string_only_for_partial_entries() {
        let reporter = ConsoleReporter::quiet();
        assert_eq!(reporter.fragment_string(12, 0, 12), "");
        assert_eq!(reporter.fragment_string(12, 0, 8), ", fragment 0..7");
        assert_eq!(reporter.fragment_string(12, 8, 4), ", fragment 8..11");
    }
}
