// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Worker Support
//!
//! The per-thread archive cursor cache every worker keeps. A worker holds
//! at most one open cursor; when a descriptor with a higher archive epoch
//! arrives, the cached cursor is dropped and a fresh one is opened from
//! the descriptor's archive handle, the descriptor's crypto context is
//! applied, and the cursor is positioned at the entry offset.

use arcvault_domain::services::archive_service::ArchiveCursor;
use arcvault_domain::ArchiveError;

use crate::application::services::entry_pipeline::EntryMessage;

/// Per-worker cursor cache keyed by archive epoch.
pub struct WorkerCursor {
    epoch: u32,
    cursor: Option<Box<dyn ArchiveCursor>>,
}

impl WorkerCursor {
    pub fn new() -> Self {
        Self { epoch: 0, cursor: None }
    }

    /// Returns a cursor positioned at the descriptor's entry, re-opening
    /// when the descriptor refers to a newer archive.
    pub fn prepare(&mut self, message: &EntryMessage) -> Result<&mut dyn ArchiveCursor, ArchiveError> {
        if self.epoch < message.archive_epoch {
            // dropping the previous cursor closes it
            self.cursor = Some(message.archive.open_cursor()?);
            self.epoch = message.archive_epoch;
        }
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| ArchiveError::internal_error("worker cursor not initialized"))?;
        cursor.apply_crypto_context(&message.crypto)?;
        cursor.seek(message.offset)?;
        Ok(cursor.as_mut())
    }
}

impl Default for WorkerCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits a path-like entry name into `(stem, extension-with-dot)` on the
/// last dot of the final component, for unique-sibling renaming.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        // a dot inside the directory part does not count
        Some(index) if !name[index..].contains('/') && index > 0 => (&name[..index], &name[index..]),
        _ => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("a.log"), ("a", ".log"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension("noext"), ("noext", ""));
        assert_eq!(split_extension(".hidden"), (".hidden", ""));
        assert_eq!(split_extension("dir.d/file"), ("dir.d/file", ""));
    }
}
