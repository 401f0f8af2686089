// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Engine Configuration
//!
//! TOML-backed configuration with CLI overrides layered on top. The file
//! is optional; every field has a working default so `arcvault` runs with
//! no configuration at all.
//!
//! ```toml
//! # ~/.config/arcvault.toml
//! buffer_size = 65536
//! entry_queue_capacity = 256
//! max_threads = 8
//! temp_directory = "/var/tmp"
//! signature_key_file = "/etc/arcvault/verify.key"
//! human_sizes = true
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use arcvault_domain::ArchiveError;

/// Transfer buffer size; one per worker thread.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Capacity of the entry descriptor queue.
pub const DEFAULT_ENTRY_QUEUE_CAPACITY: usize = 256;

/// Engine configuration as read from the TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Per-worker transfer buffer size in bytes.
    pub buffer_size: usize,
    /// Entry queue capacity (descriptors in flight).
    pub entry_queue_capacity: usize,
    /// Worker count override; `None` means one per logical CPU.
    pub max_threads: Option<usize>,
    /// Directory for convert-mode intermediate files; `None` means the
    /// system temp directory.
    pub temp_directory: Option<PathBuf>,
    /// Verification key for keyed archive signatures.
    pub signature_key_file: Option<PathBuf>,
    /// Print sizes in human-readable units by default.
    pub human_sizes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            entry_queue_capacity: DEFAULT_ENTRY_QUEUE_CAPACITY,
            max_threads: None,
            temp_directory: None,
            signature_key_file: None,
            human_sizes: false,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ArchiveError> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| ArchiveError::invalid_config(format!("cannot read '{}': {err}", path.display())))?;
        let config: EngineConfig = toml::from_str(&text)
            .map_err(|err| ArchiveError::invalid_config(format!("cannot parse '{}': {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file if present, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ArchiveError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), ArchiveError> {
        if self.buffer_size == 0 {
            return Err(ArchiveError::invalid_config("buffer_size must be positive"));
        }
        if self.entry_queue_capacity == 0 {
            return Err(ArchiveError::invalid_config("entry_queue_capacity must be positive"));
        }
        if self.max_threads == Some(0) {
            return Err(ArchiveError::invalid_config("max_threads must be positive when set"));
        }
        Ok(())
    }

    /// Resolved temp directory.
    pub fn temp_directory(&self) -> PathBuf {
        self.temp_directory.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.entry_queue_capacity, DEFAULT_ENTRY_QUEUE_CAPACITY);
        assert!(config.max_threads.is_none());
    }

    #[test]
    fn test_load_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "buffer_size = 4096\nmax_threads = 2\nhuman_sizes = true").unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.max_threads, Some(2));
        assert!(config.human_sizes);
        // untouched fields keep defaults
        assert_eq!(config.entry_queue_capacity, DEFAULT_ENTRY_QUEUE_CAPACITY);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "buffer_size = 0").unwrap();
        assert!(matches!(
            EngineConfig::load(file.path()),
            Err(ArchiveError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bufer_size = 1").unwrap();
        assert!(EngineConfig::load(file.path()).is_err());
    }
}
