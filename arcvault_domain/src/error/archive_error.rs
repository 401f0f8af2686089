// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! This module provides the hierarchical error system for the arcvault
//! domain. It categorizes failures across archive processing, provides
//! actionable error messages, and supports both automated downgrading
//! (warnings) and human-readable diagnostics.
//!
//! ## Overview
//!
//! The error system is designed around Domain-Driven Design principles:
//!
//! - **Domain-Specific**: Errors are tailored to archive processing concepts
//! - **Hierarchical**: Errors are organized into logical categories for
//!   systematic handling
//! - **Actionable**: Each error provides sufficient context for debugging and
//!   recovery
//! - **Type-Safe**: Rust's type system ensures comprehensive error handling
//! - **Interoperable**: Seamless integration with standard library errors
//!
//! ## Error Categories
//!
//! #### Fatal configuration
//! - **InvalidPattern**: Malformed include/exclude or storage pattern
//! - **InvalidConfiguration**: Malformed or missing configuration settings
//!
//! #### Per-storage failures
//! - **ArchiveNotFound**: The named storage does not exist
//! - **InvalidSignature** / **NoPublicSignatureKey**: Signature verification
//!   failed or could not run
//! - **Storage**: Backend initialization, rename, delete, or write failures
//!
//! #### Per-entry failures
//! - **CorruptData**: Unexpected trailing data or failed integrity check
//! - **InvalidDeviceBlockSize**: Image entry block size exceeds the transfer
//!   buffer
//! - **FileExists** / **FileNotFound**: Destination collision handling
//! - **Io**: File system read/write/close failures
//!
//! #### Structural
//! - **EntryIncomplete**: Fragments missing at the end of a job
//!
//! #### Cooperative
//! - **Aborted**: The external abort callback fired
//!
//! ## Downgrading
//!
//! Several failure sites route errors through the job's error handler, which
//! may downgrade them to success (counted, logged, but not fatal). Errors are
//! `Clone` so a single instance can be stored as the job's fail error and
//! still be reported to the handler.

use thiserror::Error;

/// Domain-specific errors for the archive processing engine.
///
/// Each variant represents a specific failure mode and carries enough
/// context to produce the single human-readable line the driver prints at
/// the end of a job.
#[derive(Error, Debug, Clone)]
pub enum ArchiveError {
    #[error("archive not found: {0}")]
    ArchiveNotFound(String),

    #[error("invalid signature in '{0}'")]
    InvalidSignature(String),

    #[error("no public signature key for '{0}'")]
    NoPublicSignatureKey(String),

    #[error("invalid device block size {block_size} for '{name}'")]
    InvalidDeviceBlockSize { name: String, block_size: u64 },

    #[error("corrupt data: {0}")]
    CorruptData(String),

    #[error("incomplete entry: {0}")]
    EntryIncomplete(String),

    #[error("file exists: {0}")]
    FileExists(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("aborted")]
    Aborted,

    #[error("no space left on storage: {0}")]
    NoSpace(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("archive format error: {0}")]
    Format(String),

    #[error("crypt error: {0}")]
    Crypt(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ArchiveError {
    /// Creates a new IO error
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Creates a new storage error
    pub fn storage_error(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Creates a new archive format error
    pub fn format_error(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Creates a new crypt error
    pub fn crypt_error(msg: impl Into<String>) -> Self {
        Self::Crypt(msg.into())
    }

    /// Creates a new configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Creates a new internal error
    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Checks if the error may succeed on retry.
    ///
    /// `NoSpace` is deliberately not recoverable: retrying a full storage
    /// target only burns bandwidth.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ArchiveError::Io(_) | ArchiveError::Storage(_))
    }

    /// Checks if the error terminates the whole job regardless of the
    /// `no_stop_on_error` flag.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ArchiveError::Aborted | ArchiveError::InvalidPattern(_) | ArchiveError::InvalidConfiguration(_)
        )
    }
}

impl From<std::io::Error> for ArchiveError {
    fn from(err: std::io::Error) -> Self {
        if err.raw_os_error() == Some(libc_enospc()) {
            ArchiveError::NoSpace(err.to_string())
        } else {
            ArchiveError::Io(err.to_string())
        }
    }
}

// ENOSPC without pulling libc into the domain crate.
#[cfg(unix)]
const fn libc_enospc() -> i32 {
    28
}

#[cfg(not(unix))]
const fn libc_enospc() -> i32 {
    112
}
