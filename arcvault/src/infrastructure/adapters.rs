// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Concrete implementations of the domain service contracts.

pub mod local_storage;
pub mod std_file;
pub mod vault_format;

pub use local_storage::{LocalStorage, LocalStorageFactory};
pub use std_file::StdFileSystem;
pub use vault_format::ArcvFormat;
