// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Entities of the arcvault domain: identified, mutable state shared across
//! a job run.

pub mod fragment_map;
pub mod name_registry;
pub mod running_info;

pub use fragment_map::{FragmentMap, FragmentNode, FragmentRange};
pub use name_registry::NameRegistry;
pub use running_info::{ProgressVolume, RunningInfo};
