// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Restore conflict policy: what to do when a destination path or a byte
//! fragment of it has already been written, either on disk or earlier in
//! this job run.

use serde::{Deserialize, Serialize};

/// Policy applied when a restore target already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Report `FileExists`; fails the job unless `no_stop_on_error` is set.
    #[default]
    Stop,
    /// Generate a unique sibling name with a numeric suffix before the
    /// extension (`a.log` becomes `a-0.log`).
    Rename,
    /// Truncate the existing file and write over it.
    Overwrite,
    /// Skip the entry and report success.
    SkipExisting,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_stop() {
        assert_eq!(ConflictPolicy::default(), ConflictPolicy::Stop);
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&ConflictPolicy::SkipExisting).unwrap(), "\"skip-existing\"");
        let policy: ConflictPolicy = serde_json::from_str("\"overwrite\"").unwrap();
        assert_eq!(policy, ConflictPolicy::Overwrite);
    }
}
