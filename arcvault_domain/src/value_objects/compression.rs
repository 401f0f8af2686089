// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Byte-compression algorithm identifiers.
//!
//! The domain only names algorithms; the codecs themselves live in the
//! archive format adapter. Workers use [`CompressionAlgorithm::is_compressed`]
//! to decide whether the "unexpected data at end of entry" check is
//! meaningful: a decompressor may legitimately not sit at the end of its
//! input even when the data is intact.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte (and delta) compression algorithm of an archive entry payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    #[default]
    None,
    Deflate,
    Zstd,
}

impl CompressionAlgorithm {
    /// True for every algorithm that actually transforms bytes.
    pub fn is_compressed(&self) -> bool {
        !matches!(self, CompressionAlgorithm::None)
    }

    /// Parses an algorithm name as used on the command line.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(CompressionAlgorithm::None),
            "deflate" | "zlib" => Some(CompressionAlgorithm::Deflate),
            "zstd" => Some(CompressionAlgorithm::Zstd),
            _ => None,
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Deflate => "deflate",
            CompressionAlgorithm::Zstd => "zstd",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_compressed() {
        assert!(!CompressionAlgorithm::None.is_compressed());
        assert!(CompressionAlgorithm::Deflate.is_compressed());
        assert!(CompressionAlgorithm::Zstd.is_compressed());
    }

    #[test]
    fn test_parse_round_trip() {
        for algorithm in [
            CompressionAlgorithm::None,
            CompressionAlgorithm::Deflate,
            CompressionAlgorithm::Zstd,
        ] {
            assert_eq!(CompressionAlgorithm::parse(&algorithm.to_string()), Some(algorithm));
        }
        assert_eq!(CompressionAlgorithm::parse("lz77"), None);
    }
}
