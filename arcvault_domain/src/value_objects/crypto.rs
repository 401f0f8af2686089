// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Crypt Identifiers and Contexts
//!
//! The domain names encryption algorithms, carries the per-archive
//! [`CryptoContext`] attached to every entry descriptor, and classifies
//! signature verification outcomes. The primitives themselves (AEAD, KDF)
//! are the format adapter's concern.
//!
//! Passwords are wrapped in [`Password`], which zeroizes its memory on
//! drop and never prints its contents.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

/// Encryption algorithm of an archive segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CryptAlgorithm {
    #[default]
    None,
    #[serde(rename = "aes256gcm")]
    Aes256Gcm,
    #[serde(rename = "xchacha20poly1305")]
    XChaCha20Poly1305,
}

impl CryptAlgorithm {
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, CryptAlgorithm::None)
    }

    /// Parses an algorithm name as used on the command line.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(CryptAlgorithm::None),
            "aes256gcm" | "aes256-gcm" => Some(CryptAlgorithm::Aes256Gcm),
            "xchacha20poly1305" | "xchacha20-poly1305" => Some(CryptAlgorithm::XChaCha20Poly1305),
            _ => None,
        }
    }
}

impl fmt::Display for CryptAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CryptAlgorithm::None => "none",
            CryptAlgorithm::Aes256Gcm => "aes256gcm",
            CryptAlgorithm::XChaCha20Poly1305 => "xchacha20poly1305",
        };
        write!(f, "{name}")
    }
}

/// Per-archive decryption parameters attached to entry descriptors.
///
/// Opaque to the processing core: workers only pass it back to the cursor
/// via `apply_crypto_context` when they re-open an archive at a new epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoContext {
    pub algorithm: CryptAlgorithm,
    pub salt: Vec<u8>,
}

impl CryptoContext {
    /// Context of an unencrypted archive segment.
    pub fn plaintext() -> Self {
        Self {
            algorithm: CryptAlgorithm::None,
            salt: Vec::new(),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.algorithm.is_encrypted()
    }
}

/// Outcome of signature verification over an archive or a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureState {
    /// No signatures present
    None,
    /// All checked signatures matched
    Valid,
    /// At least one signature did not match
    Invalid,
    /// Verification was skipped (no key, or explicitly disabled)
    Skipped,
}

impl SignatureState {
    /// States that do not fail the job. `None` and `Skipped` count as
    /// acceptable; only `Invalid` is rejected.
    pub fn is_valid(&self) -> bool {
        !matches!(self, SignatureState::Invalid)
    }

    /// Combines the state of one more verified segment into an aggregate.
    /// `Invalid` is sticky; `Skipped` dominates `Valid`.
    pub fn combine(self, other: SignatureState) -> SignatureState {
        use SignatureState::*;
        match (self, other) {
            (Invalid, _) | (_, Invalid) => Invalid,
            (Skipped, _) | (_, Skipped) => Skipped,
            (Valid, _) | (_, Valid) => Valid,
            (None, None) => None,
        }
    }
}

/// A password with zeroize-on-drop semantics.
#[derive(Clone)]
pub struct Password(Zeroizing<String>);

impl Password {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Password(***)")
    }
}
