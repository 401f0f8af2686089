// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # `.arcv` Container Format
//!
//! The in-tree `ArchiveFormat` implementation. The engine core never
//! depends on this layout (it consumes the archive service traits), but
//! the binary needs one concrete format to be useful end-to-end, and the
//! integration tests build their fixtures through this writer.
//!
//! ## Layout
//!
//! ```text
//! magic "ARCV" | version u8
//! record*:
//!   kind u8 | header_len u32 LE | header JSON | header_crc u32 LE | payload?
//! ```
//!
//! Only file, hardlink and image records carry a payload: a chunk stream
//! `(stored_len u32 LE | stored bytes)*` terminated by a zero length. Each
//! chunk holds at most 64 KiB of plaintext, independently byte-compressed
//! and then AEAD-sealed (nonce prepended to the ciphertext), so cursors
//! can stream payloads without holding whole entries in memory and a
//! corrupt chunk cannot take more than 64 KiB of data with it.
//!
//! ## Crypt
//!
//! An encrypted archive starts with a salt record naming the algorithm and
//! KDF parameters; the content key is scrypt-derived from the password and
//! that salt. The salt record is the `CryptoContext` attached to every
//! entry descriptor the pipeline publishes.
//!
//! ## Signatures
//!
//! A signature record carries the SHA-256 digest of the raw archive bytes
//! `[from_offset, to_offset)`; the first signed span starts right after
//! the magic. When a key record precedes the signatures, digests are keyed
//! (key bytes hashed before the span) and verification without the key
//! fails with `NoPublicSignatureKey`.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::XChaCha20Poly1305;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use arcvault_domain::services::archive_service::{
    ArchiveCreateOptions, ArchiveCursor, ArchiveFormat, ArchiveReader, ArchiveWriter, DirectoryEntryHeader,
    EntryEnvelope, FileEntryHeader, ImageEntryHeader, LinkEntryHeader, MetaEntryHeader, SpecialEntryHeader,
    StoreCallback,
};
use arcvault_domain::services::storage_service::{Storage, StorageSource};
use arcvault_domain::{
    ArchiveError, CompressionAlgorithm, CryptAlgorithm, CryptoContext, EntryKind, Password, SignatureState,
};

const MAGIC: &[u8; 4] = b"ARCV";
const FORMAT_VERSION: u8 = 1;

/// Bytes before the first record: magic plus version.
const DATA_START: u64 = 5;

/// Plaintext bytes per payload chunk.
const CHUNK_SIZE: usize = 64 * 1024;

/// Upper bound on header JSON, to reject corrupt length fields early.
const MAX_HEADER_LEN: u32 = 1024 * 1024;

const KIND_SALT: u8 = 0x01;
const KIND_KEY: u8 = 0x02;
const KIND_META: u8 = 0x03;
const KIND_FILE: u8 = 0x10;
const KIND_HARDLINK: u8 = 0x11;
const KIND_IMAGE: u8 = 0x12;
const KIND_DIRECTORY: u8 = 0x13;
const KIND_LINK: u8 = 0x14;
const KIND_SPECIAL: u8 = 0x15;
const KIND_SIGNATURE: u8 = 0x20;

// scrypt cost parameters baked into the salt record
const KDF_LOG_N: u8 = 14;
const KDF_R: u32 = 8;
const KDF_P: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SaltHeader {
    algorithm: CryptAlgorithm,
    salt: Vec<u8>,
    kdf: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyHeader {
    fingerprint: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SignatureHeader {
    from_offset: u64,
    to_offset: u64,
    digest: String,
}

fn kind_of(record_kind: u8) -> EntryKind {
    match record_kind {
        KIND_SALT => EntryKind::Salt,
        KIND_KEY => EntryKind::Key,
        KIND_META => EntryKind::Meta,
        KIND_FILE => EntryKind::File,
        KIND_HARDLINK => EntryKind::HardLink,
        KIND_IMAGE => EntryKind::Image,
        KIND_DIRECTORY => EntryKind::Directory,
        KIND_LINK => EntryKind::Link,
        KIND_SPECIAL => EntryKind::Special,
        KIND_SIGNATURE => EntryKind::Signature,
        _ => EntryKind::Unknown,
    }
}

fn has_payload(record_kind: u8) -> bool {
    matches!(record_kind, KIND_FILE | KIND_HARDLINK | KIND_IMAGE)
}

fn derive_key(password: &Password, salt: &[u8]) -> Result<[u8; 32], ArchiveError> {
    let params = scrypt::Params::new(KDF_LOG_N, KDF_R, KDF_P, 32)
        .map_err(|err| ArchiveError::crypt_error(format!("bad KDF parameters: {err}")))?;
    let mut key = [0u8; 32];
    scrypt::scrypt(password.expose().as_bytes(), salt, &params, &mut key)
        .map_err(|err| ArchiveError::crypt_error(format!("key derivation failed: {err}")))?;
    Ok(key)
}

fn seal_chunk(algorithm: CryptAlgorithm, key: Option<&[u8; 32]>, plain: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    match algorithm {
        CryptAlgorithm::None => Ok(plain.to_vec()),
        CryptAlgorithm::Aes256Gcm => {
            let key = key.ok_or_else(|| ArchiveError::crypt_error("no key for encrypted archive"))?;
            let cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(key));
            let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
            let sealed = cipher
                .encrypt(&nonce, plain)
                .map_err(|_| ArchiveError::crypt_error("encryption failed"))?;
            let mut stored = nonce.to_vec();
            stored.extend_from_slice(&sealed);
            Ok(stored)
        }
        CryptAlgorithm::XChaCha20Poly1305 => {
            let key = key.ok_or_else(|| ArchiveError::crypt_error("no key for encrypted archive"))?;
            let cipher = XChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(key));
            let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
            let sealed = cipher
                .encrypt(&nonce, plain)
                .map_err(|_| ArchiveError::crypt_error("encryption failed"))?;
            let mut stored = nonce.to_vec();
            stored.extend_from_slice(&sealed);
            Ok(stored)
        }
    }
}

fn open_chunk(algorithm: CryptAlgorithm, key: Option<&[u8; 32]>, stored: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    match algorithm {
        CryptAlgorithm::None => Ok(stored.to_vec()),
        CryptAlgorithm::Aes256Gcm => {
            let key = key.ok_or_else(|| ArchiveError::crypt_error("no key for encrypted archive"))?;
            if stored.len() < 12 {
                return Err(ArchiveError::CorruptData("truncated sealed chunk".into()));
            }
            let (nonce, ciphertext) = stored.split_at(12);
            let cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(key));
            cipher
                .decrypt(aes_gcm::Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| ArchiveError::CorruptData("chunk authentication failed".into()))
        }
        CryptAlgorithm::XChaCha20Poly1305 => {
            let key = key.ok_or_else(|| ArchiveError::crypt_error("no key for encrypted archive"))?;
            if stored.len() < 24 {
                return Err(ArchiveError::CorruptData("truncated sealed chunk".into()));
            }
            let (nonce, ciphertext) = stored.split_at(24);
            let cipher = XChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(key));
            cipher
                .decrypt(chacha20poly1305::XNonce::from_slice(nonce), ciphertext)
                .map_err(|_| ArchiveError::CorruptData("chunk authentication failed".into()))
        }
    }
}

fn compress_chunk(algorithm: CompressionAlgorithm, plain: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    match algorithm {
        CompressionAlgorithm::None => Ok(plain.to_vec()),
        CompressionAlgorithm::Deflate => {
            let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(plain).map_err(ArchiveError::from)?;
            encoder.finish().map_err(ArchiveError::from)
        }
        CompressionAlgorithm::Zstd => {
            zstd::stream::encode_all(plain, 0).map_err(|err| ArchiveError::format_error(format!("zstd: {err}")))
        }
    }
}

fn decompress_chunk(algorithm: CompressionAlgorithm, stored: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    match algorithm {
        CompressionAlgorithm::None => Ok(stored.to_vec()),
        CompressionAlgorithm::Deflate => {
            let mut plain = Vec::new();
            flate2::read::ZlibDecoder::new(stored)
                .read_to_end(&mut plain)
                .map_err(|err| ArchiveError::CorruptData(format!("deflate: {err}")))?;
            Ok(plain)
        }
        CompressionAlgorithm::Zstd => {
            zstd::stream::decode_all(stored).map_err(|err| ArchiveError::CorruptData(format!("zstd: {err}")))
        }
    }
}

/// The `.arcv` format service: opens readers, creates writers.
pub struct ArcvFormat {
    /// Verification key for keyed signatures (config `signature_key_file`).
    verify_key: Option<Vec<u8>>,
    /// Signing key applied to created archives.
    signing_key: Option<Vec<u8>>,
}

impl ArcvFormat {
    pub fn new() -> Self {
        Self {
            verify_key: None,
            signing_key: None,
        }
    }

    pub fn with_keys(verify_key: Option<Vec<u8>>, signing_key: Option<Vec<u8>>) -> Self {
        Self {
            verify_key,
            signing_key,
        }
    }
}

impl Default for ArcvFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveFormat for ArcvFormat {
    fn open(
        &self,
        storage: &Arc<dyn Storage>,
        name: &str,
        password: Option<&Password>,
    ) -> Result<Arc<dyn ArchiveReader>, ArchiveError> {
        ArcvReader::open(Arc::clone(storage), name, password, self.verify_key.clone())
            .map(|reader| Arc::new(reader) as Arc<dyn ArchiveReader>)
    }

    fn create(
        &self,
        options: &ArchiveCreateOptions,
        store: StoreCallback,
    ) -> Result<Box<dyn ArchiveWriter>, ArchiveError> {
        ArcvWriter::create(options, self.signing_key.clone(), store)
            .map(|writer| Box::new(writer) as Box<dyn ArchiveWriter>)
    }
}

// ---------------------------------------------------------------------------
// Record stream: framing shared by cursor and verifier
// ---------------------------------------------------------------------------

struct RawRecord {
    kind: u8,
    offset: u64,
    header: Vec<u8>,
}

impl RawRecord {
    fn decode<'a, T: Deserialize<'a>>(&'a self) -> Result<T, ArchiveError> {
        serde_json::from_slice(&self.header)
            .map_err(|err| ArchiveError::CorruptData(format!("bad record header: {err}")))
    }
}

struct RecordStream {
    source: Box<dyn StorageSource>,
    size: u64,
    position: u64,
}

impl RecordStream {
    fn new(source: Box<dyn StorageSource>, size: u64, position: u64) -> Self {
        Self {
            source,
            size,
            position,
        }
    }

    fn seek(&mut self, offset: u64) -> Result<(), ArchiveError> {
        self.source.seek(SeekFrom::Start(offset)).map_err(ArchiveError::from)?;
        self.position = offset;
        Ok(())
    }

    fn is_eof(&self) -> bool {
        self.position >= self.size
    }

    fn read_exact(&mut self, buffer: &mut [u8]) -> Result<(), ArchiveError> {
        self.source
            .read_exact(buffer)
            .map_err(|err| ArchiveError::CorruptData(format!("truncated archive: {err}")))?;
        self.position += buffer.len() as u64;
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8, ArchiveError> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    fn read_u32(&mut self) -> Result<u32, ArchiveError> {
        let mut bytes = [0u8; 4];
        self.read_exact(&mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Reads the record at the current position and stays positioned at its
    /// body. Returns `None` at end of archive.
    fn read_record(&mut self) -> Result<Option<RawRecord>, ArchiveError> {
        if self.is_eof() {
            return Ok(None);
        }
        let offset = self.position;
        let kind = self.read_u8()?;
        let header_len = self.read_u32()?;
        if header_len > MAX_HEADER_LEN {
            return Err(ArchiveError::CorruptData(format!(
                "record header length {header_len} exceeds limit"
            )));
        }
        let mut header = vec![0u8; header_len as usize];
        self.read_exact(&mut header)?;
        let stored_crc = self.read_u32()?;
        if crc32fast::hash(&header) != stored_crc {
            return Err(ArchiveError::CorruptData(format!(
                "record header checksum mismatch at offset {offset}"
            )));
        }
        Ok(Some(RawRecord { kind, offset, header }))
    }

    /// Reads the record at the current position, then seeks back to its
    /// start so a subsequent read or skip sees it again.
    fn peek_record(&mut self) -> Result<Option<RawRecord>, ArchiveError> {
        let offset = self.position;
        let record = self.read_record()?;
        if record.is_some() {
            self.seek(offset)?;
        }
        Ok(record)
    }

    /// Advances past the record at the current position, payload included.
    fn skip_record(&mut self) -> Result<(), ArchiveError> {
        let record = self
            .read_record()?
            .ok_or_else(|| ArchiveError::CorruptData("skip past end of archive".into()))?;
        if has_payload(record.kind) {
            self.skip_payload()?;
        }
        Ok(())
    }

    /// Skips chunk frames until the terminator.
    fn skip_payload(&mut self) -> Result<(), ArchiveError> {
        loop {
            let stored_len = self.read_u32()?;
            if stored_len == 0 {
                return Ok(());
            }
            let target = self.position + stored_len as u64;
            if target > self.size {
                return Err(ArchiveError::CorruptData("chunk runs past end of archive".into()));
            }
            self.seek(target)?;
        }
    }

    /// Streams the raw archive bytes `[from, to)` into `hasher`, restoring
    /// the current position afterwards.
    fn hash_span(&mut self, from: u64, to: u64, hasher: &mut Sha256) -> Result<(), ArchiveError> {
        let saved = self.position;
        self.seek(from)?;
        let mut remaining = to.saturating_sub(from);
        let mut buffer = vec![0u8; CHUNK_SIZE];
        while remaining > 0 {
            let take = remaining.min(buffer.len() as u64) as usize;
            self.read_exact(&mut buffer[..take])?;
            hasher.update(&buffer[..take]);
            remaining -= take as u64;
        }
        self.seek(saved)
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Shared handle on one open `.arcv` archive.
pub struct ArcvReader {
    storage: Arc<dyn Storage>,
    name: String,
    size: u64,
    crypto: Arc<CryptoContext>,
    key: Option<[u8; 32]>,
    verify_key: Option<Vec<u8>>,
    has_key_record: bool,
}

impl ArcvReader {
    fn open(
        storage: Arc<dyn Storage>,
        name: &str,
        password: Option<&Password>,
        verify_key: Option<Vec<u8>>,
    ) -> Result<Self, ArchiveError> {
        let size = storage
            .size(name)
            .map_err(|_| ArchiveError::ArchiveNotFound(storage.printable_name(Some(name))))?;
        let mut source = storage.open_read(name)?;

        let mut magic = [0u8; DATA_START as usize];
        source
            .read_exact(&mut magic)
            .map_err(|_| ArchiveError::CorruptData(format!("'{name}' is not an arcv archive")))?;
        if &magic[0..4] != MAGIC {
            return Err(ArchiveError::CorruptData(format!("'{name}' has no arcv magic")));
        }
        if magic[4] != FORMAT_VERSION {
            return Err(ArchiveError::format_error(format!(
                "unsupported format version {} in '{name}'",
                magic[4]
            )));
        }

        // The salt and key records, when present, lead the archive.
        let mut crypto = CryptoContext::plaintext();
        let mut has_key_record = false;
        let mut probe = RecordStream::new(source, size, DATA_START);
        while let Some(record) = probe.peek_record()? {
            match record.kind {
                KIND_SALT => {
                    let header: SaltHeader = record.decode()?;
                    crypto = CryptoContext {
                        algorithm: header.algorithm,
                        salt: header.salt,
                    };
                    probe.skip_record()?;
                }
                KIND_KEY => {
                    has_key_record = true;
                    probe.skip_record()?;
                }
                _ => break,
            }
        }

        let key = if crypto.is_encrypted() {
            let password = password
                .ok_or_else(|| ArchiveError::crypt_error(format!("'{name}' is encrypted, password required")))?;
            Some(derive_key(password, &crypto.salt)?)
        } else {
            None
        };

        Ok(Self {
            storage,
            name: name.to_string(),
            size,
            crypto: Arc::new(crypto),
            key,
            verify_key,
            has_key_record,
        })
    }

    fn new_cursor(&self) -> Result<ArcvCursor, ArchiveError> {
        let mut source = self.storage.open_read(&self.name)?;
        source.seek(SeekFrom::Start(DATA_START)).map_err(ArchiveError::from)?;
        Ok(ArcvCursor {
            stream: RecordStream::new(source, self.size, DATA_START),
            crypto: Arc::clone(&self.crypto),
            key: self.key,
            verify_key: self.verify_key.clone(),
            has_key_record: self.has_key_record,
            entry: None,
        })
    }
}

impl ArchiveReader for ArcvReader {
    fn printable_name(&self) -> String {
        self.storage.printable_name(Some(&self.name))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn crypto_context(&self) -> Arc<CryptoContext> {
        Arc::clone(&self.crypto)
    }

    fn open_cursor(&self) -> Result<Box<dyn ArchiveCursor>, ArchiveError> {
        self.new_cursor().map(|cursor| Box::new(cursor) as Box<dyn ArchiveCursor>)
    }

    fn verify_signatures(&self) -> Result<SignatureState, ArchiveError> {
        if self.has_key_record && self.verify_key.is_none() {
            return Err(ArchiveError::NoPublicSignatureKey(self.printable_name()));
        }
        let mut cursor = self.new_cursor()?;
        let mut state = SignatureState::None;
        let mut last_signature_offset = DATA_START;
        loop {
            match cursor.stream.peek_record()? {
                None => break,
                Some(record) if record.kind == KIND_SIGNATURE => {
                    state = state.combine(ArchiveCursor::verify_signature_entry(
                        &mut cursor,
                        last_signature_offset,
                    )?);
                    last_signature_offset = cursor.stream.position;
                }
                Some(_) => cursor.stream.skip_record()?,
            }
        }
        Ok(state)
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

struct OpenEntry {
    compression: CompressionAlgorithm,
    crypt: CryptAlgorithm,
    buffer: Vec<u8>,
    consumed: usize,
    payload_done: bool,
    has_payload: bool,
}

/// One thread's independently positioned view of an `.arcv` archive.
pub struct ArcvCursor {
    stream: RecordStream,
    crypto: Arc<CryptoContext>,
    key: Option<[u8; 32]>,
    verify_key: Option<Vec<u8>>,
    has_key_record: bool,
    entry: Option<OpenEntry>,
}

impl ArcvCursor {
    fn open_payload(&mut self, compression: CompressionAlgorithm, crypt: CryptAlgorithm) {
        self.entry = Some(OpenEntry {
            compression,
            crypt,
            buffer: Vec::new(),
            consumed: 0,
            payload_done: false,
            has_payload: true,
        });
    }

    fn open_plain(&mut self) {
        self.entry = Some(OpenEntry {
            compression: CompressionAlgorithm::None,
            crypt: CryptAlgorithm::None,
            buffer: Vec::new(),
            consumed: 0,
            payload_done: true,
            has_payload: false,
        });
    }

    fn expect_record(&mut self, expected: u8) -> Result<RawRecord, ArchiveError> {
        if self.entry.is_some() {
            return Err(ArchiveError::internal_error("entry already open on cursor"));
        }
        let record = self
            .stream
            .read_record()?
            .ok_or_else(|| ArchiveError::CorruptData("read past end of archive".into()))?;
        if record.kind != expected {
            return Err(ArchiveError::CorruptData(format!(
                "expected {} entry at offset {}, found {}",
                kind_of(expected),
                record.offset,
                kind_of(record.kind)
            )));
        }
        Ok(record)
    }

    /// Loads the next payload chunk into the entry buffer. Returns false at
    /// the chunk terminator.
    fn load_next_chunk(&mut self) -> Result<bool, ArchiveError> {
        let (crypt, compression, payload_done) = {
            let entry = self
                .entry
                .as_ref()
                .ok_or_else(|| ArchiveError::internal_error("no open entry"))?;
            (entry.crypt, entry.compression, entry.payload_done)
        };
        if payload_done {
            return Ok(false);
        }

        let stored_len = self.stream.read_u32()?;
        if stored_len == 0 {
            self.entry.as_mut().expect("entry checked above").payload_done = true;
            return Ok(false);
        }
        let mut stored = vec![0u8; stored_len as usize];
        self.stream.read_exact(&mut stored)?;

        let opened = open_chunk(crypt, self.key.as_ref(), &stored)?;
        let plain = decompress_chunk(compression, &opened)?;

        let entry = self.entry.as_mut().expect("entry checked above");
        entry.buffer = plain;
        entry.consumed = 0;
        Ok(true)
    }
}

impl ArchiveCursor for ArcvCursor {
    fn seek(&mut self, offset: u64) -> Result<(), ArchiveError> {
        self.entry = None;
        self.stream.seek(offset)
    }

    fn tell(&mut self) -> Result<u64, ArchiveError> {
        Ok(self.stream.position)
    }

    fn is_eof(&mut self) -> Result<bool, ArchiveError> {
        Ok(self.stream.is_eof())
    }

    fn apply_crypto_context(&mut self, context: &CryptoContext) -> Result<(), ArchiveError> {
        // The context travels through descriptors; a cursor can only serve
        // the archive it was opened on.
        if context != self.crypto.as_ref() {
            return Err(ArchiveError::crypt_error("crypto context does not match archive"));
        }
        Ok(())
    }

    fn next_entry(&mut self) -> Result<Option<EntryEnvelope>, ArchiveError> {
        self.entry = None;
        loop {
            let Some(record) = self.stream.peek_record()? else {
                return Ok(None);
            };
            // salt and key records are consumed at open time
            if matches!(record.kind, KIND_SALT | KIND_KEY) {
                self.stream.skip_record()?;
                continue;
            }
            return Ok(Some(EntryEnvelope {
                kind: kind_of(record.kind),
                crypto: Arc::clone(&self.crypto),
                offset: record.offset,
            }));
        }
    }

    fn skip_entry(&mut self) -> Result<(), ArchiveError> {
        self.entry = None;
        self.stream.skip_record()
    }

    fn verify_signature_entry(&mut self, from_offset: u64) -> Result<SignatureState, ArchiveError> {
        let record = self.expect_record(KIND_SIGNATURE)?;
        let header: SignatureHeader = record.decode()?;

        if self.has_key_record && self.verify_key.is_none() {
            return Err(ArchiveError::NoPublicSignatureKey("signature key not configured".into()));
        }

        // A signature covers [from_offset, record start); the recorded
        // span must agree with what the caller observed.
        if header.from_offset != from_offset || header.to_offset != record.offset {
            return Ok(SignatureState::Invalid);
        }

        let mut hasher = Sha256::new();
        if let Some(verify_key) = &self.verify_key {
            hasher.update(verify_key);
        }
        self.stream.hash_span(header.from_offset, header.to_offset, &mut hasher)?;
        let digest = hex::encode(hasher.finalize());

        if digest == header.digest {
            Ok(SignatureState::Valid)
        } else {
            Ok(SignatureState::Invalid)
        }
    }

    fn read_file_entry(&mut self) -> Result<FileEntryHeader, ArchiveError> {
        let record = self.expect_record(KIND_FILE)?;
        let header: FileEntryHeader = record.decode()?;
        self.open_payload(header.byte_compression, header.crypt_algorithm);
        Ok(header)
    }

    fn read_image_entry(&mut self) -> Result<ImageEntryHeader, ArchiveError> {
        let record = self.expect_record(KIND_IMAGE)?;
        let header: ImageEntryHeader = record.decode()?;
        self.open_payload(header.byte_compression, header.crypt_algorithm);
        Ok(header)
    }

    fn read_directory_entry(&mut self) -> Result<DirectoryEntryHeader, ArchiveError> {
        let record = self.expect_record(KIND_DIRECTORY)?;
        let header = record.decode()?;
        self.open_plain();
        Ok(header)
    }

    fn read_link_entry(&mut self) -> Result<LinkEntryHeader, ArchiveError> {
        let record = self.expect_record(KIND_LINK)?;
        let header = record.decode()?;
        self.open_plain();
        Ok(header)
    }

    fn read_hardlink_entry(&mut self) -> Result<FileEntryHeader, ArchiveError> {
        let record = self.expect_record(KIND_HARDLINK)?;
        let header: FileEntryHeader = record.decode()?;
        self.open_payload(header.byte_compression, header.crypt_algorithm);
        Ok(header)
    }

    fn read_special_entry(&mut self) -> Result<SpecialEntryHeader, ArchiveError> {
        let record = self.expect_record(KIND_SPECIAL)?;
        let header = record.decode()?;
        self.open_plain();
        Ok(header)
    }

    fn read_meta_entry(&mut self) -> Result<MetaEntryHeader, ArchiveError> {
        let record = self.expect_record(KIND_META)?;
        let header = record.decode()?;
        self.open_plain();
        Ok(header)
    }

    fn read_data(&mut self, buffer: &mut [u8]) -> Result<(), ArchiveError> {
        let mut filled = 0usize;
        while filled < buffer.len() {
            let available = {
                let entry = self
                    .entry
                    .as_ref()
                    .ok_or_else(|| ArchiveError::internal_error("read_data without open entry"))?;
                entry.buffer.len() - entry.consumed
            };
            if available == 0 {
                if !self.load_next_chunk()? {
                    return Err(ArchiveError::CorruptData("unexpected end of entry data".into()));
                }
                continue;
            }
            let entry = self.entry.as_mut().expect("entry checked above");
            let take = available.min(buffer.len() - filled);
            buffer[filled..filled + take].copy_from_slice(&entry.buffer[entry.consumed..entry.consumed + take]);
            entry.consumed += take;
            filled += take;
        }
        Ok(())
    }

    fn eof_data(&mut self) -> Result<bool, ArchiveError> {
        let (buffered, done) = {
            let entry = self
                .entry
                .as_ref()
                .ok_or_else(|| ArchiveError::internal_error("eof_data without open entry"))?;
            (entry.buffer.len() - entry.consumed, entry.payload_done)
        };
        if buffered > 0 {
            return Ok(false);
        }
        if done {
            return Ok(true);
        }
        // At a chunk boundary with nothing buffered: peek the next frame.
        Ok(!self.load_next_chunk()?)
    }

    fn close_entry(&mut self) -> Result<(), ArchiveError> {
        let Some(entry) = self.entry.take() else {
            return Ok(());
        };
        if entry.has_payload && !entry.payload_done {
            self.stream.skip_payload()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Writer producing an `.arcv` archive as an intermediate part file.
///
/// The part is materialized in the temp directory; `finish` seals it with
/// a trailing signature record and hands ownership of the file to the
/// store callback.
pub struct ArcvWriter {
    file: Option<std::fs::File>,
    path: PathBuf,
    written: u64,
    hasher: Sha256,
    compression: CompressionAlgorithm,
    crypt: CryptAlgorithm,
    key: Option<[u8; 32]>,
    signing_key: Option<Vec<u8>>,
    store: StoreCallback,
    /// Plaintext staging buffer of the open payload entry.
    chunk_buffer: Vec<u8>,
    entry_open: bool,
    entry_compression: CompressionAlgorithm,
    finished: bool,
}

impl ArcvWriter {
    fn create(
        options: &ArchiveCreateOptions,
        signing_key: Option<Vec<u8>>,
        store: StoreCallback,
    ) -> Result<Self, ArchiveError> {
        let part = tempfile::Builder::new()
            .prefix("arcvault-part-")
            .suffix(".arcv")
            .tempfile_in(&options.temp_directory)
            .map_err(|err| ArchiveError::io_error(format!("cannot create intermediate file: {err}")))?;
        // From here on the intermediate file's lifetime is managed by this
        // writer, and after finish by the store callback's consumer.
        let (file, path) = part
            .keep()
            .map_err(|err| ArchiveError::io_error(format!("cannot persist intermediate file: {err}")))?;

        let key_and_salt = match (&options.crypt, &options.password) {
            (CryptAlgorithm::None, _) => None,
            (_, Some(password)) => {
                let mut salt = vec![0u8; 16];
                OsRng.fill_bytes(&mut salt);
                let key = derive_key(password, &salt)?;
                Some((key, salt))
            }
            (_, None) => {
                return Err(ArchiveError::crypt_error("encrypted archive requires a password"));
            }
        };

        let mut hasher = Sha256::new();
        if let Some(signing_key) = &signing_key {
            hasher.update(signing_key);
        }

        let mut writer = Self {
            file: Some(file),
            path,
            written: 0,
            hasher,
            compression: options.compression,
            crypt: options.crypt,
            key: key_and_salt.as_ref().map(|(key, _)| *key),
            signing_key,
            store,
            chunk_buffer: Vec::with_capacity(CHUNK_SIZE),
            entry_open: false,
            entry_compression: CompressionAlgorithm::None,
            finished: false,
        };

        // magic and version are outside the signed span
        writer.write_unhashed(MAGIC)?;
        writer.write_unhashed(&[FORMAT_VERSION])?;

        if let Some((_, salt)) = key_and_salt {
            let header = SaltHeader {
                algorithm: options.crypt,
                salt,
                kdf: format!("scrypt-{KDF_LOG_N}-{KDF_R}-{KDF_P}"),
            };
            writer.write_record(KIND_SALT, &header)?;
        }
        if let Some(signing_key) = writer.signing_key.clone() {
            let fingerprint = hex::encode(&Sha256::digest(&signing_key)[..8]);
            writer.write_record(KIND_KEY, &KeyHeader { fingerprint })?;
        }

        Ok(writer)
    }

    fn write_unhashed(&mut self, bytes: &[u8]) -> Result<(), ArchiveError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| ArchiveError::internal_error("write on finished archive writer"))?;
        file.write_all(bytes).map_err(ArchiveError::from)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), ArchiveError> {
        self.write_unhashed(bytes)?;
        self.hasher.update(bytes);
        Ok(())
    }

    fn write_record<T: Serialize>(&mut self, kind: u8, header: &T) -> Result<(), ArchiveError> {
        let header_bytes =
            serde_json::to_vec(header).map_err(|err| ArchiveError::format_error(format!("header encode: {err}")))?;
        self.write_raw(&[kind])?;
        self.write_raw(&(header_bytes.len() as u32).to_le_bytes())?;
        self.write_raw(&header_bytes)?;
        self.write_raw(&crc32fast::hash(&header_bytes).to_le_bytes())?;
        Ok(())
    }

    fn begin_payload(&mut self, compression: CompressionAlgorithm) -> Result<(), ArchiveError> {
        if self.entry_open {
            return Err(ArchiveError::internal_error("entry already open on archive writer"));
        }
        self.entry_open = true;
        self.entry_compression = compression;
        self.chunk_buffer.clear();
        Ok(())
    }

    fn flush_chunk(&mut self) -> Result<(), ArchiveError> {
        if self.chunk_buffer.is_empty() {
            return Ok(());
        }
        let compressed = compress_chunk(self.entry_compression, &self.chunk_buffer)?;
        let stored = seal_chunk(self.crypt, self.key.as_ref(), &compressed)?;
        self.write_raw(&(stored.len() as u32).to_le_bytes())?;
        self.write_raw(&stored)?;
        self.chunk_buffer.clear();
        Ok(())
    }

    /// The entry's stored algorithms: the writer's own settings override
    /// what the source archive used.
    fn stored_file_header(&self, header: &FileEntryHeader) -> FileEntryHeader {
        let mut stored = header.clone();
        stored.byte_compression = self.compression;
        stored.crypt_algorithm = self.crypt;
        stored
    }
}

impl ArchiveWriter for ArcvWriter {
    fn begin_file_entry(&mut self, header: &FileEntryHeader) -> Result<(), ArchiveError> {
        let stored = self.stored_file_header(header);
        self.write_record(KIND_FILE, &stored)?;
        self.begin_payload(stored.byte_compression)
    }

    fn begin_image_entry(&mut self, header: &ImageEntryHeader) -> Result<(), ArchiveError> {
        let mut stored = header.clone();
        stored.byte_compression = self.compression;
        stored.crypt_algorithm = self.crypt;
        self.write_record(KIND_IMAGE, &stored)?;
        self.begin_payload(stored.byte_compression)
    }

    fn begin_hardlink_entry(&mut self, header: &FileEntryHeader) -> Result<(), ArchiveError> {
        let stored = self.stored_file_header(header);
        self.write_record(KIND_HARDLINK, &stored)?;
        self.begin_payload(stored.byte_compression)
    }

    fn write_data(&mut self, buffer: &[u8]) -> Result<(), ArchiveError> {
        if !self.entry_open {
            return Err(ArchiveError::internal_error("write_data without open entry"));
        }
        let mut remaining = buffer;
        while !remaining.is_empty() {
            let take = remaining.len().min(CHUNK_SIZE - self.chunk_buffer.len());
            self.chunk_buffer.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];
            if self.chunk_buffer.len() == CHUNK_SIZE {
                self.flush_chunk()?;
            }
        }
        Ok(())
    }

    fn end_entry(&mut self) -> Result<(), ArchiveError> {
        if !self.entry_open {
            return Err(ArchiveError::internal_error("end_entry without open entry"));
        }
        self.flush_chunk()?;
        self.write_raw(&0u32.to_le_bytes())?;
        self.entry_open = false;
        Ok(())
    }

    fn write_directory_entry(&mut self, header: &DirectoryEntryHeader) -> Result<(), ArchiveError> {
        self.write_record(KIND_DIRECTORY, header)
    }

    fn write_link_entry(&mut self, header: &LinkEntryHeader) -> Result<(), ArchiveError> {
        self.write_record(KIND_LINK, header)
    }

    fn write_special_entry(&mut self, header: &SpecialEntryHeader) -> Result<(), ArchiveError> {
        self.write_record(KIND_SPECIAL, header)
    }

    fn write_meta_entry(&mut self, header: &MetaEntryHeader) -> Result<(), ArchiveError> {
        self.write_record(KIND_META, header)
    }

    fn finish(&mut self) -> Result<(), ArchiveError> {
        if self.finished {
            return Err(ArchiveError::internal_error("archive writer already finished"));
        }
        if self.entry_open {
            return Err(ArchiveError::internal_error("finish with open entry"));
        }
        self.finished = true;

        // trailing signature over every signed byte so far
        let signature = SignatureHeader {
            from_offset: DATA_START,
            to_offset: self.written,
            digest: hex::encode(self.hasher.clone().finalize()),
        };
        self.write_record(KIND_SIGNATURE, &signature)?;

        let mut file = self
            .file
            .take()
            .ok_or_else(|| ArchiveError::internal_error("archive writer already finished"))?;
        file.flush().map_err(ArchiveError::from)?;
        file.sync_all().map_err(ArchiveError::from)?;
        drop(file);

        let result = (self.store)(&self.path, self.written);
        if result.is_err() {
            let _ = std::fs::remove_file(&self.path);
        }
        result
    }
}

impl Drop for ArcvWriter {
    fn drop(&mut self) {
        // An abandoned writer leaves no intermediate file behind.
        if !self.finished {
            self.file.take();
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
