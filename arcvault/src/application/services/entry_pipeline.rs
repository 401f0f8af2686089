// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Entry Pipeline
//!
//! The producer side of every job: turns one open archive into a stream of
//! entry descriptors on the entry queue. Signature entries never reach
//! workers: the pipeline verifies (or skips) them inline, tracking the
//! span each signature covers.
//!
//! ## Descriptor contract
//!
//! A descriptor carries `(archive epoch, shared archive handle, entry
//! kind, crypto context, archive offset)`. Workers seek their own cursor
//! to the offset and read the entry themselves; the pipeline advances past
//! the entry with `skip_entry` and never touches payload bytes. The epoch
//! lets a worker detect that a descriptor refers to a newer archive than
//! its cached cursor.
//!
//! ## Exit conditions
//!
//! The loop stops on end-of-archive, on a terminal failure flag set by any
//! worker (unless the job runs with `no_stop_on_error`), on an invalid
//! signature state (unless verification is skipped), and on abort. The
//! caller closes the entry queue afterwards in every case.

use std::sync::Arc;

use arcvault_domain::services::archive_service::ArchiveReader;
use arcvault_domain::{ArchiveError, CryptoContext, EntryKind, SignatureState};

use crate::application::commands::JobOptions;
use crate::application::services::job_state::JobState;
use crate::infrastructure::runtime::MessageQueue;

/// One entry descriptor on the entry queue.
pub struct EntryMessage {
    pub archive_epoch: u32,
    pub archive: Arc<dyn ArchiveReader>,
    pub kind: EntryKind,
    pub crypto: Arc<CryptoContext>,
    pub offset: u64,
}

/// Pre-verifies the archive signatures before any entry is processed.
///
/// Returns the aggregate state to feed into the pipeline loop:
/// `NoPublicSignatureKey` downgrades to `Skipped` unless verification is
/// forced; an invalid state is an error when forced and a warning
/// otherwise.
pub fn verify_archive_signatures(
    archive: &Arc<dyn ArchiveReader>,
    options: &JobOptions,
) -> Result<SignatureState, ArchiveError> {
    if options.skip_verify_signatures {
        return Ok(SignatureState::Skipped);
    }

    let state = match archive.verify_signatures() {
        Ok(state) => state,
        Err(ArchiveError::NoPublicSignatureKey(name)) if !options.force_verify_signatures => {
            tracing::warn!("no public signature key for '{name}', skipping signature verification");
            SignatureState::Skipped
        }
        Err(error) => return Err(error),
    };

    if !state.is_valid() {
        if options.force_verify_signatures {
            return Err(ArchiveError::InvalidSignature(archive.printable_name()));
        }
        tracing::warn!("invalid signature in '{}'", archive.printable_name());
    }
    Ok(state)
}

/// Runs the pipeline over one archive, publishing descriptors until the
/// archive is exhausted or the job stops.
///
/// The final aggregate signature state is returned so the driver can emit
/// the end-of-archive signature verdict.
pub fn run_entry_pipeline(
    archive: &Arc<dyn ArchiveReader>,
    queue: &MessageQueue<EntryMessage>,
    state: &JobState,
    options: &JobOptions,
) -> Result<SignatureState, ArchiveError> {
    let mut cursor = archive.open_cursor()?;
    let mut signature_state = SignatureState::None;
    let mut last_signature_offset = cursor.tell()?;

    loop {
        if !state.should_continue(options.no_stop_on_error) {
            break;
        }
        if !options.skip_verify_signatures && !signature_state.is_valid() {
            break;
        }
        if cursor.is_eof()? {
            break;
        }

        let Some(envelope) = cursor.next_entry()? else {
            break;
        };
        let entry_offset = envelope.offset;

        if envelope.kind != EntryKind::Signature {
            let message = EntryMessage {
                archive_epoch: 1,
                archive: Arc::clone(archive),
                kind: envelope.kind,
                crypto: envelope.crypto,
                offset: envelope.offset,
            };
            if !queue.put(message) {
                // queue closed under us: the job is shutting down
                break;
            }
            cursor.skip_entry()?;
        } else {
            if !options.skip_verify_signatures {
                // seek onto the record: next_entry only peeked it
                cursor.seek(envelope.offset)?;
                signature_state = signature_state.combine(cursor.verify_signature_entry(last_signature_offset)?);
            } else {
                cursor.skip_entry()?;
            }
            last_signature_offset = cursor.tell()?;
        }

        state.update_running(false, |info| {
            if entry_offset > info.storage.done {
                info.storage.done = entry_offset;
            }
        });
    }

    Ok(signature_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::commands::JobMonitor;
    use crate::infrastructure::adapters::local_storage::LocalStorage;
    use crate::infrastructure::adapters::vault_format::ArcvFormat;
    use arcvault_domain::services::archive_service::{
        ArchiveCreateOptions, ArchiveFormat, FileEntryHeader, StoreCallback,
    };
    use arcvault_domain::services::storage_service::Storage;
    use arcvault_domain::{CompressionAlgorithm, CryptAlgorithm, FileMetadata};

    fn build_archive(dir: &std::path::Path, fragments: &[(&str, u64, u64, &[u8])]) -> Arc<dyn ArchiveReader> {
        let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new(dir));
        let format = ArcvFormat::new();
        let destination = dir.join("pipeline.arcv");
        let store: StoreCallback = Box::new(move |part, _size| {
            std::fs::rename(part, &destination).map_err(ArchiveError::from)
        });
        let mut writer = format
            .create(
                &ArchiveCreateOptions {
                    compression: CompressionAlgorithm::None,
                    crypt: CryptAlgorithm::None,
                    password: None,
                    temp_directory: dir.to_path_buf(),
                },
                store,
            )
            .unwrap();
        for (name, total, offset, payload) in fragments {
            writer
                .begin_file_entry(&FileEntryHeader {
                    names: vec![name.to_string()],
                    metadata: FileMetadata::regular(*total),
                    fragment_offset: *offset,
                    fragment_size: payload.len() as u64,
                    delta_compression: CompressionAlgorithm::None,
                    byte_compression: CompressionAlgorithm::None,
                    crypt_algorithm: CryptAlgorithm::None,
                })
                .unwrap();
            writer.write_data(payload).unwrap();
            writer.end_entry().unwrap();
        }
        writer.finish().unwrap();
        format.open(&storage, "pipeline.arcv", None).unwrap()
    }

    #[test]
    fn test_pipeline_publishes_in_archive_order() {
        let dir = tempfile::tempdir().unwrap();
        let archive = build_archive(
            dir.path(),
            &[("/a", 4, 0, b"aaaa"), ("/b", 2, 0, b"bb"), ("/c", 1, 0, b"c")],
        );
        let queue = MessageQueue::bounded(16);
        let state = JobState::new(JobMonitor::default());
        let options = JobOptions::default();

        let signature_state = run_entry_pipeline(&archive, &queue, &state, &options).unwrap();
        assert_eq!(signature_state, SignatureState::Valid);
        queue.close();

        let mut offsets = Vec::new();
        while let Some(message) = queue.get() {
            assert_eq!(message.kind, EntryKind::File);
            assert_eq!(message.archive_epoch, 1);
            offsets.push(message.offset);
        }
        assert_eq!(offsets.len(), 3);
        let mut sorted = offsets.clone();
        sorted.sort_unstable();
        assert_eq!(offsets, sorted);
    }

    #[test]
    fn test_pipeline_stops_on_abort() {
        let dir = tempfile::tempdir().unwrap();
        let archive = build_archive(dir.path(), &[("/a", 4, 0, b"aaaa"), ("/b", 2, 0, b"bb")]);
        let queue = MessageQueue::bounded(16);
        let monitor = JobMonitor {
            is_aborted: Some(std::sync::Arc::new(|| true)),
            ..JobMonitor::default()
        };
        let state = JobState::new(monitor);
        let options = JobOptions::default();

        run_entry_pipeline(&archive, &queue, &state, &options).unwrap();
        queue.close();
        assert!(queue.get().is_none());
    }

    #[test]
    fn test_pipeline_stops_on_worker_failure() {
        let dir = tempfile::tempdir().unwrap();
        let archive = build_archive(dir.path(), &[("/a", 4, 0, b"aaaa"), ("/b", 2, 0, b"bb")]);
        let queue = MessageQueue::bounded(16);
        let state = JobState::new(JobMonitor::default());
        state.set_fail_error(ArchiveError::CorruptData("worker died".into()));
        let options = JobOptions::default();

        run_entry_pipeline(&archive, &queue, &state, &options).unwrap();
        queue.close();
        assert!(queue.get().is_none());
    }

    #[test]
    fn test_verify_helper_skips_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let archive = build_archive(dir.path(), &[("/a", 4, 0, b"aaaa")]);
        let options = JobOptions {
            skip_verify_signatures: true,
            ..JobOptions::default()
        };
        assert_eq!(
            verify_archive_signatures(&archive, &options).unwrap(),
            SignatureState::Skipped
        );
        assert_eq!(
            verify_archive_signatures(&archive, &JobOptions::default()).unwrap(),
            SignatureState::Valid
        );
    }
}
