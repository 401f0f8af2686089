// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Command Line Interface
//!
//! Presentation layer: argument parsing and the mapping from CLI flags to
//! job options. The heavy lifting happens in the use cases; this module
//! only assembles their inputs and translates the outcome into an exit
//! code.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use arcvault_domain::{
    ArchiveError, CompressionAlgorithm, ConflictPolicy, CryptAlgorithm, EntrySelector, Password, Pattern,
    PatternKind, PatternList, PatternOptions,
};

use crate::application::commands::{JobMonitor, JobOptions};
use crate::application::services::reporter::ConsoleReporter;
use crate::application::use_cases::{ConvertArchives, ConvertOverrides, RestoreArchives, TestArchives};
use crate::infrastructure::adapters::{ArcvFormat, LocalStorageFactory, StdFileSystem};
use crate::infrastructure::config::EngineConfig;
use crate::infrastructure::logging::{init_logging, Verbosity};

/// Exit code for a clean run.
pub const EXIT_OK: i32 = 0;
/// Exit code for any terminal error.
pub const EXIT_ERROR: i32 = 1;
/// Exit code when the job was aborted by signal.
pub const EXIT_ABORTED: i32 = 130;

#[derive(Parser)]
#[command(
    name = "arcvault",
    version,
    about = "Verify, restore and convert backup archives",
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Only warnings and errors
    #[arg(long, short, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Human-readable sizes in status lines
    #[arg(long, global = true)]
    pub human: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Verify archive integrity without writing anything
    Test {
        /// Archives or directory patterns to test
        #[arg(required = true)]
        storages: Vec<String>,

        #[command(flatten)]
        selection: SelectionArgs,

        #[command(flatten)]
        common: CommonArgs,
    },
    /// Reconstruct archive contents on disk
    Restore {
        /// Archives or directory patterns to restore
        #[arg(required = true)]
        storages: Vec<String>,

        #[command(flatten)]
        selection: SelectionArgs,

        #[command(flatten)]
        common: CommonArgs,

        /// Destination root directory
        #[arg(long, short)]
        destination: Option<PathBuf>,

        /// Leading path components to strip from entry names
        #[arg(long, default_value_t = 0)]
        strip: usize,

        /// Conflict policy when a destination already exists
        #[arg(long, value_parser = parse_conflict_policy, default_value = "stop")]
        conflict: ConflictPolicy,

        /// Go through the motions without writing
        #[arg(long)]
        dry_run: bool,

        /// Pre-truncate regular files so holes stay sparse
        #[arg(long)]
        sparse: bool,

        /// Ownership override as `uid:gid`
        #[arg(long, value_parser = parse_owner)]
        owner: Option<(u32, u32)>,

        /// Permission override (octal)
        #[arg(long, value_parser = parse_permissions)]
        permissions: Option<u32>,

        /// Tolerate ownership errors
        #[arg(long)]
        no_stop_on_owner_error: bool,

        /// Tolerate extended-attribute errors
        #[arg(long)]
        no_stop_on_attribute_error: bool,
    },
    /// Re-encode archives with new compression, crypt and identity
    Convert {
        /// Archives or directory patterns to convert
        #[arg(required = true)]
        storages: Vec<String>,

        #[command(flatten)]
        common: CommonArgs,

        /// Byte compression of the destination archive
        #[arg(long, value_parser = parse_compression)]
        compression: Option<CompressionAlgorithm>,

        /// Crypt algorithm of the destination archive
        #[arg(long, value_parser = parse_crypt)]
        crypt: Option<CryptAlgorithm>,

        /// Replacement job UUID for the meta entry
        #[arg(long)]
        job_uuid: Option<uuid::Uuid>,

        /// Replacement schedule UUID for the meta entry
        #[arg(long)]
        schedule_uuid: Option<uuid::Uuid>,

        /// Replacement creation timestamp (RFC 3339)
        #[arg(long)]
        created: Option<chrono::DateTime<chrono::Utc>>,

        /// Replacement meta comment
        #[arg(long)]
        comment: Option<String>,

        /// Write the converted archive to this local directory instead of
        /// back onto the storage
        #[arg(long, short)]
        destination: Option<PathBuf>,
    },
}

#[derive(Args)]
pub struct SelectionArgs {
    /// Include pattern (repeatable; empty means all)
    #[arg(long, short)]
    pub include: Vec<String>,

    /// Exclude pattern (repeatable)
    #[arg(long, short = 'x')]
    pub exclude: Vec<String>,

    /// Pattern syntax: glob, regex, extended-regex
    #[arg(long, value_parser = parse_pattern_kind, default_value = "glob")]
    pub pattern_type: PatternKind,

    /// Case-insensitive pattern matching
    #[arg(long)]
    pub ignore_case: bool,
}

#[derive(Args)]
pub struct CommonArgs {
    /// Worker thread count (default: one per logical CPU)
    #[arg(long, short = 'j')]
    pub threads: Option<usize>,

    /// Archive password (or set ARCVAULT_PASSWORD)
    #[arg(long)]
    pub password: Option<String>,

    /// Do not verify archive signatures
    #[arg(long)]
    pub skip_signatures: bool,

    /// Treat missing keys or invalid signatures as fatal
    #[arg(long, conflicts_with = "skip_signatures")]
    pub force_signatures: bool,

    /// Keep going after per-entry errors
    #[arg(long)]
    pub no_stop_on_error: bool,

    /// Do not track fragments or report incomplete entries
    #[arg(long)]
    pub no_fragment_check: bool,

    /// Directory for intermediate files
    #[arg(long)]
    pub tmp_dir: Option<PathBuf>,
}

fn parse_pattern_kind(text: &str) -> Result<PatternKind, String> {
    PatternKind::parse(text).ok_or_else(|| format!("unknown pattern type '{text}'"))
}

fn parse_conflict_policy(text: &str) -> Result<ConflictPolicy, String> {
    match text {
        "stop" => Ok(ConflictPolicy::Stop),
        "rename" => Ok(ConflictPolicy::Rename),
        "overwrite" => Ok(ConflictPolicy::Overwrite),
        "skip-existing" => Ok(ConflictPolicy::SkipExisting),
        _ => Err(format!("unknown conflict policy '{text}'")),
    }
}

fn parse_compression(text: &str) -> Result<CompressionAlgorithm, String> {
    CompressionAlgorithm::parse(text).ok_or_else(|| format!("unknown compression algorithm '{text}'"))
}

fn parse_crypt(text: &str) -> Result<CryptAlgorithm, String> {
    CryptAlgorithm::parse(text).ok_or_else(|| format!("unknown crypt algorithm '{text}'"))
}

fn parse_owner(text: &str) -> Result<(u32, u32), String> {
    let (user, group) = text
        .split_once(':')
        .ok_or_else(|| "owner must be given as uid:gid".to_string())?;
    Ok((
        user.parse().map_err(|_| format!("invalid uid '{user}'"))?,
        group.parse().map_err(|_| format!("invalid gid '{group}'"))?,
    ))
}

fn parse_permissions(text: &str) -> Result<u32, String> {
    u32::from_str_radix(text, 8).map_err(|_| format!("invalid octal permissions '{text}'"))
}

fn compile_patterns(args: &SelectionArgs) -> Result<(EntrySelector, PatternList), ArchiveError> {
    let options = PatternOptions {
        ignore_case: args.ignore_case,
    };
    let mut include = EntrySelector::new();
    for source in &args.include {
        include.push(Pattern::compile(source, args.pattern_type, options)?);
    }
    let mut exclude = PatternList::new();
    for source in &args.exclude {
        exclude.push(Pattern::compile(source, args.pattern_type, options)?);
    }
    Ok((include, exclude))
}

fn build_monitor(password: Option<String>, is_aborted: impl Fn() -> bool + Send + Sync + 'static) -> JobMonitor {
    let password = password
        .or_else(|| std::env::var("ARCVAULT_PASSWORD").ok())
        .map(Password::new);
    JobMonitor {
        password: password.map(|password| {
            Arc::new(move || Some(password.clone())) as crate::application::commands::PasswordFn
        }),
        is_aborted: Some(Arc::new(is_aborted)),
        ..JobMonitor::default()
    }
}

fn base_options(common: &CommonArgs, config: &EngineConfig, human: bool) -> JobOptions {
    JobOptions {
        skip_verify_signatures: common.skip_signatures,
        force_verify_signatures: common.force_signatures,
        no_stop_on_error: common.no_stop_on_error,
        no_fragment_check: common.no_fragment_check,
        max_threads: common.threads.or(config.max_threads),
        buffer_size: config.buffer_size,
        entry_queue_capacity: config.entry_queue_capacity,
        human_sizes: human || config.human_sizes,
        temp_directory: common.tmp_dir.clone().unwrap_or_else(|| config.temp_directory()),
        ..JobOptions::default()
    }
}

/// Parses arguments, runs the selected command, and returns the process
/// exit code.
pub fn run(cli: Cli, is_aborted: impl Fn() -> bool + Send + Sync + Clone + 'static) -> i32 {
    let verbosity = if cli.quiet {
        Verbosity::Quiet
    } else if cli.verbose {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    };
    init_logging(verbosity);

    let config = match EngineConfig::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            tracing::error!("{error}");
            return EXIT_ERROR;
        }
    };

    // signature verification key, when one is configured
    let verify_key = match &config.signature_key_file {
        Some(path) => match std::fs::read(path) {
            Ok(key) => Some(key),
            Err(error) => {
                tracing::error!("cannot read signature key '{}': {error}", path.display());
                return EXIT_ERROR;
            }
        },
        None => None,
    };
    let format = Arc::new(ArcvFormat::with_keys(verify_key, None));
    let storage_factory = Arc::new(LocalStorageFactory::new());
    let filesystem: Arc<dyn arcvault_domain::FileSystem> = Arc::new(StdFileSystem::new());
    let reporter = ConsoleReporter::new(cli.human || config.human_sizes);

    let result = match cli.command {
        Command::Test {
            storages,
            selection,
            common,
        } => compile_patterns(&selection).and_then(|(include, exclude)| {
            let options = base_options(&common, &config, cli.human);
            let monitor = build_monitor(common.password.clone(), is_aborted.clone());
            TestArchives::new(format, storage_factory)
                .with_reporter(reporter)
                .execute(&storages, &include, &exclude, &options, &monitor)
        }),
        Command::Restore {
            storages,
            selection,
            common,
            destination,
            strip,
            conflict,
            dry_run,
            sparse,
            owner,
            permissions,
            no_stop_on_owner_error,
            no_stop_on_attribute_error,
        } => compile_patterns(&selection).and_then(|(include, exclude)| {
            let options = JobOptions {
                destination,
                directory_strip_count: strip,
                conflict_policy: conflict,
                dry_run,
                sparse_files: sparse,
                owner,
                permissions,
                no_stop_on_owner_error,
                no_stop_on_attribute_error,
                ..base_options(&common, &config, cli.human)
            };
            let monitor = build_monitor(common.password.clone(), is_aborted.clone());
            RestoreArchives::new(format, storage_factory, filesystem)
                .with_reporter(reporter)
                .execute(&storages, &include, &exclude, &options, &monitor)
        }),
        Command::Convert {
            storages,
            common,
            compression,
            crypt,
            job_uuid,
            schedule_uuid,
            created,
            comment,
            destination,
        } => {
            let options = JobOptions {
                destination,
                new_compression: compression,
                new_crypt: crypt,
                ..base_options(&common, &config, cli.human)
            };
            let overrides = ConvertOverrides {
                job_uuid,
                schedule_uuid,
                created_at: created,
                comment,
            };
            let monitor = build_monitor(common.password.clone(), is_aborted.clone());
            ConvertArchives::new(format, storage_factory, filesystem)
                .with_reporter(reporter)
                .execute(&storages, &overrides, &options, &monitor)
        }
    };

    match result {
        Ok(()) => EXIT_OK,
        Err(ArchiveError::Aborted) => {
            tracing::error!("aborted");
            EXIT_ABORTED
        }
        Err(error) => {
            tracing::error!("{error}");
            EXIT_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_owner() {
        assert_eq!(parse_owner("1000:100").unwrap(), (1000, 100));
        assert!(parse_owner("1000").is_err());
        assert!(parse_owner("a:b").is_err());
    }

    #[test]
    fn test_parse_permissions_octal() {
        assert_eq!(parse_permissions("644").unwrap(), 0o644);
        assert!(parse_permissions("9z9").is_err());
    }

    #[test]
    fn test_parse_restore_command() {
        let cli = Cli::parse_from([
            "arcvault",
            "restore",
            "/backups/full.arcv",
            "--destination",
            "/tmp/out",
            "--conflict",
            "rename",
            "--strip",
            "1",
            "--sparse",
        ]);
        match cli.command {
            Command::Restore {
                storages,
                conflict,
                strip,
                sparse,
                ..
            } => {
                assert_eq!(storages, vec!["/backups/full.arcv".to_string()]);
                assert_eq!(conflict, ConflictPolicy::Rename);
                assert_eq!(strip, 1);
                assert!(sparse);
            }
            _ => panic!("expected restore command"),
        }
    }

    #[test]
    fn test_parse_convert_command() {
        let cli = Cli::parse_from([
            "arcvault",
            "convert",
            "/backups/job-*.arcv",
            "--compression",
            "zstd",
            "--crypt",
            "aes256gcm",
        ]);
        match cli.command {
            Command::Convert {
                compression, crypt, ..
            } => {
                assert_eq!(compression, Some(CompressionAlgorithm::Zstd));
                assert_eq!(crypt, Some(CryptAlgorithm::Aes256Gcm));
            }
            _ => panic!("expected convert command"),
        }
    }
}
