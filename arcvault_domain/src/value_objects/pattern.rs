// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pattern Value Object
//!
//! This module provides the `Pattern` value object used for include/exclude
//! evaluation and archive-name matching throughout the engine. A pattern is
//! compiled once and matched many times on the hot path, so compilation
//! produces four pre-anchored regular expression variants up front.
//!
//! ## Overview
//!
//! Patterns come in three kinds:
//!
//! - **Glob**: shell-style wildcards, translated to a regular expression
//!   (`*` matches any run, `?` matches one character, all regex
//!   metacharacters are escaped)
//! - **Regex**: the expression is used as written
//! - **ExtendedRegex**: accepted for compatibility with the extended POSIX
//!   syntax; compiles through the same backend as `Regex`
//!
//! ## Compiled Variants
//!
//! Compilation produces four variants so the match mode never has to
//! rewrite the expression at match time:
//!
//! | Mode | Anchoring |
//! |------|-----------|
//! | `Begin` | `^expr` |
//! | `End`   | `expr$` |
//! | `Exact` | `^expr$` |
//! | `Any`   | `expr` |
//!
//! The optional `ignore_case` flag is honored by all four variants.
//!
//! ## Errors
//!
//! A pattern with invalid syntax fails compilation with
//! [`ArchiveError::InvalidPattern`].

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;

/// Pattern syntax selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternKind {
    /// Shell-style glob (`*`, `?`)
    Glob,
    /// Regular expression
    Regex,
    /// Extended regular expression (same backend, kept for CLI compatibility)
    ExtendedRegex,
}

impl PatternKind {
    /// Parses a pattern kind name as used on the command line.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "glob" => Some(PatternKind::Glob),
            "regex" => Some(PatternKind::Regex),
            "extended_regex" | "extended-regex" => Some(PatternKind::ExtendedRegex),
            _ => None,
        }
    }

    /// Returns the canonical name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Glob => "glob",
            PatternKind::Regex => "regex",
            PatternKind::ExtendedRegex => "extended_regex",
        }
    }
}

/// Which of the four compiled variants a match uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Match must start at the given index
    Begin,
    /// Match must end at the end of the string
    End,
    /// Match must cover the whole remainder of the string
    Exact,
    /// Match anywhere at or after the given index
    Any,
}

/// Compilation options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatternOptions {
    /// Case-insensitive matching
    pub ignore_case: bool,
}

/// A compiled pattern with its four anchored variants.
///
/// `Pattern` is immutable after compilation and cheap to match; cloning
/// recompiles nothing because `regex::Regex` is internally reference
/// counted.
#[derive(Debug, Clone)]
pub struct Pattern {
    kind: PatternKind,
    source: String,
    regex_source: String,
    options: PatternOptions,
    regex_begin: Regex,
    regex_end: Regex,
    regex_exact: Regex,
    regex_any: Regex,
}

impl Pattern {
    /// Compiles a pattern of the given kind.
    pub fn compile(source: &str, kind: PatternKind, options: PatternOptions) -> Result<Self, ArchiveError> {
        let regex_source = match kind {
            PatternKind::Glob => glob_to_regex(source),
            PatternKind::Regex | PatternKind::ExtendedRegex => source.to_string(),
        };

        let build = |expr: String| -> Result<Regex, ArchiveError> {
            RegexBuilder::new(&expr)
                .case_insensitive(options.ignore_case)
                .build()
                .map_err(|err| ArchiveError::InvalidPattern(format!("{source}: {err}")))
        };

        let begin = if regex_source.starts_with('^') {
            regex_source.clone()
        } else {
            format!("^{regex_source}")
        };
        let end = if regex_source.ends_with('$') {
            regex_source.clone()
        } else {
            format!("{regex_source}$")
        };
        let exact = {
            let mut expr = String::with_capacity(regex_source.len() + 2);
            if !regex_source.starts_with('^') {
                expr.push('^');
            }
            expr.push_str(&regex_source);
            if !regex_source.ends_with('$') {
                expr.push('$');
            }
            expr
        };

        Ok(Self {
            kind,
            source: source.to_string(),
            regex_begin: build(begin)?,
            regex_end: build(end)?,
            regex_exact: build(exact)?,
            regex_any: build(regex_source.clone())?,
            regex_source,
            options,
        })
    }

    /// The pattern kind this was compiled as.
    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    /// The original pattern text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The translated regular expression text.
    pub fn regex_source(&self) -> &str {
        &self.regex_source
    }

    /// The options this was compiled with.
    pub fn options(&self) -> PatternOptions {
        self.options
    }

    /// Matches `text` from `start` using the variant selected by `mode`.
    ///
    /// Returns the absolute match index and the match length, or `None`.
    pub fn matches(&self, text: &str, start: usize, mode: MatchMode) -> Option<(usize, usize)> {
        if start > text.len() {
            return None;
        }
        let haystack = &text[start..];
        let regex = match mode {
            MatchMode::Begin => &self.regex_begin,
            MatchMode::End => &self.regex_end,
            MatchMode::Exact => &self.regex_exact,
            MatchMode::Any => &self.regex_any,
        };
        regex
            .find(haystack)
            .map(|found| (start + found.start(), found.end() - found.start()))
    }

    /// Convenience predicate over [`Pattern::matches`].
    pub fn is_match(&self, text: &str, mode: MatchMode) -> bool {
        self.matches(text, 0, mode).is_some()
    }

    /// Checks whether a string contains unescaped glob metacharacters.
    ///
    /// Used by the storage layer to decide between "single archive" and
    /// "directory of archives matching a pattern".
    pub fn is_pattern(text: &str) -> bool {
        let mut chars = text.chars();
        while let Some(ch) = chars.next() {
            match ch {
                '\\' => {
                    // escaped character is literal
                    chars.next();
                }
                '*' | '?' | '[' | '{' => return true,
                _ => {}
            }
        }
        false
    }

    /// Checks whether a pattern of the given kind would compile.
    pub fn is_valid(source: &str, kind: PatternKind) -> bool {
        Pattern::compile(source, kind, PatternOptions::default()).is_ok()
    }
}

/// Translates a glob into regular expression source.
///
/// `*` becomes `.*`, `?` becomes `.`, and every regex metacharacter is
/// escaped so it matches literally.
fn glob_to_regex(glob: &str) -> String {
    let mut expr = String::with_capacity(glob.len() * 2);
    for ch in glob.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            '.' | '[' | ']' | '^' | '$' | '(' | ')' | '{' | '}' | '+' | '|' | '\\' => {
                expr.push('\\');
                expr.push(ch);
            }
            _ => expr.push(ch),
        }
    }
    expr
}
