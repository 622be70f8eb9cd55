// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ActionRule: a compiled pattern plus a command template (C1).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;

/// Everything needed to compile an [`ActionRule`], as produced by the
/// configuration parser (SPEC_FULL.md §6.A) for one action block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionEntry {
    pub name: String,
    pub pattern: String,
    pub command: String,
}

/// Error constructing an [`ActionRule`]. Always handled fail-soft by the
/// caller (§4.1, §7's `PatternCompileFailed`): logged as a warning, the
/// rule is dropped, construction of sibling rules continues.
#[derive(Debug, Error)]
#[error("action `{name}' error in pattern: {source}")]
pub struct ActionError {
    pub name: String,
    #[source]
    pub source: regex::Error,
}

/// A compiled regex plus the command it dispatches to. Immutable after
/// construction (§3).
#[derive(Debug, Clone)]
pub struct ActionRule {
    name: String,
    pattern_text: String,
    command: String,
    regex: Arc<Regex>,
}

/// Substrings captured by a successful match: index 0 is the whole match,
/// `1..=k` are the capture groups in source order (§4.1).
pub type Captures = Vec<String>;

impl ActionRule {
    /// Compile `entry.pattern`. Returns `Err` (never panics) if the pattern
    /// does not compile; the caller is responsible for logging and dropping
    /// the rule, per §4.1's "fail soft if the pattern is invalid".
    pub fn compile(entry: &ActionEntry) -> Result<Self, ActionError> {
        let regex = Regex::new(&entry.pattern).map_err(|source| ActionError {
            name: entry.name.clone(),
            source,
        })?;
        Ok(Self {
            name: entry.name.clone(),
            pattern_text: entry.pattern.clone(),
            command: entry.command.clone(),
            regex: Arc::new(regex),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern_text(&self) -> &str {
        &self.pattern_text
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Attempt to match `line`. Matching one rule never depends on any
    /// other rule (§4.2's independence contract).
    pub fn try_match(&self, line: &str) -> Option<Captures> {
        let caps = self.regex.captures(line)?;
        Some(
            caps.iter()
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect(),
        )
    }

    /// Build the argv for the spawned command: `[command_dir/command,
    /// capture_0, capture_1, ..., capture_{k-1}]` (§4.1). `command` is
    /// always treated as a bare filename joined under `command_dir` — never
    /// interpreted as a path by the caller, even if it contains `/`.
    pub fn build_argv(&self, captures: &Captures, command_dir: &Path) -> Vec<PathBuf> {
        let mut argv = Vec::with_capacity(1 + captures.len());
        argv.push(command_dir.join(&self.command));
        argv.extend(captures.iter().map(PathBuf::from));
        argv
    }
}
