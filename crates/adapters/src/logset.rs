// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! LogSet: the canonical-path-deduplicated collection of watched LogFiles (C3).

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use llad_core::{ActionChain, ActionRule, LogSection};
use thiserror::Error;

use crate::logfile::LogFile;

#[derive(Debug, Error)]
pub enum LogSetError {
    #[error("no log sections produced a usable entry")]
    Empty,
}

/// The full set of watched log files, keyed by canonical path so that two
/// config sections naming the same file (via different relative paths, or
/// a symlink) merge into a single entry with a concatenated ActionChain
/// (§3, §4.4's "two sections, same path" scenario).
pub struct LogSet {
    files: IndexMap<PathBuf, LogFile>,
}

impl LogSet {
    /// Build from parsed config sections. A section whose path cannot be
    /// canonicalized (parent directory missing, dangling symlink, etc.) is
    /// logged and dropped rather than failing the whole set (§4.4 fail-soft
    /// directory validation) -- the watcher will simply wait for the path
    /// to appear if its parent directory is later created, but a directory
    /// that does not exist at all yet cannot be resolved to a canonical
    /// path, so such sections are skipped with a warning. A section whose
    /// every action failed to compile produces an empty ActionChain and is
    /// dropped with a warning, since a log file with no rules has nothing
    /// to dispatch.
    pub fn build(sections: Vec<LogSection>) -> Result<Self, LogSetError> {
        let mut files: IndexMap<PathBuf, LogFile> = IndexMap::new();

        for section in sections {
            let canonical = match canonicalize_best_effort(&section.path) {
                Some(p) => p,
                None => {
                    tracing::warn!(path = %section.path, "could not resolve section path, skipping");
                    continue;
                }
            };

            let mut chain = ActionChain::new();
            for entry in &section.actions {
                match ActionRule::compile(entry) {
                    Ok(rule) => chain.push(rule),
                    Err(e) => tracing::warn!(error = %e, "dropping action with invalid pattern"),
                }
            }
            if chain.is_empty() {
                tracing::warn!(path = %section.path, "section has no usable actions, skipping");
                continue;
            }

            files
                .entry(canonical.clone())
                .and_modify(|existing| existing.actions_mut().extend(chain.clone()))
                .or_insert_with(|| LogFile::new(canonical, chain));
        }

        if files.is_empty() {
            return Err(LogSetError::Empty);
        }
        Ok(Self { files })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &LogFile)> {
        self.files.iter()
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut LogFile> {
        self.files.get_mut(path)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&PathBuf, &mut LogFile)> {
        self.files.iter_mut()
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.keys()
    }
}

/// Canonicalize `path` if it (or, failing that, its parent directory)
/// exists; a log file that has not been created yet is still a valid
/// target, so we fall back to canonicalizing the parent and rejoining the
/// basename.
fn canonicalize_best_effort(path: &str) -> Option<PathBuf> {
    let path = Path::new(path);
    if let Ok(canon) = path.canonicalize() {
        return Some(canon);
    }
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty())?;
    let file_name = path.file_name()?;
    let canon_parent = parent.canonicalize().ok()?;
    Some(canon_parent.join(file_name))
}
