// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! LogFile: incremental tail reader with rotation/truncation handling (C5).

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use llad_core::{ActionChain, Dispatcher};
use nix::fcntl::{fcntl, FcntlArg, OFlag};

/// Scan buffer size (§4.5, §9.A). A line longer than this is delivered in
/// fragments -- no reassembly across reads.
pub const SCAN_BUFFER_LEN: usize = 4096;
/// Files smaller than this on first open are scanned from byte 0 instead
/// of being positioned at end-of-file (§4.5, §9.A).
pub const INITIAL_REWIND_THRESHOLD: u64 = 8 * 1024;

/// Outcome of one `scan` call, surfaced for tests (§8's invariants talk
/// about exact line/match counts).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanOutcome {
    pub lines_scanned: usize,
    pub matches: usize,
    pub truncated: bool,
}

/// One watched log file: its canonical path, its owning ActionChain, and
/// the read cursor the watcher thread advances (§3, §4.5).
pub struct LogFile {
    canonical_path: PathBuf,
    parent_dir: PathBuf,
    basename: String,
    file: Option<File>,
    read_offset: u64,
    pending: Vec<u8>,
    actions: ActionChain,
}

impl LogFile {
    pub fn new(canonical_path: PathBuf, actions: ActionChain) -> Self {
        let parent_dir = canonical_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        let basename = canonical_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            canonical_path,
            parent_dir,
            basename,
            file: None,
            read_offset: 0,
            pending: Vec::new(),
            actions,
        }
    }

    pub fn canonical_path(&self) -> &Path {
        &self.canonical_path
    }

    pub fn parent_dir(&self) -> &Path {
        &self.parent_dir
    }

    pub fn basename(&self) -> &str {
        &self.basename
    }

    pub fn actions(&self) -> &ActionChain {
        &self.actions
    }

    pub fn actions_mut(&mut self) -> &mut ActionChain {
        &mut self.actions
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn read_offset(&self) -> u64 {
        self.read_offset
    }

    /// Try to open for reading. On success, mark the fd non-blocking and
    /// position it: files smaller than [`INITIAL_REWIND_THRESHOLD`] are
    /// scanned from byte 0, larger ones from end-of-file (§4.5). On
    /// failure, log a notice and leave the file closed.
    pub fn open_or_wait(&mut self) -> bool {
        match OpenOptions::new().read(true).open(&self.canonical_path) {
            Ok(file) => {
                set_nonblocking(&file);
                let size = file.metadata().map(|m| m.len()).unwrap_or(0);
                let mut file = file;
                let start = if size < INITIAL_REWIND_THRESHOLD { 0 } else { size };
                if file.seek(SeekFrom::Start(start)).is_err() {
                    tracing::warn!(path = %self.canonical_path.display(), "failed to seek newly opened log file");
                }
                self.read_offset = start;
                self.pending.clear();
                self.file = Some(file);
                true
            }
            Err(e) => {
                tracing::info!(path = %self.canonical_path.display(), error = %e, "could not open log file");
                self.file = None;
                false
            }
        }
    }

    /// Close the handle. The next `scan` will reopen it (§4.5).
    pub fn close(&mut self) {
        self.file = None;
        self.pending.clear();
    }

    /// Read new bytes, split into lines, and hand each line to the owning
    /// `ActionChain`. Handles truncation (reopen at end, no workers
    /// spawned for pre-truncation content) and rotation (`reopen = true`
    /// closes and reopens before scanning).
    pub async fn scan(
        &mut self,
        reopen: bool,
        log_name: &str,
        dispatcher: &dyn Dispatcher,
    ) -> ScanOutcome {
        if reopen {
            self.close();
        }
        if !self.is_open() && !self.open_or_wait() {
            return ScanOutcome::default();
        }

        let Some(file) = self.file.as_ref() else {
            return ScanOutcome::default();
        };
        let size = match file.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                tracing::warn!(path = %self.canonical_path.display(), error = %e, "failed to stat open log file");
                return ScanOutcome::default();
            }
        };

        if size < self.read_offset {
            tracing::info!(path = %self.canonical_path.display(), "truncation detected");
            self.close();
            self.open_or_wait();
            // position explicitly at end regardless of the rewind threshold:
            // a truncated file should never be rescanned from 0.
            if let Some(file) = self.file.as_mut() {
                let end = file.metadata().map(|m| m.len()).unwrap_or(0);
                let _ = file.seek(SeekFrom::Start(end));
                self.read_offset = end;
            }
            return ScanOutcome {
                truncated: true,
                ..Default::default()
            };
        }

        let mut outcome = ScanOutcome::default();
        let mut buf = [0u8; SCAN_BUFFER_LEN];
        loop {
            let Some(file) = self.file.as_mut() else {
                break;
            };
            let room = SCAN_BUFFER_LEN.saturating_sub(self.pending.len());
            if room == 0 {
                self.flush_pending_as_line(log_name, dispatcher, &mut outcome).await;
                continue;
            }
            match file.read(&mut buf[..room]) {
                Ok(0) => break,
                Ok(n) => {
                    self.read_offset += n as u64;
                    self.pending.extend_from_slice(&buf[..n]);
                    self.drain_complete_lines(log_name, dispatcher, &mut outcome).await;
                }
                Err(e) if is_benign_read_error(&e) => break,
                Err(e) => {
                    tracing::warn!(path = %self.canonical_path.display(), error = %e, "error reading log file");
                    break;
                }
            }
        }
        outcome
    }

    async fn drain_complete_lines(
        &mut self,
        log_name: &str,
        dispatcher: &dyn Dispatcher,
        outcome: &mut ScanOutcome,
    ) {
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop(); // trailing '\n'
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.feed_line(&line, log_name, dispatcher, outcome).await;
        }
        if self.pending.len() >= SCAN_BUFFER_LEN {
            self.flush_pending_as_line(log_name, dispatcher, outcome).await;
        }
    }

    async fn flush_pending_as_line(
        &mut self,
        log_name: &str,
        dispatcher: &dyn Dispatcher,
        outcome: &mut ScanOutcome,
    ) {
        if self.pending.is_empty() {
            return;
        }
        let line = std::mem::take(&mut self.pending);
        self.feed_line(&line, log_name, dispatcher, outcome).await;
    }

    async fn feed_line(
        &mut self,
        line: &[u8],
        log_name: &str,
        dispatcher: &dyn Dispatcher,
        outcome: &mut ScanOutcome,
    ) {
        let line = String::from_utf8_lossy(line);
        outcome.lines_scanned += 1;
        outcome.matches += self.actions.dispatch(&line, log_name, dispatcher).await;
    }
}

fn is_benign_read_error(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock) || e.raw_os_error() == Some(libc::ENOENT)
}

fn set_nonblocking(file: &File) {
    let fd = file.as_raw_fd();
    if let Ok(flags) = fcntl(fd, FcntlArg::F_GETFL) {
        let mut flags = OFlag::from_bits_truncate(flags);
        flags.insert(OFlag::O_NONBLOCK);
        let _ = fcntl(fd, FcntlArg::F_SETFL(flags));
    }
}

#[cfg(test)]
#[path = "logfile_tests.rs"]
mod tests;
