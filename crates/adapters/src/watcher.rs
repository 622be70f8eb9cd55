// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Watcher: notify-backed change detection driving LogSet scans (C4).
//!
//! The original inotify design watches each file directly (content
//! modification) and its parent directory (create/delete, to catch
//! rotation by rename-and-recreate). `notify` doesn't hand back raw watch
//! descriptors, so [`WatchId`] is a locally assigned surrogate key that
//! preserves the "at most one active watch per target" invariant without
//! depending on descriptor provenance (SPEC_FULL.md §9.A).
//!
//! Dispatch is keyed on the event's `EventKind`, not on which watch (file
//! or directory) happened to report it: `notify` reports a path-targeted
//! `Create`/`Remove` the same way whether it came from watching the
//! file's own inode or from watching its parent directory, so there is
//! nothing to gain from threading the distinction through -- and
//! conflating them was the original bug this module fixes relative to its
//! first draft (rotation stopped delivering content events because the
//! recreated file's watch was never re-armed).

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use llad_core::Dispatcher;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::logset::LogSet;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to initialize the filesystem watcher: {0}")]
    Init(#[source] notify::Error),
    #[error("failed to watch `{path}': {source}")]
    Register {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Locally assigned surrogate for an OS watch descriptor (§9.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

#[derive(Default)]
struct WatchRegistry {
    next_id: u64,
    file_watches: HashMap<PathBuf, WatchId>,
}

impl WatchRegistry {
    fn next(&mut self) -> WatchId {
        self.next_id += 1;
        WatchId(self.next_id)
    }

    /// Record that `path` currently has an active file-watch. A no-op if
    /// already recorded: "at most one active file-watch descriptor per
    /// LogFile" (§3) is an invariant of this map's keys, not of how many
    /// times `register_file` is called.
    fn register_file(&mut self, path: PathBuf) -> WatchId {
        if let Some(id) = self.file_watches.get(&path) {
            return *id;
        }
        let id = self.next();
        self.file_watches.insert(path, id);
        id
    }

    fn is_file_watched(&self, path: &Path) -> bool {
        self.file_watches.contains_key(path)
    }

    fn mark_file_unwatched(&mut self, path: &Path) {
        self.file_watches.remove(path);
    }
}

/// Drives `LogSet::scan` calls from filesystem change notifications.
pub struct Watcher {
    log_set: LogSet,
    dispatcher: std::sync::Arc<dyn Dispatcher>,
    registry: WatchRegistry,
    inner: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
}

impl Watcher {
    /// Set up one directory watch per distinct parent directory and one
    /// file watch per log file, then perform the initial scan of each
    /// (§4.4, §4.5).
    pub async fn new(
        mut log_set: LogSet,
        dispatcher: std::sync::Arc<dyn Dispatcher>,
    ) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )
        .map_err(WatchError::Init)?;

        let mut registry = WatchRegistry::default();
        let dirs: Vec<PathBuf> = {
            let mut dirs: Vec<PathBuf> = log_set.paths().map(|p| parent_of(p)).collect();
            dirs.sort();
            dirs.dedup();
            dirs
        };
        let mut any_watch = false;
        for dir in dirs {
            match inner.watch(&dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    any_watch = true;
                }
                Err(source) => {
                    tracing::error!(path = %dir.display(), error = %source, "could not watch directory");
                }
            }
        }
        let file_paths: Vec<PathBuf> = log_set.paths().cloned().collect();
        for path in file_paths {
            if inner.watch(&path, RecursiveMode::NonRecursive).is_ok() {
                registry.register_file(path);
                any_watch = true;
            }
            // a file watch can fail benignly if the file doesn't exist yet;
            // the directory watch will pick up its creation.
        }

        if !any_watch {
            return Err(WatchError::Register {
                path: PathBuf::from("<configured log files>"),
                source: notify::Error::generic("no directory or file watch could be installed"),
            });
        }

        for (_, log) in log_set.iter_mut() {
            log.scan(false, &log_name(log.canonical_path()), dispatcher.as_ref()).await;
        }

        Ok(Self {
            log_set,
            dispatcher,
            registry,
            inner,
            events: rx,
        })
    }

    /// Process change notifications until `shutdown` resolves. Returns
    /// once shutdown has been requested; the caller is responsible for
    /// draining the worker manager afterwards (§5, §7).
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("Received signal: stopping daemon.");
                    return;
                }
                event = self.events.recv() => {
                    match event {
                        Some(Ok(event)) => self.handle_event(event).await,
                        Some(Err(e)) => tracing::warn!(error = %e, "watch error"),
                        None => {
                            tracing::warn!("watch event channel closed unexpectedly");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn handle_event(&mut self, event: Event) {
        for path in event.paths.clone() {
            if self.log_set.paths().any(|p| *p == path) {
                self.handle_log_event(&path, &event.kind).await;
            }
        }
    }

    /// Dispatch one change-notification event for a known log path.
    ///
    /// - `Remove` (DELETE) or a rename-source `Modify(Name(From))`
    ///   (MOVED-FROM): drop the file-watch and close the `LogFile`; the
    ///   slot is now "unwatched" until a later `Create`.
    /// - `Create`, or a rename-target/ambiguous `Modify(Name(..))` (CREATE
    ///   / MOVED-TO / effectively ATTRIB for our purposes): if currently
    ///   unwatched, try to add a file-watch; on success log "Watching
    ///   file …" and rescan with `reopen = true`; on failure, log a
    ///   notice and stay unwatched (a later event may succeed).
    /// - anything else (plain content `Modify`): `scan(reopen = false)`.
    async fn handle_log_event(&mut self, path: &Path, kind: &EventKind) {
        match kind {
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                let _ = self.inner.unwatch(path);
                self.registry.mark_file_unwatched(path);
                if let Some(log) = self.log_set.get_mut(path) {
                    log.close();
                }
            }
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_)) => {
                if !self.registry.is_file_watched(path) {
                    match self.inner.watch(path, RecursiveMode::NonRecursive) {
                        Ok(()) => {
                            self.registry.register_file(path.to_path_buf());
                            tracing::info!("Watching file {}", path.display());
                        }
                        Err(e) => {
                            tracing::info!(
                                path = %path.display(),
                                error = %e,
                                "could not add file watch, leaving unwatched"
                            );
                            return;
                        }
                    }
                }
                let name = log_name(path);
                if let Some(log) = self.log_set.get_mut(path) {
                    log.scan(true, &name, self.dispatcher.as_ref()).await;
                }
            }
            _ => {
                let name = log_name(path);
                if let Some(log) = self.log_set.get_mut(path) {
                    log.scan(false, &name, self.dispatcher.as_ref()).await;
                }
            }
        }
    }
}

fn parent_of(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("/"))
}

fn log_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use llad_core::{ActionEntry, ActionRule, Captures};
    use parking_lot::Mutex;
    use std::io::Write as _;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingDispatcher {
        names: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Dispatcher for RecordingDispatcher {
        async fn dispatch(&self, rule: &ActionRule, _captures: &Captures) -> Result<(), String> {
            self.names.lock().push(rule.name().to_string());
            Ok(())
        }
    }

    async fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
        let start = tokio::time::Instant::now();
        loop {
            if f() {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn content_append_is_picked_up_through_the_file_watch() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("a.log");
        std::fs::write(&log_path, "").unwrap();

        let sections = vec![llad_core::LogSection {
            path: log_path.to_str().unwrap().to_string(),
            actions: vec![ActionEntry {
                name: "any".into(),
                pattern: ".".into(),
                command: "cmd".into(),
            }],
        }];
        let log_set = LogSet::build(sections).unwrap();
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let watcher = Watcher::new(log_set, dispatcher.clone()).await.unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(watcher.run(async {
            let _ = rx.await;
        }));

        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&log_path).unwrap();
            writeln!(f, "line one").unwrap();
        }

        let seen = wait_until(Duration::from_secs(3), || !dispatcher.names.lock().is_empty()).await;
        assert!(seen, "appended line should have been dispatched");

        let _ = tx.send(());
        let _ = handle.await;
    }

    #[tokio::test]
    async fn rotation_reattaches_the_watch_to_the_recreated_file() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("rot.log");
        std::fs::write(&log_path, "").unwrap();

        let mut log_set = LogSet::build(vec![llad_core::LogSection {
            path: log_path.to_str().unwrap().to_string(),
            actions: vec![ActionEntry {
                name: "any".into(),
                pattern: ".".into(),
                command: "cmd".into(),
            }],
        }])
        .unwrap();
        // avoid racing the initial scan in `Watcher::new` against the first write below.
        let _ = log_set.iter_mut().next();
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let watcher = Watcher::new(log_set, dispatcher.clone()).await.unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(watcher.run(async {
            let _ = rx.await;
        }));

        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&log_path).unwrap();
            writeln!(f, "before rotation").unwrap();
        }
        assert!(wait_until(Duration::from_secs(3), || dispatcher.names.lock().len() >= 1).await);

        std::fs::remove_file(&log_path).unwrap();
        std::fs::write(&log_path, "").unwrap();
        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&log_path).unwrap();
            writeln!(f, "after rotation").unwrap();
        }

        let reattached =
            wait_until(Duration::from_secs(5), || dispatcher.names.lock().len() >= 2).await;
        assert!(
            reattached,
            "content written to the recreated file must still be dispatched, got {} matches",
            dispatcher.names.lock().len()
        );

        let _ = tx.send(());
        let _ = handle.await;
    }

    #[test]
    fn registry_tracks_at_most_one_watch_id_per_path() {
        let mut registry = WatchRegistry::default();
        let path = PathBuf::from("/tmp/a.log");
        let first = registry.register_file(path.clone());
        let second = registry.register_file(path.clone());
        assert_eq!(first, second);
        assert!(registry.is_file_watched(&path));
        registry.mark_file_unwatched(&path);
        assert!(!registry.is_file_watched(&path));
    }
}
