// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orchestrator: wires config, LogSet, Watcher, and WorkerManager together
//! and owns the single-instance guard (§6.D, §7).

use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use llad_adapters::{LogSet, LogSetError, WatchError, Watcher, WorkerManager};
use llad_core::{parse_config, ConfigError, Timeouts};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("another instance is already running (pidfile `{0}' is locked)")]
    AlreadyRunning(PathBuf),
    #[error("failed to read config `{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config `{path}' is invalid: {source}")]
    ConfigInvalid {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },
    #[error("no usable log sections in config: {0}")]
    EmptyLogSet(#[source] LogSetError),
    #[error("failed to initialize the watcher: {0}")]
    WatchInit(#[source] WatchError),
    #[error("workers did not finish draining before the exit deadline")]
    DrainTimeout,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Resolved runtime configuration, after CLI/env merge (§6.B).
pub struct Config {
    pub config_path: PathBuf,
    pub cmd_path: PathBuf,
    pub pidfile: Option<PathBuf>,
    pub timeouts: Timeouts,
}

/// Holds the pidfile lock for the process lifetime; dropping it (or
/// letting the process exit) releases the advisory lock (§6.D). Replaces
/// the original double-fork daemonization, which is unsound once a
/// multi-threaded Tokio runtime has started (§9.A).
pub struct InstanceGuard {
    _file: File,
    path: PathBuf,
}

impl InstanceGuard {
    pub fn acquire(path: &Path) -> Result<Self, LifecycleError> {
        let file = File::options()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        file.try_lock_exclusive()
            .map_err(|_| LifecycleError::AlreadyRunning(path.to_path_buf()))?;
        let mut file = file;
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

pub struct Orchestrator {
    config: Config,
    _guard: Option<InstanceGuard>,
}

impl Orchestrator {
    pub fn new(config: Config) -> Result<Self, LifecycleError> {
        let guard = match &config.pidfile {
            Some(path) => Some(InstanceGuard::acquire(path)?),
            None => None,
        };
        Ok(Self {
            config,
            _guard: guard,
        })
    }

    /// Load the config file, build the LogSet, start the watcher, and run
    /// until `shutdown` resolves. Once the watcher has stopped, drains the
    /// `WorkerManager` against the configured exit deadline and reports
    /// `LifecycleError::DrainTimeout` if any worker outlives it (§7's
    /// `DrainTimeout` disposition: "log ERROR; exit process with failure").
    /// Returns the manager so the caller can inspect what, if anything,
    /// was left running.
    pub async fn run(
        &self,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> Result<Arc<WorkerManager>, LifecycleError> {
        let src = fs::read_to_string(&self.config.config_path).map_err(|source| {
            LifecycleError::ConfigRead {
                path: self.config.config_path.clone(),
                source,
            }
        })?;
        let sections = parse_config(&src).map_err(|source| LifecycleError::ConfigInvalid {
            path: self.config.config_path.clone(),
            source,
        })?;
        let log_set = LogSet::build(sections).map_err(LifecycleError::EmptyLogSet)?;

        let manager = Arc::new(WorkerManager::new(
            self.config.cmd_path.clone(),
            self.config.timeouts,
        ));
        let dispatcher: Arc<dyn llad_core::Dispatcher> = manager.clone();
        let watcher = Watcher::new(log_set, dispatcher)
            .await
            .map_err(LifecycleError::WatchInit)?;

        watcher.run(shutdown).await;

        tracing::info!("draining in-flight workers");
        if !manager.drain(self.config.timeouts.exit).await {
            return Err(LifecycleError::DrainTimeout);
        }
        Ok(manager)
    }
}
