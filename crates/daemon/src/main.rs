// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `llad`: watch append-only log files, match new lines against regexes,
//! run a command per match (SPEC_FULL.md §1, §6.B).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use llad_core::Timeouts;
use llad_daemon::{env, Config, LifecycleError, Orchestrator};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "/etc/llad.conf";
const DEFAULT_CMD_PATH: &str = "/etc/llad";
const DEFAULT_PIDFILE: &str = "/var/run/llad.pid";
const DEFAULT_LOGFILE: &str = "/var/log/llad.log";

/// Watch log files and run commands on matching lines.
#[derive(Parser, Debug)]
#[command(name = "llad", version, about)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory commands are resolved relative to.
    #[arg(long = "cmd-path")]
    cmd_path: Option<PathBuf>,

    /// Pidfile used as the single-instance lock. Pass an empty string to
    /// disable the single-instance guard.
    #[arg(long)]
    pidfile: Option<String>,

    /// Idle timeout in seconds before a worker's pipe is closed (`T_idle`).
    #[arg(long)]
    wait: Option<u64>,

    /// Grace period in seconds after pipe close before SIGTERM (`T_pipe`).
    #[arg(long)]
    wpipe: Option<u64>,

    /// Grace period in seconds after SIGTERM before SIGKILL (`T_term`).
    #[arg(long)]
    wterm: Option<u64>,

    /// Drain deadline in seconds waited on at shutdown (`T_exit`).
    #[arg(long)]
    wexit: Option<u64>,

    /// Log level: trace, debug, info, warn, or error.
    #[arg(long = "loglevel")]
    loglevel: Option<String>,

    /// File the daemon logs to (ignored under `--no-detach`, which logs to
    /// stderr instead).
    #[arg(long = "logfile")]
    logfile: Option<PathBuf>,

    /// Stay in the foreground and log to stderr instead of the logfile
    /// (the original daemonizes via `fork()`/`setsid()`; see
    /// SPEC_FULL.md §9.A for why this crate does not).
    #[arg(long = "no-detach")]
    no_detach: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let loglevel = env::resolve_string(cli.loglevel.clone(), "LLAD_LOGLEVEL", None)
        .unwrap_or_else(|| "info".to_string());
    let logfile = env::resolve_string(
        cli.logfile.as_ref().map(|p| p.to_string_lossy().into_owned()),
        "LLAD_LOGFILE",
        Some(DEFAULT_LOGFILE.to_string()),
    )
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from(DEFAULT_LOGFILE));
    let _logging_guard = setup_logging(&loglevel, cli.no_detach, &logfile);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> ExitCode {
    let config_path = env::resolve_string(
        cli.config.as_ref().map(|p| p.to_string_lossy().into_owned()),
        "LLAD_CONFIG",
        Some(DEFAULT_CONFIG.to_string()),
    )
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));

    let cmd_path = env::resolve_string(
        cli.cmd_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
        "LLAD_CMD_PATH",
        Some(DEFAULT_CMD_PATH.to_string()),
    )
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from(DEFAULT_CMD_PATH));

    let pidfile_raw = env::resolve_string(
        cli.pidfile.clone(),
        "LLAD_PIDFILE",
        Some(DEFAULT_PIDFILE.to_string()),
    )
    .unwrap_or_else(|| DEFAULT_PIDFILE.to_string());
    let pidfile = if pidfile_raw.is_empty() {
        None
    } else {
        Some(PathBuf::from(pidfile_raw))
    };

    let timeouts = Timeouts {
        idle: std::time::Duration::from_secs(env::resolve(cli.wait, "LLAD_WAIT", 120)),
        pipe: std::time::Duration::from_secs(env::resolve(cli.wpipe, "LLAD_WPIPE", 2)),
        term: std::time::Duration::from_secs(env::resolve(cli.wterm, "LLAD_WTERM", 10)),
        exit: std::time::Duration::from_secs(env::resolve(cli.wexit, "LLAD_WEXIT", 20)),
    };

    let config = Config {
        config_path,
        cmd_path,
        pidfile,
        timeouts,
    };

    let orchestrator = match Orchestrator::new(config) {
        Ok(o) => o,
        Err(e) => {
            tracing::error!(error = %e, "failed to start");
            return exit_code_for(&e);
        }
    };

    // `Orchestrator::run` drains the WorkerManager against `timeouts.exit`
    // itself before returning, surfacing `LifecycleError::DrainTimeout` on
    // the same error path as every other startup/run failure.
    match orchestrator.run(shutdown_signal()).await {
        Ok(_manager) => {
            tracing::info!("shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to run");
            exit_code_for(&e)
        }
    }
}

/// Resolves on the first `SIGTERM`/`SIGINT`, matching §4.7's shutdown
/// signal set (`QUIT`/`STOP`/`HUP`/`USR1` are reserved: the original
/// blocks them during its handler and either ignores them (`HUP`,
/// `USR1`, reserved for future config-reload semantics) or treats them as
/// fatal-to-the-loop; this daemon simply never installs handlers for
/// them, so the default disposition -- terminate for `QUIT`, ignore for
/// the rest -- applies). If a handler itself cannot be installed, that is
/// treated as an immediate shutdown request rather than a panic.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGTERM handler, shutting down");
            return;
        }
    };
    let mut int = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGINT handler, shutting down");
            return;
        }
    };
    tokio::select! {
        _ = term.recv() => tracing::info!("Received signal SIGTERM: stopping daemon."),
        _ = int.recv() => tracing::info!("Received signal SIGINT: stopping daemon."),
    }
}

/// Installs the fmt layer described in SPEC_FULL.md §6.C. Under
/// `--no-detach` logs go to stderr; otherwise they go to `logfile` via a
/// non-rolling file appender. Returns the appender's worker guard, which
/// must be held for the life of the process or buffered lines are lost on
/// exit.
fn setup_logging(loglevel: &str, no_detach: bool, logfile: &PathBuf) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_new(loglevel).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if no_detach {
        builder.with_writer(std::io::stderr).init();
        None
    } else {
        let dir = logfile.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
        let file_name = logfile.file_name().unwrap_or_else(|| std::ffi::OsStr::new("llad.log"));
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        builder.with_ansi(false).with_writer(writer).init();
        Some(guard)
    }
}

fn exit_code_for(e: &LifecycleError) -> ExitCode {
    match e {
        LifecycleError::AlreadyRunning(_) => ExitCode::from(2),
        LifecycleError::ConfigRead { .. } | LifecycleError::ConfigInvalid { .. } => ExitCode::from(3),
        LifecycleError::EmptyLogSet(_) => ExitCode::from(4),
        LifecycleError::WatchInit(_) => ExitCode::from(5),
        LifecycleError::DrainTimeout => ExitCode::from(6),
        LifecycleError::Io(_) => ExitCode::from(1),
    }
}
