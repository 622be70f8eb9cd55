// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(unsafe_code)] // pre_exec() below blocks SIGINT in the forked child.

//! WorkerManager: spawns one detached task per match, supervises the
//! child's lifetime, and escalates idle/shutdown timeouts through
//! pipe-close -> SIGTERM -> SIGKILL (§4.3, §5).

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use llad_core::{ActionRule, Captures, Dispatcher, Timeouts};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::Notify;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("shutting down, no new workers are accepted")]
    ShuttingDown,
    #[error("failed to spawn `{argv0}': {source}")]
    Spawn {
        argv0: String,
        #[source]
        source: std::io::Error,
    },
}

/// One line of a child's merged stdout/stderr, formatted exactly as
/// promised in SPEC_FULL.md §6: `[<action>] [<command>:<pid>] <line>`.
struct OutputLine<'a> {
    action: &'a str,
    command: &'a str,
    pid: u32,
    line: &'a str,
}

impl fmt::Display for OutputLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] [{}:{}] {}", self.action, self.command, self.pid, self.line)
    }
}

/// The idle-close notice: `[<action>] <command> (<pid>) created no output
/// for <T_idle> seconds, closing pipe.`
struct IdleNotice<'a> {
    action: &'a str,
    command: &'a str,
    pid: u32,
    idle_secs: u64,
}

impl fmt::Display for IdleNotice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}) created no output for {} seconds, closing pipe.",
            self.action, self.command, self.pid, self.idle_secs
        )
    }
}

/// How a supervised child's lifetime ended, for [`ExitNotice`].
enum ExitOutcome {
    Success,
    Failed(i32),
    Signalled(String),
}

/// The terminal-status notice (§4.3 step 7, §6's stable exit lines).
struct ExitNotice<'a> {
    action: &'a str,
    command: &'a str,
    pid: u32,
    outcome: &'a ExitOutcome,
}

impl fmt::Display for ExitNotice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            ExitOutcome::Success => {
                write!(f, "[{}] {} ({}) completed successfully.", self.action, self.command, self.pid)
            }
            ExitOutcome::Failed(code) => write!(
                f,
                "[{}] {} ({}) failed with exit code {}.",
                self.action, self.command, self.pid, code
            ),
            ExitOutcome::Signalled(name) => write!(
                f,
                "[{}] {} ({}) was terminated by signal {}.",
                self.action, self.command, self.pid, name
            ),
        }
    }
}

fn exit_outcome(status: std::process::ExitStatus) -> ExitOutcome {
    if let Some(sig) = status.signal() {
        let name = Signal::try_from(sig)
            .map(|s| s.as_str().trim_start_matches("SIG").to_string())
            .unwrap_or_else(|_| sig.to_string());
        return ExitOutcome::Signalled(name);
    }
    match status.code() {
        Some(0) => ExitOutcome::Success,
        Some(code) => ExitOutcome::Failed(code),
        None => ExitOutcome::Failed(-1),
    }
}

/// Supervises every in-flight worker task. Tasks are detached
/// (`tokio::spawn`, never joined) and synchronize with the manager solely
/// through a counter and two notify-based gates, mirroring the "threads
/// are fire-and-forget" contract of the original design (§5).
pub struct WorkerManager {
    command_dir: PathBuf,
    timeouts: Timeouts,
    active: Arc<AtomicUsize>,
    quiescent: Arc<Notify>,
    force_shutdown: Arc<Notify>,
    shutting_down: Arc<AtomicBool>,
}

impl WorkerManager {
    pub fn new(command_dir: PathBuf, timeouts: Timeouts) -> Self {
        Self {
            command_dir,
            timeouts,
            active: Arc::new(AtomicUsize::new(0)),
            quiescent: Arc::new(Notify::new()),
            force_shutdown: Arc::new(Notify::new()),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop accepting new work and wait for every in-flight worker to
    /// finish, up to `deadline`. Workers still running at the deadline are
    /// told to force-escalate straight to SIGKILL. Returns `true` if every
    /// worker exited on its own before the deadline.
    pub async fn drain(&self, deadline: Duration) -> bool {
        self.shutting_down.store(true, Ordering::SeqCst);
        if self.active_count() == 0 {
            return true;
        }
        tracing::info!("Waiting for pending actions.");
        let clean = tokio::time::timeout(deadline, self.quiescent.notified()).await.is_ok();
        if !clean {
            tracing::warn!(
                "Pending actions after {} seconds, closing pipes.",
                deadline.as_secs()
            );
            self.force_shutdown.notify_waiters();
            let budget = self.timeouts.escalation_budget();
            let _ = tokio::time::timeout(budget, self.quiescent.notified()).await;
        }
        self.active_count() == 0
    }

    fn spawn_worker(&self, rule: ActionRule, captures: Captures) {
        let argv = rule.build_argv(&captures, &self.command_dir);
        let action = rule.name().to_string();
        let command = rule.command().to_string();
        let timeouts = self.timeouts;
        let active = Arc::clone(&self.active);
        let quiescent = Arc::clone(&self.quiescent);
        let force_shutdown = Arc::clone(&self.force_shutdown);

        active.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            if let Err(e) = run_worker(argv, &action, &command, timeouts, force_shutdown).await {
                tracing::warn!(action, error = %e, "worker task ended with an error");
            }
            if active.fetch_sub(1, Ordering::SeqCst) == 1 {
                quiescent.notify_waiters();
            }
        });
    }
}

#[async_trait]
impl Dispatcher for WorkerManager {
    async fn dispatch(&self, rule: &ActionRule, captures: &Captures) -> Result<(), String> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(WorkerError::ShuttingDown.to_string());
        }
        self.spawn_worker(rule.clone(), captures.clone());
        Ok(())
    }
}

type StdoutLines = Lines<BufReader<ChildStdout>>;
type StderrLines = Lines<BufReader<ChildStderr>>;

async fn run_worker(
    argv: Vec<PathBuf>,
    action: &str,
    command: &str,
    timeouts: Timeouts,
    force_shutdown: Arc<Notify>,
) -> std::io::Result<()> {
    let Some((program, args)) = argv.split_first() else {
        return Ok(());
    };

    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    unsafe {
        cmd.pre_exec(|| {
            // the daemon handles SIGINT itself; workers shouldn't also race
            // to react to one delivered to the whole process group.
            let mut mask = nix::sys::signal::SigSet::empty();
            mask.add(Signal::SIGINT);
            mask.thread_block()
                .map_err(|e| std::io::Error::from_raw_os_error(e as i32))
        });
    }

    let mut child = cmd.spawn()?;
    let pid = child.id().unwrap_or(0);

    let mut stdout_lines: Option<StdoutLines> =
        child.stdout.take().map(|s| BufReader::new(s).lines());
    let mut stderr_lines: Option<StderrLines> =
        child.stderr.take().map(|s| BufReader::new(s).lines());

    let mut deadline = Instant::now() + timeouts.idle;

    loop {
        if stdout_lines.is_none() && stderr_lines.is_none() {
            break;
        }
        tokio::select! {
            biased;
            _ = force_shutdown.notified() => {
                stdout_lines = None;
                stderr_lines = None;
                escalate(&mut child, action, command, pid, &timeouts).await;
                return Ok(());
            }
            result = read_next(&mut stdout_lines), if stdout_lines.is_some() => {
                match result {
                    Some(line) => {
                        tracing::info!("{}", OutputLine { action, command, pid, line: &line });
                        deadline = Instant::now() + timeouts.idle;
                    }
                    None => stdout_lines = None,
                }
            }
            result = read_next(&mut stderr_lines), if stderr_lines.is_some() => {
                match result {
                    Some(line) => {
                        tracing::info!("{}", OutputLine { action, command, pid, line: &line });
                        deadline = Instant::now() + timeouts.idle;
                    }
                    None => stderr_lines = None,
                }
            }
            _ = tokio::time::sleep_until(deadline.into()) => {
                tracing::info!(
                    "{}",
                    IdleNotice { action, command, pid, idle_secs: timeouts.idle.as_secs() }
                );
                stdout_lines = None;
                stderr_lines = None;
                escalate(&mut child, action, command, pid, &timeouts).await;
                return Ok(());
            }
        }
    }

    // both streams hit EOF without the idle timer or a forced shutdown
    // firing; the child may have exited already, or it may have merely
    // closed its pipes while still running. Either way it gets the same
    // poll-reap -> SIGTERM -> SIGKILL ladder as the other two exit paths
    // (§4.3 step 6) -- a normal-looking EOF is not a license to block on
    // an unbounded wait().
    escalate(&mut child, action, command, pid, &timeouts).await;
    Ok(())
}

/// Advance `lines` and collapse "stream closed" / "read error" into `None`
/// so the caller doesn't need to distinguish them.
async fn read_next<R>(lines: &mut Option<Lines<BufReader<R>>>) -> Option<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    match lines.as_mut() {
        Some(l) => match l.next_line().await {
            Ok(Some(line)) => Some(line),
            Ok(None) | Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

/// Pipe-close -> SIGTERM -> SIGKILL escalation, assuming the pipes have
/// already been dropped by the caller (§4.3 step 6). Each rung polls reap
/// at one-second granularity so a child that has already exited (or exits
/// partway through the grace period) is reported immediately instead of
/// waiting out the full budget.
async fn escalate(child: &mut Child, action: &str, command: &str, pid: u32, timeouts: &Timeouts) {
    if let Some(status) = poll_reap(child, timeouts.pipe).await {
        report_exit(action, command, pid, status);
        return;
    }
    tracing::info!("[{}] {} ({}) still running, sending SIGTERM.", action, command, pid);
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);

    if let Some(status) = poll_reap(child, timeouts.term).await {
        report_exit(action, command, pid, status);
        return;
    }
    tracing::warn!("[{}] {} ({}) still running, sending SIGKILL.", action, command, pid);
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
    if let Ok(status) = child.wait().await {
        report_exit(action, command, pid, status);
    }
}

/// Poll `try_wait` once a second for up to `budget`, returning as soon as
/// the child is reaped rather than sleeping out the whole budget first
/// (§4.3 step 6: "each poll is at one-second granularity").
async fn poll_reap(child: &mut Child, budget: Duration) -> Option<std::process::ExitStatus> {
    let mut waited = Duration::ZERO;
    loop {
        if let Some(status) = try_reaped(child).await {
            return Some(status);
        }
        if waited >= budget {
            return None;
        }
        let slice = Duration::from_secs(1).min(budget - waited);
        tokio::time::sleep(slice).await;
        waited += slice;
    }
}

fn report_exit(action: &str, command: &str, pid: u32, status: std::process::ExitStatus) {
    let outcome = exit_outcome(status);
    tracing::info!("{}", ExitNotice { action, command, pid, outcome: &outcome });
}

async fn try_reaped(child: &mut Child) -> Option<std::process::ExitStatus> {
    match child.try_wait() {
        Ok(Some(status)) => Some(status),
        _ => None,
    }
}
