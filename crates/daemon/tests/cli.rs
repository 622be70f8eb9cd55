// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios against the `llad` binary (SPEC_FULL.md §8).

use std::fs;
use std::io::Write as _;
use std::process::{Command, Stdio};
use std::time::Duration;

use assert_cmd::cargo::cargo_bin;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serial_test::serial;
use tempfile::tempdir;

/// Poll `f` until it returns `true` or `timeout` elapses.
fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    false
}

fn write_marker_script(dir: &std::path::Path, name: &str, marker: &std::path::Path) -> std::path::PathBuf {
    let script = dir.join(name);
    fs::write(
        &script,
        format!("#!/bin/sh\necho \"$@\" >> {}\n", marker.display()),
    )
    .unwrap();
    let mut perms = fs::metadata(&script).unwrap().permissions();
    std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
    fs::set_permissions(&script, perms).unwrap();
    script
}

#[test]
#[serial]
fn single_match_runs_the_configured_command() {
    let tmp = tempdir().unwrap();
    let log_path = tmp.path().join("app.log");
    fs::write(&log_path, "").unwrap();
    let marker = tmp.path().join("hits.txt");
    write_marker_script(tmp.path(), "notify.sh", &marker);

    let config_path = tmp.path().join("llad.conf");
    fs::write(
        &config_path,
        format!(
            "[ {} ]\nhit = {{ pattern = \"^HIT (\\d+)$\" command = \"notify.sh\" }}\n",
            log_path.display()
        ),
    )
    .unwrap();

    let pidfile = tmp.path().join("llad.pid");
    let mut child = Command::new(cargo_bin("llad"))
        .arg("--config")
        .arg(&config_path)
        .arg("--cmd-path")
        .arg(tmp.path())
        .arg("--pidfile")
        .arg(&pidfile)
        .arg("--no-detach")
        .arg("--wait")
        .arg("2")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    // give the daemon time to perform its initial scan and register watches.
    std::thread::sleep(Duration::from_millis(300));

    let mut f = fs::OpenOptions::new().append(true).open(&log_path).unwrap();
    writeln!(f, "HIT 42").unwrap();
    drop(f);

    let matched = wait_until(Duration::from_secs(5), || marker.exists());
    assert!(matched, "expected action command to create the marker file");
    let contents = fs::read_to_string(&marker).unwrap();
    assert!(contents.contains("HIT 42"));
    assert!(contents.contains("42"));

    let _ = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM);
    let status = child.wait().unwrap();
    assert!(status.success(), "daemon should exit cleanly after SIGTERM");
}

#[test]
#[serial]
fn invalid_pattern_is_skipped_but_sibling_action_still_fires() {
    let tmp = tempdir().unwrap();
    let log_path = tmp.path().join("app.log");
    fs::write(&log_path, "").unwrap();
    let marker = tmp.path().join("hits.txt");
    write_marker_script(tmp.path(), "notify.sh", &marker);

    let config_path = tmp.path().join("llad.conf");
    fs::write(
        &config_path,
        format!(
            "[ {} ]\nbad = {{ pattern = \"(\" command = \"notify.sh\" }}\ngood = {{ pattern = \"^OK$\" command = \"notify.sh\" }}\n",
            log_path.display()
        ),
    )
    .unwrap();

    let pidfile = tmp.path().join("llad.pid");
    let mut child = Command::new(cargo_bin("llad"))
        .arg("--config")
        .arg(&config_path)
        .arg("--cmd-path")
        .arg(tmp.path())
        .arg("--pidfile")
        .arg(&pidfile)
        .arg("--no-detach")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    std::thread::sleep(Duration::from_millis(300));
    let mut f = fs::OpenOptions::new().append(true).open(&log_path).unwrap();
    writeln!(f, "OK").unwrap();
    drop(f);

    let matched = wait_until(Duration::from_secs(5), || marker.exists());
    assert!(matched, "the sibling valid action must still run");

    let _ = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM);
    let _ = child.wait();
}

#[test]
#[serial]
fn second_instance_refuses_to_start_while_pidfile_is_locked() {
    let tmp = tempdir().unwrap();
    let log_path = tmp.path().join("app.log");
    fs::write(&log_path, "").unwrap();
    write_marker_script(tmp.path(), "notify.sh", &tmp.path().join("hits.txt"));

    let config_path = tmp.path().join("llad.conf");
    fs::write(
        &config_path,
        format!(
            "[ {} ]\nhit = {{ pattern = \".\" command = \"notify.sh\" }}\n",
            log_path.display()
        ),
    )
    .unwrap();
    let pidfile = tmp.path().join("llad.pid");

    let mut first = Command::new(cargo_bin("llad"))
        .arg("--config")
        .arg(&config_path)
        .arg("--cmd-path")
        .arg(tmp.path())
        .arg("--pidfile")
        .arg(&pidfile)
        .arg("--no-detach")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    std::thread::sleep(Duration::from_millis(300));

    let second = Command::new(cargo_bin("llad"))
        .arg("--config")
        .arg(&config_path)
        .arg("--cmd-path")
        .arg(tmp.path())
        .arg("--pidfile")
        .arg(&pidfile)
        .arg("--no-detach")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();

    assert!(!second.success(), "a second instance must refuse to start");

    let _ = kill(Pid::from_raw(first.id() as i32), Signal::SIGTERM);
    let _ = first.wait();
}
