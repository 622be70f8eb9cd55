// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! llad-adapters: everything that touches the filesystem, a child process,
//! or a notification facility on behalf of `llad-core`'s IO-free types.

pub mod logfile;
pub mod logset;
pub mod watcher;
pub mod worker;

pub use logfile::{LogFile, ScanOutcome, INITIAL_REWIND_THRESHOLD, SCAN_BUFFER_LEN};
pub use logset::{LogSet, LogSetError};
pub use watcher::{WatchError, WatchId, Watcher};
pub use worker::{WorkerError, WorkerManager};
