// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ActionChain: an ordered list of ActionRules attached to one LogFile (C2).

use std::fmt;

use async_trait::async_trait;

use crate::action::{ActionRule, Captures};

/// Implemented by whatever can actually spawn and supervise a worker for a
/// match (`llad-adapters::WorkerManager`). Keeping this as a trait on the
/// core side means `ActionChain`'s matching logic stays IO-free and
/// independently testable.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Submit a match for execution. `Err` means the match could not be
    /// dispatched (resource exhaustion, §4.2/§7) -- the chain logs a
    /// warning and continues with the next rule; it never aborts the scan.
    async fn dispatch(&self, rule: &ActionRule, captures: &Captures) -> Result<(), String>;
}

/// The stable "matched" log line from SPEC_FULL.md §6.
pub struct MatchNotice<'a> {
    pub log_name: &'a str,
    pub action: &'a str,
    pub command: &'a str,
}

impl fmt::Display for MatchNotice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]: Action '{}' matched, executing '{}'.",
            self.log_name, self.action, self.command
        )
    }
}

/// Ordered list of [`ActionRule`]s attached to one log file (§3).
#[derive(Debug, Clone, Default)]
pub struct ActionChain {
    rules: Vec<ActionRule>,
}

impl ActionChain {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn push(&mut self, rule: ActionRule) {
        self.rules.push(rule);
    }

    pub fn extend(&mut self, other: ActionChain) {
        self.rules.extend(other.rules);
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn rules(&self) -> &[ActionRule] {
        &self.rules
    }

    /// Try every rule against `line`, in insertion order. Every rule that
    /// matches fires, independently of whether any other rule matched
    /// (§4.2). Returns the number of rules that matched, for tests.
    pub async fn dispatch(&self, line: &str, log_name: &str, dispatcher: &dyn Dispatcher) -> usize {
        let mut matched = 0;
        for rule in &self.rules {
            let Some(captures) = rule.try_match(line) else {
                continue;
            };
            matched += 1;
            tracing::info!(
                "{}",
                MatchNotice {
                    log_name,
                    action: rule.name(),
                    command: rule.command(),
                }
            );
            if let Err(reason) = dispatcher.dispatch(rule, &captures).await {
                tracing::warn!(action = rule.name(), reason, "failed to submit worker task");
            }
        }
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionEntry;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingDispatcher {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Dispatcher for RecordingDispatcher {
        async fn dispatch(&self, rule: &ActionRule, _captures: &Captures) -> Result<(), String> {
            self.calls.lock().push(rule.name().to_string());
            Ok(())
        }
    }

    fn rule(name: &str, pattern: &str) -> ActionRule {
        ActionRule::compile(&ActionEntry {
            name: name.into(),
            pattern: pattern.into(),
            command: "cmd".into(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn all_matching_rules_fire_independently() {
        let mut chain = ActionChain::new();
        chain.push(rule("any", "."));
        chain.push(rule("digit", r"\d"));
        let dispatcher = RecordingDispatcher::default();

        let matched = chain.dispatch("line7", "a.log", &dispatcher).await;

        assert_eq!(matched, 2);
        assert_eq!(*dispatcher.calls.lock(), vec!["any", "digit"]);
    }

    #[tokio::test]
    async fn non_matching_rule_is_skipped_but_siblings_still_run() {
        let mut chain = ActionChain::new();
        chain.push(rule("digit", r"^\d+$"));
        chain.push(rule("word", r"^[a-z]+$"));
        let dispatcher = RecordingDispatcher::default();

        let matched = chain.dispatch("hello", "a.log", &dispatcher).await;

        assert_eq!(matched, 1);
        assert_eq!(*dispatcher.calls.lock(), vec!["word"]);
    }

    #[tokio::test]
    async fn dispatch_failure_does_not_stop_the_chain() {
        struct FlakyDispatcher;
        #[async_trait]
        impl Dispatcher for FlakyDispatcher {
            async fn dispatch(&self, _r: &ActionRule, _c: &Captures) -> Result<(), String> {
                Err("resource exhaustion".into())
            }
        }
        let mut chain = ActionChain::new();
        chain.push(rule("a", "."));
        chain.push(rule("b", "."));
        let matched = chain.dispatch("x", "a.log", &FlakyDispatcher).await;
        assert_eq!(matched, 2);
    }

    #[test]
    fn match_notice_matches_stable_format() {
        let notice = MatchNotice {
            log_name: "a.log",
            action: "hit",
            command: "echo-it",
        };
        assert_eq!(
            notice.to_string(),
            "[a.log]: Action 'hit' matched, executing 'echo-it'."
        );
    }
}
