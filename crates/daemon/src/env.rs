// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Env-var overrides for CLI flags left unset, lowest priority after an
//! explicit flag and before the compiled-in default (SPEC_FULL.md §6.B).

use std::str::FromStr;

/// `cli` wins if set; otherwise parse `var` from the environment;
/// otherwise `default`. A present-but-unparsable env var is logged and
/// skipped rather than treated as fatal.
pub fn resolve<T: FromStr + Clone>(cli: Option<T>, var: &str, default: T) -> T {
    if let Some(v) = cli {
        return v;
    }
    match std::env::var(var) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(var, raw, "ignoring unparsable environment override");
                default
            }
        },
        Err(_) => default,
    }
}

pub fn resolve_string(cli: Option<String>, var: &str, default: Option<String>) -> Option<String> {
    cli.or_else(|| std::env::var(var).ok()).or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_value_wins_over_env_and_default() {
        std::env::set_var("LLAD_TEST_RESOLVE_A", "7");
        assert_eq!(resolve(Some(3u64), "LLAD_TEST_RESOLVE_A", 1), 3);
        std::env::remove_var("LLAD_TEST_RESOLVE_A");
    }

    #[test]
    fn env_value_wins_over_default_when_cli_absent() {
        std::env::set_var("LLAD_TEST_RESOLVE_B", "42");
        assert_eq!(resolve::<u64>(None, "LLAD_TEST_RESOLVE_B", 1), 42);
        std::env::remove_var("LLAD_TEST_RESOLVE_B");
    }

    #[test]
    fn default_used_when_neither_cli_nor_env_present() {
        std::env::remove_var("LLAD_TEST_RESOLVE_C");
        assert_eq!(resolve::<u64>(None, "LLAD_TEST_RESOLVE_C", 9), 9);
    }
}
