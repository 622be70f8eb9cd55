// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration file parser (SPEC_FULL.md §6.A).
//!
//! Grammar:
//! ```text
//! config  := section*
//! section := '[' path ']' action*
//! action  := name '=' '{' ('pattern' '=' string | 'command' '=' string)* '}'
//! string  := '"' ... '"'  |  "'" ... "'"   (only the opening quote char is
//!                                           escapable with `\`)
//! ```
//! Comments (`#`, `;` to end of line) and whitespace are skipped between
//! tokens, matching the original `nextLine`/`parseWord` state machine.

use thiserror::Error;

use crate::action::ActionEntry;

/// One `[ /path/to/log ]` section: its path and every action block inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSection {
    pub path: String,
    pub actions: Vec<ActionEntry>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("line {line}: action `{name}' is missing `{property}'")]
    MissingProperty {
        line: usize,
        name: String,
        property: &'static str,
    },
    #[error("line {line}: unknown property `{name}' in action block")]
    UnknownProperty { line: usize, name: String },
    #[error("line {line}: unterminated string")]
    UnterminatedString { line: usize },
    #[error("line {line}: unterminated block")]
    UnterminatedBlock { line: usize },
    #[error("line {line}: expected `{expected}'")]
    Expected { line: usize, expected: &'static str },
    #[error("line {line}: empty section path")]
    EmptyPath { line: usize },
}

/// Parse the full contents of a config file into an ordered list of
/// sections, in file order. Does not touch the filesystem -- path
/// canonicalization and merging happen in `llad-adapters::LogSet::build`.
pub fn parse_config(src: &str) -> Result<Vec<LogSection>, ConfigError> {
    let mut scanner = Scanner::new(src);
    let mut sections = Vec::new();
    scanner.skip_trivia();
    while scanner.peek().is_some() {
        sections.push(parse_section(&mut scanner)?);
        scanner.skip_trivia();
    }
    Ok(sections)
}

fn parse_section(scanner: &mut Scanner) -> Result<LogSection, ConfigError> {
    scanner.expect_char('[')?;
    scanner.skip_trivia();
    let line = scanner.line();
    let path = scanner.read_word();
    if path.is_empty() {
        return Err(ConfigError::EmptyPath { line });
    }
    scanner.skip_trivia();
    scanner.expect_char(']')?;
    scanner.skip_trivia();

    let mut actions = Vec::new();
    while scanner.peek() == Some('\'') || scanner.peek().is_some_and(is_word_start) {
        actions.push(parse_action(scanner)?);
        scanner.skip_trivia();
    }
    Ok(LogSection { path, actions })
}

fn parse_action(scanner: &mut Scanner) -> Result<ActionEntry, ConfigError> {
    let name_line = scanner.line();
    let name = scanner.read_word();
    scanner.skip_trivia();
    scanner.expect_char('=')?;
    scanner.skip_trivia();
    scanner.expect_char('{')?;
    scanner.skip_trivia();

    let mut pattern = None;
    let mut command = None;
    loop {
        match scanner.peek() {
            Some('}') => {
                scanner.advance();
                break;
            }
            None => return Err(ConfigError::UnterminatedBlock { line: name_line }),
            Some(c) if is_word_start(c) => {
                let prop_line = scanner.line();
                let key = scanner.read_word();
                scanner.skip_trivia();
                scanner.expect_char('=')?;
                scanner.skip_trivia();
                let value = scanner.read_string(prop_line)?;
                match key.as_str() {
                    "pattern" => pattern = Some(value),
                    "command" => command = Some(value),
                    other => {
                        return Err(ConfigError::UnknownProperty {
                            line: prop_line,
                            name: other.to_string(),
                        })
                    }
                }
                scanner.skip_trivia();
            }
            Some(_) => {
                return Err(ConfigError::Expected {
                    line: scanner.line(),
                    expected: "property name or `}'",
                });
            }
        }
    }

    let pattern = pattern.ok_or(ConfigError::MissingProperty {
        line: name_line,
        name: name.clone(),
        property: "pattern",
    })?;
    let command = command.ok_or(ConfigError::MissingProperty {
        line: name_line,
        name: name.clone(),
        property: "command",
    })?;

    Ok(ActionEntry {
        name,
        pattern,
        command,
    })
}

fn is_word_start(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '=' | '{' | '}' | '[' | ']' | '\'' | '"' | '#' | ';')
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
}

impl Scanner {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn line(&self) -> usize {
        1 + self.chars[..self.pos].iter().filter(|&&c| c == '\n').count()
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ConfigError> {
        if self.peek() == Some(expected) {
            self.advance();
            Ok(())
        } else {
            Err(ConfigError::Expected {
                line: self.line(),
                expected: char_name(expected),
            })
        }
    }

    /// Skip whitespace and `#`/`;` line comments.
    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('#') | Some(';') => {
                    while let Some(c) = self.peek() {
                        self.advance();
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if !is_word_start(c) {
                break;
            }
            word.push(c);
            self.advance();
        }
        word
    }

    /// Read a single- or double-quoted string. `\` escapes only the
    /// character that opened the string; any other backslash is literal.
    fn read_string(&mut self, start_line: usize) -> Result<String, ConfigError> {
        let quote = match self.peek() {
            Some(q @ ('\'' | '"')) => q,
            _ => {
                return Err(ConfigError::Expected {
                    line: self.line(),
                    expected: "quoted string",
                })
            }
        };
        self.advance();
        let mut value = String::new();
        loop {
            match self.advance() {
                None => return Err(ConfigError::UnterminatedString { line: start_line }),
                Some(c) if c == quote => break,
                Some('\\') if self.peek() == Some(quote) => {
                    value.push(quote);
                    self.advance();
                }
                Some(c) => value.push(c),
            }
        }
        Ok(value)
    }
}

fn char_name(c: char) -> &'static str {
    match c {
        '[' => "[",
        ']' => "]",
        '{' => "{",
        '}' => "}",
        '=' => "=",
        _ => "?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_section_single_action() {
        let src = r#"
            [ /tmp/a.log ]
            hit = {
                pattern = "^HIT (\d+)$"
                command = "echo-it"
            }
        "#;
        let sections = parse_config(src).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].path, "/tmp/a.log");
        assert_eq!(sections[0].actions.len(), 1);
        assert_eq!(sections[0].actions[0].name, "hit");
        assert_eq!(sections[0].actions[0].pattern, r"^HIT (\d+)$");
        assert_eq!(sections[0].actions[0].command, "echo-it");
    }

    #[test]
    fn two_sections_same_path_are_kept_separate_by_the_parser() {
        // merging by canonical path is LogSet's job, not the parser's.
        let src = r#"
            [ /tmp/a.log ]
            one = { pattern = "a" command = "c1" }
            [ /tmp/a.log ]
            two = { pattern = "b" command = "c2" }
        "#;
        let sections = parse_config(src).unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].path, sections[1].path);
    }

    #[test]
    fn single_quotes_and_escaped_quote_char() {
        let src = r#"
            [ /tmp/a.log ]
            x = { pattern = 'it\'s here' command = 'cmd' }
        "#;
        let sections = parse_config(src).unwrap();
        assert_eq!(sections[0].actions[0].pattern, "it's here");
    }

    #[test]
    fn backslash_before_other_char_is_kept_literal() {
        let src = r#"
            [ /tmp/a.log ]
            x = { pattern = "a\db" command = "cmd" }
        "#;
        let sections = parse_config(src).unwrap();
        // \d is not the opening quote char, so both characters survive.
        assert_eq!(sections[0].actions[0].pattern, "a\\db");
    }

    #[test]
    fn missing_pattern_is_an_error_naming_the_action() {
        let src = r#"
            [ /tmp/a.log ]
            x = { command = "cmd" }
        "#;
        let err = parse_config(src).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingProperty { property: "pattern", .. }
        ));
    }

    #[test]
    fn unknown_property_is_an_error() {
        let src = r#"
            [ /tmp/a.log ]
            x = { pattern = "a" command = "cmd" extra = "nope" }
        "#;
        let err = parse_config(src).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProperty { .. }));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let src = "
            # a comment
            [ /tmp/a.log ] ; trailing comment
            x = {
                # comment inside block
                pattern = \"a\"
                command = \"cmd\"
            }
        ";
        let sections = parse_config(src).unwrap();
        assert_eq!(sections.len(), 1);
    }

    #[test]
    fn multiple_sections_in_file_order() {
        let src = r#"
            [ /tmp/a.log ]
            a = { pattern = "a" command = "ca" }
            [ /tmp/b.log ]
            b = { pattern = "b" command = "cb" }
        "#;
        let sections = parse_config(src).unwrap();
        assert_eq!(sections[0].path, "/tmp/a.log");
        assert_eq!(sections[1].path, "/tmp/b.log");
    }
}
