//! Response matching
//!
//! Patterns are compiled when registered so a bad expression is reported as
//! a configuration error, never at match time. Matching is unanchored unless
//! the pattern itself anchors, and case-sensitive.

use gcodelink_core::{ConfigError, Result};
use regex::Regex;
use std::fmt;

/// Name of the capture group holding the extracted value
pub const VALUE_GROUP: &str = "Value";

/// Result of matching one reply line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The line does not match
    NoMatch,
    /// The line matches but the pattern has no `Value` group, or it did not participate
    Matched,
    /// The line matches and `Value` captured this text
    Captured(String),
}

impl MatchOutcome {
    /// Check if the line matched at all
    pub fn is_match(&self) -> bool {
        !matches!(self, MatchOutcome::NoMatch)
    }

    /// Captured value, if any
    pub fn value(&self) -> Option<&str> {
        match self {
            MatchOutcome::Captured(value) => Some(value),
            _ => None,
        }
    }
}

/// Compiled response pattern with an optional `Value` capture slot
#[derive(Debug, Clone)]
pub struct ResponsePattern {
    regex: Regex,
    has_value: bool,
}

impl ResponsePattern {
    /// Compile pattern text
    pub fn compile(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        let has_value = regex.capture_names().flatten().any(|n| n == VALUE_GROUP);
        Ok(Self { regex, has_value })
    }

    /// Pattern text as registered
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Whether the pattern declares a `Value` group
    pub fn has_value_group(&self) -> bool {
        self.has_value
    }

    /// Evaluate the pattern against one reply line
    pub fn match_line(&self, line: &str) -> MatchOutcome {
        if !self.has_value {
            return if self.regex.is_match(line) {
                MatchOutcome::Matched
            } else {
                MatchOutcome::NoMatch
            };
        }

        match self.regex.captures(line) {
            None => MatchOutcome::NoMatch,
            Some(captures) => match captures.name(VALUE_GROUP) {
                Some(value) => MatchOutcome::Captured(value.as_str().to_string()),
                None => MatchOutcome::Matched,
            },
        }
    }
}

impl PartialEq for ResponsePattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for ResponsePattern {}

impl fmt::Display for ResponsePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
