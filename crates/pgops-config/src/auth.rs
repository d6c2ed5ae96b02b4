//! Tabular model of `pg_hba.conf` client-authentication rules.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;

/// One authentication rule: the whitespace-separated tokens of a line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRule(pub Vec<String>);

impl AuthRule {
    /// Builds a rule from string tokens.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(tokens.into_iter().map(Into::into).collect())
    }

    /// Whether this rule's tokens equal the given sequence.
    pub fn matches(&self, tokens: &[&str]) -> bool {
        self.0.len() == tokens.len() && self.0.iter().zip(tokens).all(|(a, b)| a == b)
    }
}

/// Ordered sequence of authentication rules.
///
/// Rule order is significant to the database engine, so policy insertion
/// appends and never reorders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTable {
    rules: Vec<AuthRule>,
}

impl AuthTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a table from file text.
    ///
    /// Blank and comment lines are ignored; every other line is tokenized
    /// on whitespace. `path` is accepted for interface symmetry with the
    /// document parser; tokenization itself cannot fail.
    pub fn parse(_path: &Path, text: &str) -> ConfigResult<Self> {
        let mut table = Self::new();
        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            table
                .rules
                .push(AuthRule::from_tokens(line.split_whitespace()));
        }
        Ok(table)
    }

    /// Whether a rule with exactly the given tokens exists.
    pub fn contains(&self, tokens: &[&str]) -> bool {
        self.rules.iter().any(|r| r.matches(tokens))
    }

    /// Appends the rule if absent; returns `true` iff the table changed.
    pub fn ensure_rule(&mut self, tokens: &[&str]) -> bool {
        if self.contains(tokens) {
            false
        } else {
            self.rules.push(AuthRule::from_tokens(tokens.iter().copied()));
            true
        }
    }

    /// Iterates over rules in table order.
    pub fn iter(&self) -> impl Iterator<Item = &AuthRule> {
        self.rules.iter()
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the table has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Renders the table back to file text, tokens separated by tabs.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for rule in &self.rules {
            out.push_str(&rule.0.join("\t"));
            out.push('\n');
        }
        out
    }
}
