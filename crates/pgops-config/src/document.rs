//! Ordered key/value model of a `postgresql.conf`-style file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// One `key = value` entry of a configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Parameter name.
    pub key: String,
    /// Parameter value, verbatim (quoting preserved).
    pub value: String,
}

/// Ordered mapping of parameter name to string value.
///
/// Keys are unique: setting an existing key updates it in place, a new key
/// is appended. Entry order is preserved across a read/write round trip.
/// Values containing the `=` separator survive; values containing `#` do
/// not (the comment stripper eats them), which is documented as
/// unsupported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDocument {
    entries: Vec<ConfigEntry>,
}

impl ConfigDocument {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a document from file text.
    ///
    /// Blank lines and full-line comments are ignored; trailing `#`
    /// comments are stripped. Any other line without a `=` separator is a
    /// hard error naming the line. `path` is used for diagnostics only.
    pub fn parse(path: &Path, text: &str) -> ConfigResult<Self> {
        let mut doc = Self::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let effective = line.split('#').next().unwrap_or("").trim();
            match effective.split_once('=') {
                Some((key, value)) => {
                    doc.set(key.trim(), value.trim());
                }
                None => {
                    return Err(ConfigError::Parse {
                        path: path.to_path_buf(),
                        line_no: idx + 1,
                        line: line.to_string(),
                    });
                }
            }
        }
        Ok(doc)
    }

    /// Returns the value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    /// Sets `key` to `value`, appending if absent.
    ///
    /// Returns `true` iff the stored value actually changed, so policy
    /// passes can detect spurious rewrites.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> bool {
        let value = value.into();
        match self.entries.iter_mut().find(|e| e.key == key) {
            Some(entry) => {
                if entry.value == value {
                    false
                } else {
                    entry.value = value;
                    true
                }
            }
            None => {
                self.entries.push(ConfigEntry {
                    key: key.to_string(),
                    value,
                });
                true
            }
        }
    }

    /// Iterates over entries in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|e| (e.key.as_str(), e.value.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the document has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the document back to file text, one `key = value` per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.key);
            out.push_str(" = ");
            out.push_str(&entry.value);
            out.push('\n');
        }
        out
    }
}
