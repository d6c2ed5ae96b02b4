//! Lenient reader for the host-level `KEY=value` service configuration
//! file (`/etc/sysconfig/postgresql`).
//!
//! Unlike the cluster configuration parser this reader is forgiving:
//! unparsable lines are logged and skipped, since the file is owned by the
//! distribution rather than by this tool.

use std::fs;
use std::path::Path;

use tracing::warn;

use crate::error::{ConfigError, ConfigResult};

/// Parsed sysconfig service file.
#[derive(Debug, Clone, Default)]
pub struct Sysconfig {
    entries: Vec<(String, String)>,
}

impl Sysconfig {
    /// Reads and parses the service file at `path`.
    pub fn read(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    /// Parses service file text, skipping lines it cannot understand.
    pub fn parse(text: &str) -> Self {
        let mut entries = Vec::new();
        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) => {
                    entries.push((key.trim().to_string(), value.trim().to_string()));
                }
                None => warn!(line, "cannot parse sysconfig line, skipping"),
            }
        }
        Self { entries }
    }

    /// Returns the raw value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the value for `key` with surrounding quotes stripped.
    pub fn get_unquoted(&self, key: &str) -> Option<&str> {
        self.get(key)
            .map(|v| v.trim_matches(|c| c == '"' || c == '\''))
    }
}
