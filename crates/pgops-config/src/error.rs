//! Error types for the configuration store.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration store operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Error variants for configuration store operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A non-comment, non-blank line could not be parsed.
    #[error("cannot parse line {line_no} [{line}] in {path}")]
    Parse {
        /// File the offending line was read from.
        path: PathBuf,
        /// 1-based line number of the offending line.
        line_no: usize,
        /// The offending line, verbatim.
        line: String,
    },

    /// The requested configuration file does not exist.
    #[error("cannot open config at \"{0}\"")]
    Missing(PathBuf),

    /// A single write was asked to persist two different payload kinds.
    #[error("refusing to write both a document and a rule table to {0}")]
    ConflictingPayload(PathBuf),
}
