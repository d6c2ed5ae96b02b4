//! Reading and writing configuration files with backup-before-overwrite.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::debug;

use crate::auth::AuthTable;
use crate::document::ConfigDocument;
use crate::error::{ConfigError, ConfigResult};

/// Reads a key/value document from `path`.
pub fn read_document(path: &Path) -> ConfigResult<ConfigDocument> {
    if !path.exists() {
        return Err(ConfigError::Missing(path.to_path_buf()));
    }
    let text = fs::read_to_string(path)?;
    ConfigDocument::parse(path, &text)
}

/// Reads a tabular authentication rule file from `path`.
pub fn read_auth(path: &Path) -> ConfigResult<AuthTable> {
    if !path.exists() {
        return Err(ConfigError::Missing(path.to_path_buf()));
    }
    let text = fs::read_to_string(path)?;
    AuthTable::parse(path, &text)
}

/// Writes exactly one of a document or a rule table to `path`.
///
/// If `path` already exists it is first renamed to a timestamped sibling
/// (`<stem>.<YYYY-MM-DD-HH-MM-SS>.<ext>`); the backup path is returned.
/// Supplying neither payload is a no-op (nothing renamed, `None`
/// returned); supplying both is a contract violation.
///
/// The timestamp has second resolution: two writes within the same second
/// reuse the backup name and the later rename wins. Known limitation,
/// carried over from the on-disk naming contract.
pub fn write(
    path: &Path,
    document: Option<&ConfigDocument>,
    table: Option<&AuthTable>,
) -> ConfigResult<Option<PathBuf>> {
    let rendered = match (document, table) {
        (Some(_), Some(_)) => {
            return Err(ConfigError::ConflictingPayload(path.to_path_buf()));
        }
        (None, None) => return Ok(None),
        (Some(doc), None) => doc.render(),
        (None, Some(table)) => table.render(),
    };

    let backup = if path.exists() {
        let backup = backup_path(path, Local::now());
        fs::rename(path, &backup)?;
        debug!(path = %path.display(), backup = %backup.display(), "backed up config");
        Some(backup)
    } else {
        None
    };

    fs::write(path, rendered)?;
    Ok(backup)
}

/// Computes the timestamped backup sibling for `path`.
fn backup_path(path: &Path, now: DateTime<Local>) -> PathBuf {
    let stamp = now.format("%Y-%m-%d-%H-%M-%S");
    let name = match (
        path.file_stem().and_then(|s| s.to_str()),
        path.extension().and_then(|e| e.to_str()),
    ) {
        (Some(stem), Some(ext)) => format!("{stem}.{stamp}.{ext}"),
        _ => format!(
            "{}.{stamp}",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("config")
        ),
    };
    path.with_file_name(name)
}
