//! Host requirement verification, run before any reconciliation.

use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

use crate::settings::Settings;

/// Error variants for requirement checks.
#[derive(Debug, Error)]
pub enum CheckError {
    /// The sysconfig service file is absent, so the database service is
    /// not installed the way this tool expects.
    #[error("sysconfig service file not found at \"{0}\"")]
    SysconfigMissing(PathBuf),

    /// A required database binary is absent.
    #[error("cannot find {component} component at \"{path}\"")]
    MissingComponent {
        /// Role of the missing binary.
        component: &'static str,
        /// Expected location.
        path: PathBuf,
    },
}

/// Verifies the host carries everything the tool drives.
///
/// Checks the sysconfig service file first, then each database binary.
/// Stops at the first missing piece so the operator gets one actionable
/// message at a time.
pub fn system_requirements(settings: &Settings) -> Result<(), CheckError> {
    if !settings.sysconfig_path.exists() {
        return Err(CheckError::SysconfigMissing(
            settings.sysconfig_path.clone(),
        ));
    }

    let binaries = [
        ("operations", &settings.psql),
        ("core", &settings.postmaster),
        ("control", &settings.pg_ctl),
        ("backup", &settings.pg_basebackup),
    ];
    for (component, path) in binaries {
        if !path.exists() {
            return Err(CheckError::MissingComponent {
                component,
                path: path.clone(),
            });
        }
        debug!(component, path = %path.display(), "requirement satisfied");
    }
    Ok(())
}
