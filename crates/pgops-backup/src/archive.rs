//! Continuous WAL archiving: enabling/disabling the archive command,
//! round-robin retention of base backups, and per-segment archiving.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use pgops_config::{store, ConfigError};
use pgops_host::cluster::{ClusterControl, ClusterError};
use pgops_host::process::{CommandSpec, ExecError, Runner};
use pgops_host::space::{OracleError, SpaceOracle};

/// Configuration key that carries the archive command.
pub const ARCHIVE_COMMAND_KEY: &str = "archive_command";

/// No-op sentinel the archive command is reset to when archiving is off.
pub const DISABLED_COMMAND: &str = "'/bin/true'";

/// File name of the current base backup inside the destination directory.
pub const BASE_ARCHIVE: &str = "base.tar.gz";

/// File name the previous base backup is rotated to.
pub const BASE_ARCHIVE_OLD: &str = "base-old.tar.gz";

/// Derived view of the backup configuration and destination contents.
///
/// Never persisted; recomputed from the configured archive command and the
/// destination directory on every query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupDescriptor {
    /// Destination directory recovered from the archive command, if any.
    pub destination: Option<PathBuf>,
    /// Whether archiving is effectively on (destination configured and
    /// present on disk).
    pub enabled: bool,
    /// Path of the current base backup, when one exists.
    pub base_archive: Option<PathBuf>,
    /// Most recent modification time among archived files.
    pub last_activity: Option<SystemTime>,
    /// Used percentage of the destination's partition.
    pub space_used_percent: Option<u8>,
}

/// Tool paths the controller needs beyond the cluster settings.
#[derive(Debug, Clone)]
pub struct ArchiveSettings {
    /// Path of the `pg_basebackup` binary.
    pub pg_basebackup: PathBuf,
    /// Path of this tool's binary, referenced by the enabled archive
    /// command for per-segment archiving.
    pub archiver_bin: PathBuf,
}

/// Error variants for archival control.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The cluster could not be confirmed running after a start attempt.
    #[error("cannot start the database")]
    ClusterUnavailable,

    /// The WAL segment to archive does not exist.
    #[error("source file \"{0}\" does not exist")]
    MissingSource(PathBuf),

    /// The archive destination already holds a file of that name.
    /// Archiving never overwrites; the server retries on failure.
    #[error("destination file \"{0}\" already exists")]
    DestinationExists(PathBuf),

    /// Cluster control failure.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// Configuration store failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// External command failure.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// Space oracle failure.
    #[error(transparent)]
    Oracle(#[from] OracleError),

    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns continuous archiving on and off and manages base backups.
pub struct ArchivalController<'a> {
    runner: &'a dyn Runner,
    cluster: &'a ClusterControl<'a>,
    oracle: &'a SpaceOracle<'a>,
    settings: ArchiveSettings,
}

impl<'a> ArchivalController<'a> {
    /// Creates a controller composing the given leaf components.
    pub fn new(
        runner: &'a dyn Runner,
        cluster: &'a ClusterControl<'a>,
        oracle: &'a SpaceOracle<'a>,
        settings: ArchiveSettings,
    ) -> Self {
        Self {
            runner,
            cluster,
            oracle,
            settings,
        }
    }

    fn conf_path(&self) -> PathBuf {
        self.cluster.settings().data_dir.join("postgresql.conf")
    }

    /// The archive command value that enables archiving into `destination`.
    pub fn enabled_command(&self, destination: &Path) -> String {
        format!(
            "'{} wal-archive --source \"%p\" --destination \"{}/%f\"'",
            self.settings.archiver_bin.display(),
            destination.display()
        )
    }

    /// Enables continuous archiving into `destination` and takes a fresh
    /// base backup.
    ///
    /// The archive command is written and activated by a full restart
    /// *before* the base backup is taken; taking the backup first would
    /// leave a window in which completed WAL segments are neither in the
    /// live cluster nor archived.
    pub fn enable(&self, destination: &Path) -> Result<(), ArchiveError> {
        if !self.cluster.status() {
            self.cluster.start()?;
        }
        if !self.cluster.status() {
            return Err(ArchiveError::ClusterUnavailable);
        }

        if !destination.exists() {
            let user = &self.cluster.settings().service_user;
            self.runner.run_checked(
                &CommandSpec::as_user(user, "mkdir")
                    .args(["-p", "-m", "0700"])
                    .arg(destination.display().to_string()),
            )?;
        }

        let conf_path = self.conf_path();
        let mut conf = store::read_document(&conf_path)?;
        let command = self.enabled_command(destination);
        if conf.get(ARCHIVE_COMMAND_KEY) != Some(command.as_str()) {
            conf.set(ARCHIVE_COMMAND_KEY, command);
            let backup = store::write(&conf_path, Some(&conf), None)?;
            info!(config_backup = ?backup, "archive command enabled, restarting cluster");
            self.cluster.restart()?;
        }

        self.rotate_base_backups(destination)?;
        self.take_base_backup(destination)?;
        Ok(())
    }

    /// Disables continuous archiving, optionally purging the destination
    /// directory first. Restarts only when the stored command actually
    /// changes.
    pub fn disable(&self, destination: &Path, purge: bool) -> Result<(), ArchiveError> {
        if purge && destination.exists() {
            info!(destination = %destination.display(), "purging backup destination");
            fs::remove_dir_all(destination)?;
        }

        let conf_path = self.conf_path();
        let mut conf = store::read_document(&conf_path)?;
        if conf.get(ARCHIVE_COMMAND_KEY) != Some(DISABLED_COMMAND) {
            conf.set(ARCHIVE_COMMAND_KEY, DISABLED_COMMAND);
            store::write(&conf_path, Some(&conf), None)?;
            info!("archive command disabled, restarting cluster");
            self.cluster.restart()?;
        }
        Ok(())
    }

    /// Copies one emitted WAL segment into the archive.
    ///
    /// Refuses a missing source or an existing destination. The copy goes
    /// to a dot-prefixed sibling first and is renamed into place, so a
    /// partially copied file never appears under the final name.
    pub fn archive_segment(&self, source: &Path, destination: &Path) -> Result<(), ArchiveError> {
        if !source.exists() {
            return Err(ArchiveError::MissingSource(source.to_path_buf()));
        }
        if destination.exists() {
            return Err(ArchiveError::DestinationExists(destination.to_path_buf()));
        }

        let name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "segment".to_string());
        let staging = destination.with_file_name(format!(".{name}.partial"));

        fs::copy(source, &staging)?;
        let meta = fs::metadata(source)?;
        if let (Ok(accessed), Ok(modified)) = (meta.accessed(), meta.modified()) {
            let file = fs::File::options().write(true).open(&staging)?;
            file.set_times(
                fs::FileTimes::new()
                    .set_accessed(accessed)
                    .set_modified(modified),
            )?;
        }
        fs::rename(&staging, destination)?;
        debug!(segment = %destination.display(), "archived WAL segment");
        Ok(())
    }

    /// Derives the current [`BackupDescriptor`].
    pub fn status(&self) -> Result<BackupDescriptor, ArchiveError> {
        let conf = store::read_document(&self.conf_path())?;
        let destination = conf
            .get(ARCHIVE_COMMAND_KEY)
            .and_then(parse_destination);

        let mut descriptor = BackupDescriptor::default();
        let Some(destination) = destination else {
            return Ok(descriptor);
        };
        descriptor.enabled = destination.exists();

        if descriptor.enabled {
            let base = destination.join(BASE_ARCHIVE);
            if base.exists() {
                descriptor.base_archive = Some(base);
            }
            descriptor.last_activity = latest_mtime(&destination)?;
            descriptor.space_used_percent =
                Some(self.oracle.partition_stats(&destination)?.used_percent);
        }
        descriptor.destination = Some(destination);
        Ok(descriptor)
    }

    /// Renames `base.tar.gz` to `base-old.tar.gz`, dropping any prior
    /// rotated copy.
    fn rotate_base_backups(&self, destination: &Path) -> Result<(), ArchiveError> {
        let base = destination.join(BASE_ARCHIVE);
        if base.exists() {
            let old = destination.join(BASE_ARCHIVE_OLD);
            if old.exists() {
                fs::remove_file(&old)?;
            }
            fs::rename(&base, &old)?;
            debug!("rotated previous base backup");
        }
        Ok(())
    }

    /// Takes a fresh base backup into `<destination>/tmp` and promotes it
    /// by rename on success.
    fn take_base_backup(&self, destination: &Path) -> Result<(), ArchiveError> {
        let staging_dir = destination.join("tmp");
        let cluster = self.cluster.settings();
        self.runner.run_checked(
            &CommandSpec::as_user(
                &cluster.service_user,
                self.settings.pg_basebackup.display().to_string(),
            )
            .arg("-D")
            .arg(staging_dir.display().to_string())
            .args(["-Ft", "-c", "fast", "-x", "-v", "-P", "-z"])
            .cwd(&cluster.home_dir),
        )?;

        let staged = staging_dir.join(BASE_ARCHIVE);
        if staged.exists() {
            fs::rename(&staged, destination.join(BASE_ARCHIVE))?;
            info!(destination = %destination.display(), "base backup taken");
        }
        Ok(())
    }
}

/// Recovers the backup destination directory from an archive command
/// value: the directory part of the path following `--destination`.
pub fn parse_destination(command: &str) -> Option<PathBuf> {
    let mut tokens = command.split_whitespace();
    while let Some(token) = tokens.next() {
        let value = if token == "--destination" {
            tokens.next()?
        } else if let Some(rest) = token.strip_prefix("--destination=") {
            rest
        } else {
            continue;
        };
        let cleaned: String = value.chars().filter(|c| *c != '"' && *c != '\'').collect();
        return Path::new(&cleaned).parent().map(Path::to_path_buf);
    }
    None
}

/// Most recent modification time among the direct entries of `dir`.
fn latest_mtime(dir: &Path) -> std::io::Result<Option<SystemTime>> {
    let mut latest = None;
    for entry in fs::read_dir(dir)? {
        let modified = entry?.metadata()?.modified()?;
        if latest.map_or(true, |current| modified > current) {
            latest = Some(modified);
        }
    }
    Ok(latest)
}
