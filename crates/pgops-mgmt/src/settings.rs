//! Strongly typed runtime settings, assembled once at startup from the
//! sysconfig service file plus defaults, and passed by reference into each
//! component.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use pgops_backup::archive::ArchiveSettings;
use pgops_config::{ConfigError, Sysconfig};
use pgops_host::cluster::ClusterSettings;

/// Error variants for settings assembly.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The sysconfig service file could not be read.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The configured data directory does not exist on disk.
    #[error("cannot find cluster data directory at \"{0}\"")]
    DataDirMissing(PathBuf),
}

/// Everything the tool needs to know about the managed host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Cluster data directory.
    pub data_dir: PathBuf,
    /// Service account home directory.
    pub home_dir: PathBuf,
    /// Database service account.
    pub service_user: String,
    /// Extra server startup options from the sysconfig file.
    pub start_options: String,
    /// Location of the sysconfig service file.
    pub sysconfig_path: PathBuf,
    /// Path of `pg_ctl`.
    pub pg_ctl: PathBuf,
    /// Path of `postmaster`.
    pub postmaster: PathBuf,
    /// Path of `pg_basebackup`.
    pub pg_basebackup: PathBuf,
    /// Path of `psql`.
    pub psql: PathBuf,
    /// Path of `tar`.
    pub tar: PathBuf,
    /// Path of this tool, referenced from the enabled archive command.
    pub archiver_bin: PathBuf,
    /// Directory holding interprocess socket artifacts.
    pub socket_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/pgsql/data"),
            home_dir: PathBuf::from("/var/lib/pgsql"),
            service_user: "postgres".to_string(),
            start_options: String::new(),
            sysconfig_path: PathBuf::from("/etc/sysconfig/postgresql"),
            pg_ctl: PathBuf::from("/usr/bin/pg_ctl"),
            postmaster: PathBuf::from("/usr/bin/postmaster"),
            pg_basebackup: PathBuf::from("/usr/bin/pg_basebackup"),
            psql: PathBuf::from("/usr/bin/psql"),
            tar: PathBuf::from("/bin/tar"),
            archiver_bin: PathBuf::from("/usr/bin/pgops"),
            socket_dir: PathBuf::from("/tmp"),
        }
    }
}

impl Settings {
    /// Assembles settings from the service file at `sysconfig_path`,
    /// falling back to defaults for anything the file does not set.
    pub fn load(sysconfig_path: &Path) -> Result<Self, SettingsError> {
        let mut settings = Self {
            sysconfig_path: sysconfig_path.to_path_buf(),
            ..Self::default()
        };
        let sysconfig = Sysconfig::read(sysconfig_path)?;

        if let Some(data_dir) = sysconfig.get_unquoted("POSTGRES_DATADIR") {
            if !data_dir.is_empty() {
                settings.data_dir = PathBuf::from(data_dir);
            }
        }
        if let Some(options) = sysconfig.get_unquoted("POSTGRES_OPTIONS") {
            settings.start_options = options.to_string();
        }
        debug!(data_dir = %settings.data_dir.display(), "settings assembled");

        if !settings.data_dir.exists() {
            return Err(SettingsError::DataDirMissing(settings.data_dir));
        }
        Ok(settings)
    }

    /// Path of the cluster configuration file.
    pub fn conf_path(&self) -> PathBuf {
        self.data_dir.join("postgresql.conf")
    }

    /// Path of the client-authentication rule file.
    pub fn hba_path(&self) -> PathBuf {
        self.data_dir.join("pg_hba.conf")
    }

    /// View of these settings for the cluster process controller.
    pub fn cluster_settings(&self) -> ClusterSettings {
        ClusterSettings {
            data_dir: self.data_dir.clone(),
            home_dir: self.home_dir.clone(),
            service_user: self.service_user.clone(),
            start_options: self.start_options.clone(),
            pg_ctl: self.pg_ctl.clone(),
            postmaster: self.postmaster.clone(),
            socket_dir: self.socket_dir.clone(),
            proc_dir: PathBuf::from("/proc"),
        }
    }

    /// View of these settings for the archival controller.
    pub fn archive_settings(&self) -> ArchiveSettings {
        ArchiveSettings {
            pg_basebackup: self.pg_basebackup.clone(),
            archiver_bin: self.archiver_bin.clone(),
        }
    }
}
