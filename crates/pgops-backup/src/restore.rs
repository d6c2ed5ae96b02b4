//! Restore-from-backup workflow.
//!
//! An ordered, non-resumable sequence: locate backup, verify disk space,
//! shut down, quarantine the current cluster, replace it with the
//! extracted backup, write the recovery configuration, restart. Nothing
//! destructive happens before the preconditions pass; nothing is rolled
//! back automatically after they do.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use thiserror::Error;
use tracing::info;

use pgops_host::cluster::{ClusterControl, ClusterError};
use pgops_host::process::{CommandSpec, ExecError, Runner};
use pgops_host::space::{size_pretty, OracleError, SpaceOracle};

use crate::archive::{ArchivalController, ArchiveError, BASE_ARCHIVE};

/// Empirical compression ratio of a typical cluster tablespace when
/// tarred; used to estimate the quarantine archive's footprint.
pub const COMPRESSION_RATIO: f64 = 0.134;

/// Free space that must remain after the restore completes: 1 GiB.
pub const MIN_FREE_AFTER_RESTORE: u64 = 1 << 30;

/// Maximum directory depth searched for the backup's cluster root.
pub const MAX_SEARCH_DEPTH: usize = 8;

/// Marker file identifying the cluster root inside an extracted backup.
const CLUSTER_MARKER: &str = "backup_label";

/// Space arithmetic for the restore precondition.
///
/// The restore unpacks a full new copy before discarding the old one, so
/// the binding constraint is transient peak usage: the tarred footprint of
/// the current cluster plus the backup itself.
#[derive(Debug, Clone, Copy)]
pub struct SpaceForecast {
    /// Size of the current cluster tablespace in bytes.
    pub current_bytes: u64,
    /// Size of the backup destination in bytes.
    pub backup_bytes: u64,
    /// Available bytes on the cluster's partition.
    pub available_bytes: u64,
}

impl SpaceForecast {
    /// Projected bytes remaining after the restore.
    pub fn projected_remaining(&self) -> f64 {
        self.available_bytes as f64
            - self.current_bytes as f64 * COMPRESSION_RATIO
            - self.backup_bytes as f64
    }

    /// Whether the restore may proceed.
    pub fn fits(&self) -> bool {
        self.projected_remaining() >= MIN_FREE_AFTER_RESTORE as f64
    }
}

/// Error variants for the restore workflow.
#[derive(Debug, Error)]
pub enum RestoreError {
    /// No backup is configured or its destination is missing.
    #[error("no backup snapshots are available")]
    NoBackup,

    /// The space precondition failed; nothing was changed.
    #[error(
        "insufficient disk space: at least 1GiB must remain after restore \
         (available {}, cluster {}, backup {})",
        size_pretty(forecast.available_bytes),
        size_pretty(forecast.current_bytes),
        size_pretty(forecast.backup_bytes)
    )]
    InsufficientSpace {
        /// The failing forecast.
        forecast: SpaceForecast,
    },

    /// The data directory has no parent to place the quarantine in.
    #[error("data directory {0} has no parent directory")]
    NoParent(PathBuf),

    /// The extracted backup holds no cluster root marker.
    #[error("no cluster root found under {0}")]
    BackupRootNotFound(PathBuf),

    /// Cluster control failure.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// Archival controller failure.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Space oracle failure; fatal because proceeding without a space
    /// estimate risks filling the disk.
    #[error(transparent)]
    Oracle(#[from] OracleError),

    /// External command failure.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Orchestrates the full restore-from-backup workflow.
pub struct RestoreEngine<'a> {
    runner: &'a dyn Runner,
    cluster: &'a ClusterControl<'a>,
    oracle: &'a SpaceOracle<'a>,
    archival: &'a ArchivalController<'a>,
    tar: PathBuf,
}

impl<'a> RestoreEngine<'a> {
    /// Creates an engine composing the given components; `tar` is the
    /// path of the tar binary used for quarantine and extraction.
    pub fn new(
        runner: &'a dyn Runner,
        cluster: &'a ClusterControl<'a>,
        oracle: &'a SpaceOracle<'a>,
        archival: &'a ArchivalController<'a>,
        tar: PathBuf,
    ) -> Self {
        Self {
            runner,
            cluster,
            oracle,
            archival,
            tar,
        }
    }

    /// Runs the restore workflow to completion.
    ///
    /// Aborts before any destructive step when a precondition fails. A
    /// failure in the later steps is surfaced with its step context but
    /// not rolled back; the quarantine archive is the operator's safety
    /// net.
    pub fn run(&self) -> Result<(), RestoreError> {
        let descriptor = self.archival.status()?;
        let destination = match (descriptor.destination, descriptor.enabled) {
            (Some(dir), true) => dir,
            _ => return Err(RestoreError::NoBackup),
        };

        let data_dir = self.cluster.settings().data_dir.clone();
        let forecast = self.forecast(&data_dir, &destination)?;
        println!("Current cluster size:\t{}", size_pretty(forecast.current_bytes));
        println!("Backup size:\t\t{}", size_pretty(forecast.backup_bytes));
        println!("Available space:\t{}", size_pretty(forecast.available_bytes));
        if !forecast.fits() {
            return Err(RestoreError::InsufficientSpace { forecast });
        }

        if self.cluster.status() {
            self.cluster.stop()?;
        }

        self.quarantine(&data_dir)?;
        self.replace(&data_dir, &destination)?;
        self.write_recovery_conf(&data_dir, &destination)?;

        println!("Starting restored cluster");
        self.cluster.start()?;
        Ok(())
    }

    /// Computes the space forecast for restoring `backup_dir` over
    /// `data_dir`.
    pub fn forecast(
        &self,
        data_dir: &Path,
        backup_dir: &Path,
    ) -> Result<SpaceForecast, RestoreError> {
        Ok(SpaceForecast {
            current_bytes: self.oracle.directory_size_bytes(data_dir)?,
            backup_bytes: self.oracle.directory_size_bytes(backup_dir)?,
            available_bytes: self.oracle.partition_stats(data_dir)?.available_bytes,
        })
    }

    /// Archives the entire current data directory into a timestamped
    /// tarball next to it. A safety net, not a validated restore path.
    fn quarantine(&self, data_dir: &Path) -> Result<(), RestoreError> {
        let parent = data_dir
            .parent()
            .ok_or_else(|| RestoreError::NoParent(data_dir.to_path_buf()))?;
        let old_dir = parent.join("data.old");
        if !old_dir.exists() {
            fs::create_dir(&old_dir)?;
            println!("Created \"{}\" directory.", old_dir.display());
        }

        let stamp = Local::now().format("%Y-%m-%d-%H-%M-%S");
        let tarball = old_dir.join(format!("data.{stamp}.tar.gz"));
        println!("Quarantining current cluster to {}", tarball.display());
        self.runner.run_checked(
            &CommandSpec::new(self.tar.display().to_string())
                .arg("-czPf")
                .arg(tarball.display().to_string())
                .arg(data_dir.display().to_string()),
        )?;
        info!(tarball = %tarball.display(), "current cluster quarantined");
        Ok(())
    }

    /// Deletes the current data directory and moves the extracted backup
    /// root into its place.
    fn replace(&self, data_dir: &Path, backup_dir: &Path) -> Result<(), RestoreError> {
        let parent = data_dir
            .parent()
            .ok_or_else(|| RestoreError::NoParent(data_dir.to_path_buf()))?;

        println!("Removing current cluster");
        fs::remove_dir_all(data_dir)?;

        // Scratch lives next to the data directory so the final move is a
        // same-filesystem rename.
        let scratch = tempfile::Builder::new()
            .prefix(".pgops-restore-")
            .tempdir_in(parent)?;
        let user = &self.cluster.settings().service_user;
        self.runner.run_checked(
            &CommandSpec::new("chown")
                .arg(format!("{user}:{user}"))
                .arg(scratch.path().display().to_string()),
        )?;

        println!("Extracting base backup");
        self.runner.run_checked(
            &CommandSpec::new(self.tar.display().to_string())
                .arg("xf")
                .arg(backup_dir.join(BASE_ARCHIVE).display().to_string())
                .arg(format!("--directory={}", scratch.path().display())),
        )?;

        let root = find_backup_root(scratch.path(), MAX_SEARCH_DEPTH)?
            .ok_or_else(|| RestoreError::BackupRootNotFound(scratch.path().to_path_buf()))?;
        fs::rename(&root, data_dir)?;
        info!(data_dir = %data_dir.display(), "backup moved into place");
        Ok(())
    }

    /// Writes the recovery configuration instructing the engine to fetch
    /// missing WAL segments from the backup destination. `%f` and `%p`
    /// are substituted by the database engine at recovery time.
    fn write_recovery_conf(&self, data_dir: &Path, backup_dir: &Path) -> Result<(), RestoreError> {
        let path = data_dir.join("recovery.conf");
        fs::write(
            &path,
            format!("restore_command = 'cp {}/%f %p'\n", backup_dir.display()),
        )?;
        println!("Wrote {}", path.display());
        Ok(())
    }
}

/// Bounded depth-first search for the directory containing the cluster
/// marker file.
///
/// Traversal is in sorted name order and the first match wins, so an
/// ambiguous backup layout resolves deterministically. Returns `None` when
/// no marker is found within `max_depth` levels.
pub fn find_backup_root(dir: &Path, max_depth: usize) -> std::io::Result<Option<PathBuf>> {
    if dir.join(CLUSTER_MARKER).is_file() {
        return Ok(Some(dir.to_path_buf()));
    }
    if max_depth == 0 {
        return Ok(None);
    }
    let mut subdirs: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    subdirs.sort();
    for sub in subdirs {
        if let Some(found) = find_backup_root(&sub, max_depth - 1)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}
