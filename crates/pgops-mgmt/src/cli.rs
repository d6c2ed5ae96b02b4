//! Operator command-line surface.

use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand, ValueEnum};

use pgops_backup::archive::{ArchivalController, BackupDescriptor};
use pgops_backup::restore::RestoreEngine;
use pgops_host::cluster::ClusterControl;
use pgops_host::process::SystemRunner;
use pgops_host::space::SpaceOracle;
use pgops_host::tune::TuningProfile;

use crate::check;
use crate::reconcile::Reconciler;
use crate::settings::Settings;

/// Cluster lifecycle, backup, and configuration administration.
#[derive(Debug, Parser)]
#[command(name = "pgops", version, about)]
pub struct Cli {
    /// Sysconfig service file describing the managed cluster.
    #[arg(long, global = true, default_value = "/etc/sysconfig/postgresql")]
    pub sysconfig: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

/// Archiving switch positions for `backup-hot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackupMode {
    /// Enable continuous archiving and take a fresh base backup.
    On,
    /// Disable archiving, keeping archived data in place.
    Off,
    /// Disable archiving and delete the backup destination.
    Purge,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the database cluster.
    DbStart,
    /// Stop the database cluster.
    DbStop,
    /// Report whether the cluster is online.
    DbStatus,
    /// Enable, disable, or purge continuous archiving.
    BackupHot {
        /// Switch position.
        #[arg(long, value_enum)]
        enable: BackupMode,
        /// Backup destination directory.
        #[arg(long)]
        backup_dir: PathBuf,
    },
    /// Archive one completed WAL segment. Invoked by the server through
    /// the configured archive command, not by operators.
    WalArchive {
        /// Segment file to archive.
        #[arg(long)]
        source: PathBuf,
        /// Full destination path for the archived segment.
        #[arg(long)]
        destination: PathBuf,
    },
    /// Report the backup configuration and destination state.
    BackupStatus {
        /// Emit the status as JSON instead of the text block.
        #[arg(long)]
        json: bool,
    },
    /// Restore the cluster from the configured base backup.
    BackupRestore,
    /// Verify requirements and reconcile the configuration.
    SystemCheck {
        /// Also merge memory-derived tuning recommendations.
        #[arg(long)]
        autotuning: bool,
    },
}

impl Cli {
    /// Executes the selected command against the host.
    pub fn run(self) -> anyhow::Result<()> {
        let settings = Settings::load(&self.sysconfig)?;
        let runner = SystemRunner;
        let cluster = ClusterControl::new(&runner, settings.cluster_settings());
        let oracle = SpaceOracle::new(&runner);
        let archival =
            ArchivalController::new(&runner, &cluster, &oracle, settings.archive_settings());

        match self.command {
            Command::DbStart => {
                cluster.start().context("unable to start the cluster")?;
                println!("Starting cluster:\tdone");
            }
            Command::DbStop => {
                cluster.stop().context("unable to stop the cluster")?;
                println!("Stopping cluster:\tdone");
            }
            Command::DbStatus => {
                println!(
                    "Cluster is {}",
                    if cluster.status() { "online" } else { "offline" }
                );
            }
            Command::BackupHot { enable, backup_dir } => {
                match enable {
                    BackupMode::On => archival
                        .enable(&backup_dir)
                        .context("unable to enable backups")?,
                    BackupMode::Off => archival
                        .disable(&backup_dir, false)
                        .context("unable to disable backups")?,
                    BackupMode::Purge => archival
                        .disable(&backup_dir, true)
                        .context("unable to purge backups")?,
                }
                print_descriptor(&archival.status()?);
            }
            Command::WalArchive {
                source,
                destination,
            } => {
                archival.archive_segment(&source, &destination)?;
            }
            Command::BackupStatus { json } => {
                let descriptor = archival.status()?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&descriptor)?);
                } else {
                    print_descriptor(&descriptor);
                }
            }
            Command::BackupRestore => {
                let engine =
                    RestoreEngine::new(&runner, &cluster, &oracle, &archival, settings.tar.clone());
                engine.run().context("restore failed")?;
            }
            Command::SystemCheck { autotuning } => {
                check::system_requirements(&settings)?;
                println!("All required components are present.");

                let tuning = if autotuning {
                    Some(TuningProfile::from_host()?)
                } else {
                    None
                };
                let reconciler =
                    Reconciler::new(&cluster, settings.conf_path(), settings.hba_path());
                let report = reconciler.run(tuning.as_ref())?;

                if let Some(backup) = &report.conf_backup {
                    println!(
                        "General configuration rewritten, previous file kept as {}",
                        backup.display()
                    );
                }
                if let Some(backup) = &report.auth_backup {
                    println!(
                        "Client authentication rewritten, previous file kept as {}",
                        backup.display()
                    );
                }
                if report.restarted {
                    println!("Cluster restarted with the reconciled configuration.");
                } else {
                    println!("Configuration already compliant, nothing to do.");
                }
            }
        }
        Ok(())
    }
}

/// Prints the operator-facing backup status block.
fn print_descriptor(descriptor: &BackupDescriptor) {
    println!(
        "Backup status:\t\t{}",
        if descriptor.enabled { "ON" } else { "OFF" }
    );
    if let Some(destination) = &descriptor.destination {
        println!("Destination:\t\t{}", destination.display());
    }
    match descriptor.last_activity {
        Some(at) => {
            let local: DateTime<Local> = at.into();
            println!("Last transaction:\t{}", local.format("%Y-%m-%d %H:%M:%S"));
        }
        None => println!("Last transaction:\t--"),
    }
    match descriptor.space_used_percent {
        Some(used) => println!("Space available:\t{}%", 100u8.saturating_sub(used)),
        None => println!("Space available:\t--"),
    }
}
