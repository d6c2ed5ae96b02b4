//! Configuration reconciliation: compare stored configuration against the
//! required operational baseline, rewrite what deviates, restart only when
//! something actually changed.

use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

use pgops_backup::archive::{ARCHIVE_COMMAND_KEY, DISABLED_COMMAND};
use pgops_config::{store, AuthTable, ConfigDocument, ConfigError};
use pgops_host::cluster::{ClusterControl, ClusterError};
use pgops_host::tune::TuningProfile;

/// Client-authentication rule required for local replication connections.
pub const REPLICATION_RULE: &[&str] = &["local", "replication", "postgres", "peer"];

/// Minimum number of WAL sender processes.
const MIN_WAL_SENDERS: u32 = 5;

/// Retention default applied when WAL segment retention is zero.
const DEFAULT_WAL_KEEP_SEGMENTS: &str = "64";

/// Flags reporting which of the two files the policy pass touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyOutcome {
    /// Whether the key/value configuration changed.
    pub changed: bool,
    /// Whether the authentication rule table changed.
    pub auth_changed: bool,
}

/// Error variants for reconciliation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Configuration store failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Cluster control failure.
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// What a reconciliation run did.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Whether the key/value configuration was rewritten.
    pub changed: bool,
    /// Whether the authentication rule table was rewritten.
    pub auth_changed: bool,
    /// Backup path of the previous configuration file, if rewritten.
    pub conf_backup: Option<PathBuf>,
    /// Backup path of the previous authentication file, if rewritten.
    pub auth_backup: Option<PathBuf>,
    /// Whether a full restart was performed.
    pub restarted: bool,
}

/// Applies the policy rules to the in-memory documents.
///
/// Pure: no file or process is touched. Values already compliant are left
/// exactly as they are so an unchanged system reports no delta. Rules are
/// applied in a fixed order; the two compatibility settings at the end are
/// forced to literal values regardless of the current ones because engine
/// defaults are known to break dependent application behavior.
pub fn apply_policy(
    conf: &mut ConfigDocument,
    auth: &mut AuthTable,
    tuning: Option<&TuningProfile>,
) -> PolicyOutcome {
    let mut changed = false;

    if let Some(profile) = tuning {
        for (key, value) in profile.iter() {
            changed |= conf.set(key, value);
        }
    }

    // WAL must be verbose enough for archiving.
    match conf.get("wal_level") {
        None | Some("minimal") => changed |= conf.set("wal_level", "archive"),
        Some(_) => {}
    }

    let senders: Option<u32> = conf
        .get("max_wal_senders")
        .and_then(|v| v.trim_matches('\'').parse().ok());
    if senders.map_or(true, |n| n < MIN_WAL_SENDERS) {
        changed |= conf.set("max_wal_senders", MIN_WAL_SENDERS.to_string());
    }

    if conf
        .get("wal_keep_segments")
        .map_or(true, |v| v.trim_matches('\'') == "0")
    {
        changed |= conf.set("wal_keep_segments", DEFAULT_WAL_KEEP_SEGMENTS);
    }

    if conf.get("archive_mode") != Some("on") {
        changed |= conf.set("archive_mode", "on");
    }

    // The archival controller owns the real command; policy only
    // guarantees the no-op sentinel is in place.
    if conf.get(ARCHIVE_COMMAND_KEY) != Some(DISABLED_COMMAND) {
        changed |= conf.set(ARCHIVE_COMMAND_KEY, DISABLED_COMMAND);
    }

    if conf.get("standard_conforming_strings") != Some("'off'") {
        changed |= conf.set("standard_conforming_strings", "'off'");
    }
    if conf.get("bytea_output") != Some("'escape'") {
        changed |= conf.set("bytea_output", "'escape'");
    }

    let auth_changed = auth.ensure_rule(REPLICATION_RULE);
    PolicyOutcome {
        changed,
        auth_changed,
    }
}

/// Applies policy to the on-disk files and restarts the cluster when
/// anything changed.
pub struct Reconciler<'a> {
    cluster: &'a ClusterControl<'a>,
    conf_path: PathBuf,
    hba_path: PathBuf,
}

impl<'a> Reconciler<'a> {
    /// Creates a reconciler over the given configuration files.
    pub fn new(cluster: &'a ClusterControl<'a>, conf_path: PathBuf, hba_path: PathBuf) -> Self {
        Self {
            cluster,
            conf_path,
            hba_path,
        }
    }

    /// Runs one reconciliation pass.
    ///
    /// Any settings change forces a full stop/start cycle: some recognized
    /// settings are not reloadable without a restart and no attempt is
    /// made to distinguish them. An unchanged system is left untouched.
    pub fn run(&self, tuning: Option<&TuningProfile>) -> Result<ReconcileReport, ReconcileError> {
        let mut conf = store::read_document(&self.conf_path)?;
        let mut auth = store::read_auth(&self.hba_path)?;
        let outcome = apply_policy(&mut conf, &mut auth, tuning);

        let mut report = ReconcileReport {
            changed: outcome.changed,
            auth_changed: outcome.auth_changed,
            ..ReconcileReport::default()
        };
        if outcome.changed {
            report.conf_backup = store::write(&self.conf_path, Some(&conf), None)?;
        }
        if outcome.auth_changed {
            report.auth_backup = store::write(&self.hba_path, None, Some(&auth))?;
        }
        if outcome.changed || outcome.auth_changed {
            info!("configuration reconciled, restarting cluster");
            self.cluster.restart()?;
            report.restarted = true;
        }
        Ok(report)
    }
}
