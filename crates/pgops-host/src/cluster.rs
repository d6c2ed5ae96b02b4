//! Cluster process control: liveness, start, stop, restart.
//!
//! Liveness is never cached. It is recomputed on demand from the
//! `postmaster.pid` marker inside the data directory plus the existence of
//! the referenced process. If the marker is deleted while the server still
//! runs, the cluster reports as not running; correctness depends entirely
//! on marker accuracy.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::process::{CommandSpec, ExecError, Runner};

/// Prefix of the interprocess socket artifacts left in the socket
/// directory by an unclean shutdown.
const SOCKET_PREFIX: &str = ".s.PGSQL.";

/// Everything the controller needs to know about the managed cluster.
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    /// The cluster data directory (contains `postmaster.pid`).
    pub data_dir: PathBuf,
    /// Service account home directory; working directory for server
    /// commands.
    pub home_dir: PathBuf,
    /// Database service account name.
    pub service_user: String,
    /// Extra server startup options handed to `pg_ctl -o`.
    pub start_options: String,
    /// Path of the `pg_ctl` binary.
    pub pg_ctl: PathBuf,
    /// Path of the `postmaster` binary.
    pub postmaster: PathBuf,
    /// Directory holding interprocess socket artifacts.
    pub socket_dir: PathBuf,
    /// Root of the process table, `/proc` on a live host. Overridden in
    /// tests to fake process liveness.
    pub proc_dir: PathBuf,
}

/// Error variants for cluster process control.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// `start()` was called while the cluster is already running.
    #[error("cluster is already running")]
    AlreadyRunning,

    /// `stop()` was called while the cluster is not running.
    #[error("cluster is not running")]
    NotRunning,

    /// The stop command completed but the cluster still reports running.
    /// Fatal to the calling workflow.
    #[error("unable to stop the cluster: still running after shutdown")]
    StopFailed,

    /// An external command failed.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Starts, stops, and inspects the database server process.
pub struct ClusterControl<'r> {
    runner: &'r dyn Runner,
    settings: ClusterSettings,
}

impl<'r> ClusterControl<'r> {
    /// Creates a controller over `settings`, issuing commands through
    /// `runner`.
    pub fn new(runner: &'r dyn Runner, settings: ClusterSettings) -> Self {
        Self { runner, settings }
    }

    /// Settings this controller operates on.
    pub fn settings(&self) -> &ClusterSettings {
        &self.settings
    }

    /// Whether the cluster is running right now.
    ///
    /// True iff the liveness marker exists and names a live process. No
    /// side effects.
    pub fn status(&self) -> bool {
        match marker_pid(&self.settings.data_dir) {
            Some(pid) => self.settings.proc_dir.join(pid.to_string()).exists(),
            None => false,
        }
    }

    /// Starts the server.
    ///
    /// Fails with [`ClusterError::AlreadyRunning`] when the cluster is
    /// already up. Removes stale socket artifacts first, then invokes
    /// `pg_ctl start` as the service user with the working directory set to
    /// the service home for the duration of the call.
    pub fn start(&self) -> Result<(), ClusterError> {
        if self.status() {
            return Err(ClusterError::AlreadyRunning);
        }
        self.cleanup_sockets()?;

        let spec = CommandSpec::as_user(
            &self.settings.service_user,
            self.settings.pg_ctl.display().to_string(),
        )
        .args(["start", "-s", "-w", "-p"])
        .arg(self.settings.postmaster.display().to_string())
        .arg("-D")
        .arg(self.settings.data_dir.display().to_string())
        .arg("-o")
        .arg(if self.settings.start_options.is_empty() {
            "\"\"".to_string()
        } else {
            self.settings.start_options.clone()
        })
        .cwd(&self.settings.home_dir);
        self.runner.run_checked(&spec)?;
        info!(data_dir = %self.settings.data_dir.display(), "cluster started");
        Ok(())
    }

    /// Stops the server with a fast shutdown (does not wait for client
    /// sessions), then removes stale socket artifacts.
    ///
    /// Fails with [`ClusterError::NotRunning`] when nothing is running and
    /// with [`ClusterError::StopFailed`] when the cluster still reports
    /// running afterwards; the latter is fatal to the calling workflow.
    pub fn stop(&self) -> Result<(), ClusterError> {
        if !self.status() {
            return Err(ClusterError::NotRunning);
        }

        let spec = CommandSpec::as_user(
            &self.settings.service_user,
            self.settings.pg_ctl.display().to_string(),
        )
        .args(["stop", "-s", "-D"])
        .arg(self.settings.data_dir.display().to_string())
        .args(["-m", "fast"])
        .cwd(&self.settings.home_dir);
        self.runner.run_checked(&spec)?;
        self.cleanup_sockets()?;

        if self.status() {
            return Err(ClusterError::StopFailed);
        }
        info!(data_dir = %self.settings.data_dir.display(), "cluster stopped");
        Ok(())
    }

    /// Full stop/start cycle; stop is skipped when nothing runs.
    pub fn restart(&self) -> Result<(), ClusterError> {
        if self.status() {
            self.stop()?;
        }
        self.start()
    }

    /// Removes stale interprocess socket artifacts from the socket
    /// directory.
    fn cleanup_sockets(&self) -> Result<(), ClusterError> {
        let dir = &self.settings.socket_dir;
        if !dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(SOCKET_PREFIX) {
                debug!(socket = %entry.path().display(), "removing stale socket");
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

/// Reads the pid recorded in the liveness marker of `data_dir`, if any.
pub fn marker_pid(data_dir: &Path) -> Option<u32> {
    let text = fs::read_to_string(data_dir.join("postmaster.pid")).ok()?;
    text.lines().next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        settings: ClusterSettings,
    }

    fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        let data_dir = root.path().join("data");
        let proc_dir = root.path().join("proc");
        let socket_dir = root.path().join("tmp");
        fs::create_dir_all(&data_dir).unwrap();
        fs::create_dir_all(&proc_dir).unwrap();
        fs::create_dir_all(&socket_dir).unwrap();
        let settings = ClusterSettings {
            data_dir,
            home_dir: root.path().to_path_buf(),
            service_user: "postgres".to_string(),
            start_options: String::new(),
            pg_ctl: PathBuf::from("/usr/bin/pg_ctl"),
            postmaster: PathBuf::from("/usr/bin/postmaster"),
            socket_dir,
            proc_dir,
        };
        Fixture {
            _root: root,
            settings,
        }
    }

    fn mark_running(settings: &ClusterSettings, pid: u32) {
        fs::write(
            settings.data_dir.join("postmaster.pid"),
            format!("{pid}\n{}\n", settings.data_dir.display()),
        )
        .unwrap();
        fs::create_dir_all(settings.proc_dir.join(pid.to_string())).unwrap();
    }

    #[test]
    fn status_requires_marker_and_live_process() {
        let fx = fixture();
        let runner = ScriptedRunner::new();
        let control = ClusterControl::new(&runner, fx.settings.clone());

        assert!(!control.status());

        mark_running(&fx.settings, 4242);
        assert!(control.status());

        // Marker gone while the process is still alive: reported stopped.
        fs::remove_file(fx.settings.data_dir.join("postmaster.pid")).unwrap();
        assert!(!control.status());
    }

    #[test]
    fn status_ignores_stale_marker() {
        let fx = fixture();
        let runner = ScriptedRunner::new();
        let control = ClusterControl::new(&runner, fx.settings.clone());

        fs::write(fx.settings.data_dir.join("postmaster.pid"), "999999\n").unwrap();
        assert!(!control.status());
    }

    #[test]
    fn start_refuses_when_running_and_cleans_sockets_otherwise() {
        let fx = fixture();
        let runner = ScriptedRunner::new();
        let control = ClusterControl::new(&runner, fx.settings.clone());

        mark_running(&fx.settings, 7);
        assert!(matches!(control.start(), Err(ClusterError::AlreadyRunning)));
        assert!(runner.calls().is_empty());

        fs::remove_file(fx.settings.data_dir.join("postmaster.pid")).unwrap();
        let stale = fx.settings.socket_dir.join(".s.PGSQL.5432");
        fs::write(&stale, "").unwrap();
        control.start().unwrap();
        assert!(!stale.exists());
        assert_eq!(runner.calls_matching("pg_ctl start"), 1);
        assert_eq!(runner.calls_matching("sudo -u postgres"), 1);
    }

    #[test]
    fn stop_refuses_when_not_running() {
        let fx = fixture();
        let runner = ScriptedRunner::new();
        let control = ClusterControl::new(&runner, fx.settings.clone());
        assert!(matches!(control.stop(), Err(ClusterError::NotRunning)));
    }

    #[test]
    fn stop_is_fatal_when_cluster_stays_up() {
        let fx = fixture();
        let runner = ScriptedRunner::new();
        let control = ClusterControl::new(&runner, fx.settings.clone());

        // Marker and process survive the (faked) stop command.
        mark_running(&fx.settings, 11);
        assert!(matches!(control.stop(), Err(ClusterError::StopFailed)));
        assert_eq!(runner.calls_matching("pg_ctl stop"), 1);
        assert_eq!(runner.calls_matching("-m fast"), 1);
    }

    #[test]
    fn restart_skips_stop_when_already_down() {
        let fx = fixture();
        let runner = ScriptedRunner::new();
        let control = ClusterControl::new(&runner, fx.settings.clone());
        control.restart().unwrap();
        assert_eq!(runner.calls_matching("pg_ctl stop"), 0);
        assert_eq!(runner.calls_matching("pg_ctl start"), 1);
    }
}
