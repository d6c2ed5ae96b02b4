//! Archival controller behavior against a scripted runner: restart
//! accounting, base backup rotation, segment archiving, status derivation.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use pgops_backup::archive::{
    ArchivalController, ArchiveError, ArchiveSettings, DISABLED_COMMAND,
};
use pgops_host::cluster::{ClusterControl, ClusterSettings};
use pgops_host::process::{CommandSpec, ExecOutput};
use pgops_host::space::SpaceOracle;
use pgops_host::testing::ScriptedRunner;

const DF_B1: &str = "Filesystem 1-blocks Used Available Capacity Mounted on\n\
                     /dev/sda3 211243667456 82040242176 129203425280 39% /var\n";

struct Fixture {
    root: TempDir,
    settings: ClusterSettings,
    dest: PathBuf,
}

fn fixture() -> Fixture {
    let root = TempDir::new().unwrap();
    let data_dir = root.path().join("data");
    let proc_dir = root.path().join("proc");
    let socket_dir = root.path().join("sockets");
    let dest = root.path().join("backups");
    for dir in [&data_dir, &proc_dir, &socket_dir, &dest] {
        fs::create_dir_all(dir).unwrap();
    }
    fs::write(
        data_dir.join("postgresql.conf"),
        format!("wal_level = archive\narchive_command = {DISABLED_COMMAND}\n"),
    )
    .unwrap();

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
        root,
        settings,
        dest,
    }
}

fn mark_running(settings: &ClusterSettings) {
    fs::write(settings.data_dir.join("postmaster.pid"), "77\n").unwrap();
    fs::create_dir_all(settings.proc_dir.join("77")).unwrap();
}

/// Emulates what pg_ctl and pg_basebackup would do to the filesystem.
fn install_lifecycle_hook(runner: &ScriptedRunner, settings: &ClusterSettings, dest: &Path) {
    let data_dir = settings.data_dir.clone();
    let proc_dir = settings.proc_dir.clone();
    let staging = dest.join("tmp");
    runner.set_hook(move |spec: &CommandSpec| {
        let line = spec.display();
        if line.contains("pg_ctl stop") {
            let _ = fs::remove_file(data_dir.join("postmaster.pid"));
            let _ = fs::remove_dir_all(proc_dir.join("77"));
        } else if line.contains("pg_ctl start") {
            fs::write(data_dir.join("postmaster.pid"), "77\n").unwrap();
            fs::create_dir_all(proc_dir.join("77")).unwrap();
        } else if line.contains("pg_basebackup") {
            fs::create_dir_all(&staging).unwrap();
            fs::write(staging.join("base.tar.gz"), "fresh base backup").unwrap();
        }
    });
}

#[test]
fn enable_disable_enable_restarts_exactly_on_command_change() {
    let fx = fixture();
    let runner = ScriptedRunner::new();
    mark_running(&fx.settings);
    install_lifecycle_hook(&runner, &fx.settings, &fx.dest);

    let cluster = ClusterControl::new(&runner, fx.settings.clone());
    let oracle = SpaceOracle::new(&runner);
    let controller = ArchivalController::new(
        &runner,
        &cluster,
        &oracle,
        ArchiveSettings {
            pg_basebackup: PathBuf::from("/usr/bin/pg_basebackup"),
            archiver_bin: PathBuf::from("/usr/bin/pgops"),
        },
    );

    controller.enable(&fx.dest).unwrap();
    assert_eq!(runner.calls_matching("pg_ctl stop"), 1);
    assert_eq!(runner.calls_matching("pg_ctl start"), 1);

    controller.disable(&fx.dest, false).unwrap();
    assert_eq!(runner.calls_matching("pg_ctl stop"), 2);

    controller.enable(&fx.dest).unwrap();
    assert_eq!(runner.calls_matching("pg_ctl stop"), 3);
    assert_eq!(runner.calls_matching("pg_ctl start"), 3);

    // Value already correct: no extra restart, backup still retaken.
    controller.enable(&fx.dest).unwrap();
    assert_eq!(runner.calls_matching("pg_ctl stop"), 3);
    assert_eq!(runner.calls_matching("pg_basebackup"), 3);

    let conf = pgops_config::store::read_document(&fx.settings.data_dir.join("postgresql.conf"))
        .unwrap();
    assert_eq!(
        conf.get("archive_command"),
        Some(controller.enabled_command(&fx.dest).as_str())
    );
}

#[test]
fn enable_rotates_and_promotes_base_backups() {
    let fx = fixture();
    let runner = ScriptedRunner::new();
    mark_running(&fx.settings);
    install_lifecycle_hook(&runner, &fx.settings, &fx.dest);

    fs::write(fx.dest.join("base.tar.gz"), "previous base").unwrap();
    fs::write(fx.dest.join("base-old.tar.gz"), "ancient base").unwrap();

    let cluster = ClusterControl::new(&runner, fx.settings.clone());
    let oracle = SpaceOracle::new(&runner);
    let controller = ArchivalController::new(
        &runner,
        &cluster,
        &oracle,
        ArchiveSettings {
            pg_basebackup: PathBuf::from("/usr/bin/pg_basebackup"),
            archiver_bin: PathBuf::from("/usr/bin/pgops"),
        },
    );
    controller.enable(&fx.dest).unwrap();

    assert_eq!(
        fs::read_to_string(fx.dest.join("base-old.tar.gz")).unwrap(),
        "previous base"
    );
    assert_eq!(
        fs::read_to_string(fx.dest.join("base.tar.gz")).unwrap(),
        "fresh base backup"
    );
    assert!(!fx.dest.join("tmp/base.tar.gz").exists());
}

#[test]
fn disable_with_purge_deletes_the_destination() {
    let fx = fixture();
    let runner = ScriptedRunner::new();
    mark_running(&fx.settings);
    install_lifecycle_hook(&runner, &fx.settings, &fx.dest);

    let cluster = ClusterControl::new(&runner, fx.settings.clone());
    let oracle = SpaceOracle::new(&runner);
    let controller = ArchivalController::new(
        &runner,
        &cluster,
        &oracle,
        ArchiveSettings {
            pg_basebackup: PathBuf::from("/usr/bin/pg_basebackup"),
            archiver_bin: PathBuf::from("/usr/bin/pgops"),
        },
    );
    controller.enable(&fx.dest).unwrap();
    fs::write(fx.dest.join("000000010000000000000001"), "wal").unwrap();

    controller.disable(&fx.dest, true).unwrap();
    assert!(!fx.dest.exists());

    let conf = pgops_config::store::read_document(&fx.settings.data_dir.join("postgresql.conf"))
        .unwrap();
    assert_eq!(conf.get("archive_command"), Some(DISABLED_COMMAND));
}

#[test]
fn archive_segment_copies_once_and_never_overwrites() {
    let fx = fixture();
    let runner = ScriptedRunner::new();
    let cluster = ClusterControl::new(&runner, fx.settings.clone());
    let oracle = SpaceOracle::new(&runner);
    let controller = ArchivalController::new(
        &runner,
        &cluster,
        &oracle,
        ArchiveSettings {
            pg_basebackup: PathBuf::from("/usr/bin/pg_basebackup"),
            archiver_bin: PathBuf::from("/usr/bin/pgops"),
        },
    );

    let source = fx.root.path().join("000000010000000000000042");
    fs::write(&source, "segment payload").unwrap();
    let destination = fx.dest.join("000000010000000000000042");

    controller.archive_segment(&source, &destination).unwrap();
    assert_eq!(fs::read_to_string(&destination).unwrap(), "segment payload");
    // No staging leftovers under the final or dotted name.
    assert!(!fx.dest.join(".000000010000000000000042.partial").exists());

    let err = controller
        .archive_segment(&source, &destination)
        .unwrap_err();
    assert!(matches!(err, ArchiveError::DestinationExists(_)));

    let err = controller
        .archive_segment(&fx.root.path().join("missing"), &fx.dest.join("other"))
        .unwrap_err();
    assert!(matches!(err, ArchiveError::MissingSource(_)));
}

#[test]
fn status_derives_descriptor_from_config_and_destination() {
    let fx = fixture();
    let runner = ScriptedRunner::new();
    let cluster = ClusterControl::new(&runner, fx.settings.clone());
    let oracle = SpaceOracle::new(&runner);
    let controller = ArchivalController::new(
        &runner,
        &cluster,
        &oracle,
        ArchiveSettings {
            pg_basebackup: PathBuf::from("/usr/bin/pg_basebackup"),
            archiver_bin: PathBuf::from("/usr/bin/pgops"),
        },
    );

    let enabled = controller.enabled_command(&fx.dest);
    fs::write(
        fx.settings.data_dir.join("postgresql.conf"),
        format!("archive_command = {enabled}\n"),
    )
    .unwrap();
    fs::write(fx.dest.join("base.tar.gz"), "base").unwrap();
    fs::write(fx.dest.join("000000010000000000000001"), "wal").unwrap();
    runner.push(ExecOutput::ok(DF_B1));

    let descriptor = controller.status().unwrap();
    assert_eq!(descriptor.destination.as_deref(), Some(fx.dest.as_path()));
    assert!(descriptor.enabled);
    assert_eq!(
        descriptor.base_archive.as_deref(),
        Some(fx.dest.join("base.tar.gz").as_path())
    );
    assert!(descriptor.last_activity.is_some());
    assert_eq!(descriptor.space_used_percent, Some(39));
}

#[test]
fn status_reports_off_when_archiving_is_disabled() {
    let fx = fixture();
    let runner = ScriptedRunner::new();
    let cluster = ClusterControl::new(&runner, fx.settings.clone());
    let oracle = SpaceOracle::new(&runner);
    let controller = ArchivalController::new(
        &runner,
        &cluster,
        &oracle,
        ArchiveSettings {
            pg_basebackup: PathBuf::from("/usr/bin/pg_basebackup"),
            archiver_bin: PathBuf::from("/usr/bin/pgops"),
        },
    );

    let descriptor = controller.status().unwrap();
    assert!(!descriptor.enabled);
    assert!(descriptor.destination.is_none());
    assert!(descriptor.base_archive.is_none());
}
