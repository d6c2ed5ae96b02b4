//! Reconciliation against real files and a scripted runner: baseline
//! rewrite with backups, restart accounting, idempotence.

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use pgops_config::store;
use pgops_host::cluster::{ClusterControl, ClusterSettings};
use pgops_host::process::CommandSpec;
use pgops_host::testing::ScriptedRunner;
use pgops_mgmt::reconcile::{Reconciler, REPLICATION_RULE};

struct Fixture {
    _root: TempDir,
    settings: ClusterSettings,
    conf_path: PathBuf,
    hba_path: PathBuf,
}

fn fixture() -> Fixture {
    let root = TempDir::new().unwrap();
    let data_dir = root.path().join("data");
    let proc_dir = root.path().join("proc");
    let socket_dir = root.path().join("sockets");
    for dir in [&data_dir, &proc_dir, &socket_dir] {
        fs::create_dir_all(dir).unwrap();
    }

    let conf_path = data_dir.join("postgresql.conf");
    let hba_path = data_dir.join("pg_hba.conf");
    fs::write(
        &conf_path,
        "max_connections = 100\nwal_level = minimal\nwal_keep_segments = 0\n",
    )
    .unwrap();
    fs::write(
        &hba_path,
        "local all all peer\nhost all all 127.0.0.1/32 md5\n",
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
        _root: root,
        settings,
        conf_path,
        hba_path,
    }
}

fn mark_running(settings: &ClusterSettings) {
    fs::write(settings.data_dir.join("postmaster.pid"), "77\n").unwrap();
    fs::create_dir_all(settings.proc_dir.join("77")).unwrap();
}

fn install_lifecycle_hook(runner: &ScriptedRunner, settings: &ClusterSettings) {
    let data_dir = settings.data_dir.clone();
    let proc_dir = settings.proc_dir.clone();
    runner.set_hook(move |spec: &CommandSpec| {
        let line = spec.display();
        if line.contains("pg_ctl stop") {
            let _ = fs::remove_file(data_dir.join("postmaster.pid"));
            let _ = fs::remove_dir_all(proc_dir.join("77"));
        } else if line.contains("pg_ctl start") {
            fs::write(data_dir.join("postmaster.pid"), "77\n").unwrap();
            fs::create_dir_all(proc_dir.join("77")).unwrap();
        }
    });
}

#[test]
fn first_run_rewrites_restarts_and_keeps_backups() {
    let fx = fixture();
    let runner = ScriptedRunner::new();
    mark_running(&fx.settings);
    install_lifecycle_hook(&runner, &fx.settings);

    let cluster = ClusterControl::new(&runner, fx.settings.clone());
    let reconciler = Reconciler::new(&cluster, fx.conf_path.clone(), fx.hba_path.clone());
    let report = reconciler.run(None).unwrap();

    assert!(report.changed);
    assert!(report.auth_changed);
    assert!(report.restarted);
    assert_eq!(runner.calls_matching("pg_ctl stop"), 1);
    assert_eq!(runner.calls_matching("pg_ctl start"), 1);

    let conf = store::read_document(&fx.conf_path).unwrap();
    assert_eq!(conf.get("wal_level"), Some("archive"));
    assert_eq!(conf.get("wal_keep_segments"), Some("64"));
    assert_eq!(conf.get("archive_mode"), Some("on"));
    assert_eq!(conf.get("archive_command"), Some("'/bin/true'"));
    // Settings the policy does not own are untouched.
    assert_eq!(conf.get("max_connections"), Some("100"));

    let auth = store::read_auth(&fx.hba_path).unwrap();
    let rules: Vec<_> = auth.iter().cloned().collect();
    assert_eq!(rules.len(), 3);
    assert!(rules[2].matches(REPLICATION_RULE));

    let conf_backup = report.conf_backup.unwrap();
    assert!(conf_backup.exists());
    assert!(fs::read_to_string(&conf_backup)
        .unwrap()
        .contains("wal_level = minimal"));
    assert!(report.auth_backup.unwrap().exists());
}

#[test]
fn second_run_is_a_no_op() {
    let fx = fixture();
    let runner = ScriptedRunner::new();
    mark_running(&fx.settings);
    install_lifecycle_hook(&runner, &fx.settings);

    let cluster = ClusterControl::new(&runner, fx.settings.clone());
    let reconciler = Reconciler::new(&cluster, fx.conf_path.clone(), fx.hba_path.clone());
    reconciler.run(None).unwrap();
    let calls_after_first = runner.calls().len();

    let report = reconciler.run(None).unwrap();
    assert!(!report.changed);
    assert!(!report.auth_changed);
    assert!(!report.restarted);
    assert!(report.conf_backup.is_none());
    assert_eq!(runner.calls().len(), calls_after_first);

    let auth = store::read_auth(&fx.hba_path).unwrap();
    assert_eq!(
        auth.iter().filter(|r| r.matches(REPLICATION_RULE)).count(),
        1
    );
}

#[test]
fn offline_cluster_is_started_not_cycled() {
    let fx = fixture();
    let runner = ScriptedRunner::new();
    install_lifecycle_hook(&runner, &fx.settings);

    let cluster = ClusterControl::new(&runner, fx.settings.clone());
    let reconciler = Reconciler::new(&cluster, fx.conf_path.clone(), fx.hba_path.clone());
    let report = reconciler.run(None).unwrap();

    assert!(report.restarted);
    assert_eq!(runner.calls_matching("pg_ctl stop"), 0);
    assert_eq!(runner.calls_matching("pg_ctl start"), 1);
    assert!(cluster.status());
}
