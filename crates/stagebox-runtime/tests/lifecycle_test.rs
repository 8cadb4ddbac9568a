//! Container lifecycle scenarios across the manager, the nspawn files, and
//! teardown, driven through a scripted host.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use stagebox_common::config::StageboxConfig;
use stagebox_common::error::StageboxError;
use stagebox_common::types::{ContainerState, UpgradeMode};
use stagebox_core::host::{Stdio, ToolOutput};
use stagebox_core::testing::ScriptedHost;
use stagebox_runtime::manager::ContainerManager;

fn setup() -> (tempfile::TempDir, Arc<ScriptedHost>, ContainerManager) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StageboxConfig::default();
    config.containers_root = dir.path().join("machines");
    config.nspawn_dir = dir.path().join("nspawn");
    config.unit_dir = dir.path().join("system");
    config.update.dir = dir.path().join("update");
    config.binds.domain_dir = dir.path().join("domain0");
    config.binds.dropbox_dir = dir.path().join("dropbox");
    std::fs::create_dir_all(&config.containers_root).unwrap();
    std::fs::create_dir_all(&config.binds.domain_dir).unwrap();
    std::fs::create_dir_all(config.repository_dir()).unwrap();

    let host = Arc::new(ScriptedHost::new());
    host.respond(
        &["zfs", "list", "-H", "-o", "name", "/"],
        ToolOutput::ok("rpool/ROOT/base\n"),
    );
    let manager = ContainerManager::new(host.clone(), config);
    (dir, host, manager)
}

#[test]
fn full_lifecycle_leaves_nothing_behind() {
    let (_dir, host, manager) = setup();

    let mut container = manager.create(UpgradeMode::InPlace).expect("create");
    let presence = manager.presence(&container.paths).unwrap();
    assert!(presence.complete());

    manager.start(&mut container).expect("start");
    let argv = vec!["cat".to_string(), "/etc/os-release".to_string()];
    let out = manager.run(&container, &argv, Stdio::Capture).expect("run");
    assert!(out.success());

    manager.stop(&mut container).expect("stop");
    assert_eq!(container.state, ContainerState::Stopped);
    manager.destroy(&mut container).expect("destroy");

    host.fail(&["zfs", "list", "-H", "-t", "all"], "dataset does not exist");
    assert!(manager.presence(&container.paths).unwrap().absent());
    assert!(matches!(
        manager.open(&container.name).unwrap_err(),
        StageboxError::NotFound { .. }
    ));
}

#[test]
fn settings_file_binds_host_paths() {
    let (dir, _host, manager) = setup();
    let container = manager.create(UpgradeMode::NotInPlace).expect("create");

    let settings = std::fs::read_to_string(&container.paths.settings_file).unwrap();
    assert!(settings.contains("PrivateUsers=no"));
    assert!(settings.contains("Private=yes"));
    assert!(settings.contains(&format!("Bind={}", dir.path().join("update").display())));
    assert!(settings.contains(&format!("BindReadOnly={}", dir.path().join("domain0").display())));
    assert!(settings.contains("Bind=/dev/zfs"));

    let unit = std::fs::read_to_string(container.paths.override_file()).unwrap();
    assert!(unit.contains("--capability=all"));
}

#[test]
fn generated_names_are_unique() {
    let (_dir, _host, manager) = setup();
    let a = manager.create(UpgradeMode::InPlace).unwrap();
    let b = manager.create(UpgradeMode::InPlace).unwrap();
    assert_ne!(a.name, b.name);
}

#[test]
fn open_reports_running_unit() {
    let (_dir, _host, manager) = setup();
    let created = manager.create(UpgradeMode::InPlace).unwrap();
    let opened = manager.open(&created.name).unwrap();
    assert_eq!(opened.state, ContainerState::Running);
}
