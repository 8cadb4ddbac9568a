//! Promotion of a stopped container's dataset to the next-boot root.

use std::path::PathBuf;

use stagebox_common::error::{Result, StageboxError};
use stagebox_common::types::{ContainerState, DatasetName};
use stagebox_core::filesystem::mount::PseudoFsMounts;
use stagebox_core::host::Stdio;
use stagebox_core::storage::{boot_device_candidates, device_path};

use crate::container::Container;
use crate::exec;
use crate::manager::ContainerManager;
use crate::migrate::ConfigMigrator;

/// Installs the bootloader from inside a container root and hands the
/// container's dataset over as the boot filesystem.
pub struct BootloaderPromoter<'m> {
    manager: &'m ContainerManager,
}

impl<'m> BootloaderPromoter<'m> {
    /// Creates a promoter using the manager's host and layout.
    #[must_use]
    pub const fn new(manager: &'m ContainerManager) -> Self {
        Self { manager }
    }

    /// Converts `container` into the boot filesystem.
    ///
    /// Pseudo-filesystems are mounted for the duration of the chroot steps
    /// and released on every exit path. Every boot device is validated
    /// before the bootloader is written to any of them.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing step; the container is left
    /// in place.
    pub fn promote(&self, mut container: Container) -> Result<DatasetName> {
        container.require(&[ContainerState::Stopped], "convert")?;
        self.manager.ensure_configured(&container)?;

        let host = self.manager.host();
        let config = self.manager.config();
        let root = container.paths.directory.clone();
        let dataset = container.paths.dataset.clone();
        tracing::info!(name = %container.name, dataset = %dataset, "promoting to boot filesystem");

        let mounts = PseudoFsMounts::mount(host, &root)?;

        let migrator = ConfigMigrator::new(host, &root, &config.shadow_file);
        for user in &config.migration.users {
            migrator.migrate_user(user)?;
        }
        for file in &config.migration.files {
            let _ = migrator.migrate_file(file)?;
        }

        let _ = host.run_checked(&exec::chroot(&root, ["update-grub"]), Stdio::StdoutToStderr)?;

        let devices = self.boot_devices(&dataset)?;
        let mut installed: Vec<&PathBuf> = Vec::with_capacity(devices.len());
        for device in &devices {
            let cmd = exec::chroot(&root, ["grub-install".to_string(), device.display().to_string()]);
            if let Err(e) = host.run_checked(&cmd, Stdio::StdoutToStderr) {
                tracing::error!(
                    device = %device.display(),
                    installed = ?installed,
                    "bootloader install failed after partial install"
                );
                return Err(e);
            }
            installed.push(device);
        }
        tracing::info!(devices = ?devices, "bootloader installed");

        mounts.release();

        let zfs = self.manager.zfs();
        zfs.unmount(&dataset)?;
        zfs.set_property(&dataset, "canmount", "noauto")?;
        zfs.set_property(&dataset, "mountpoint", "/")?;

        container.transition(ContainerState::Promoted);
        self.manager.unregister(&container);
        tracing::info!(name = %container.name, dataset = %dataset, "boot filesystem promoted");
        Ok(dataset)
    }

    /// Resolves and validates the whole-disk devices backing the dataset's
    /// pool.
    fn boot_devices(&self, dataset: &DatasetName) -> Result<Vec<PathBuf>> {
        let pool = dataset.pool();
        let members = self.manager.zfs().pool_members(pool)?;
        let devices: Vec<PathBuf> = boot_device_candidates(&members)
            .iter()
            .map(|c| device_path(c))
            .collect();
        if devices.is_empty() {
            return Err(StageboxError::precondition(format!(
                "pool {pool} has no physical devices"
            )));
        }
        let host = self.manager.host();
        if let Some(bad) = devices.iter().find(|d| !host.is_block_device(d)) {
            return Err(StageboxError::precondition(format!(
                "boot device {} is not a block device",
                bad.display()
            )));
        }
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use stagebox_common::config::StageboxConfig;
    use stagebox_common::types::UpgradeMode;
    use stagebox_core::host::ToolOutput;
    use stagebox_core::testing::ScriptedHost;

    const POOL: &str = "rpool\t9.5G\t-\t-\t-\n\tmirror-0\t-\t-\t-\t-\n\t/dev/sda2\t-\t-\t-\t-\n\t/dev/sdb2\t-\t-\t-\t-\n";

    struct Fixture {
        dir: tempfile::TempDir,
        host: Arc<ScriptedHost>,
        manager: ContainerManager,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StageboxConfig::default();
        config.containers_root = dir.path().join("machines");
        config.nspawn_dir = dir.path().join("nspawn");
        config.unit_dir = dir.path().join("system");
        config.update.dir = dir.path().join("update");
        config.binds.domain_dir = dir.path().join("domain0");
        config.binds.dropbox_dir = dir.path().join("dropbox");
        config.shadow_file = dir.path().join("shadow");
        config.migration.users = vec!["root".into()];
        config.migration.files = vec![dir.path().join("hostid")];
        std::fs::create_dir_all(&config.containers_root).unwrap();
        std::fs::write(&config.shadow_file, "root:$6$h:1::::::\n").unwrap();
        std::fs::write(dir.path().join("hostid"), "id").unwrap();
        std::fs::create_dir_all(config.repository_dir()).unwrap();

        let host = Arc::new(ScriptedHost::new());
        host.respond(
            &["zfs", "list", "-H", "-o", "name", "/"],
            ToolOutput::ok("rpool/ROOT/base\n"),
        );
        host.respond(&["zpool", "list"], ToolOutput::ok(POOL));
        host.add_block_device("/dev/sda");
        host.add_block_device("/dev/sdb");
        let manager = ContainerManager::new(host.clone(), config);
        Fixture { dir, host, manager }
    }

    fn stopped(f: &Fixture) -> Container {
        let mut c = f.manager.create(UpgradeMode::NotInPlace).unwrap();
        c.transition(ContainerState::Stopped);
        c
    }

    #[test]
    fn promotes_dataset_and_releases_mounts() {
        let f = fixture();
        let c = stopped(&f);
        let name = c.name.clone();
        let root = c.paths.directory.clone();

        let dataset = f.manager.convert_to_bootfs(c).unwrap();
        assert_eq!(dataset.as_str(), format!("rpool/ROOT/{name}"));
        assert_eq!(f.host.mount_count(), 3);
        assert!(f.host.active_mounts().is_empty());

        assert_eq!(f.host.count(&["chroot"]), 4);
        assert!(f.host.command_lines().iter().any(|l| l.ends_with("grub-install /dev/sda")));
        assert!(f.host.command_lines().iter().any(|l| l.ends_with("grub-install /dev/sdb")));
        assert!(f.host.called(&["zfs", "set", "canmount=noauto"]));
        assert!(f.host.called(&["zfs", "set", "mountpoint=/"]));
        let unmount = f.host.position(&["zfs", "umount"]).unwrap();
        let mountpoint = f.host.position(&["zfs", "set", "mountpoint=/"]).unwrap();
        assert!(unmount < mountpoint);

        let hostid = f.dir.path().join("hostid");
        let migrated = root.join(hostid.strip_prefix("/").unwrap());
        assert_eq!(std::fs::read_to_string(migrated).unwrap(), "id");
    }

    #[test]
    fn running_container_is_refused() {
        let f = fixture();
        let mut c = stopped(&f);
        c.transition(ContainerState::Running);
        let err = f.manager.convert_to_bootfs(c).unwrap_err();
        assert!(matches!(err, StageboxError::InvalidState { .. }));
        assert_eq!(f.host.mount_count(), 0);
    }

    #[test]
    fn non_block_device_aborts_before_any_install() {
        let f = fixture();
        f.host.respond(
            &["zpool", "list"],
            ToolOutput::ok("rpool\t-\n\t/dev/sda2\t-\n\t/dev/vdz1\t-\n"),
        );
        let c = stopped(&f);

        let err = f.manager.convert_to_bootfs(c).unwrap_err();
        assert!(matches!(err, StageboxError::Precondition { .. }));
        assert!(!f.host.command_lines().iter().any(|l| l.contains("grub-install")));
        assert!(f.host.active_mounts().is_empty());
    }

    #[test]
    fn failed_install_still_releases_mounts() {
        let f = fixture();
        let c = stopped(&f);
        let root = c.paths.directory.display().to_string();
        f.host.fail(
            &["chroot", root.as_str(), "grub-install", "/dev/sdb"],
            "cannot find EFI directory",
        );

        let err = f.manager.convert_to_bootfs(c).unwrap_err();
        assert!(matches!(err, StageboxError::Tool { .. }));
        assert_eq!(f.host.mount_count(), 3);
        assert!(f.host.active_mounts().is_empty());
        assert!(!f.host.called(&["zfs", "set"]));
    }

    #[test]
    fn migration_failure_still_releases_mounts() {
        let f = fixture();
        std::fs::write(&f.manager.config().shadow_file, "daemon:*:1::::::\n").unwrap();
        let c = stopped(&f);

        let err = f.manager.convert_to_bootfs(c).unwrap_err();
        assert!(matches!(err, StageboxError::Precondition { .. }));
        assert!(f.host.active_mounts().is_empty());
        assert!(!f.host.called(&["chroot"]));
    }
}
