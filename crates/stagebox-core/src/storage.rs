//! ZFS storage driver.
//!
//! Wraps the `zfs` and `zpool` command-line tools. Tool output is parsed
//! into typed values here; nothing above this module looks at raw output.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use stagebox_common::error::{Result, StageboxError};
use stagebox_common::types::{DatasetName, SnapshotName};

use crate::host::{Host, ToolCommand};

/// Vdev names that describe a redundancy or bookkeeping role rather than a
/// physical device.
const NON_PHYSICAL_VDEVS: &[&str] = &[
    "mirror", "replacing", "spare", "spares", "raidz", "draid", "logs", "cache", "special",
    "dedup",
];

/// Driver for ZFS datasets, snapshots, and pool topology.
pub struct ZfsDriver {
    host: Arc<dyn Host>,
}

impl ZfsDriver {
    /// Creates a driver that runs tools through `host`.
    #[must_use]
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self { host }
    }

    /// Returns the dataset mounted at `/`.
    ///
    /// # Errors
    ///
    /// Returns [`StageboxError::StorageQuery`] if no dataset is mounted
    /// there or the output is not a single dataset name.
    pub fn mounted_root_dataset(&self) -> Result<DatasetName> {
        let cmd = ToolCommand::new("zfs").args(["list", "-H", "-o", "name", "/"]);
        let out = self.host.output(&cmd)?;
        if !out.success() {
            return Err(StageboxError::StorageQuery {
                message: format!("no dataset mounted at /: {}", out.stderr.trim()),
            });
        }
        parse_single_name(&out.stdout)
    }

    /// Whether a dataset or snapshot with this name exists.
    ///
    /// # Errors
    ///
    /// Returns an error only if `zfs` could not be spawned.
    pub fn exists(&self, name: &str) -> Result<bool> {
        let cmd = ToolCommand::new("zfs").args(["list", "-H", "-t", "all", "-o", "name", name]);
        Ok(self.host.output(&cmd)?.success())
    }

    /// Takes `<dataset>@<name>`.
    ///
    /// # Errors
    ///
    /// Returns [`StageboxError::StorageOperation`] on failure.
    pub fn snapshot(&self, dataset: &DatasetName, name: &str) -> Result<SnapshotName> {
        let snapshot = SnapshotName::new(dataset.clone(), name);
        let target = snapshot.to_string();
        self.mutate(
            "snapshot",
            &target,
            ToolCommand::new("zfs").args(["snapshot", target.as_str()]),
        )?;
        Ok(snapshot)
    }

    /// Clones `snapshot` into `target`, mounted at `mountpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`StageboxError::StorageOperation`] on failure.
    pub fn clone_snapshot(
        &self,
        snapshot: &SnapshotName,
        target: &DatasetName,
        mountpoint: &Path,
    ) -> Result<()> {
        self.mutate(
            "clone",
            target.as_str(),
            ToolCommand::new("zfs")
                .args(["clone", "-o"])
                .arg(format!("mountpoint={}", mountpoint.display()))
                .arg(snapshot.to_string())
                .arg(target.as_str()),
        )
    }

    /// Creates an empty filesystem dataset mounted at `mountpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`StageboxError::StorageOperation`] on failure.
    pub fn create(&self, dataset: &DatasetName, mountpoint: &Path) -> Result<()> {
        self.mutate(
            "create",
            dataset.as_str(),
            ToolCommand::new("zfs")
                .args(["create", "-p", "-o"])
                .arg(format!("mountpoint={}", mountpoint.display()))
                .arg(dataset.as_str()),
        )
    }

    /// Destroys a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StageboxError::StorageOperation`] on failure.
    pub fn destroy_snapshot(&self, snapshot: &SnapshotName) -> Result<()> {
        let target = snapshot.to_string();
        self.mutate(
            "destroy",
            &target,
            ToolCommand::new("zfs").args(["destroy", target.as_str()]),
        )
    }

    /// Destroys a dataset and all of its descendants.
    ///
    /// # Errors
    ///
    /// Returns [`StageboxError::StorageOperation`] on failure.
    pub fn destroy_dataset(&self, dataset: &DatasetName) -> Result<()> {
        self.mutate(
            "destroy",
            dataset.as_str(),
            ToolCommand::new("zfs").args(["destroy", "-r", dataset.as_str()]),
        )
    }

    /// Sets `key=value` on a dataset.
    ///
    /// # Errors
    ///
    /// Returns [`StageboxError::StorageOperation`] on failure.
    pub fn set_property(&self, dataset: &DatasetName, key: &str, value: &str) -> Result<()> {
        self.mutate(
            "set-property",
            dataset.as_str(),
            ToolCommand::new("zfs")
                .arg("set")
                .arg(format!("{key}={value}"))
                .arg(dataset.as_str()),
        )
    }

    /// Reads a property; `None` when ZFS reports it as unset (`-`).
    ///
    /// # Errors
    ///
    /// Returns [`StageboxError::StorageQuery`] if the query fails.
    pub fn get_property(&self, dataset: &DatasetName, key: &str) -> Result<Option<String>> {
        let cmd = ToolCommand::new("zfs").args(["get", "-H", "-o", "value", key, dataset.as_str()]);
        let out = self.host.output(&cmd)?;
        if !out.success() {
            return Err(StageboxError::StorageQuery {
                message: format!("{key} of {dataset}: {}", out.stderr.trim()),
            });
        }
        let value = out.stdout.trim();
        Ok((!value.is_empty() && value != "-").then(|| value.to_string()))
    }

    /// Unmounts a dataset.
    ///
    /// # Errors
    ///
    /// Returns [`StageboxError::StorageOperation`] on failure.
    pub fn unmount(&self, dataset: &DatasetName) -> Result<()> {
        self.mutate(
            "unmount",
            dataset.as_str(),
            ToolCommand::new("zfs").args(["umount", dataset.as_str()]),
        )
    }

    /// Lists the vdev entries of a pool, in `zpool` order.
    ///
    /// # Errors
    ///
    /// Returns [`StageboxError::StorageQuery`] if the pool cannot be listed.
    pub fn pool_members(&self, pool: &str) -> Result<Vec<String>> {
        let cmd = ToolCommand::new("zpool").args(["list", "-v", "-H", "-P", pool]);
        let out = self.host.output(&cmd)?;
        if !out.success() {
            return Err(StageboxError::StorageQuery {
                message: format!("cannot list pool {pool}: {}", out.stderr.trim()),
            });
        }
        Ok(parse_pool_members(&out.stdout))
    }

    fn mutate(&self, operation: &'static str, target: &str, cmd: ToolCommand) -> Result<()> {
        tracing::debug!(command = %cmd, "zfs {operation}");
        let out = self.host.output(&cmd)?;
        if out.success() {
            return Ok(());
        }
        Err(StageboxError::StorageOperation {
            operation,
            target: target.to_string(),
            message: out.stderr.trim().to_string(),
        })
    }
}

/// Parses output that must contain exactly one dataset name.
///
/// # Errors
///
/// Returns [`StageboxError::StorageQuery`] for empty or multi-line output.
pub fn parse_single_name(stdout: &str) -> Result<DatasetName> {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    match (lines.next(), lines.next()) {
        (Some(name), None) => DatasetName::parse(name),
        (None, _) => Err(StageboxError::StorageQuery {
            message: "expected a dataset name, got nothing".into(),
        }),
        (Some(_), Some(_)) => Err(StageboxError::StorageQuery {
            message: format!("expected one dataset name, got {stdout:?}"),
        }),
    }
}

/// Extracts vdev names from `zpool list -v -H -P` output.
///
/// The first line describes the pool itself and is skipped.
#[must_use]
pub fn parse_pool_members(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(ToString::to_string)
        .collect()
}

/// Reduces pool members to the whole-disk devices a bootloader should be
/// installed on.
///
/// Redundancy roles are dropped, partition suffixes stripped, and duplicates
/// removed while keeping first-seen order.
#[must_use]
pub fn boot_device_candidates<S: AsRef<str>>(members: &[S]) -> Vec<String> {
    let mut seen = Vec::new();
    for member in members.iter().map(AsRef::as_ref) {
        let base = member.rsplit('/').next().unwrap_or(member);
        if is_vdev_role(base) {
            continue;
        }
        let device = strip_partition_suffix(member).to_string();
        if !seen.contains(&device) {
            seen.push(device);
        }
    }
    seen
}

/// Maps a candidate to a device path; bare names resolve under `/dev`.
#[must_use]
pub fn device_path(candidate: &str) -> PathBuf {
    if candidate.starts_with('/') {
        PathBuf::from(candidate)
    } else {
        Path::new("/dev").join(candidate)
    }
}

/// Whether a `zpool list` entry names a grouping vdev or section header
/// (`mirror-0`, `raidz2-1`, `draid1:2d:4c:0s-0`, `logs`) rather than a device.
fn is_vdev_role(name: &str) -> bool {
    NON_PHYSICAL_VDEVS.iter().any(|role| {
        name.strip_prefix(role).is_some_and(|rest| {
            if rest.is_empty() {
                return true;
            }
            let Some((layout, index)) = rest.rsplit_once('-') else {
                return false;
            };
            let indexed = !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit());
            indexed && (layout.is_empty() || layout.starts_with(|c: char| c.is_ascii_digit()))
        })
    })
}

/// Strips a trailing partition number from a device name.
///
/// Handles `sda1`, `nvme0n1p2`, `mmcblk0p1`, and `...-part3` forms; whole
/// disk names are returned unchanged. Persistent names under `/dev/disk/`
/// only ever lose a `-partN` suffix.
fn strip_partition_suffix(device: &str) -> &str {
    let digits = device.trim_end_matches(|c: char| c.is_ascii_digit());
    if digits.len() == device.len() {
        return device;
    }
    if let Some(base) = digits.strip_suffix("-part") {
        return base;
    }
    if device.contains("/disk/by-") {
        return device;
    }
    if let Some(base) = digits.strip_suffix('p') {
        if base.ends_with(|c: char| c.is_ascii_digit()) {
            return base;
        }
    }
    let ends_in_namespace = digits
        .strip_suffix('n')
        .is_some_and(|base| base.ends_with(|c: char| c.is_ascii_digit()));
    if ends_in_namespace || digits.ends_with("mmcblk") || digits.ends_with("loop") {
        return device;
    }
    digits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ToolOutput;
    use crate::testing::ScriptedHost;

    fn driver() -> (Arc<ScriptedHost>, ZfsDriver) {
        let host = Arc::new(ScriptedHost::new());
        let zfs = ZfsDriver::new(host.clone());
        (host, zfs)
    }

    #[test]
    fn mounted_root_parses_single_line() {
        let (host, zfs) = driver();
        host.respond(
            &["zfs", "list", "-H", "-o", "name", "/"],
            ToolOutput::ok("rpool/ROOT/base\n"),
        );
        assert_eq!(zfs.mounted_root_dataset().unwrap().as_str(), "rpool/ROOT/base");
    }

    #[test]
    fn mounted_root_failure_is_a_query_error() {
        let (host, zfs) = driver();
        host.fail(&["zfs", "list"], "cannot open '/': not a ZFS filesystem");
        let err = zfs.mounted_root_dataset().unwrap_err();
        assert!(matches!(err, StageboxError::StorageQuery { .. }));
    }

    #[test]
    fn unexpected_output_shape_is_rejected() {
        assert!(parse_single_name("").is_err());
        assert!(parse_single_name("a\nb\n").is_err());
        assert!(parse_single_name("rpool/ROOT@snap\n").is_err());
        assert_eq!(parse_single_name("  rpool/x \n\n").unwrap().as_str(), "rpool/x");
    }

    #[test]
    fn failed_mutation_carries_target() {
        let (host, zfs) = driver();
        host.fail(&["zfs", "snapshot"], "dataset does not exist");
        let ds = DatasetName::parse("rpool/ROOT/base").unwrap();
        match zfs.snapshot(&ds, "abc").unwrap_err() {
            StageboxError::StorageOperation {
                operation, target, ..
            } => {
                assert_eq!(operation, "snapshot");
                assert_eq!(target, "rpool/ROOT/base@abc");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn clone_sets_mountpoint() {
        let (host, zfs) = driver();
        let snap = SnapshotName::new(DatasetName::parse("rpool/ROOT/base").unwrap(), "abc");
        let target = DatasetName::parse("rpool/ROOT/abc").unwrap();
        zfs.clone_snapshot(&snap, &target, Path::new("/var/lib/machines/abc"))
            .unwrap();
        assert_eq!(
            host.command_lines(),
            vec![
                "zfs clone -o mountpoint=/var/lib/machines/abc rpool/ROOT/base@abc rpool/ROOT/abc"
            ]
        );
    }

    #[test]
    fn unset_property_reads_as_none() {
        let (host, zfs) = driver();
        let ds = DatasetName::parse("rpool/ROOT/abc").unwrap();
        host.respond(&["zfs", "get", "-H", "-o", "value", "origin"], ToolOutput::ok("-\n"));
        host.respond(&["zfs", "get", "-H", "-o", "value", "canmount"], ToolOutput::ok("noauto\n"));
        assert_eq!(zfs.get_property(&ds, "origin").unwrap(), None);
        assert_eq!(
            zfs.get_property(&ds, "canmount").unwrap().as_deref(),
            Some("noauto")
        );
    }

    #[test]
    fn exists_follows_exit_status() {
        let (host, zfs) = driver();
        host.fail(&["zfs", "list", "-H", "-t", "all", "-o", "name", "rpool/gone"], "no such dataset");
        assert!(!zfs.exists("rpool/gone").unwrap());
        assert!(zfs.exists("rpool/here").unwrap());
    }

    #[test]
    fn pool_members_skip_pool_line() {
        let out = "rpool\t9.50G\t1.2G\t8.3G\t-\n\
                   \tmirror-0\t9.50G\t1.2G\t8.3G\t-\n\
                   \t/dev/sda1\t-\t-\t-\t-\n\
                   \t/dev/sdb1\t-\t-\t-\t-\n";
        assert_eq!(
            parse_pool_members(out),
            vec!["mirror-0", "/dev/sda1", "/dev/sdb1"]
        );
    }

    #[test]
    fn candidates_filter_roles_and_strip_partitions() {
        let members = ["sda", "sda1", "mirror", "sdb"];
        assert_eq!(boot_device_candidates(&members), vec!["sda", "sdb"]);
    }

    #[test]
    fn candidates_handle_real_pool_listing() {
        let members = [
            "mirror-0",
            "/dev/sda1",
            "/dev/sdb1",
            "replacing-1",
            "/dev/sdc1",
            "spare-2",
            "/dev/nvme0n1p2",
        ];
        assert_eq!(
            boot_device_candidates(&members),
            vec!["/dev/sda", "/dev/sdb", "/dev/sdc", "/dev/nvme0n1"]
        );
    }

    #[test]
    fn partition_suffix_variants() {
        assert_eq!(strip_partition_suffix("/dev/sda"), "/dev/sda");
        assert_eq!(strip_partition_suffix("/dev/sda12"), "/dev/sda");
        assert_eq!(strip_partition_suffix("/dev/nvme0n1"), "/dev/nvme0n1");
        assert_eq!(strip_partition_suffix("/dev/mmcblk0p1"), "/dev/mmcblk0");
        assert_eq!(strip_partition_suffix("/dev/mmcblk0"), "/dev/mmcblk0");
        assert_eq!(
            strip_partition_suffix("/dev/disk/by-id/ata-DISK-part3"),
            "/dev/disk/by-id/ata-DISK"
        );
        assert_eq!(
            strip_partition_suffix("/dev/disk/by-id/wwn-0x5000c500a1b2c3d4"),
            "/dev/disk/by-id/wwn-0x5000c500a1b2c3d4"
        );
        assert_eq!(
            strip_partition_suffix("/dev/disk/by-path/pci-0000:00:1f.2-ata-1"),
            "/dev/disk/by-path/pci-0000:00:1f.2-ata-1"
        );
    }

    #[test]
    fn role_names_match_exactly() {
        for role in ["mirror-0", "raidz2-1", "draid1:2d:4c:0s-0", "spare-3", "logs", "cache", "spares"] {
            assert!(is_vdev_role(role), "{role}");
        }
        for device in ["cache-ssd1", "logsdisk", "spare_nvme0n1", "sda3", "mirrored-disk"] {
            assert!(!is_vdev_role(device), "{device}");
        }
        assert_eq!(
            boot_device_candidates(&["mirror-0", "/dev/cachedisk1", "/dev/sda3"]),
            vec!["/dev/cachedisk", "/dev/sda"]
        );
    }

    #[test]
    fn bare_names_resolve_under_dev() {
        assert_eq!(device_path("sda"), PathBuf::from("/dev/sda"));
        assert_eq!(device_path("/dev/sdb"), PathBuf::from("/dev/sdb"));
    }
}
