//! System-wide constants and default paths.

/// Directory scanned by `systemd-nspawn` / `machinectl` for machines.
pub const DEFAULT_CONTAINERS_ROOT: &str = "/var/lib/machines";

/// Directory holding per-machine `.nspawn` settings files.
pub const DEFAULT_NSPAWN_DIR: &str = "/etc/systemd/nspawn";

/// Directory holding administrator unit drop-ins.
pub const DEFAULT_UNIT_DIR: &str = "/etc/systemd/system";

/// Parent dataset of all boot environments.
pub const DEFAULT_DATASET_PARENT: &str = "rpool/ROOT";

/// Location of the unpacked update image on the host.
pub const DEFAULT_UPDATE_DIR: &str = "/var/lib/stagebox/update";

/// Appliance domain directory, bound into containers when present.
pub const DEFAULT_DOMAIN_DIR: &str = "/domain0";

/// Directory used to hand artifacts between host and container.
pub const DEFAULT_DROPBOX_DIR: &str = "/var/lib/stagebox/dropbox";

/// Host shadow password database.
pub const DEFAULT_SHADOW_FILE: &str = "/etc/shadow";

/// Default configuration file location.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/stagebox/config.json";

/// Metadata file inside the update image.
pub const VERSION_INFO_FILE: &str = "version.info";

/// Subdirectory of the update image holding the package repository.
pub const DEFAULT_REPOSITORY_SUBDIR: &str = "repository";

/// Distribution codename passed to the bootstrap tool.
pub const DEFAULT_BOOTSTRAP_SUITE: &str = "jammy";

/// Repository component passed to the bootstrap tool.
pub const DEFAULT_BOOTSTRAP_COMPONENT: &str = "main";

/// Packages every bootstrapped container needs to boot under nspawn.
pub const DEFAULT_BOOTSTRAP_INCLUDE: &[&str] = &["systemd", "dbus"];

/// Device nodes the storage layer needs inside the container.
pub const DEFAULT_DEVICE_BINDS: &[&str] = &["/dev/zfs"];

/// Maximum number of boot-readiness probes.
pub const BOOT_POLL_ATTEMPTS: u32 = 600;

/// Delay between boot-readiness probes, in seconds.
pub const BOOT_POLL_INTERVAL_SECS: u64 = 1;

/// Users whose password hashes are carried into a promoted root.
pub const MIGRATED_USERS: &[&str] = &["root", "appliance"];

/// Host-local files carried verbatim into a promoted root.
pub const MIGRATED_FILES: &[&str] = &[
    "/etc/hostid",
    "/etc/machine-id",
    "/etc/hostname",
    "/etc/ssh/ssh_host_ecdsa_key",
    "/etc/ssh/ssh_host_ecdsa_key.pub",
    "/etc/ssh/ssh_host_ed25519_key",
    "/etc/ssh/ssh_host_ed25519_key.pub",
    "/etc/ssh/ssh_host_rsa_key",
    "/etc/ssh/ssh_host_rsa_key.pub",
];

/// Pseudo-filesystems bound into a container root while the bootloader is
/// installed.
pub const PSEUDO_FILESYSTEMS: &[&str] = &["/proc", "/sys", "/dev"];
