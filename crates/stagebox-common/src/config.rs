//! Global configuration model for stagebox.
//!
//! Every field has a default matching a stock appliance, so an absent or
//! partial config file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Result, StageboxError};

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageboxConfig {
    /// Directory where container roots are allocated.
    pub containers_root: PathBuf,
    /// Directory for `.nspawn` settings files.
    pub nspawn_dir: PathBuf,
    /// Directory for unit drop-in overrides.
    pub unit_dir: PathBuf,
    /// Dataset under which container datasets are created.
    pub dataset_parent: String,
    /// Host shadow file read when migrating password hashes.
    pub shadow_file: PathBuf,
    /// Update image layout.
    pub update: UpdateConfig,
    /// Host paths exposed to containers.
    pub binds: BindConfig,
    /// Parameters for bootstrapping not-in-place containers.
    pub bootstrap: BootstrapConfig,
    /// Bounds for the boot-readiness poll.
    pub boot_poll: BootPollConfig,
    /// What gets carried into a promoted root.
    pub migration: MigrationConfig,
    /// Commands run inside the container by the upgrade driver.
    pub commands: UpgradeCommands,
}

impl Default for StageboxConfig {
    fn default() -> Self {
        Self {
            containers_root: PathBuf::from(constants::DEFAULT_CONTAINERS_ROOT),
            nspawn_dir: PathBuf::from(constants::DEFAULT_NSPAWN_DIR),
            unit_dir: PathBuf::from(constants::DEFAULT_UNIT_DIR),
            dataset_parent: constants::DEFAULT_DATASET_PARENT.to_string(),
            shadow_file: PathBuf::from(constants::DEFAULT_SHADOW_FILE),
            update: UpdateConfig::default(),
            binds: BindConfig::default(),
            bootstrap: BootstrapConfig::default(),
            boot_poll: BootPollConfig::default(),
            migration: MigrationConfig::default(),
            commands: UpgradeCommands::default(),
        }
    }
}

impl StageboxConfig {
    /// Loads configuration.
    ///
    /// An explicit path must exist. Without one, the default config file is
    /// read if present, otherwise built-in defaults are used.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(constants::DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let content =
            std::fs::read_to_string(&path).map_err(|e| StageboxError::io(&path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Returns the package repository inside the update image.
    #[must_use]
    pub fn repository_dir(&self) -> PathBuf {
        self.update.dir.join(&self.update.repository_subdir)
    }
}

/// Update image layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Directory holding the unpacked update image.
    pub dir: PathBuf,
    /// Repository subdirectory used by the bootstrap tool.
    pub repository_subdir: String,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(constants::DEFAULT_UPDATE_DIR),
            repository_subdir: constants::DEFAULT_REPOSITORY_SUBDIR.to_string(),
        }
    }
}

/// Host paths bound into containers, besides the update image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindConfig {
    /// Domain directory, bound only if it exists.
    pub domain_dir: PathBuf,
    /// Dropbox directory for artifacts.
    pub dropbox_dir: PathBuf,
    /// Device nodes required by the storage layer.
    pub devices: Vec<PathBuf>,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            domain_dir: PathBuf::from(constants::DEFAULT_DOMAIN_DIR),
            dropbox_dir: PathBuf::from(constants::DEFAULT_DROPBOX_DIR),
            devices: constants::DEFAULT_DEVICE_BINDS
                .iter()
                .map(PathBuf::from)
                .collect(),
        }
    }
}

/// Parameters passed to `debootstrap`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Distribution codename.
    pub suite: String,
    /// Repository component.
    pub component: String,
    /// Extra packages installed into the base system.
    pub include: Vec<String>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            suite: constants::DEFAULT_BOOTSTRAP_SUITE.to_string(),
            component: constants::DEFAULT_BOOTSTRAP_COMPONENT.to_string(),
            include: constants::DEFAULT_BOOTSTRAP_INCLUDE
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Bounds for the boot-readiness poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootPollConfig {
    /// Maximum number of probes.
    pub attempts: u32,
    /// Seconds between probes.
    pub interval_secs: u64,
}

impl BootPollConfig {
    /// Delay between probes.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for BootPollConfig {
    fn default() -> Self {
        Self {
            attempts: constants::BOOT_POLL_ATTEMPTS,
            interval_secs: constants::BOOT_POLL_INTERVAL_SECS,
        }
    }
}

/// Users and files carried from the host into a promoted root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Users whose password hashes are copied.
    pub users: Vec<String>,
    /// Files copied verbatim if present on the host.
    pub files: Vec<PathBuf>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            users: constants::MIGRATED_USERS
                .iter()
                .map(ToString::to_string)
                .collect(),
            files: constants::MIGRATED_FILES.iter().map(PathBuf::from).collect(),
        }
    }
}

/// Commands the upgrade driver runs inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeCommands {
    /// Installs the new software bundle.
    pub upgrade: Vec<String>,
    /// Starts the appliance platform services.
    pub start_platform: Vec<String>,
    /// Verifies the upgraded container.
    pub verify: Vec<String>,
    /// Finalizes an in-place upgrade.
    pub finalize: Vec<String>,
}

impl Default for UpgradeCommands {
    fn default() -> Self {
        let script = |name: &str| {
            Path::new(constants::DEFAULT_UPDATE_DIR)
                .join("upgrade-scripts")
                .join(name)
                .to_string_lossy()
                .into_owned()
        };
        Self {
            upgrade: vec![script("execute")],
            start_platform: vec![
                "systemctl".to_string(),
                "start".to_string(),
                "appliance.target".to_string(),
            ],
            verify: vec![script("verify")],
            finalize: vec![script("execute"), "--finalize".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stock_layout() {
        let cfg = StageboxConfig::default();
        assert_eq!(cfg.containers_root, PathBuf::from("/var/lib/machines"));
        assert_eq!(cfg.boot_poll.attempts, 600);
        assert_eq!(cfg.boot_poll.interval(), Duration::from_secs(1));
        assert_eq!(cfg.migration.users, vec!["root", "appliance"]);
        assert_eq!(
            cfg.repository_dir(),
            PathBuf::from("/var/lib/stagebox/update/repository")
        );
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "dataset_parent": "tank/ROOT", "boot_poll": { "attempts": 5 } }"#,
        )
        .expect("write");

        let cfg = StageboxConfig::load(Some(&path)).expect("load");
        assert_eq!(cfg.dataset_parent, "tank/ROOT");
        assert_eq!(cfg.boot_poll.attempts, 5);
        assert_eq!(cfg.boot_poll.interval_secs, 1);
        assert_eq!(cfg.nspawn_dir, PathBuf::from("/etc/systemd/nspawn"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = StageboxConfig::load(Some(&dir.path().join("nope.json"))).unwrap_err();
        assert!(matches!(err, StageboxError::Io { .. }));
    }

    #[test]
    fn malformed_file_is_a_serialization_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").expect("write");
        let err = StageboxConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, StageboxError::Serialization { .. }));
    }
}
