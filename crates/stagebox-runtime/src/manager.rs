//! Container lifecycle manager.
//!
//! Owns create, start, stop, run, destroy, and convert-to-bootfs for named
//! upgrade containers. State predicates are asserted on the [`Container`]
//! handle; the host artifacts are checked before anything is started or
//! promoted.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use stagebox_common::config::StageboxConfig;
use stagebox_common::error::{Result, StageboxError};
use stagebox_common::types::{
    ContainerName, ContainerState, DatasetName, SnapshotName, UpgradeMode,
};
use stagebox_core::host::{Host, Stdio, ToolCommand, ToolOutput};
use stagebox_core::storage::ZfsDriver;

use crate::bootloader::BootloaderPromoter;
use crate::container::{ArtifactPresence, Container, ContainerPaths};
use crate::exec;
use crate::nspawn::{BindSet, NspawnSettings, ServiceOverride};

/// Prefix of generated container names.
const NAME_PREFIX: &str = "upgrade.";

/// Where teardown finds the origin snapshot of an in-place clone.
enum SnapshotSource<'a> {
    /// The handle was created here; only a recorded snapshot can exist.
    Recorded(Option<&'a SnapshotName>),
    /// Unknown provenance; derive it from the mounted root.
    Lookup,
}

/// Manages upgrade containers on one host.
pub struct ContainerManager {
    host: Arc<dyn Host>,
    zfs: ZfsDriver,
    config: StageboxConfig,
}

impl ContainerManager {
    /// Creates a manager driving `host` with the given layout.
    #[must_use]
    pub fn new(host: Arc<dyn Host>, config: StageboxConfig) -> Self {
        Self {
            zfs: ZfsDriver::new(Arc::clone(&host)),
            host,
            config,
        }
    }

    /// The host this manager drives.
    #[must_use]
    pub fn host(&self) -> &dyn Host {
        self.host.as_ref()
    }

    /// The storage driver.
    #[must_use]
    pub const fn zfs(&self) -> &ZfsDriver {
        &self.zfs
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &StageboxConfig {
        &self.config
    }

    /// Artifact locations for `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured dataset parent is invalid.
    pub fn paths(&self, name: &ContainerName) -> Result<ContainerPaths> {
        ContainerPaths::new(&self.config, name)
    }

    /// Creates and configures a new container.
    ///
    /// If anything fails after the name has been allocated, the full
    /// destroy path runs before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing step.
    pub fn create(&self, mode: UpgradeMode) -> Result<Container> {
        if mode == UpgradeMode::NotInPlace {
            let repo = self.config.repository_dir();
            if !repo.is_dir() {
                return Err(StageboxError::precondition(format!(
                    "package repository {} not found",
                    repo.display()
                )));
            }
        }

        let name = self.allocate_name()?;
        let mut container = Container::new(name.clone(), self.paths(&name)?, Some(mode));
        tracing::info!(name = %name, %mode, "creating container");

        let populated = match mode {
            UpgradeMode::InPlace => self.populate_from_root(&mut container),
            UpgradeMode::NotInPlace => self.populate_from_repository(&container),
        };
        match populated.and_then(|()| self.configure(&container)) {
            Ok(()) => {
                container.transition(ContainerState::Created);
                tracing::info!(name = %name, "container created");
                Ok(container)
            }
            Err(e) => {
                tracing::warn!(name = %name, error = %e, "creation failed, destroying container");
                if let Err(cleanup) = self.destroy(&mut container) {
                    tracing::warn!(name = %name, error = %cleanup, "cleanup after failed create");
                }
                Err(e)
            }
        }
    }

    /// Allocates a fresh, collision-free directory under the containers
    /// root; its file name becomes the container name.
    fn allocate_name(&self) -> Result<ContainerName> {
        let root = &self.config.containers_root;
        let dir = tempfile::Builder::new()
            .prefix(NAME_PREFIX)
            .rand_bytes(8)
            .tempdir_in(root)
            .map_err(|e| StageboxError::io(root, e))?
            .keep();
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StageboxError::precondition(format!("bad directory {}", dir.display())))?;
        ContainerName::new(name)
    }

    fn populate_from_root(&self, container: &mut Container) -> Result<()> {
        let root = self.zfs.mounted_root_dataset()?;
        let snapshot = self.zfs.snapshot(&root, container.name.as_str())?;
        container.snapshot = Some(snapshot.clone());
        self.zfs
            .clone_snapshot(&snapshot, &container.paths.dataset, &container.paths.directory)
    }

    fn populate_from_repository(&self, container: &Container) -> Result<()> {
        self.zfs
            .create(&container.paths.dataset, &container.paths.directory)?;

        let bootstrap = &self.config.bootstrap;
        let cmd = ToolCommand::new("debootstrap")
            .arg("--no-check-gpg")
            .arg(format!("--components={}", bootstrap.component))
            .arg(format!("--include={}", bootstrap.include.join(",")))
            .arg(bootstrap.suite.as_str())
            .path_arg(&container.paths.directory)
            .arg(format!("file://{}", self.config.repository_dir().display()));
        tracing::info!(name = %container.name, suite = %bootstrap.suite, "bootstrapping container");
        let _ = self.host.run_checked(&cmd, Stdio::StdoutToStderr)?;
        Ok(())
    }

    /// Writes the nspawn settings file and the unit override.
    fn configure(&self, container: &Container) -> Result<()> {
        let paths = &container.paths;
        let dropbox = &self.config.binds.dropbox_dir;
        std::fs::create_dir_all(dropbox).map_err(|e| StageboxError::io(dropbox, e))?;

        let settings = NspawnSettings::for_upgrade(BindSet::for_host(&self.config));
        write_file(&paths.settings_file, &settings.render())?;

        std::fs::create_dir_all(&paths.override_dir)
            .map_err(|e| StageboxError::io(&paths.override_dir, e))?;
        write_file(&paths.override_file(), &ServiceOverride::default().render())?;
        Ok(())
    }

    /// Opens an existing container by name.
    ///
    /// # Errors
    ///
    /// Returns [`StageboxError::NotFound`] if no artifact exists and
    /// [`StageboxError::NotConfigured`] if only some do.
    pub fn open(&self, name: &ContainerName) -> Result<Container> {
        let paths = self.paths(name)?;
        let presence = self.presence(&paths)?;
        if presence.absent() {
            return Err(StageboxError::NotFound {
                kind: "container",
                id: name.to_string(),
            });
        }
        if !presence.complete() {
            return Err(StageboxError::NotConfigured {
                name: name.to_string(),
                missing: presence.missing(&paths),
            });
        }
        let unit = name.unit();
        let active = self
            .host
            .output(&ToolCommand::new("systemctl").args(["is-active", "--quiet", unit.as_str()]))?
            .success();
        let mut container = Container::new(name.clone(), paths, None);
        container.transition(if active {
            ContainerState::Running
        } else {
            ContainerState::Stopped
        });
        Ok(container)
    }

    /// Inspects which artifacts exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage tool cannot be run.
    pub fn presence(&self, paths: &ContainerPaths) -> Result<ArtifactPresence> {
        Ok(ArtifactPresence {
            directory: paths.directory.is_dir(),
            settings_file: paths.settings_file.is_file(),
            override_dir: paths.override_dir.is_dir(),
            dataset: self.zfs.exists(paths.dataset.as_str())?,
        })
    }

    /// Fails closed unless all four artifacts exist.
    pub(crate) fn ensure_configured(&self, container: &Container) -> Result<()> {
        let presence = self.presence(&container.paths)?;
        if presence.complete() {
            return Ok(());
        }
        Err(StageboxError::NotConfigured {
            name: container.name.to_string(),
            missing: presence.missing(&container.paths),
        })
    }

    /// Starts the container and waits for its init system to finish booting.
    ///
    /// # Errors
    ///
    /// Returns [`StageboxError::NotConfigured`] if artifacts are missing,
    /// a tool error if the unit cannot be started, or
    /// [`StageboxError::BootTimeout`] if the default target never becomes
    /// active.
    pub fn start(&self, container: &mut Container) -> Result<()> {
        self.start_with(container, &AtomicBool::new(false))
    }

    /// Like [`ContainerManager::start`], but gives up the boot wait as soon
    /// as `interrupt` is set.
    ///
    /// # Errors
    ///
    /// As [`ContainerManager::start`], plus [`StageboxError::Interrupted`].
    pub fn start_with(&self, container: &mut Container, interrupt: &AtomicBool) -> Result<()> {
        container.require(&[ContainerState::Created, ContainerState::Stopped], "start")?;
        self.ensure_configured(container)?;

        tracing::info!(name = %container.name, "starting container");
        let _ = self
            .host
            .run_checked(&exec::systemctl("start", &container.name.unit()), Stdio::Capture)?;
        container.transition(ContainerState::Running);
        self.wait_for_boot(&container.name, interrupt)
    }

    fn wait_for_boot(&self, name: &ContainerName, interrupt: &AtomicBool) -> Result<()> {
        let poll = self.config.boot_poll;
        let probe = exec::in_container(name, ["systemctl", "is-active", "default.target"]);
        for attempt in 1..=poll.attempts {
            if interrupt.load(Ordering::SeqCst) {
                tracing::warn!(name = %name, attempt, "boot wait interrupted");
                return Err(StageboxError::Interrupted);
            }
            if self.host.output(&probe)?.success() {
                tracing::info!(name = %name, attempt, "container booted");
                return Ok(());
            }
            if attempt < poll.attempts {
                self.host.sleep(poll.interval());
            }
        }
        Err(StageboxError::BootTimeout {
            name: name.to_string(),
            attempts: poll.attempts,
        })
    }

    /// Stops the supervised unit.
    ///
    /// # Errors
    ///
    /// Returns [`StageboxError::StopFailed`] if `systemctl stop` fails.
    pub fn stop(&self, container: &mut Container) -> Result<()> {
        if container.state.is_terminal() || container.state == ContainerState::Absent {
            return container.require(&[], "stop");
        }
        tracing::info!(name = %container.name, "stopping container");
        let out = self
            .host
            .output(&exec::systemctl("stop", &container.name.unit()))?;
        if !out.success() {
            return Err(StageboxError::StopFailed {
                name: container.name.to_string(),
                message: out.stderr.trim().to_string(),
            });
        }
        container.transition(ContainerState::Stopped);
        Ok(())
    }

    /// Runs `argv` inside the running container and waits for it.
    ///
    /// The payload's exit status is returned, not turned into an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is not running, `argv` is empty,
    /// or `systemd-run` cannot be spawned.
    pub fn run(&self, container: &Container, argv: &[String], stdio: Stdio) -> Result<ToolOutput> {
        container.require(&[ContainerState::Running], "run a command in")?;
        if argv.is_empty() {
            return Err(StageboxError::precondition("no command given"));
        }
        tracing::info!(name = %container.name, command = ?argv, "running in container");
        self.host
            .execute(&exec::in_container(&container.name, argv.iter().cloned()), stdio)
    }

    /// Removes every artifact of the container.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first artifact that could not be removed.
    pub fn destroy(&self, container: &mut Container) -> Result<()> {
        if container.state == ContainerState::Promoted {
            return container.require(&[], "destroy");
        }
        let snapshot = match container.mode {
            Some(_) => SnapshotSource::Recorded(container.snapshot.as_ref()),
            None => SnapshotSource::Lookup,
        };
        self.teardown(&container.name, &container.paths, snapshot)?;
        container.transition(ContainerState::Destroyed);
        Ok(())
    }

    /// Removes every artifact for `name`, whatever subset exists.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first artifact that could not be removed.
    pub fn destroy_by_name(&self, name: &ContainerName) -> Result<()> {
        let paths = self.paths(name)?;
        self.teardown(name, &paths, SnapshotSource::Lookup)
    }

    fn teardown(
        &self,
        name: &ContainerName,
        paths: &ContainerPaths,
        snapshot: SnapshotSource<'_>,
    ) -> Result<()> {
        tracing::info!(name = %name, "destroying container");
        remove_file_if_present(&paths.settings_file)?;
        if paths.override_dir.exists() {
            std::fs::remove_dir_all(&paths.override_dir)
                .map_err(|e| teardown_error(&paths.override_dir, &e))?;
        }

        let mut origin = None;
        if self.zfs.exists(paths.dataset.as_str())? {
            if matches!(snapshot, SnapshotSource::Lookup) {
                origin = self.origin_snapshot(name, &paths.dataset);
            }
            self.zfs.destroy_dataset(&paths.dataset)?;
        }

        let mut lookup_failure = None;
        let snapshot = match (snapshot, origin) {
            (SnapshotSource::Recorded(s), _) => s.cloned(),
            (SnapshotSource::Lookup, Some(origin)) => Some(origin),
            (SnapshotSource::Lookup, None) => match self.zfs.mounted_root_dataset() {
                Ok(root) => Some(SnapshotName::new(root, name.as_str())),
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "cannot locate origin snapshot");
                    lookup_failure = Some(e);
                    None
                }
            },
        };
        if let Some(snapshot) = snapshot {
            let present = self.zfs.exists(&snapshot.to_string())?;
            if present {
                self.zfs.destroy_snapshot(&snapshot)?;
            }
        }

        if paths.directory.exists() {
            std::fs::remove_dir(&paths.directory)
                .map_err(|e| teardown_error(&paths.directory, &e))?;
        }
        if let Some(e) = lookup_failure {
            return Err(e);
        }
        tracing::info!(name = %name, "container destroyed");
        Ok(())
    }

    /// The snapshot `dataset` was cloned from, if it carries this
    /// container's name.
    fn origin_snapshot(&self, name: &ContainerName, dataset: &DatasetName) -> Option<SnapshotName> {
        let origin = match self.zfs.get_property(dataset, "origin") {
            Ok(origin) => origin?,
            Err(e) => {
                tracing::warn!(name = %name, error = %e, "cannot read dataset origin");
                return None;
            }
        };
        let (parent, snapshot) = origin.split_once('@')?;
        if snapshot != name.as_str() {
            return None;
        }
        DatasetName::parse(parent)
            .ok()
            .map(|parent| SnapshotName::new(parent, snapshot))
    }

    /// Promotes a stopped container's dataset to the next-boot root.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing promotion step.
    pub fn convert_to_bootfs(&self, container: Container) -> Result<DatasetName> {
        BootloaderPromoter::new(self).promote(container)
    }

    /// Removes the isolation-runtime registration of a promoted container.
    /// Failures are logged, not returned.
    pub(crate) fn unregister(&self, container: &Container) {
        let paths = &container.paths;
        let results = [
            remove_file_if_present(&paths.settings_file),
            if paths.override_dir.exists() {
                std::fs::remove_dir_all(&paths.override_dir)
                    .map_err(|e| teardown_error(&paths.override_dir, &e))
            } else {
                Ok(())
            },
            if paths.directory.exists() {
                std::fs::remove_dir(&paths.directory).map_err(|e| teardown_error(&paths.directory, &e))
            } else {
                Ok(())
            },
        ];
        for err in results.into_iter().filter_map(std::result::Result::err) {
            tracing::warn!(name = %container.name, error = %err, "leftover after promotion");
        }
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StageboxError::io(parent, e))?;
    }
    std::fs::write(path, content).map_err(|e| StageboxError::io(path, e))
}

fn remove_file_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(teardown_error(path, &e)),
    }
}

fn teardown_error(path: &Path, e: &std::io::Error) -> StageboxError {
    StageboxError::Teardown {
        artifact: path.display().to_string(),
        message: e.to_string(),
    }
}
