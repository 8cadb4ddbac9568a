//! Container handle and its on-host artifact set.

use std::path::PathBuf;

use stagebox_common::config::StageboxConfig;
use stagebox_common::error::{Result, StageboxError};
use stagebox_common::types::{ContainerName, ContainerState, DatasetName, SnapshotName, UpgradeMode};

/// File name of the unit drop-in inside the override directory.
pub const OVERRIDE_FILE: &str = "override.conf";

/// Where a container's artifacts live on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerPaths {
    /// Mount directory of the backing dataset.
    pub directory: PathBuf,
    /// `systemd-nspawn` settings file.
    pub settings_file: PathBuf,
    /// Unit drop-in directory for the supervising service.
    pub override_dir: PathBuf,
    /// Backing dataset.
    pub dataset: DatasetName,
}

impl ContainerPaths {
    /// Derives the artifact locations for `name` from the host layout.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured dataset parent is not a valid
    /// dataset name.
    pub fn new(config: &StageboxConfig, name: &ContainerName) -> Result<Self> {
        let parent = DatasetName::parse(&config.dataset_parent)?;
        Ok(Self {
            directory: config.containers_root.join(name.as_str()),
            settings_file: config.nspawn_dir.join(format!("{name}.nspawn")),
            override_dir: config.unit_dir.join(format!("{}.d", name.unit())),
            dataset: parent.child(name.as_str()),
        })
    }

    /// Path of the drop-in file.
    #[must_use]
    pub fn override_file(&self) -> PathBuf {
        self.override_dir.join(OVERRIDE_FILE)
    }
}

/// Which of the four artifacts were found on the host.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactPresence {
    /// Mount directory exists.
    pub directory: bool,
    /// Settings file exists.
    pub settings_file: bool,
    /// Override directory exists.
    pub override_dir: bool,
    /// Dataset exists.
    pub dataset: bool,
}

impl ArtifactPresence {
    /// All four artifacts exist.
    #[must_use]
    pub const fn complete(&self) -> bool {
        self.directory && self.settings_file && self.override_dir && self.dataset
    }

    /// None of the artifacts exist.
    #[must_use]
    pub const fn absent(&self) -> bool {
        !(self.directory || self.settings_file || self.override_dir || self.dataset)
    }

    /// Describes the missing artifacts.
    #[must_use]
    pub fn missing(&self, paths: &ContainerPaths) -> Vec<String> {
        let mut missing = Vec::new();
        if !self.directory {
            missing.push(format!("directory {}", paths.directory.display()));
        }
        if !self.dataset {
            missing.push(format!("dataset {}", paths.dataset));
        }
        if !self.settings_file {
            missing.push(format!("settings {}", paths.settings_file.display()));
        }
        if !self.override_dir {
            missing.push(format!("unit override {}", paths.override_dir.display()));
        }
        missing
    }
}

/// An upgrade container and its lifecycle state.
#[derive(Debug)]
pub struct Container {
    /// Unique name.
    pub name: ContainerName,
    /// How the container was populated, when known.
    pub mode: Option<UpgradeMode>,
    /// Current lifecycle state.
    pub state: ContainerState,
    /// Artifact locations.
    pub paths: ContainerPaths,
    /// Snapshot the dataset was cloned from (in-place only).
    pub snapshot: Option<SnapshotName>,
}

impl Container {
    /// Creates a handle in the `Absent` state.
    #[must_use]
    pub const fn new(name: ContainerName, paths: ContainerPaths, mode: Option<UpgradeMode>) -> Self {
        Self {
            name,
            mode,
            state: ContainerState::Absent,
            paths,
            snapshot: None,
        }
    }

    /// Fails with [`StageboxError::InvalidState`] unless the current state
    /// is one of `allowed`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state does not permit `operation`.
    pub fn require(&self, allowed: &[ContainerState], operation: &'static str) -> Result<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        Err(StageboxError::InvalidState {
            name: self.name.to_string(),
            state: self.state.to_string(),
            operation,
        })
    }

    /// Moves to `next`, logging the transition.
    pub fn transition(&mut self, next: ContainerState) {
        tracing::debug!(name = %self.name, from = %self.state, to = %next, "state change");
        self.state = next;
    }
}
