//! Domain primitive types used across the stagebox workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StageboxError;

/// Unique name of an upgrade container.
///
/// The name doubles as the machine name seen by `systemd-nspawn`, the last
/// component of the container directory, and the snapshot suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerName(String);

impl ContainerName {
    /// Creates a container name, rejecting values that cannot be used as a
    /// path component or dataset name component.
    ///
    /// # Errors
    ///
    /// Returns a precondition error for empty names or names containing
    /// `/`, `@`, whitespace, or a leading `.`.
    pub fn new(name: impl Into<String>) -> crate::error::Result<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && !name.chars().any(|c| c == '/' || c == '@' || c.is_whitespace());
        if !valid {
            return Err(StageboxError::precondition(format!(
                "invalid container name: {name:?}"
            )));
        }
        Ok(Self(name))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the `systemd` unit that supervises this container.
    #[must_use]
    pub fn unit(&self) -> String {
        format!("systemd-nspawn@{}.service", self.0)
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A ZFS dataset name such as `rpool/ROOT/abc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetName(String);

impl DatasetName {
    /// Parses a dataset name.
    ///
    /// # Errors
    ///
    /// Returns a storage query error if the value is empty, contains
    /// whitespace, or names a snapshot.
    pub fn parse(value: &str) -> crate::error::Result<Self> {
        if value.is_empty() || value.contains('@') || value.chars().any(char::is_whitespace) {
            return Err(StageboxError::StorageQuery {
                message: format!("not a dataset name: {value:?}"),
            });
        }
        Ok(Self(value.to_string()))
    }

    /// Returns the child dataset `<self>/<name>`.
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        Self(format!("{}/{name}", self.0))
    }

    /// Returns the pool this dataset lives in.
    #[must_use]
    pub fn pool(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A ZFS snapshot name, `<dataset>@<snapshot>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotName {
    /// Dataset the snapshot belongs to.
    pub dataset: DatasetName,
    /// Snapshot component after the `@`.
    pub snapshot: String,
}

impl SnapshotName {
    /// Builds the snapshot name for `dataset@snapshot`.
    #[must_use]
    pub fn new(dataset: DatasetName, snapshot: impl Into<String>) -> Self {
        Self {
            dataset,
            snapshot: snapshot.into(),
        }
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.dataset, self.snapshot)
    }
}

/// How the upgrade container is populated and what happens to it afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpgradeMode {
    /// Cloned from the running root; discarded after the upgrade.
    InPlace,
    /// Bootstrapped from the update image; promoted to the next boot root.
    NotInPlace,
}

impl fmt::Display for UpgradeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InPlace => write!(f, "in-place"),
            Self::NotInPlace => write!(f, "not-in-place"),
        }
    }
}

/// Lifecycle state of an upgrade container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerState {
    /// No artifacts exist for the name.
    Absent,
    /// All artifacts exist; the container has never been started.
    Created,
    /// The supervised unit is active.
    Running,
    /// The supervised unit is inactive.
    Stopped,
    /// All artifacts have been removed.
    Destroyed,
    /// The backing dataset is now the next-boot root filesystem.
    Promoted,
}

impl ContainerState {
    /// Returns whether the state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Destroyed | Self::Promoted)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Destroyed => write!(f, "destroyed"),
            Self::Promoted => write!(f, "promoted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_rejects_path_separators() {
        assert!(ContainerName::new("a/b").is_err());
        assert!(ContainerName::new("a@b").is_err());
        assert!(ContainerName::new("").is_err());
        assert!(ContainerName::new("..").is_err());
    }

    #[test]
    fn container_unit_name() {
        let name = ContainerName::new("tmp.Xa81Qz").unwrap();
        assert_eq!(name.unit(), "systemd-nspawn@tmp.Xa81Qz.service");
    }

    #[test]
    fn dataset_pool_and_child() {
        let ds = DatasetName::parse("rpool/ROOT").unwrap();
        assert_eq!(ds.pool(), "rpool");
        assert_eq!(ds.child("abc").as_str(), "rpool/ROOT/abc");
    }

    #[test]
    fn dataset_parse_rejects_snapshots_and_blank() {
        assert!(DatasetName::parse("rpool/ROOT@x").is_err());
        assert!(DatasetName::parse("").is_err());
        assert!(DatasetName::parse("rpool ROOT").is_err());
    }

    #[test]
    fn snapshot_display() {
        let snap = SnapshotName::new(DatasetName::parse("rpool/ROOT/base").unwrap(), "abc");
        assert_eq!(snap.to_string(), "rpool/ROOT/base@abc");
    }

    #[test]
    fn destroyed_and_promoted_are_terminal() {
        assert!(ContainerState::Destroyed.is_terminal());
        assert!(ContainerState::Promoted.is_terminal());
        assert!(!ContainerState::Stopped.is_terminal());
    }
}
