//! `systemd-nspawn` settings and unit override rendering.

use std::path::PathBuf;

use stagebox_common::config::StageboxConfig;

/// A host path exposed inside a container at the same location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    /// Host path.
    pub source: PathBuf,
    /// Whether the container sees it read-only.
    pub read_only: bool,
}

/// The host paths exposed to an upgrade container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindSet(Vec<BindMount>);

impl BindSet {
    /// Computes the bind set for the current host.
    ///
    /// The domain directory is only included if it exists.
    #[must_use]
    pub fn for_host(config: &StageboxConfig) -> Self {
        let mut binds = vec![BindMount {
            source: config.update.dir.clone(),
            read_only: false,
        }];
        if config.binds.domain_dir.is_dir() {
            binds.push(BindMount {
                source: config.binds.domain_dir.clone(),
                read_only: true,
            });
        }
        binds.push(BindMount {
            source: config.binds.dropbox_dir.clone(),
            read_only: false,
        });
        binds.extend(config.binds.devices.iter().map(|dev| BindMount {
            source: dev.clone(),
            read_only: false,
        }));
        Self(binds)
    }

    /// The bind mounts, in declaration order.
    #[must_use]
    pub fn mounts(&self) -> &[BindMount] {
        &self.0
    }
}

/// Capabilities granted to the container payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilitySet {
    /// Every capability the host has.
    All,
}

impl CapabilitySet {
    const fn as_flag(self) -> &'static str {
        match self {
            Self::All => "--capability=all",
        }
    }
}

/// Contents of a `.nspawn` settings file.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NspawnSettings {
    /// Whether a private user namespace is used.
    pub private_users: bool,
    /// Whether the container gets its own network namespace.
    pub private_network: bool,
    /// Whether file ownership is remapped to the private user range.
    pub private_users_chown: bool,
    /// Host paths exposed inside the container.
    pub binds: BindSet,
}

impl NspawnSettings {
    /// Settings for an upgrade container: container UIDs equal host UIDs,
    /// private networking, no ownership remapping.
    #[must_use]
    pub const fn for_upgrade(binds: BindSet) -> Self {
        Self {
            private_users: false,
            private_network: true,
            private_users_chown: false,
            binds,
        }
    }

    /// Renders the settings file.
    #[must_use]
    pub fn render(&self) -> String {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        let mut out = format!(
            "[Exec]\nPrivateUsers={}\n\n[Network]\nPrivate={}\n\n[Files]\nPrivateUsersChown={}\n",
            yes_no(self.private_users),
            yes_no(self.private_network),
            yes_no(self.private_users_chown),
        );
        for bind in self.binds.mounts() {
            let key = if bind.read_only { "BindReadOnly" } else { "Bind" };
            out.push_str(&format!("{key}={}\n", bind.source.display()));
        }
        out
    }
}

/// Drop-in replacing the supervising unit's `ExecStart=`.
///
/// Settings files cannot grant every capability, so the drop-in re-declares
/// the nspawn invocation with an explicit capability flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOverride {
    /// Capabilities passed on the command line.
    pub capabilities: CapabilitySet,
}

impl ServiceOverride {
    /// Path to the nspawn binary used in `ExecStart=`.
    pub const NSPAWN: &'static str = "/usr/bin/systemd-nspawn";

    /// Renders the drop-in file.
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "[Service]\nExecStart=\nExecStart={} --quiet --keep-unit --boot --link-journal=try-guest --settings=override --machine=%i {}\n",
            Self::NSPAWN,
            self.capabilities.as_flag(),
        )
    }
}

impl Default for ServiceOverride {
    fn default() -> Self {
        Self {
            capabilities: CapabilitySet::All,
        }
    }
}
