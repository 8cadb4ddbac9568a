//! Upgrade transactions: in-place staging and not-in-place promotion.

use std::ffi::OsString;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use stagebox_common::error::{Result, StageboxError};
use stagebox_common::types::{ContainerName, DatasetName, UpgradeMode};
use stagebox_core::host::Stdio;
use stagebox_runtime::manager::ContainerManager;

use crate::image::UpdateImage;
use crate::session::ContainerGuard;

/// Tools every upgrade needs on the host.
const BASE_TOOLS: &[&str] = &["zfs", "zpool", "systemctl", "systemd-run"];

/// Additional tools a not-in-place upgrade needs.
const BOOTSTRAP_TOOLS: &[&str] = &["debootstrap"];

/// Options for one upgrade session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeOptions {
    mode: UpgradeMode,
    skip_verify: bool,
    debug_retain: bool,
}

impl UpgradeOptions {
    /// Options for `mode` with verification on and debug-retain off.
    #[must_use]
    pub const fn new(mode: UpgradeMode) -> Self {
        Self {
            mode,
            skip_verify: false,
            debug_retain: false,
        }
    }

    /// Skips the verification step.
    #[must_use]
    pub const fn skip_verify(mut self, skip: bool) -> Self {
        self.skip_verify = skip;
        self
    }

    /// Leaves the container in place if the upgrade fails.
    #[must_use]
    pub const fn debug_retain(mut self, retain: bool) -> Self {
        self.debug_retain = retain;
        self
    }

    /// The upgrade mode.
    #[must_use]
    pub const fn mode(&self) -> UpgradeMode {
        self.mode
    }
}

/// Result of a successful upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// The upgrade ran in a clone of the running root, which was discarded.
    Staged {
        /// Container the upgrade ran in.
        name: ContainerName,
        /// Version of the applied image.
        version: String,
    },
    /// A freshly built root was promoted to the next boot filesystem.
    Promoted {
        /// Container the upgrade ran in.
        name: ContainerName,
        /// Dataset that becomes the root on next boot.
        dataset: DatasetName,
        /// Version of the applied image.
        version: String,
    },
}

/// Sequences an upgrade over the container lifecycle.
pub struct Orchestrator<'m> {
    manager: &'m ContainerManager,
    interrupt: Arc<AtomicBool>,
    tool_path: Option<OsString>,
}

impl<'m> Orchestrator<'m> {
    /// Creates an orchestrator driving `manager`.
    #[must_use]
    pub fn new(manager: &'m ContainerManager) -> Self {
        Self {
            manager,
            interrupt: Arc::new(AtomicBool::new(false)),
            tool_path: None,
        }
    }

    /// Uses `flag` as the interruption signal, checked between steps and
    /// while waiting for the container to boot.
    #[must_use]
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    /// Resolves host tools in `path` instead of `$PATH`.
    #[must_use]
    pub fn with_tool_path(mut self, path: impl Into<OsString>) -> Self {
        self.tool_path = Some(path.into());
        self
    }

    /// Checks the update image and host tools without creating anything.
    ///
    /// # Errors
    ///
    /// Returns [`StageboxError::Precondition`] naming the first unmet
    /// requirement.
    pub fn preflight(&self, mode: UpgradeMode) -> Result<UpdateImage> {
        let image = UpdateImage::load(self.manager.config())?;
        if mode == UpgradeMode::NotInPlace {
            let _ = image.require_repository()?;
        }
        let extra: &[&str] = match mode {
            UpgradeMode::InPlace => &[],
            UpgradeMode::NotInPlace => BOOTSTRAP_TOOLS,
        };
        for tool in BASE_TOOLS.iter().chain(extra) {
            let _ = self.locate(tool)?;
        }
        Ok(image)
    }

    fn locate(&self, tool: &str) -> Result<std::path::PathBuf> {
        let found = match &self.tool_path {
            Some(path) => std::env::current_dir()
                .map_err(|e| StageboxError::io(".", e))
                .and_then(|cwd| {
                    which::which_in(tool, Some(path), cwd).map_err(|e| {
                        StageboxError::precondition(format!("required tool {tool} not found: {e}"))
                    })
                }),
            None => which::which(tool).map_err(|e| {
                StageboxError::precondition(format!("required tool {tool} not found: {e}"))
            }),
        }?;
        tracing::debug!(tool, path = %found.display(), "tool located");
        Ok(found)
    }

    /// Runs one upgrade session end to end.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing step. The session container
    /// is cleaned up or retained according to the options before this
    /// returns, except once promotion has begun.
    pub fn run(&self, options: UpgradeOptions) -> Result<UpgradeOutcome> {
        let mode = options.mode;
        let image = self.preflight(mode)?;
        let version = image.version().to_string();
        tracing::info!(%mode, %version, "starting upgrade");
        self.checkpoint()?;

        let container = self.manager.create(mode)?;
        let name = container.name.clone();
        let mut guard = ContainerGuard::new(self.manager, container, mode, options.debug_retain);

        self.checkpoint()?;
        self.manager.start_with(guard.container()?, &self.interrupt)?;

        let commands = &self.manager.config().commands;
        self.step(&mut guard, "upgrade", &commands.upgrade)?;
        self.step(&mut guard, "start-platform", &commands.start_platform)?;
        if options.skip_verify {
            tracing::info!(name = %name, "verification skipped");
        } else {
            self.step(&mut guard, "verify", &commands.verify)?;
        }

        match mode {
            UpgradeMode::InPlace => {
                self.step(&mut guard, "finalize", &commands.finalize)?;
                guard.finish()?;
                tracing::info!(name = %name, %version, "in-place upgrade complete");
                Ok(UpgradeOutcome::Staged { name, version })
            }
            UpgradeMode::NotInPlace => {
                self.checkpoint()?;
                self.manager.stop(guard.container()?)?;
                self.checkpoint()?;
                let container = guard.disarm()?;
                let dataset = self.manager.convert_to_bootfs(container).inspect_err(|e| {
                    tracing::error!(
                        name = %name,
                        error = %e,
                        "promotion failed; manual remediation required"
                    );
                })?;
                tracing::info!(name = %name, dataset = %dataset, %version, "not-in-place upgrade complete");
                Ok(UpgradeOutcome::Promoted {
                    name,
                    dataset,
                    version,
                })
            }
        }
    }

    /// Runs one in-container command; an empty command is skipped.
    fn step(&self, guard: &mut ContainerGuard<'_>, label: &str, argv: &[String]) -> Result<()> {
        self.checkpoint()?;
        if argv.is_empty() {
            tracing::debug!(step = label, "no command configured, skipped");
            return Ok(());
        }
        tracing::info!(step = label, "running upgrade step");
        let out = self.manager.run(guard.container()?, argv, Stdio::StdoutToStderr)?;
        if !out.success() {
            return Err(StageboxError::Tool {
                program: format!("{label} step ({})", argv.join(" ")),
                status: out.status,
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    fn checkpoint(&self) -> Result<()> {
        if self.interrupt.load(Ordering::SeqCst) {
            tracing::warn!("interrupted");
            return Err(StageboxError::Interrupted);
        }
        Ok(())
    }
}
