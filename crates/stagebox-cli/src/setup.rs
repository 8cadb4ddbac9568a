//! Process setup shared by both binaries.

use std::path::Path;
use std::sync::Arc;

use stagebox_common::config::StageboxConfig;
use stagebox_core::host::SystemHost;
use stagebox_runtime::manager::ContainerManager;

/// Installs the tracing subscriber.
///
/// Logs go to stderr; stdout carries only command results. The filter
/// defaults to `info` and is overridden by `RUST_LOG`.
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Fails unless the effective user is root.
///
/// # Errors
///
/// Returns an error when not running as root.
pub fn require_root() -> anyhow::Result<()> {
    if nix::unistd::geteuid().is_root() {
        return Ok(());
    }
    anyhow::bail!("must be run as root")
}

/// Loads configuration and builds a manager on the real host.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded.
pub fn manager(config: Option<&Path>) -> anyhow::Result<ContainerManager> {
    let config = StageboxConfig::load(config)?;
    tracing::debug!(containers_root = %config.containers_root.display(), "configuration loaded");
    Ok(ContainerManager::new(Arc::new(SystemHost::new()), config))
}
