//! `stagebox start` — Start a container and wait for it to boot.

use clap::Args;
use stagebox_runtime::manager::ContainerManager;

/// Arguments for the `start` command.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Container name.
    pub name: String,
}

/// Executes the `start` command.
///
/// # Errors
///
/// Returns an error if the container is missing, partially configured,
/// already running, or does not boot in time.
pub fn execute(args: &StartArgs, manager: &ContainerManager) -> anyhow::Result<()> {
    let name = super::container_name(&args.name)?;
    let mut container = manager.open(&name)?;
    manager.start(&mut container)?;
    Ok(())
}
