//! `stagebox stop` — Stop a running container.

use clap::Args;
use stagebox_runtime::manager::ContainerManager;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container name.
    pub name: String,
}

/// Executes the `stop` command.
///
/// # Errors
///
/// Returns an error if the container does not exist or systemd fails to
/// stop it.
pub fn execute(args: &StopArgs, manager: &ContainerManager) -> anyhow::Result<()> {
    let name = super::container_name(&args.name)?;
    let mut container = manager.open(&name)?;
    manager.stop(&mut container)?;
    Ok(())
}
