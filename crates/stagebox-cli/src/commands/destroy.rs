//! `stagebox destroy` — Remove every artifact of a container.

use clap::Args;
use stagebox_runtime::manager::ContainerManager;

/// Arguments for the `destroy` command.
#[derive(Args, Debug)]
pub struct DestroyArgs {
    /// Container name.
    pub name: String,
}

/// Executes the `destroy` command.
///
/// Works on any subset of artifacts, so it also cleans up after an
/// interrupted create. Running it twice is harmless.
///
/// # Errors
///
/// Returns an error naming the first artifact that could not be removed.
pub fn execute(args: &DestroyArgs, manager: &ContainerManager) -> anyhow::Result<()> {
    let name = super::container_name(&args.name)?;
    manager.destroy_by_name(&name)?;
    Ok(())
}
