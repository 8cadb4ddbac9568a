//! `stagebox convert-to-bootfs` — Promote a stopped container.

use clap::Args;
use stagebox_runtime::manager::ContainerManager;

/// Arguments for the `convert-to-bootfs` command.
#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Container name.
    pub name: String,
}

/// Executes the `convert-to-bootfs` command.
///
/// # Errors
///
/// Returns an error if the container is not stopped or any promotion step
/// fails. A failure after the bootloader was touched needs manual repair.
pub fn execute(args: &ConvertArgs, manager: &ContainerManager) -> anyhow::Result<()> {
    let name = super::container_name(&args.name)?;
    let container = manager.open(&name)?;
    let dataset = manager.convert_to_bootfs(container)?;
    tracing::info!(name = %name, dataset = %dataset, "next boot will use the promoted dataset");
    Ok(())
}
