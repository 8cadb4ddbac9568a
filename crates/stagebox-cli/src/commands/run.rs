//! `stagebox run` — Run a command inside a running container.

use clap::Args;
use stagebox_core::host::Stdio;
use stagebox_runtime::manager::ContainerManager;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Container name.
    pub name: String,

    /// Command to execute.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `run` command.
///
/// The command's output streams to the terminal and this process exits with
/// the command's status.
///
/// # Errors
///
/// Returns an error if the container is not running or the command cannot
/// be launched.
pub fn execute(args: &RunArgs, manager: &ContainerManager) -> anyhow::Result<()> {
    let name = super::container_name(&args.name)?;
    let container = manager.open(&name)?;
    let output = manager.run(&container, &args.command, Stdio::Inherit)?;
    if output.success() {
        return Ok(());
    }
    let code = output.status.unwrap_or(1);
    tracing::debug!(name = %name, code, "command exited non-zero");
    std::process::exit(code);
}
