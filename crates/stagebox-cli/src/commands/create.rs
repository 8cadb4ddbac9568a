//! `stagebox create` — Create a new upgrade container.

use clap::Args;
use stagebox_cli::mode::ModeArg;
use stagebox_runtime::manager::ContainerManager;

/// Arguments for the `create` command.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Population mode.
    #[arg(value_enum)]
    pub mode: ModeArg,
}

/// Executes the `create` command.
///
/// Prints only the container name on stdout.
///
/// # Errors
///
/// Returns an error if creation fails; partial artifacts are removed first.
pub fn execute(args: &CreateArgs, manager: &ContainerManager) -> anyhow::Result<()> {
    let container = manager.create(args.mode.into())?;
    #[allow(clippy::print_stdout)]
    {
        println!("{}", container.name);
    }
    Ok(())
}
