//! CLI command definitions and dispatch.

pub mod convert;
pub mod create;
pub mod destroy;
pub mod run;
pub mod start;
pub mod stop;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use stagebox_runtime::manager::ContainerManager;

/// stagebox — upgrade container manager.
#[derive(Parser, Debug)]
#[command(name = "stagebox", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (JSON).
    #[arg(long, global = true, env = "STAGEBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new upgrade container and print its name.
    Create(create::CreateArgs),
    /// Start a container and wait for it to boot.
    Start(start::StartArgs),
    /// Stop a running container.
    Stop(stop::StopArgs),
    /// Remove every artifact of a container.
    Destroy(destroy::DestroyArgs),
    /// Run a command inside a running container.
    Run(run::RunArgs),
    /// Promote a stopped container to the next-boot root filesystem.
    #[command(name = "convert-to-bootfs")]
    ConvertToBootfs(convert::ConvertArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(command: Command, manager: &ContainerManager) -> anyhow::Result<()> {
    match command {
        Command::Create(args) => create::execute(&args, manager),
        Command::Start(args) => start::execute(&args, manager),
        Command::Stop(args) => stop::execute(&args, manager),
        Command::Destroy(args) => destroy::execute(&args, manager),
        Command::Run(args) => run::execute(&args, manager),
        Command::ConvertToBootfs(args) => convert::execute(&args, manager),
    }
}

/// Parses a container name argument.
fn container_name(raw: &str) -> anyhow::Result<stagebox_common::types::ContainerName> {
    Ok(stagebox_common::types::ContainerName::new(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn run_collects_trailing_command() {
        let cli = Cli::try_parse_from(["stagebox", "run", "upgrade.x", "ls", "-la", "/"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.name, "upgrade.x");
        assert_eq!(args.command, vec!["ls", "-la", "/"]);
    }

    #[test]
    fn create_requires_a_known_mode() {
        assert!(Cli::try_parse_from(["stagebox", "create", "sideways"]).is_err());
        let cli = Cli::try_parse_from(["stagebox", "create", "not-in-place"]).unwrap();
        assert!(matches!(cli.command, Command::Create(_)));
    }

    #[test]
    fn convert_uses_hyphenated_name() {
        let cli = Cli::try_parse_from(["stagebox", "convert-to-bootfs", "upgrade.x"]).unwrap();
        assert!(matches!(cli.command, Command::ConvertToBootfs(_)));
    }
}
