//! # stagebox-upgrade — upgrade transaction driver
//!
//! Stages an upgrade in a fresh container and then either discards the
//! container (in-place) or promotes it to the next-boot root (not-in-place).

#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::builder::BoolishValueParser;
use clap::Parser;
use stagebox_cli::mode::ModeArg;
use stagebox_cli::{output, setup};
use stagebox_orchestrator::orchestrator::{Orchestrator, UpgradeOptions};

/// stagebox-upgrade — run an appliance upgrade in a staging container.
#[derive(Parser, Debug)]
#[command(name = "stagebox-upgrade", version, about, long_about = None)]
struct Cli {
    /// Upgrade mode.
    #[arg(value_enum)]
    mode: ModeArg,

    /// Skip the verification step.
    #[arg(short = 'v', long, env = "STAGEBOX_SKIP_VERIFY", value_parser = BoolishValueParser::new())]
    skip_verify: bool,

    /// Keep the container if the upgrade fails.
    #[arg(long, env = "STAGEBOX_DEBUG_RETAIN", value_parser = BoolishValueParser::new())]
    debug_retain: bool,

    /// Configuration file (JSON).
    #[arg(long, env = "STAGEBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup::init_tracing(cli.json_logs);
    setup::require_root()?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow::anyhow!("failed to set signal handler: {e}"))?;

    let manager = setup::manager(cli.config.as_deref())?;
    let options = UpgradeOptions::new(cli.mode.into())
        .skip_verify(cli.skip_verify)
        .debug_retain(cli.debug_retain);
    let outcome = Orchestrator::new(&manager)
        .with_interrupt(interrupted)
        .run(options)?;
    output::print_outcome(&outcome);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Serializes tests that read or write the process environment.
    static ENV: Mutex<()> = Mutex::new(());

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("stagebox-upgrade").chain(args.iter().copied())).unwrap()
    }

    #[allow(unsafe_code)]
    fn set_env(key: &str, value: Option<&str>) {
        // SAFETY: every test touching the environment holds `ENV`.
        unsafe {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn short_v_skips_verification() {
        let _env = ENV.lock().unwrap();
        let cli = parse(&["in-place", "-v"]);
        assert_eq!(cli.mode, ModeArg::InPlace);
        assert!(cli.skip_verify);
        assert!(!cli.debug_retain);
    }

    #[test]
    fn debug_retain_flag() {
        let _env = ENV.lock().unwrap();
        let cli = parse(&["not-in-place", "--debug-retain"]);
        assert_eq!(cli.mode, ModeArg::NotInPlace);
        assert!(cli.debug_retain);
    }

    #[test]
    fn environment_toggles_accept_boolish_values() {
        let _env = ENV.lock().unwrap();

        set_env("STAGEBOX_SKIP_VERIFY", Some("yes"));
        set_env("STAGEBOX_DEBUG_RETAIN", Some("on"));
        let cli = parse(&["in-place"]);
        assert!(cli.skip_verify);
        assert!(cli.debug_retain);

        set_env("STAGEBOX_SKIP_VERIFY", Some("0"));
        set_env("STAGEBOX_DEBUG_RETAIN", Some("false"));
        let cli = parse(&["in-place"]);
        assert!(!cli.skip_verify);
        assert!(!cli.debug_retain);

        // The flag wins over a falsy environment value.
        let cli = parse(&["in-place", "-v"]);
        assert!(cli.skip_verify);

        set_env("STAGEBOX_SKIP_VERIFY", None);
        set_env("STAGEBOX_DEBUG_RETAIN", None);
    }
}
