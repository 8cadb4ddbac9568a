//! # stagebox — upgrade container manager
//!
//! Creates, starts, stops, and destroys ZFS-backed `systemd-nspawn`
//! containers, runs commands in them, and promotes one to the next-boot
//! root filesystem.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::panic))]

mod commands;

use clap::Parser;
use stagebox_cli::setup;

use crate::commands::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup::init_tracing(cli.json_logs);
    setup::require_root()?;

    let manager = setup::manager(cli.config.as_deref())?;
    commands::execute(cli.command, &manager)
}
