//! # stagebox-cli
//!
//! Shared plumbing for the `stagebox` and `stagebox-upgrade` binaries:
//! logging setup, privilege checks, the upgrade mode argument, configuration loading, and terminal
//! output.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod mode;
pub mod output;
pub mod setup;
