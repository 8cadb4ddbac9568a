//! # stagebox-core
//!
//! Host primitives for stagebox.
//!
//! This crate provides:
//! - **Host**: the single seam through which tools are run and mounts made.
//! - **Storage**: a typed driver over `zfs` and `zpool`.
//! - **Filesystem**: scoped pseudo-filesystem bind mounts.
//!
//! Enable the `testing` feature for [`testing::ScriptedHost`], an in-memory
//! host used by the workspace tests.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod filesystem;
pub mod host;
pub mod storage;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
