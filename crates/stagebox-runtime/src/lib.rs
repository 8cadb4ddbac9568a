//! # stagebox-runtime
//!
//! Upgrade container lifecycle on top of `systemd-nspawn` and ZFS.
//!
//! [`manager::ContainerManager`] creates, starts, stops, runs commands in,
//! and destroys containers. [`bootloader::BootloaderPromoter`] turns a
//! stopped container's dataset into the next-boot root filesystem.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod bootloader;
pub mod container;
pub mod exec;
pub mod manager;
pub mod migrate;
pub mod nspawn;
