//! Filesystem helpers for preparing a container root for chroot tooling.

pub mod mount;
