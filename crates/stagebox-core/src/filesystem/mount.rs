//! Pseudo-filesystem bind mounts for chroot tooling.
//!
//! Bootloader tools run under `chroot` need a live view of `/proc`, `/sys`,
//! and `/dev`. [`PseudoFsMounts`] binds them into a container root and
//! guarantees they are detached again on every exit path.

use std::path::{Path, PathBuf};

use stagebox_common::constants::PSEUDO_FILESYSTEMS;
use stagebox_common::error::{Result, StageboxError};

use crate::host::Host;

/// Scoped recursive bind mounts of `/proc`, `/sys`, and `/dev`.
///
/// Dropping the guard unmounts whatever is still mounted. Unmount failures
/// are logged as warnings so they never replace the error that caused the
/// early exit.
pub struct PseudoFsMounts<'h> {
    host: &'h dyn Host,
    targets: Vec<PathBuf>,
}

impl<'h> PseudoFsMounts<'h> {
    /// Binds each pseudo-filesystem into `root` with slave propagation.
    ///
    /// If a later mount fails, the earlier ones are released before the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if a mount point cannot be created or a mount fails.
    pub fn mount(host: &'h dyn Host, root: &Path) -> Result<Self> {
        let mut guard = Self {
            host,
            targets: Vec::with_capacity(PSEUDO_FILESYSTEMS.len()),
        };
        for fs in PSEUDO_FILESYSTEMS {
            let source = Path::new(fs);
            let target = root.join(fs.trim_start_matches('/'));
            std::fs::create_dir_all(&target).map_err(|e| StageboxError::io(&target, e))?;
            host.bind_mount_rslave(source, &target)?;
            guard.targets.push(target);
        }
        tracing::info!(root = %root.display(), "pseudo-filesystems mounted");
        Ok(guard)
    }

    /// Unmounts everything now instead of at drop.
    pub fn release(mut self) {
        self.unmount_all();
    }

    fn unmount_all(&mut self) {
        while let Some(target) = self.targets.pop() {
            if let Err(e) = self.host.unmount_recursive(&target) {
                tracing::warn!(target = %target.display(), error = %e, "failed to unmount");
            }
        }
    }
}

impl Drop for PseudoFsMounts<'_> {
    fn drop(&mut self) {
        self.unmount_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedHost;

    #[test]
    fn mounts_all_three_under_root() {
        let root = tempfile::tempdir().expect("tempdir");
        let host = ScriptedHost::new();
        let guard = PseudoFsMounts::mount(&host, root.path()).expect("mount");
        let mut mounted = host.active_mounts();
        mounted.sort();
        assert_eq!(
            mounted,
            vec![
                root.path().join("dev"),
                root.path().join("proc"),
                root.path().join("sys"),
            ]
        );
        guard.release();
        assert!(host.active_mounts().is_empty());
    }

    #[test]
    fn drop_unmounts_on_early_exit() {
        let root = tempfile::tempdir().expect("tempdir");
        let host = ScriptedHost::new();
        {
            let _guard = PseudoFsMounts::mount(&host, root.path()).expect("mount");
            assert_eq!(host.active_mounts().len(), 3);
        }
        assert!(host.active_mounts().is_empty());
    }

    #[test]
    fn unmount_failure_does_not_stop_the_rest() {
        let root = tempfile::tempdir().expect("tempdir");
        let host = ScriptedHost::new();
        host.fail_unmount(root.path().join("sys"));
        PseudoFsMounts::mount(&host, root.path())
            .expect("mount")
            .release();
        assert_eq!(host.active_mounts(), vec![root.path().join("sys")]);
    }
}
