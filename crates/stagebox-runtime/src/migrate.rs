//! Carries host identity and credentials into a container root before it
//! becomes the boot filesystem.

use std::path::{Path, PathBuf};

use stagebox_common::error::{Result, StageboxError};
use stagebox_core::host::{Host, Stdio};

use crate::exec;

/// Copies password hashes and identity files from the host into a
/// container root.
pub struct ConfigMigrator<'h> {
    host: &'h dyn Host,
    root: PathBuf,
    shadow_file: PathBuf,
}

impl<'h> ConfigMigrator<'h> {
    /// Creates a migrator targeting the container mounted at `root`.
    #[must_use]
    pub fn new(host: &'h dyn Host, root: &Path, shadow_file: &Path) -> Self {
        Self {
            host,
            root: root.to_path_buf(),
            shadow_file: shadow_file.to_path_buf(),
        }
    }

    /// Sets `user`'s password hash inside the container to the host's.
    ///
    /// # Errors
    ///
    /// Returns [`StageboxError::Precondition`] if the host has no entry for
    /// `user`, or a tool error if `usermod` fails.
    pub fn migrate_user(&self, user: &str) -> Result<()> {
        let shadow = std::fs::read_to_string(&self.shadow_file)
            .map_err(|e| StageboxError::io(&self.shadow_file, e))?;
        let hash = shadow_hash(&shadow, user).ok_or_else(|| {
            StageboxError::precondition(format!("no shadow entry for user {user}"))
        })?;
        let cmd = exec::chroot(&self.root, ["usermod", "-p", hash, user]);
        let _ = self
            .host
            .execute(&cmd, Stdio::Capture)?
            .check("usermod")?;
        tracing::info!(user, "password hash migrated");
        Ok(())
    }

    /// Copies a host file to the same path inside the container.
    ///
    /// Returns `false` if the host has no such file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the copy fails.
    pub fn migrate_file(&self, path: &Path) -> Result<bool> {
        if !path.is_file() {
            tracing::debug!(path = %path.display(), "not present on host, skipped");
            return Ok(false);
        }
        let dest = self.root.join(path.strip_prefix("/").unwrap_or(path));
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StageboxError::io(parent, e))?;
        }
        let _ = std::fs::copy(path, &dest).map_err(|e| StageboxError::io(&dest, e))?;
        tracing::debug!(path = %path.display(), "file migrated");
        Ok(true)
    }
}

/// Returns the password hash field of `user` in shadow-format `content`.
#[must_use]
pub fn shadow_hash<'a>(content: &'a str, user: &str) -> Option<&'a str> {
    content.lines().find_map(|line| {
        let mut fields = line.splitn(3, ':');
        (fields.next()? == user).then(|| fields.next()).flatten()
    })
}
