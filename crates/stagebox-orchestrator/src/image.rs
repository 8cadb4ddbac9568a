//! The update image: the bundle directory an upgrade is staged from.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use stagebox_common::config::StageboxConfig;
use stagebox_common::constants::VERSION_INFO_FILE;
use stagebox_common::error::{Result, StageboxError};

/// Key of the mandatory version entry in `version.info`.
pub const VERSION_KEY: &str = "VERSION";

/// A validated update image on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateImage {
    /// Image directory.
    pub dir: PathBuf,
    /// Package repository inside the image.
    pub repository: PathBuf,
    /// Every entry of `version.info`.
    pub metadata: BTreeMap<String, String>,
}

impl UpdateImage {
    /// Loads the image described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StageboxError::Precondition`] if the directory, its
    /// `version.info`, or the `VERSION` entry is missing.
    pub fn load(config: &StageboxConfig) -> Result<Self> {
        let dir = &config.update.dir;
        if !dir.is_dir() {
            return Err(StageboxError::precondition(format!(
                "update image {} not found",
                dir.display()
            )));
        }
        let info = dir.join(VERSION_INFO_FILE);
        if !info.is_file() {
            return Err(StageboxError::precondition(format!(
                "{} not found",
                info.display()
            )));
        }
        let content = std::fs::read_to_string(&info).map_err(|e| StageboxError::io(&info, e))?;
        let metadata = parse_version_info(&content);
        if !metadata.contains_key(VERSION_KEY) {
            return Err(StageboxError::precondition(format!(
                "{} has no {VERSION_KEY} entry",
                info.display()
            )));
        }
        Ok(Self {
            dir: dir.clone(),
            repository: config.repository_dir(),
            metadata,
        })
    }

    /// The image version.
    #[must_use]
    pub fn version(&self) -> &str {
        self.metadata.get(VERSION_KEY).map_or("", String::as_str)
    }

    /// Fails unless the image carries a package repository.
    ///
    /// # Errors
    ///
    /// Returns [`StageboxError::Precondition`] if the repository is missing.
    pub fn require_repository(&self) -> Result<&Path> {
        if self.repository.is_dir() {
            return Ok(&self.repository);
        }
        Err(StageboxError::precondition(format!(
            "package repository {} not found",
            self.repository.display()
        )))
    }
}

/// Parses `KEY=VALUE` lines. Blank lines and `#` comments are ignored and
/// surrounding quotes are stripped from values.
#[must_use]
pub fn parse_version_info(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            (key.trim().to_string(), value.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path) -> StageboxConfig {
        let mut config = StageboxConfig::default();
        config.update.dir = dir.join("update");
        config
    }

    #[test]
    fn parses_keys_comments_and_quotes() {
        let info = parse_version_info("# build\nVERSION=\"6.0.1\"\n\nBUILD = 42\ngarbage\n");
        assert_eq!(info.get("VERSION").map(String::as_str), Some("6.0.1"));
        assert_eq!(info.get("BUILD").map(String::as_str), Some("42"));
        assert_eq!(info.len(), 2);
    }

    #[test]
    fn loads_valid_image() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::create_dir_all(&config.update.dir).unwrap();
        std::fs::write(config.update.dir.join(VERSION_INFO_FILE), "VERSION=6.0.1\n").unwrap();

        let image = UpdateImage::load(&config).unwrap();
        assert_eq!(image.version(), "6.0.1");
        assert!(image.require_repository().is_err());

        std::fs::create_dir_all(config.repository_dir()).unwrap();
        assert_eq!(image.require_repository().unwrap(), config.repository_dir());
    }

    #[test]
    fn missing_pieces_are_precondition_failures() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        assert!(matches!(
            UpdateImage::load(&config).unwrap_err(),
            StageboxError::Precondition { .. }
        ));

        std::fs::create_dir_all(&config.update.dir).unwrap();
        assert!(matches!(
            UpdateImage::load(&config).unwrap_err(),
            StageboxError::Precondition { .. }
        ));

        std::fs::write(config.update.dir.join(VERSION_INFO_FILE), "BUILD=1\n").unwrap();
        let err = UpdateImage::load(&config).unwrap_err();
        assert!(err.to_string().contains("VERSION"));
    }
}
