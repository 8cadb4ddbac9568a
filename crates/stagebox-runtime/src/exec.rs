//! Command builders for running programs inside a container.

use std::path::Path;

use stagebox_common::types::ContainerName;
use stagebox_core::host::ToolCommand;

/// Runs `argv` inside a booted container and waits for it.
///
/// `--pipe` connects the payload's stdio to ours, so whatever the caller
/// asked of [`stagebox_core::host::Stdio`] applies to the payload too.
pub fn in_container<I, S>(name: &ContainerName, argv: I) -> ToolCommand
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ToolCommand::new("systemd-run")
        .arg(format!("--machine={name}"))
        .args(["--quiet", "--wait", "--pipe", "--"])
        .args(argv)
}

/// Runs `argv` with `root` as the filesystem root.
pub fn chroot<I, S>(root: &Path, argv: I) -> ToolCommand
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ToolCommand::new("chroot").path_arg(root).args(argv)
}

/// `systemctl <verb> <unit>`.
pub fn systemctl(verb: &str, unit: &str) -> ToolCommand {
    ToolCommand::new("systemctl").args([verb, unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_container_wraps_argv() {
        let name = ContainerName::new("upgrade.x").unwrap();
        let cmd = in_container(&name, ["systemctl", "is-active", "default.target"]);
        assert_eq!(
            cmd.to_string(),
            "systemd-run --machine=upgrade.x --quiet --wait --pipe -- systemctl is-active default.target"
        );
    }

    #[test]
    fn chroot_prefixes_root() {
        let cmd = chroot(Path::new("/var/lib/machines/x"), ["update-grub"]);
        assert_eq!(cmd.argv(), vec!["chroot", "/var/lib/machines/x", "update-grub"]);
    }
}
