//! The boundary between stagebox and the host it drives.
//!
//! Every external tool invocation and every mount goes through [`Host`], so
//! the lifecycle code above it never touches `std::process` or `mount(2)`
//! directly.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use stagebox_common::error::{Result, StageboxError};

/// An external program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
}

impl ToolCommand {
    /// Creates a command for `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appends a path argument.
    #[must_use]
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    /// Program name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments after the program name.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// The full argument vector, program first.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Where a tool's standard streams go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stdio {
    /// Collected and returned in [`ToolOutput`].
    Capture,
    /// Shared with this process.
    Inherit,
    /// Tool stdout is written to this process's stderr; stderr is shared.
    StdoutToStderr,
}

/// Result of a tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` if the tool was killed by a signal.
    pub status: Option<i32>,
    /// Captured stdout (empty unless [`Stdio::Capture`]).
    pub stdout: String,
    /// Captured stderr (empty unless [`Stdio::Capture`]).
    pub stderr: String,
}

impl ToolOutput {
    /// A successful result with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed result with the given exit code and stderr.
    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the tool exited with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.status, Some(0))
    }

    /// Converts a non-zero exit into [`StageboxError::Tool`].
    ///
    /// # Errors
    ///
    /// Returns an error if the tool did not exit with status 0.
    pub fn check(self, program: &str) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(StageboxError::Tool {
            program: program.to_string(),
            status: self.status,
            stderr: self.stderr.trim().to_string(),
        })
    }
}

/// Operations stagebox needs from the host.
pub trait Host: Send + Sync {
    /// Runs a tool to completion.
    ///
    /// A non-zero exit is not an error at this level; callers decide.
    ///
    /// # Errors
    ///
    /// Returns an error only if the tool could not be spawned.
    fn execute(&self, command: &ToolCommand, stdio: Stdio) -> Result<ToolOutput>;

    /// Recursively bind-mounts `source` onto `target` and marks the new
    /// mount tree as a propagation slave.
    ///
    /// # Errors
    ///
    /// Returns an error if either mount call fails.
    fn bind_mount_rslave(&self, source: &Path, target: &Path) -> Result<()>;

    /// Detaches `target` and every mount below it.
    ///
    /// # Errors
    ///
    /// Returns an error if the unmount call fails.
    fn unmount_recursive(&self, target: &Path) -> Result<()>;

    /// Whether `path` exists and is a block device.
    fn is_block_device(&self, path: &Path) -> bool;

    /// Blocks the calling thread.
    fn sleep(&self, duration: Duration);

    /// Runs a tool with captured output.
    ///
    /// # Errors
    ///
    /// Returns an error only if the tool could not be spawned.
    fn output(&self, command: &ToolCommand) -> Result<ToolOutput> {
        self.execute(command, Stdio::Capture)
    }

    /// Runs a tool and fails on a non-zero exit.
    ///
    /// # Errors
    ///
    /// Returns [`StageboxError::Tool`] on spawn failure or non-zero exit.
    fn run_checked(&self, command: &ToolCommand, stdio: Stdio) -> Result<ToolOutput> {
        tracing::debug!(command = %command, "running");
        self.execute(command, stdio)?.check(command.program())
    }
}

/// The real host: spawns processes and issues mount syscalls.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl SystemHost {
    /// Creates the system host.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Host for SystemHost {
    fn execute(&self, command: &ToolCommand, stdio: Stdio) -> Result<ToolOutput> {
        let mut cmd = std::process::Command::new(command.program());
        let _ = cmd.args(command.arguments());

        let spawn_error = |e: std::io::Error| StageboxError::Tool {
            program: command.program().to_string(),
            status: None,
            stderr: e.to_string(),
        };

        match stdio {
            Stdio::Capture => {
                let output = cmd.output().map_err(spawn_error)?;
                Ok(ToolOutput {
                    status: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            Stdio::Inherit => {
                let status = cmd.status().map_err(spawn_error)?;
                Ok(ToolOutput {
                    status: status.code(),
                    ..ToolOutput::default()
                })
            }
            Stdio::StdoutToStderr => {
                use std::os::fd::AsFd;

                let stderr = std::io::stderr()
                    .as_fd()
                    .try_clone_to_owned()
                    .map_err(|e| StageboxError::io("/dev/stderr", e))?;
                let status = cmd
                    .stdout(std::process::Stdio::from(stderr))
                    .status()
                    .map_err(spawn_error)?;
                Ok(ToolOutput {
                    status: status.code(),
                    ..ToolOutput::default()
                })
            }
        }
    }

    #[cfg(target_os = "linux")]
    fn bind_mount_rslave(&self, source: &Path, target: &Path) -> Result<()> {
        use nix::mount::{MsFlags, mount};

        mount(
            Some(source),
            target,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REC,
            None::<&str>,
        )
        .map_err(|e| StageboxError::io(target, e.into()))?;
        mount(
            None::<&str>,
            target,
            None::<&str>,
            MsFlags::MS_SLAVE | MsFlags::MS_REC,
            None::<&str>,
        )
        .map_err(|e| StageboxError::io(target, e.into()))?;
        tracing::debug!(source = %source.display(), target = %target.display(), "bind mounted");
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn bind_mount_rslave(&self, _source: &Path, _target: &Path) -> Result<()> {
        Err(StageboxError::precondition(
            "Linux required for bind mounts",
        ))
    }

    #[cfg(target_os = "linux")]
    fn unmount_recursive(&self, target: &Path) -> Result<()> {
        nix::mount::umount2(target, nix::mount::MntFlags::MNT_DETACH)
            .map_err(|e| StageboxError::io(target, e.into()))?;
        tracing::debug!(target = %target.display(), "unmounted");
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn unmount_recursive(&self, _target: &Path) -> Result<()> {
        Err(StageboxError::precondition("Linux required for unmounts"))
    }

    fn is_block_device(&self, path: &Path) -> bool {
        use std::os::unix::fs::FileTypeExt;

        std::fs::metadata(path).is_ok_and(|m| m.file_type().is_block_device())
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_display_joins_argv() {
        let cmd = ToolCommand::new("zfs").args(["list", "-H", "-o", "name", "/"]);
        assert_eq!(cmd.to_string(), "zfs list -H -o name /");
        assert_eq!(cmd.argv()[0], "zfs");
        assert_eq!(cmd.arguments().len(), 5);
    }

    #[test]
    fn check_maps_non_zero_to_tool_error() {
        let err = ToolOutput::failed(2, "  no such pool\n")
            .check("zpool")
            .unwrap_err();
        match err {
            StageboxError::Tool {
                program,
                status,
                stderr,
            } => {
                assert_eq!(program, "zpool");
                assert_eq!(status, Some(2));
                assert_eq!(stderr, "no such pool");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn system_host_captures_output() {
        let host = SystemHost::new();
        let out = host
            .output(&ToolCommand::new("sh").args(["-c", "echo hi; echo oops >&2; exit 3"]))
            .expect("spawn sh");
        assert_eq!(out.status, Some(3));
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(out.stderr, "oops\n");
    }

    #[test]
    fn system_host_reports_missing_program_as_tool_error() {
        let host = SystemHost::new();
        let err = host
            .output(&ToolCommand::new("stagebox-definitely-not-a-program"))
            .unwrap_err();
        assert!(matches!(err, StageboxError::Tool { status: None, .. }));
    }

    #[test]
    fn regular_file_is_not_a_block_device() {
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        assert!(!SystemHost::new().is_block_device(file.path()));
        assert!(!SystemHost::new().is_block_device(Path::new("/nonexistent/sda")));
    }
}
