//! A programmable [`Host`] for exercising lifecycle code without root.
//!
//! Responses are keyed by argv prefix or suffix. Rules added later take precedence,
//! and a rule may be limited to a number of uses. Unmatched commands
//! succeed with empty output. Mounts are tracked in memory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use stagebox_common::error::{Result, StageboxError};

use crate::host::{Host, Stdio, ToolCommand, ToolOutput};

/// A recorded tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Program followed by its arguments.
    pub argv: Vec<String>,
    /// Stdio mode requested by the caller.
    pub stdio: Stdio,
}

#[derive(Debug)]
enum Matcher {
    Prefix(Vec<String>),
    Suffix(Vec<String>),
}

impl Matcher {
    fn matches(&self, argv: &[String]) -> bool {
        match self {
            Self::Prefix(prefix) => starts_with(argv, prefix),
            Self::Suffix(suffix) => {
                argv.len() >= suffix.len() && argv[argv.len() - suffix.len()..] == suffix[..]
            }
        }
    }
}

#[derive(Debug)]
struct Rule {
    matcher: Matcher,
    output: ToolOutput,
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct State {
    rules: Vec<Rule>,
    calls: Vec<Call>,
    mounts: Vec<PathBuf>,
    mount_count: usize,
    block_devices: HashSet<PathBuf>,
    failing_unmounts: HashSet<PathBuf>,
    sleeps: Vec<Duration>,
}

/// In-memory host double.
#[derive(Debug, Default)]
pub struct ScriptedHost {
    state: Mutex<State>,
}

impl ScriptedHost {
    /// Creates a host on which every command succeeds silently.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answers every command starting with `prefix` with `output`.
    pub fn respond(&self, prefix: &[&str], output: ToolOutput) {
        self.push_rule(Matcher::Prefix(owned(prefix)), output, None);
    }

    /// Answers the next `times` commands starting with `prefix`.
    pub fn respond_times(&self, prefix: &[&str], output: ToolOutput, times: usize) {
        self.push_rule(Matcher::Prefix(owned(prefix)), output, Some(times));
    }

    /// Answers every command ending with `suffix` with `output`.
    pub fn respond_suffix(&self, suffix: &[&str], output: ToolOutput) {
        self.push_rule(Matcher::Suffix(owned(suffix)), output, None);
    }

    /// Makes every command starting with `prefix` exit 1 with `stderr`.
    pub fn fail(&self, prefix: &[&str], stderr: &str) {
        self.respond(prefix, ToolOutput::failed(1, stderr));
    }

    fn push_rule(&self, matcher: Matcher, output: ToolOutput, remaining: Option<usize>) {
        self.lock().rules.push(Rule {
            matcher,
            output,
            remaining,
        });
    }

    /// Declares `path` to be a block device.
    pub fn add_block_device(&self, path: impl Into<PathBuf>) {
        let _ = self.lock().block_devices.insert(path.into());
    }

    /// Makes unmounting `target` fail.
    pub fn fail_unmount(&self, target: impl Into<PathBuf>) {
        let _ = self.lock().failing_unmounts.insert(target.into());
    }

    /// Every invocation so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Every invocation so far as space-joined command lines.
    #[must_use]
    pub fn command_lines(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .map(|c| c.argv.join(" "))
            .collect()
    }

    /// Number of invocations whose argv starts with `prefix`.
    #[must_use]
    pub fn count(&self, prefix: &[&str]) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| starts_with(&c.argv, prefix))
            .count()
    }

    /// Whether any invocation starts with `prefix`.
    #[must_use]
    pub fn called(&self, prefix: &[&str]) -> bool {
        self.count(prefix) > 0
    }

    /// Index of the first invocation starting with `prefix`.
    #[must_use]
    pub fn position(&self, prefix: &[&str]) -> Option<usize> {
        self.lock()
            .calls
            .iter()
            .position(|c| starts_with(&c.argv, prefix))
    }

    /// Mount targets currently in place.
    #[must_use]
    pub fn active_mounts(&self) -> Vec<PathBuf> {
        self.lock().mounts.clone()
    }

    /// Number of successful bind mounts ever made.
    #[must_use]
    pub fn mount_count(&self) -> usize {
        self.lock().mount_count
    }

    /// Number of sleeps requested.
    #[must_use]
    pub fn sleep_count(&self) -> usize {
        self.lock().sleeps.len()
    }
}

fn owned(parts: &[&str]) -> Vec<String> {
    parts.iter().map(ToString::to_string).collect()
}

fn starts_with<S: AsRef<str>>(argv: &[String], prefix: &[S]) -> bool {
    argv.len() >= prefix.len()
        && argv
            .iter()
            .zip(prefix)
            .all(|(a, p)| a.as_str() == p.as_ref())
}

impl Host for ScriptedHost {
    fn execute(&self, command: &ToolCommand, stdio: Stdio) -> Result<ToolOutput> {
        let argv = command.argv();
        let mut state = self.lock();
        state.calls.push(Call {
            argv: argv.clone(),
            stdio,
        });

        let Some(rule) = state
            .rules
            .iter_mut()
            .rev()
            .find(|r| r.remaining != Some(0) && r.matcher.matches(&argv))
        else {
            return Ok(ToolOutput::ok(""));
        };
        if let Some(n) = rule.remaining.as_mut() {
            *n -= 1;
        }
        let mut output = rule.output.clone();
        if stdio != Stdio::Capture {
            output.stdout.clear();
        }
        Ok(output)
    }

    fn bind_mount_rslave(&self, _source: &Path, target: &Path) -> Result<()> {
        let mut state = self.lock();
        state.mounts.push(target.to_path_buf());
        state.mount_count += 1;
        Ok(())
    }

    fn unmount_recursive(&self, target: &Path) -> Result<()> {
        let mut state = self.lock();
        if state.failing_unmounts.contains(target) {
            return Err(StageboxError::io(
                target,
                std::io::Error::other("target is busy"),
            ));
        }
        let before = state.mounts.len();
        state.mounts.retain(|m| m != target);
        if state.mounts.len() == before {
            return Err(StageboxError::io(
                target,
                std::io::Error::other("not mounted"),
            ));
        }
        Ok(())
    }

    fn is_block_device(&self, path: &Path) -> bool {
        self.lock().block_devices.contains(path)
    }

    fn sleep(&self, duration: Duration) {
        self.lock().sleeps.push(duration);
    }
}
