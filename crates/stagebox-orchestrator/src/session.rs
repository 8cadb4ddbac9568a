//! Scoped ownership of the one container an upgrade session creates.

use stagebox_common::error::{Result, StageboxError};
use stagebox_common::types::UpgradeMode;
use stagebox_runtime::container::Container;
use stagebox_runtime::manager::ContainerManager;

/// How a session's control flow ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every step succeeded.
    Success,
    /// A step failed or the session was interrupted.
    Failure,
}

/// What happens to the session container when the session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupAction {
    /// Stop the container and destroy every artifact.
    StopAndDestroy,
    /// Leave the container as it is for inspection.
    Retain,
    /// The container was consumed; nothing to do.
    Nothing,
}

/// Cleanup policy keyed on mode, outcome, and the debug-retain flag.
#[must_use]
pub const fn cleanup_action(mode: UpgradeMode, outcome: Outcome, debug_retain: bool) -> CleanupAction {
    match (mode, outcome, debug_retain) {
        (UpgradeMode::InPlace, Outcome::Success, _) => CleanupAction::StopAndDestroy,
        (UpgradeMode::NotInPlace, Outcome::Success, _) => CleanupAction::Nothing,
        (_, Outcome::Failure, false) => CleanupAction::StopAndDestroy,
        (_, Outcome::Failure, true) => CleanupAction::Retain,
    }
}

/// Holds the session container and applies the failure policy when dropped.
///
/// [`ContainerGuard::disarm`] hands the container over without cleanup;
/// [`ContainerGuard::finish`] applies the success policy and reports its
/// errors. Any other exit path counts as a failure.
pub struct ContainerGuard<'m> {
    manager: &'m ContainerManager,
    container: Option<Container>,
    mode: UpgradeMode,
    debug_retain: bool,
}

impl<'m> ContainerGuard<'m> {
    /// Takes ownership of a freshly created container.
    #[must_use]
    pub const fn new(
        manager: &'m ContainerManager,
        container: Container,
        mode: UpgradeMode,
        debug_retain: bool,
    ) -> Self {
        Self {
            manager,
            container: Some(container),
            mode,
            debug_retain,
        }
    }

    /// The guarded container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container has already been handed over.
    pub fn container(&mut self) -> Result<&mut Container> {
        self.container.as_mut().ok_or_else(released)
    }

    /// Releases the container without any cleanup.
    ///
    /// # Errors
    ///
    /// Returns an error if the container has already been handed over.
    pub fn disarm(mut self) -> Result<Container> {
        let container = self.container.take().ok_or_else(released)?;
        tracing::debug!(name = %container.name, "session guard disarmed");
        Ok(container)
    }

    /// Applies the success policy.
    ///
    /// Destroy is attempted even when stop fails; a stop failure alone is
    /// only logged.
    ///
    /// # Errors
    ///
    /// Returns the destroy error.
    pub fn finish(mut self) -> Result<()> {
        let mut container = self.container.take().ok_or_else(released)?;
        match cleanup_action(self.mode, Outcome::Success, self.debug_retain) {
            CleanupAction::StopAndDestroy => {
                if let Err(e) = self.manager.stop(&mut container) {
                    tracing::warn!(name = %container.name, error = %e, "stop after upgrade failed");
                }
                self.manager.destroy(&mut container)
            }
            CleanupAction::Retain | CleanupAction::Nothing => Ok(()),
        }
    }
}

impl Drop for ContainerGuard<'_> {
    fn drop(&mut self) {
        let Some(mut container) = self.container.take() else {
            return;
        };
        match cleanup_action(self.mode, Outcome::Failure, self.debug_retain) {
            CleanupAction::StopAndDestroy => {
                tracing::info!(name = %container.name, "cleaning up after failed upgrade");
                if let Err(e) = self.manager.stop(&mut container) {
                    tracing::warn!(name = %container.name, error = %e, "stop during cleanup failed");
                }
                if let Err(e) = self.manager.destroy(&mut container) {
                    tracing::warn!(name = %container.name, error = %e, "destroy during cleanup failed");
                }
            }
            CleanupAction::Retain => {
                tracing::warn!(
                    name = %container.name,
                    state = %container.state,
                    "upgrade failed, container retained for debugging"
                );
            }
            CleanupAction::Nothing => {}
        }
    }
}

fn released() -> StageboxError {
    StageboxError::InvalidState {
        name: "session".into(),
        state: "released".into(),
        operation: "reuse",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_table() {
        use CleanupAction::{Nothing, Retain, StopAndDestroy};
        use Outcome::{Failure, Success};
        use UpgradeMode::{InPlace, NotInPlace};

        let cases = [
            (InPlace, Success, false, StopAndDestroy),
            (InPlace, Success, true, StopAndDestroy),
            (InPlace, Failure, false, StopAndDestroy),
            (InPlace, Failure, true, Retain),
            (NotInPlace, Success, false, Nothing),
            (NotInPlace, Success, true, Nothing),
            (NotInPlace, Failure, false, StopAndDestroy),
            (NotInPlace, Failure, true, Retain),
        ];
        for (mode, outcome, retain, expected) in cases {
            assert_eq!(
                cleanup_action(mode, outcome, retain),
                expected,
                "{mode} {outcome:?} retain={retain}"
            );
        }
    }
}
