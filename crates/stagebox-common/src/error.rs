//! Unified error types for the stagebox workspace.
//!
//! Every failure is fatal to the enclosing operation. The only place errors
//! are downgraded is best-effort cleanup, which logs them as warnings.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum StageboxError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A precondition for the operation does not hold (missing image
    /// metadata, missing privilege, missing host tool, bad argument).
    #[error("precondition failed: {message}")]
    Precondition {
        /// Description of the unmet precondition.
        message: String,
    },

    /// An external tool exited with a non-zero status or could not be spawned.
    #[error("{program} failed{}: {stderr}", .status.map_or_else(String::new, |s| format!(" with status {s}")))]
    Tool {
        /// Program that was invoked.
        program: String,
        /// Exit status, or `None` if terminated by a signal or never spawned.
        status: Option<i32>,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// The storage layer could not answer a query.
    #[error("storage query failed: {message}")]
    StorageQuery {
        /// Description of what was asked and what came back.
        message: String,
    },

    /// A storage mutation failed.
    #[error("storage {operation} of {target} failed: {message}")]
    StorageOperation {
        /// Operation name (`snapshot`, `clone`, `destroy`, ...).
        operation: &'static str,
        /// Dataset or snapshot the operation was applied to.
        target: String,
        /// Tool diagnostic.
        message: String,
    },

    /// The container's artifact set is inconsistent.
    #[error("container {name} is not configured: missing {}", .missing.join(", "))]
    NotConfigured {
        /// Container name.
        name: String,
        /// Artifacts that were expected but not found.
        missing: Vec<String>,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The container did not finish booting within the poll bound.
    #[error("container {name} did not reach its default target after {attempts} attempts")]
    BootTimeout {
        /// Container name.
        name: String,
        /// Number of readiness probes issued.
        attempts: u32,
    },

    /// The supervised stop request failed.
    #[error("failed to stop container {name}: {message}")]
    StopFailed {
        /// Container name.
        name: String,
        /// Supervisor diagnostic.
        message: String,
    },

    /// A lifecycle operation was invoked in a state that does not allow it.
    #[error("cannot {operation} container {name} while it is {state}")]
    InvalidState {
        /// Container name.
        name: String,
        /// Current lifecycle state.
        state: String,
        /// Operation that was refused.
        operation: &'static str,
    },

    /// A teardown step could not remove an artifact.
    #[error("failed to remove {artifact}: {message}")]
    Teardown {
        /// The artifact that is left behind.
        artifact: String,
        /// Underlying diagnostic.
        message: String,
    },

    /// The process received a termination request between steps.
    #[error("interrupted")]
    Interrupted,

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl StageboxError {
    /// Shorthand for an I/O error at a path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Shorthand for a precondition failure.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, StageboxError>;
