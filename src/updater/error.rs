//! Frontend error kinds.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::gclb::CloudError;

/// Errors returned by frontend lifecycle operations.
///
/// `Clone` so a single setup outcome can be handed to every waiting caller.
#[derive(Debug, Clone, Error)]
pub enum FrontendError {
    /// The frontend has not been started, or has been stopped.
    #[error("{0} is not running")]
    NotRunning(&'static str),

    /// Started, but no update has been applied yet.
    #[error("waiting for initial update")]
    WaitingForInitialUpdate,

    /// The process or cloud identity never became ready.
    #[error("startup failed: {0}")]
    StartupFailure(String),

    /// The validation check rejected a candidate configuration.
    #[error("Config check failed: `{command}`: {output}")]
    ConfigInvalid { command: String, output: String },

    /// The configuration was valid but the reload command failed.
    #[error("reload failed: `{command}`: {output}")]
    ApplyFailure { command: String, output: String },

    /// The managed process exited without being asked to.
    #[error("nginx process exited unexpectedly: {0}")]
    ProcessExited(String),

    /// The most recent update did not apply.
    #[error("last update failed: {0}")]
    LastUpdateFailed(String),

    /// The managed process outlived the shutdown bound.
    #[error("nginx did not exit within {0:?}")]
    StopTimeout(Duration),

    /// Attached to a different number of frontends than expected.
    #[error("expected frontends: {expected}, registered: {actual}")]
    AttachMismatch { expected: usize, actual: usize },

    /// One or more instance groups could not be left during shutdown.
    #[error("failed to detach from {} instance group(s): {}", .failed.len(), .failed.join(", "))]
    PartialDetachFailure { failed: Vec<String> },

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    /// Failures from several frontends at once.
    #[error("{}", join_errors(.0))]
    Aggregate(Vec<FrontendError>),
}

impl From<std::io::Error> for FrontendError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

fn join_errors(errors: &[FrontendError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for frontend operations.
pub type FrontendResult<T> = Result<T, FrontendError>;
