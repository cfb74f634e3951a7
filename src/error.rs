//! Error taxonomy for the interpreter driver.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KernelError {
    /// The interpreter executable could not be located or started.
    #[error("failed to start `{executable}`: {reason}")]
    Spawn { executable: String, reason: String },

    /// The child died, closed its output, or stopped answering mid-execution.
    /// The session has already been discarded when this is returned.
    #[error("interpreter session crashed: {0}")]
    SessionCrashed(String),

    /// The last line of a fragment left the interpreter waiting for more input.
    #[error("continuation prompt found, input was incomplete:\n{0}")]
    IncompleteInput(String),

    #[error("interpreter session was shut down")]
    Terminated,

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// One figure file that could not be read back or normalised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactError {
    pub path: PathBuf,
    pub message: String,
}

impl std::fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}
