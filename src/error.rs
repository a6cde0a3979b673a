//! Top-level error type for tandem.
//!
//! [`TandemError`] wraps the component errors so the server and CLI have one
//! type to report. Every message says what went wrong and, where there is
//! something to do about it, how to fix it.

use std::fmt;

use tandem_git::BackendError;

use crate::buffer::BufferError;
use crate::commit::CommitError;
use crate::config::ConfigError;
use crate::model::ValidationError;

/// Unified error type for relay operations.
#[derive(Debug)]
pub enum TandemError {
    /// The configuration file could not be loaded.
    Config(ConfigError),
    /// A pushed record was malformed.
    Validation(ValidationError),
    /// The pending log could not be locked, written or read.
    Buffer(BufferError),
    /// A commit failed at one of its steps.
    Commit(CommitError),
    /// The repository could not be opened or prepared.
    Backend(BackendError),
    /// Any other I/O failure.
    Io(std::io::Error),
}

impl TandemError {
    /// Returns `true` if the caller sent something invalid, as opposed to
    /// the server failing.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl fmt::Display for TandemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(
                f,
                "{e}\n  To fix: correct the configuration file or pass the setting as a flag."
            ),
            Self::Validation(e) => write!(
                f,
                "change record rejected: {e}\n  To fix: send a non-empty id and user_id and a path relative to the repository root."
            ),
            Self::Buffer(e) => write!(f, "{e}"),
            Self::Commit(e) => write!(f, "{e}"),
            Self::Backend(e) => write!(
                f,
                "repository error: {e}\n  To fix: point --repo at a git working tree."
            ),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for TandemError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Validation(e) => Some(e),
            Self::Buffer(e) => Some(e),
            Self::Commit(e) => Some(e),
            Self::Backend(e) => Some(e),
            Self::Io(e) => Some(e),
        }
    }
}

impl From<ConfigError> for TandemError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<ValidationError> for TandemError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

impl From<BufferError> for TandemError {
    fn from(err: BufferError) -> Self {
        Self::Buffer(err)
    }
}

impl From<CommitError> for TandemError {
    fn from(err: CommitError) -> Self {
        Self::Commit(err)
    }
}

impl From<BackendError> for TandemError {
    fn from(err: BackendError) -> Self {
        Self::Backend(err)
    }
}

impl From<std::io::Error> for TandemError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
