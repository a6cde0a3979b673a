//! Error types for checkpoint backends.
//!
//! [`BackendError`] is the single error type returned by all
//! [`CheckpointBackend`](crate::CheckpointBackend) methods. Variants keep the
//! failing command and git's own diagnostic text so callers can surface them
//! verbatim.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by [`CheckpointBackend`](crate::CheckpointBackend) operations.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The configured path is not a usable git working tree.
    #[error("not a git working tree: {}: {message}", path.display())]
    NotARepository {
        /// The path that was opened.
        path: PathBuf,
        /// Why it was rejected (bare repository, no `.git`, ...).
        message: String,
    },

    /// A git command exited unsuccessfully.
    #[error("`{command}` failed{}: {stderr}", exit_suffix(.exit_code))]
    CommandFailed {
        /// The command line that was run (e.g. `"git add -A"`).
        command: String,
        /// Process exit code, if the process was not killed by a signal.
        exit_code: Option<i32>,
        /// Captured stderr (falls back to stdout when stderr is empty).
        stderr: String,
    },

    /// An I/O error occurred (process spawn, exclude file, ...).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Catch-all for errors reported by gix or a test double.
    #[error("backend error: {message}")]
    Other {
        /// Freeform error description.
        message: String,
    },
}

#[allow(clippy::ref_option)]
fn exit_suffix(code: &Option<i32>) -> String {
    code.map_or_else(String::new, |c| format!(" (exit code {c})"))
}
