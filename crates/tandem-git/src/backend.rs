//! The [`CheckpointBackend`] trait: the boundary between the merge engine
//! and version control.

use crate::error::BackendError;
use crate::types::CheckpointId;

/// Version-control operations used by the replay loop.
///
/// Both methods must fail loudly: an unavailable backend or an invalid
/// working tree is reported as a [`BackendError`] carrying the underlying
/// diagnostic text, never swallowed.
///
/// The trait is object-safe and requires `Send + Sync` so a single backend
/// can be shared behind an `Arc<dyn CheckpointBackend>` by the commit path.
pub trait CheckpointBackend: Send + Sync {
    /// Mark every working-tree change (additions, modifications, deletions)
    /// for inclusion in the next checkpoint.
    ///
    /// Replaces: `git add -A`.
    fn stage(&self) -> Result<(), BackendError>;

    /// Record a history entry with `message`.
    ///
    /// With `allow_empty`, a checkpoint is created even when nothing is
    /// staged.
    ///
    /// Replaces: `git commit [--allow-empty] -m <message>`.
    fn checkpoint(&self, message: &str, allow_empty: bool) -> Result<CheckpointId, BackendError>;
}
