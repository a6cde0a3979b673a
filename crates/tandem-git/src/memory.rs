//! An in-memory [`CheckpointBackend`] that records every call.
//!
//! Used by the merge and commit tests, and handy for dry runs where the
//! working tree should be rewritten without touching history. Failures can
//! be injected at a chosen call to exercise abort paths.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::backend::CheckpointBackend;
use crate::error::BackendError;
use crate::types::CheckpointId;

/// One checkpoint recorded by [`RecordingBackend`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedCheckpoint {
    /// Sequential id (`mem-1`, `mem-2`, ...).
    pub id: CheckpointId,
    /// Message passed to `checkpoint`.
    pub message: String,
    /// Whether an empty checkpoint was allowed.
    pub allow_empty: bool,
    /// Whether `stage()` was called since the previous checkpoint.
    pub staged: bool,
}

#[derive(Debug, Default)]
struct State {
    stage_calls: usize,
    staged_since_checkpoint: bool,
    checkpoints: Vec<RecordedCheckpoint>,
    fail_stage_at: Option<usize>,
    fail_checkpoint_at: Option<usize>,
}

/// Test double recording `stage` and `checkpoint` calls in order.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    state: Mutex<State>,
}

impl RecordingBackend {
    /// A backend on which every call succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `n`-th (0-based) call to `stage()`.
    #[must_use]
    pub fn failing_stage_at(self, n: usize) -> Self {
        self.lock().fail_stage_at = Some(n);
        self
    }

    /// Fail every `checkpoint()` call made once `n` checkpoints exist.
    #[must_use]
    pub fn failing_checkpoint_at(self, n: usize) -> Self {
        self.lock().fail_checkpoint_at = Some(n);
        self
    }

    /// All checkpoints recorded so far, oldest first.
    #[must_use]
    pub fn checkpoints(&self) -> Vec<RecordedCheckpoint> {
        self.lock().checkpoints.clone()
    }

    /// Checkpoint messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.lock()
            .checkpoints
            .iter()
            .map(|c| c.message.clone())
            .collect()
    }

    /// Number of `stage()` calls, successful or not.
    #[must_use]
    pub fn stage_calls(&self) -> usize {
        self.lock().stage_calls
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CheckpointBackend for RecordingBackend {
    fn stage(&self) -> Result<(), BackendError> {
        let mut state = self.lock();
        let call = state.stage_calls;
        state.stage_calls += 1;
        if state.fail_stage_at == Some(call) {
            return Err(BackendError::CommandFailed {
                command: "stage".to_owned(),
                exit_code: Some(1),
                stderr: format!("injected failure on stage call {call}"),
            });
        }
        state.staged_since_checkpoint = true;
        Ok(())
    }

    fn checkpoint(&self, message: &str, allow_empty: bool) -> Result<CheckpointId, BackendError> {
        let mut state = self.lock();
        let call = state.checkpoints.len();
        if state.fail_checkpoint_at == Some(call) {
            return Err(BackendError::CommandFailed {
                command: "checkpoint".to_owned(),
                exit_code: Some(1),
                stderr: format!("injected failure on checkpoint call {call}"),
            });
        }
        let id = CheckpointId::new(format!("mem-{}", call + 1));
        let staged = std::mem::take(&mut state.staged_since_checkpoint);
        state.checkpoints.push(RecordedCheckpoint {
            id: id.clone(),
            message: message.to_owned(),
            allow_empty,
            staged,
        });
        Ok(id)
    }
}
