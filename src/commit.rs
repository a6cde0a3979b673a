//! Single-flight commit: drain the buffer, merge the batch, acknowledge it.
//!
//! [`CommitCoordinator::commit`] holds one mutex across the whole
//! drain → merge → reset sequence, so two commit requests never merge the
//! same records or reset the log under each other. A second caller blocks
//! until the first finishes and then commits whatever is left.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, instrument, warn};

use crate::buffer::{BufferError, IngestionBuffer};
use crate::merge::{MergeEngine, MergeError, MergeReport};

/// What a successful commit did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Records drained and merged.
    pub records: usize,
    /// Checkpoints created.
    pub checkpoints: usize,
    /// Hunks dropped because their context was not found.
    pub dropped_hunks: usize,
    /// Edit records skipped because their file is not UTF-8 text.
    pub skipped_edits: usize,
    /// Per-group detail.
    pub report: MergeReport,
}

impl From<MergeReport> for CommitSummary {
    fn from(report: MergeReport) -> Self {
        Self {
            records: report.records,
            checkpoints: report.checkpoints(),
            dropped_hunks: report.dropped_hunks(),
            skipped_edits: report.skipped_edits(),
            report,
        }
    }
}

/// A commit failed. The variant names the step that failed.
#[derive(Debug)]
pub enum CommitError {
    /// The buffer could not be flushed or the log could not be read.
    Drain(BufferError),
    /// Merging the batch failed; the log still holds every drained record.
    Merge(MergeError),
    /// The batch was checkpointed but could not be removed from the log.
    Reset(BufferError),
}

impl CommitError {
    /// Short name of the failed step (`"drain"`, `"merge"` or `"reset"`).
    #[must_use]
    pub const fn stage(&self) -> &'static str {
        match self {
            Self::Drain(_) => "drain",
            Self::Merge(_) => "merge",
            Self::Reset(_) => "reset",
        }
    }
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drain(e) => write!(f, "commit failed while draining: {e}"),
            Self::Merge(e) => write!(f, "commit failed while merging: {e}"),
            Self::Reset(e) => write!(
                f,
                "commit checkpointed but the pending log was not cleared: {e}\n  To fix: the next commit will replay these records; clear the log by hand if that is not wanted."
            ),
        }
    }
}

impl std::error::Error for CommitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Drain(e) | Self::Reset(e) => Some(e),
            Self::Merge(e) => Some(e),
        }
    }
}

/// Serializes commits over one buffer and one merge engine.
#[derive(Debug)]
pub struct CommitCoordinator {
    buffer: Arc<IngestionBuffer>,
    engine: MergeEngine,
    in_flight: Mutex<()>,
}

impl CommitCoordinator {
    /// A coordinator committing `buffer`'s records through `engine`.
    #[must_use]
    pub fn new(buffer: Arc<IngestionBuffer>, engine: MergeEngine) -> Self {
        Self {
            buffer,
            engine,
            in_flight: Mutex::new(()),
        }
    }

    /// The buffer being committed.
    #[must_use]
    pub const fn buffer(&self) -> &Arc<IngestionBuffer> {
        &self.buffer
    }

    /// Drain every pending record, merge it and clear it from the log.
    ///
    /// Records that arrive while the merge runs stay pending for the next
    /// commit. An empty buffer is a successful commit with zero checkpoints.
    ///
    /// # Errors
    /// Returns a [`CommitError`] naming the failed step. A failed drain or
    /// merge leaves the log untouched so the commit can be retried.
    #[instrument(skip(self))]
    pub fn commit(&self) -> Result<CommitSummary, CommitError> {
        let _in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let batch = self.buffer.drain_all().map_err(CommitError::Drain)?;
        if batch.is_empty() {
            info!("nothing pending; commit is a no-op");
            return Ok(CommitSummary::default());
        }

        let report = self.engine.process_batch(&batch).map_err(|e| {
            warn!(user = e.user(), error = %e, "merge aborted; pending log kept");
            CommitError::Merge(e)
        })?;
        self.buffer
            .reset_through(&batch)
            .map_err(CommitError::Reset)?;

        let summary = CommitSummary::from(report);
        info!(
            records = summary.records,
            checkpoints = summary.checkpoints,
            dropped_hunks = summary.dropped_hunks,
            skipped_edits = summary.skipped_edits,
            "commit complete"
        );
        Ok(summary)
    }
}
