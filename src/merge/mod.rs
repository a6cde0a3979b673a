//! Batch merge engine.
//!
//! Replays a drained batch onto the working tree, one group of consecutive
//! same-user records at a time, and asks the checkpoint backend for one
//! checkpoint per group.
//!
//! # Reconciliation
//!
//! For every edit the engine diffs the author's baseline against the
//! submitted content and patches the result onto the file as it is *now*
//! ([`patch`]). The baseline is what that author last submitted for the file
//! in this batch, or else the file's content when the batch first touched it
//! ([`session`]).
//!
//! That fallback is an approximation: an author with no earlier edit in the
//! batch always diffs from the pre-batch content, never from what earlier
//! groups produced. It is exact for sequential authorship and best effort
//! when two people really did edit concurrently.
//!
//! # Failure
//!
//! An edit aimed at a file that is not valid UTF-8 is skipped with a warning
//! and counted; the file is left as it is. Any other I/O error, or a backend
//! error, aborts the rest of the batch. Groups already
//! checkpointed stay checkpointed; nothing is rolled back.

pub mod patch;
pub mod session;


use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tandem_git::{BackendError, CheckpointBackend, CheckpointId};
use tracing::{debug, info, instrument, warn};

use crate::model::{ChangeRecord, Group, checked_relative_path, group_by_user};

pub use patch::{Patch, PatchOutcome};
pub use session::MergeSession;

/// Prefix of every checkpoint message; the group's user id follows.
pub const CHECKPOINT_PREFIX: &str = "tandem update by";

/// Checkpoint message for a group authored by `user`.
#[must_use]
pub fn checkpoint_message(user: &str) -> String {
    format!("{CHECKPOINT_PREFIX} {user}")
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// A batch could not be fully merged.
#[derive(Debug)]
pub enum MergeError {
    /// Reading or writing a working-tree file failed.
    Io {
        /// The group's user.
        user: String,
        /// The file involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A logged record names a path outside the working tree.
    UnsafePath {
        /// The group's user.
        user: String,
        /// The offending record id.
        record: String,
        /// Why the path was refused.
        reason: String,
    },

    /// Staging or checkpointing failed.
    Backend {
        /// The group's user.
        user: String,
        /// Underlying error.
        source: BackendError,
    },
}

impl MergeError {
    /// The user whose group failed.
    #[must_use]
    pub fn user(&self) -> &str {
        match self {
            Self::Io { user, .. } | Self::UnsafePath { user, .. } | Self::Backend { user, .. } => {
                user
            }
        }
    }
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { user, path, source } => write!(
                f,
                "merging changes by {user}: cannot update {}: {source}\n  To fix: check permissions on the working tree, then retry the commit.",
                path.display()
            ),
            Self::UnsafePath {
                user,
                record,
                reason,
            } => write!(
                f,
                "merging changes by {user}: record {record} refused: {reason}\n  To fix: remove the record from the pending log, then retry the commit."
            ),
            Self::Backend { user, source } => write!(
                f,
                "checkpoint for {user} failed: {source}\n  To fix: resolve the repository problem; pending records are kept and the commit can be retried."
            ),
        }
    }
}

impl std::error::Error for MergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Backend { source, .. } => Some(source),
            Self::UnsafePath { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of one group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupReport {
    /// The group's user.
    pub user: String,
    /// Records in the group, commit markers included.
    pub records: usize,
    /// Edit records written to the working tree.
    pub edits_applied: usize,
    /// Hunks that could not be located and were skipped.
    pub dropped_hunks: usize,
    /// Edit records skipped because the file on disk is not UTF-8 text.
    pub skipped_edits: usize,
    /// The checkpoint created for the group.
    pub checkpoint: CheckpointId,
}

/// Outcome of one batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Records in the batch.
    pub records: usize,
    /// One entry per group, in batch order.
    pub groups: Vec<GroupReport>,
}

impl MergeReport {
    /// Checkpoints created (always one per group).
    #[must_use]
    pub fn checkpoints(&self) -> usize {
        self.groups.len()
    }

    /// Total hunks dropped across the batch.
    #[must_use]
    pub fn dropped_hunks(&self) -> usize {
        self.groups.iter().map(|g| g.dropped_hunks).sum()
    }

    /// Total edit records skipped across the batch.
    #[must_use]
    pub fn skipped_edits(&self) -> usize {
        self.groups.iter().map(|g| g.skipped_edits).sum()
    }
}

/// What happened to one edit record.
enum EditOutcome {
    Written { dropped_hunks: usize },
    Skipped,
}

// ---------------------------------------------------------------------------
// MergeEngine
// ---------------------------------------------------------------------------

/// Writes batches into a working tree and checkpoints them.
pub struct MergeEngine {
    root: PathBuf,
    backend: Arc<dyn CheckpointBackend>,
}

impl fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeEngine")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl MergeEngine {
    /// An engine writing under `root` and checkpointing through `backend`.
    pub fn new(root: impl Into<PathBuf>, backend: Arc<dyn CheckpointBackend>) -> Self {
        Self {
            root: root.into(),
            backend,
        }
    }

    /// The working tree root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Merge `batch` into the working tree, one checkpoint per group.
    ///
    /// An empty batch does nothing and creates no checkpoints.
    ///
    /// # Errors
    /// Returns the first [`MergeError`]; later groups are not processed and
    /// earlier checkpoints remain.
    #[instrument(skip_all, fields(records = batch.len(), root = %self.root.display()))]
    pub fn process_batch(&self, batch: &[ChangeRecord]) -> Result<MergeReport, MergeError> {
        let mut session = MergeSession::new();
        let mut report = MergeReport {
            records: batch.len(),
            groups: Vec::new(),
        };

        for group in group_by_user(batch) {
            let group_report = self.process_group(&mut session, &group)?;
            info!(
                user = %group_report.user,
                checkpoint = %group_report.checkpoint,
                edits = group_report.edits_applied,
                dropped_hunks = group_report.dropped_hunks,
                "checkpoint created"
            );
            report.groups.push(group_report);
        }
        Ok(report)
    }

    fn process_group(
        &self,
        session: &mut MergeSession,
        group: &Group<'_>,
    ) -> Result<GroupReport, MergeError> {
        let user = group.user();
        let mut edits_applied = 0;
        let mut dropped_hunks = 0;
        let mut skipped_edits = 0;

        for record in group.records().iter().filter(|r| r.is_edit()) {
            match self.apply_edit(session, record)? {
                EditOutcome::Written { dropped_hunks: n } => {
                    dropped_hunks += n;
                    edits_applied += 1;
                }
                EditOutcome::Skipped => skipped_edits += 1,
            }
        }

        let backend_err = |source| MergeError::Backend {
            user: user.to_owned(),
            source,
        };
        self.backend.stage().map_err(backend_err)?;
        let checkpoint = self
            .backend
            .checkpoint(&checkpoint_message(user), true)
            .map_err(backend_err)?;

        Ok(GroupReport {
            user: user.to_owned(),
            records: group.len(),
            edits_applied,
            dropped_hunks,
            skipped_edits,
            checkpoint,
        })
    }

    /// Apply one edit record.
    fn apply_edit(
        &self,
        session: &mut MergeSession,
        record: &ChangeRecord,
    ) -> Result<EditOutcome, MergeError> {
        let user = record.user.as_str();
        let relative = record
            .file_path
            .as_deref()
            .ok_or_else(|| "file_edit record has no file_path".to_owned())
            .and_then(|raw| checked_relative_path(raw).map_err(|e| e.to_string()))
            .map_err(|reason| MergeError::UnsafePath {
                user: user.to_owned(),
                record: record.id.clone(),
                reason,
            })?;
        let path = self.root.join(&relative);
        let io_err = |source| MergeError::Io {
            user: user.to_owned(),
            path: path.clone(),
            source,
        };

        let master = match fs::read(&path) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => {
                    warn!(
                        user,
                        path = %relative.display(),
                        record = %record.id,
                        error = %e.utf8_error(),
                        "file is not UTF-8 text; edit skipped"
                    );
                    return Ok(EditOutcome::Skipped);
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(io_err(e)),
        };
        session.capture_original(&relative, &master);

        let baseline = session.baseline_for(user, &relative);
        let outcome = Patch::compute(baseline, &record.content).apply(&master);
        if outcome.dropped > 0 {
            warn!(
                user,
                path = %relative.display(),
                record = %record.id,
                dropped = outcome.dropped,
                applied = outcome.applied,
                "some hunks could not be located and were dropped"
            );
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&path, &outcome.text).map_err(io_err)?;
        debug!(
            user,
            path = %relative.display(),
            record = %record.id,
            bytes = outcome.text.len(),
            "edit applied"
        );

        session.record_authored(user, &relative, &record.content);
        Ok(EditOutcome::Written {
            dropped_hunks: outcome.dropped,
        })
    }
}
