//! The relay: one ingestion buffer and one commit coordinator, wired to a
//! working tree.
//!
//! This is the handle the HTTP server shares between requests. It owns no
//! threads; `tandem serve` starts the periodic [`Flusher`] next to it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tandem_git::{CheckpointBackend, CommitIdentity, GitCliBackend};
use tracing::{debug, info};

use crate::buffer::{BufferOptions, Flusher, IngestionBuffer, PendingStats};
use crate::commit::{CommitCoordinator, CommitSummary};
use crate::config::{STATE_DIR, TandemConfig};
use crate::error::TandemError;
use crate::merge::MergeEngine;
use crate::model::ChangeRecord;

/// Shared state behind the push, commit and status endpoints.
#[derive(Debug)]
pub struct Relay {
    buffer: Arc<IngestionBuffer>,
    commits: CommitCoordinator,
}

impl Relay {
    /// Open the relay for the git working tree configured in `config`.
    ///
    /// Validates the repository, keeps the state directory out of git, opens
    /// (and locks) the pending log and replays nothing: records left from a
    /// previous run are committed with the next batch.
    ///
    /// # Errors
    /// Fails if the path is not a git working tree or the pending log is
    /// locked or unwritable.
    pub fn open(config: &TandemConfig) -> Result<Self, TandemError> {
        let mut git = GitCliBackend::open(&config.repo.path)?;
        if let Some((name, email)) = config.repo.identity() {
            git = git.with_identity(CommitIdentity::new(name, email));
        }
        git.ensure_excluded(&format!("{STATE_DIR}/"))?;

        let root = git.workdir().to_path_buf();
        let options = config.buffer.options(&state_dir(&root));
        info!(
            root = %root.display(),
            log = %options.log_path.display(),
            "opening relay"
        );
        Self::with_backend(options, root, Arc::new(git))
    }

    /// Open a relay over an arbitrary checkpoint backend.
    ///
    /// # Errors
    /// Fails if the pending log cannot be opened or locked.
    pub fn with_backend(
        options: BufferOptions,
        root: impl Into<PathBuf>,
        backend: Arc<dyn CheckpointBackend>,
    ) -> Result<Self, TandemError> {
        let buffer = Arc::new(IngestionBuffer::open(options)?);
        let engine = MergeEngine::new(root, backend);
        Ok(Self {
            commits: CommitCoordinator::new(Arc::clone(&buffer), engine),
            buffer,
        })
    }

    /// The ingestion buffer.
    #[must_use]
    pub const fn buffer(&self) -> &Arc<IngestionBuffer> {
        &self.buffer
    }

    /// Start the periodic flusher for this relay's buffer.
    ///
    /// # Errors
    /// Fails if the flusher thread cannot be spawned.
    pub fn start_flusher(&self) -> Result<Flusher, TandemError> {
        Ok(Flusher::start(Arc::clone(&self.buffer))?)
    }

    /// Validate and enqueue one record.
    ///
    /// # Errors
    /// Returns [`TandemError::Validation`] for a malformed record, or a
    /// buffer error if a triggered flush fails.
    pub fn push(&self, record: ChangeRecord) -> Result<(), TandemError> {
        record.validate()?;
        debug!(id = %record.id, user = %record.user, kind = %record.kind, "push accepted");
        self.buffer.enqueue(record)?;
        Ok(())
    }

    /// Commit everything pending.
    ///
    /// # Errors
    /// Returns [`TandemError::Commit`] naming the failed step.
    pub fn commit(&self) -> Result<CommitSummary, TandemError> {
        Ok(self.commits.commit()?)
    }

    /// Counts and sizes of what is pending.
    ///
    /// # Errors
    /// Fails if the log's metadata cannot be read.
    pub fn pending(&self) -> Result<PendingStats, TandemError> {
        Ok(self.buffer.pending()?)
    }

    /// Persist everything buffered. Called on shutdown.
    ///
    /// # Errors
    /// Fails if the log cannot be written.
    pub fn flush(&self) -> Result<u64, TandemError> {
        Ok(self.buffer.flush_now()?)
    }
}

/// Tandem's state directory for the working tree at `root`.
#[must_use]
pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_git::RecordingBackend;
    use tempfile::TempDir;

    fn relay(dir: &TempDir) -> Relay {
        Relay::with_backend(
            BufferOptions::new(state_dir(dir.path()).join("pending.jsonl")),
            dir.path(),
            Arc::new(RecordingBackend::new()),
        )
        .unwrap()
    }

    #[test]
    fn invalid_push_never_reaches_the_buffer() {
        let dir = TempDir::new().unwrap();
        let relay = relay(&dir);
        let err = relay
            .push(ChangeRecord::edit("1", "alice", "../escape.txt", "x"))
            .unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(relay.pending().unwrap().buffered_records, 0);
    }

    #[test]
    fn push_commit_round() {
        let dir = TempDir::new().unwrap();
        let relay = relay(&dir);
        relay
            .push(ChangeRecord::edit("1", "alice", "notes.md", "hello\n"))
            .unwrap();
        assert_eq!(relay.pending().unwrap().buffered_records, 1);

        let summary = relay.commit().unwrap();
        assert_eq!(summary.checkpoints, 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("notes.md")).unwrap(),
            "hello\n"
        );
        assert_eq!(relay.pending().unwrap(), PendingStats::default());
    }

    #[test]
    fn open_rejects_non_repository() {
        let dir = TempDir::new().unwrap();
        let mut config = TandemConfig::default();
        config.repo.path = dir.path().to_path_buf();
        assert!(matches!(
            Relay::open(&config),
            Err(TandemError::Backend(_))
        ));
    }

    #[test]
    fn second_relay_on_same_log_is_locked_out() {
        let dir = TempDir::new().unwrap();
        let _first = relay(&dir);
        let second = Relay::with_backend(
            BufferOptions::new(state_dir(dir.path()).join("pending.jsonl")),
            dir.path(),
            Arc::new(RecordingBackend::new()),
        );
        assert!(matches!(
            second,
            Err(TandemError::Buffer(crate::buffer::BufferError::Locked { .. }))
        ));
    }
}
