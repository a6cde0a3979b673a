//! Ingestion buffer: a durable, bounded-memory queue of change records.
//!
//! Producers call [`IngestionBuffer::enqueue`] and return quickly: records
//! land in an in-memory list and are appended to the [`DurableLog`] when
//! either
//!
//! - the approximate serialized size of buffered records reaches
//!   `max_buffer_bytes` (synchronous flush inside `enqueue`), or
//! - the periodic [`Flusher`] notices that `flush_interval` has elapsed since
//!   the last flush.
//!
//! The commit path calls [`IngestionBuffer::drain_all`] (force a flush, then
//! replay the whole log from the start) and, once the batch is merged,
//! [`IngestionBuffer::reset_through`] or [`IngestionBuffer::reset`].
//!
//! Every operation serializes through one mutex; the log is single-writer.
//! A sidecar lock file (`<log>.lock`, held with an fs4 advisory lock) keeps
//! a second process from opening the same log.

pub mod flusher;
pub mod log;

#[cfg(test)]
mod ordering_tests;

use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use fs4::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::model::ChangeRecord;

pub use flusher::Flusher;
pub use log::DurableLog;

/// Buffered bytes that force a synchronous flush (10 MiB).
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 10 * 1024 * 1024;

/// How often the periodic flusher runs.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Durability errors: the log could not be locked, written, or decoded.
#[derive(Debug)]
pub enum BufferError {
    /// Another process holds the log's lock file.
    Locked {
        /// The lock file.
        path: PathBuf,
    },

    /// A file system operation on the log failed.
    Io {
        /// What was being done (`"open"`, `"append to"`, ...).
        op: &'static str,
        /// The file involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A record could not be serialized.
    Encode(serde_json::Error),

    /// A log line is not a valid record.
    Decode {
        /// The log file.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// The line had no trailing newline (likely a torn write).
        truncated: bool,
        /// Underlying parse error.
        source: serde_json::Error,
    },

    /// The log no longer starts with the batch being acknowledged.
    BatchMismatch {
        /// Id of the first record that differs, if any.
        expected: String,
        /// Id found in the log at that position, if any.
        found: Option<String>,
    },
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locked { path } => write!(
                f,
                "pending log is locked by another process: {}\n  To fix: stop the other tandem server, or set log_path under [buffer] in the config file (.tandem/config.toml) to a different path.",
                path.display()
            ),
            Self::Io { op, path, source } => write!(
                f,
                "failed to {op} pending log {}: {source}\n  To fix: check file permissions and disk space.",
                path.display()
            ),
            Self::Encode(e) => write!(f, "failed to encode change record: {e}"),
            Self::Decode {
                path,
                line,
                truncated,
                source,
            } => {
                write!(
                    f,
                    "corrupt record at {}:{line}: {source}",
                    path.display()
                )?;
                if *truncated {
                    write!(f, " (line is truncated, probably an interrupted flush)")?;
                }
                write!(
                    f,
                    "\n  To fix: repair or remove the damaged line, then retry the commit."
                )
            }
            Self::BatchMismatch { expected, found } => write!(
                f,
                "pending log no longer starts with the drained batch: expected record {expected}, found {}\n  To fix: the batch is already checkpointed; check whether another process reset the log, then remove those records from it by hand.",
                found.as_deref().unwrap_or("end of log")
            ),
        }
    }
}

impl std::error::Error for BufferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Encode(e) | Self::Decode { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Options and stats
// ---------------------------------------------------------------------------

/// Where the buffer persists and when it flushes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferOptions {
    /// Path of the newline-delimited JSON log.
    pub log_path: PathBuf,
    /// Buffered bytes that trigger a synchronous flush.
    pub max_buffer_bytes: usize,
    /// Minimum time between periodic flushes.
    pub flush_interval: Duration,
}

impl BufferOptions {
    /// Default thresholds for a log at `log_path`.
    #[must_use]
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }

    /// Override the size threshold.
    #[must_use]
    pub const fn with_max_buffer_bytes(mut self, bytes: usize) -> Self {
        self.max_buffer_bytes = bytes;
        self
    }

    /// Override the periodic flush interval.
    #[must_use]
    pub const fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }
}

/// Snapshot of what the buffer is holding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingStats {
    /// Records in memory, not yet flushed.
    pub buffered_records: usize,
    /// Approximate serialized size of the in-memory records.
    pub buffered_bytes: usize,
    /// Size of the durable log file.
    pub log_bytes: u64,
}

// ---------------------------------------------------------------------------
// IngestionBuffer
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct BufferState {
    records: Vec<ChangeRecord>,
    bytes: usize,
    last_flush: Instant,
}

/// Durable, bounded-memory queue of [`ChangeRecord`]s.
#[derive(Debug)]
pub struct IngestionBuffer {
    log: DurableLog,
    max_buffer_bytes: usize,
    flush_interval: Duration,
    state: Mutex<BufferState>,
    _lock_file: File,
}

impl IngestionBuffer {
    /// Open (or create) the buffer's log and take its process lock.
    ///
    /// Records already in the log from a previous run are kept; they are
    /// part of the next drained batch.
    ///
    /// # Errors
    /// Returns [`BufferError::Locked`] if another process owns the log, or
    /// [`BufferError::Io`] if the directory or lock file cannot be created.
    pub fn open(options: BufferOptions) -> Result<Self, BufferError> {
        let log = DurableLog::new(options.log_path);
        if let Some(parent) = log.path().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| BufferError::Io {
                op: "create directory for",
                path: log.path().to_owned(),
                source,
            })?;
        }

        let lock_path = lock_path_for(log.path());
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|source| BufferError::Io {
                op: "open lock file for",
                path: lock_path.clone(),
                source,
            })?;
        FileExt::try_lock_exclusive(&lock_file)
            .map_err(|_| BufferError::Locked { path: lock_path })?;

        Ok(Self {
            log,
            max_buffer_bytes: options.max_buffer_bytes,
            flush_interval: options.flush_interval,
            state: Mutex::new(BufferState {
                records: Vec::new(),
                bytes: 0,
                last_flush: Instant::now(),
            }),
            _lock_file: lock_file,
        })
    }

    /// The durable log backing this buffer.
    #[must_use]
    pub const fn log(&self) -> &DurableLog {
        &self.log
    }

    /// Interval the periodic flusher should tick at.
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Queue one record.
    ///
    /// Flushes synchronously before returning when the buffered size reaches
    /// the threshold.
    ///
    /// # Errors
    /// Fails only if the record cannot be serialized or a triggered flush
    /// fails. On a failed flush the record stays buffered.
    pub fn enqueue(&self, record: ChangeRecord) -> Result<(), BufferError> {
        let size = record.encoded_len().map_err(BufferError::Encode)?;

        let mut state = self.lock();
        debug!(id = %record.id, user = %record.user, size, "record buffered");
        state.records.push(record);
        state.bytes += size;

        if state.bytes >= self.max_buffer_bytes {
            self.flush_locked(&mut state)?;
        }
        Ok(())
    }

    /// Flush whatever is buffered right now. Returns bytes written.
    ///
    /// # Errors
    /// Returns an error if the log cannot be written.
    pub fn flush_now(&self) -> Result<u64, BufferError> {
        let mut state = self.lock();
        self.flush_locked(&mut state)
    }

    /// Flush if records are buffered and the flush interval has elapsed
    /// since the last flush (as of `now`). Returns bytes written, or `None`
    /// if no flush was due.
    ///
    /// # Errors
    /// Returns an error if a due flush fails.
    pub fn flush_if_due(&self, now: Instant) -> Result<Option<u64>, BufferError> {
        let mut state = self.lock();
        let due = !state.records.is_empty()
            && now.saturating_duration_since(state.last_flush) >= self.flush_interval;
        if due {
            self.flush_locked(&mut state).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Force a flush, then read back every record in the log, oldest first.
    ///
    /// The whole log is replayed on every call; the result includes records
    /// drained by earlier calls that were never reset.
    ///
    /// # Errors
    /// Returns an error if the flush fails or a log line cannot be decoded.
    #[instrument(skip(self), fields(log = %self.log.path().display()))]
    pub fn drain_all(&self) -> Result<Vec<ChangeRecord>, BufferError> {
        let mut state = self.lock();
        self.flush_locked(&mut state)?;
        let records = self.log.read_all()?;
        debug!(records = records.len(), "drained pending log");
        Ok(records)
    }

    /// Drop everything: the in-memory buffer and the whole durable log.
    ///
    /// # Errors
    /// Returns an error if the log cannot be truncated.
    pub fn reset(&self) -> Result<(), BufferError> {
        let mut state = self.lock();
        state.records.clear();
        state.bytes = 0;
        self.log.truncate()
    }

    /// Acknowledge a merged batch: remove exactly `batch` from the head of
    /// the log.
    ///
    /// When nothing arrived since the batch was drained this is identical to
    /// [`reset`](Self::reset). Records pushed while the batch was being
    /// merged (in memory or already flushed behind it) are kept for the next
    /// commit.
    ///
    /// # Errors
    /// Returns [`BufferError::BatchMismatch`] if the log does not start with
    /// `batch` (someone reset it underneath the commit), or an I/O error.
    #[instrument(skip(self, batch), fields(batch = batch.len()))]
    pub fn reset_through(&self, batch: &[ChangeRecord]) -> Result<(), BufferError> {
        let state = self.lock();
        let logged = self.log.read_all()?;

        for (i, drained) in batch.iter().enumerate() {
            match logged.get(i) {
                Some(found) if found.id == drained.id => {}
                found => {
                    return Err(BufferError::BatchMismatch {
                        expected: drained.id.clone(),
                        found: found.map(|r| r.id.clone()),
                    });
                }
            }
        }

        let rest = &logged[batch.len()..];
        if rest.is_empty() {
            self.log.truncate()?;
        } else {
            self.log.rewrite(rest)?;
            info!(
                kept = rest.len(),
                "kept records that arrived during the commit"
            );
        }
        drop(state);
        Ok(())
    }

    /// Counts and sizes of what is pending.
    ///
    /// # Errors
    /// Returns an error if the log's metadata cannot be read.
    pub fn pending(&self) -> Result<PendingStats, BufferError> {
        let state = self.lock();
        Ok(PendingStats {
            buffered_records: state.records.len(),
            buffered_bytes: state.bytes,
            log_bytes: self.log.len_bytes()?,
        })
    }

    fn flush_locked(&self, state: &mut BufferState) -> Result<u64, BufferError> {
        if state.records.is_empty() {
            return Ok(0);
        }
        let written = self.log.append(&state.records)?;
        let count = state.records.len();
        state.records.clear();
        state.bytes = 0;
        state.last_flush = Instant::now();
        info!(bytes = written, records = count, "flushed {written} bytes");
        Ok(written)
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock_path_for(log: &Path) -> PathBuf {
    let mut name = log
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".lock");
    log.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rec(id: &str) -> ChangeRecord {
        ChangeRecord::edit(id, "alice", "a.txt", format!("content {id}\n"))
    }

    fn ids(records: &[ChangeRecord]) -> Vec<String> {
        records.iter().map(|r| r.id.clone()).collect()
    }

    fn open(dir: &TempDir) -> IngestionBuffer {
        IngestionBuffer::open(BufferOptions::new(dir.path().join("state/pending.jsonl"))).unwrap()
    }

    #[test]
    fn open_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let buffer = open(&dir);
        assert!(dir.path().join("state").is_dir());
        assert!(dir.path().join("state/pending.jsonl.lock").exists());
        assert_eq!(buffer.pending().unwrap(), PendingStats::default());
    }

    #[test]
    fn second_open_of_same_log_is_locked() {
        let dir = TempDir::new().unwrap();
        let _first = open(&dir);
        let err = IngestionBuffer::open(BufferOptions::new(dir.path().join("state/pending.jsonl")))
            .unwrap_err();
        assert!(matches!(err, BufferError::Locked { .. }), "{err}");
        let msg = err.to_string();
        assert!(msg.contains("[buffer]"), "{msg}");
        assert!(!msg.contains("--log"), "{msg}");
    }

    #[test]
    fn enqueue_stays_in_memory_below_threshold() {
        let dir = TempDir::new().unwrap();
        let buffer = open(&dir);
        buffer.enqueue(rec("1")).unwrap();
        buffer.enqueue(rec("2")).unwrap();

        let stats = buffer.pending().unwrap();
        assert_eq!(stats.buffered_records, 2);
        assert!(stats.buffered_bytes > 0);
        assert_eq!(stats.log_bytes, 0);
    }

    #[test]
    fn size_threshold_forces_flush() {
        let dir = TempDir::new().unwrap();
        let one = rec("1").encoded_len().unwrap();
        let buffer = IngestionBuffer::open(
            BufferOptions::new(dir.path().join("pending.jsonl")).with_max_buffer_bytes(one * 2),
        )
        .unwrap();

        buffer.enqueue(rec("1")).unwrap();
        assert_eq!(buffer.pending().unwrap().log_bytes, 0);
        buffer.enqueue(rec("2")).unwrap();

        let stats = buffer.pending().unwrap();
        assert_eq!(stats.buffered_records, 0);
        assert_eq!(stats.buffered_bytes, 0);
        assert!(stats.log_bytes > 0);
        assert_eq!(ids(&buffer.log().read_all().unwrap()), vec!["1", "2"]);
    }

    #[test]
    fn flush_if_due_respects_interval() {
        let dir = TempDir::new().unwrap();
        let buffer = IngestionBuffer::open(
            BufferOptions::new(dir.path().join("pending.jsonl"))
                .with_flush_interval(Duration::from_secs(60)),
        )
        .unwrap();
        buffer.enqueue(rec("1")).unwrap();

        assert_eq!(buffer.flush_if_due(Instant::now()).unwrap(), None);
        let later = Instant::now() + Duration::from_secs(61);
        assert!(buffer.flush_if_due(later).unwrap().is_some());
        assert_eq!(buffer.pending().unwrap().buffered_records, 0);
    }

    #[test]
    fn flush_if_due_skips_empty_buffer() {
        let dir = TempDir::new().unwrap();
        let buffer = open(&dir);
        let later = Instant::now() + Duration::from_secs(3600);
        assert_eq!(buffer.flush_if_due(later).unwrap(), None);
        assert_eq!(buffer.pending().unwrap().log_bytes, 0);
    }

    #[test]
    fn drain_returns_memory_and_log_in_order() {
        let dir = TempDir::new().unwrap();
        let buffer = open(&dir);
        buffer.enqueue(rec("1")).unwrap();
        buffer.flush_now().unwrap();
        buffer.enqueue(rec("2")).unwrap();
        buffer.enqueue(rec("3")).unwrap();

        assert_eq!(ids(&buffer.drain_all().unwrap()), vec!["1", "2", "3"]);
    }

    #[test]
    fn drain_is_repeatable() {
        let dir = TempDir::new().unwrap();
        let buffer = open(&dir);
        buffer.enqueue(rec("1")).unwrap();
        buffer.enqueue(rec("2")).unwrap();

        let first = buffer.drain_all().unwrap();
        let second = buffer.drain_all().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn reset_then_drain_is_empty() {
        let dir = TempDir::new().unwrap();
        let buffer = open(&dir);
        buffer.enqueue(rec("1")).unwrap();
        buffer.flush_now().unwrap();
        buffer.enqueue(rec("2")).unwrap();

        buffer.reset().unwrap();
        assert!(buffer.drain_all().unwrap().is_empty());
        assert_eq!(buffer.pending().unwrap(), PendingStats::default());
    }

    #[test]
    fn reset_through_keeps_late_arrivals() {
        let dir = TempDir::new().unwrap();
        let buffer = open(&dir);
        buffer.enqueue(rec("1")).unwrap();
        buffer.enqueue(rec("2")).unwrap();
        let batch = buffer.drain_all().unwrap();

        buffer.enqueue(rec("3")).unwrap();
        buffer.flush_now().unwrap();
        buffer.enqueue(rec("4")).unwrap();

        buffer.reset_through(&batch).unwrap();
        assert_eq!(ids(&buffer.drain_all().unwrap()), vec!["3", "4"]);
    }

    #[test]
    fn reset_through_whole_log_truncates() {
        let dir = TempDir::new().unwrap();
        let buffer = open(&dir);
        buffer.enqueue(rec("1")).unwrap();
        let batch = buffer.drain_all().unwrap();
        buffer.reset_through(&batch).unwrap();
        assert_eq!(buffer.pending().unwrap().log_bytes, 0);
    }

    #[test]
    fn reset_through_detects_foreign_reset() {
        let dir = TempDir::new().unwrap();
        let buffer = open(&dir);
        buffer.enqueue(rec("1")).unwrap();
        let batch = buffer.drain_all().unwrap();
        buffer.reset().unwrap();
        buffer.enqueue(rec("9")).unwrap();
        buffer.flush_now().unwrap();

        let err = buffer.reset_through(&batch).unwrap_err();
        match &err {
            BufferError::BatchMismatch { expected, found } => {
                assert_eq!(expected, "1");
                assert_eq!(found.as_deref(), Some("9"));
            }
            other => panic!("expected BatchMismatch, got {other:?}"),
        }
        assert!(err.to_string().contains("To fix"), "{err}");
    }

    #[test]
    fn reopen_sees_previous_log() {
        let dir = TempDir::new().unwrap();
        {
            let buffer = open(&dir);
            buffer.enqueue(rec("1")).unwrap();
            buffer.flush_now().unwrap();
        }
        let buffer = open(&dir);
        assert_eq!(ids(&buffer.drain_all().unwrap()), vec!["1"]);
    }

    #[test]
    fn decode_error_message_is_actionable() {
        let dir = TempDir::new().unwrap();
        let buffer = open(&dir);
        std::fs::write(buffer.log().path(), "not json\n").unwrap();
        let msg = buffer.drain_all().unwrap_err().to_string();
        assert!(msg.contains(":1"), "{msg}");
        assert!(msg.contains("To fix"), "{msg}");
    }
}
