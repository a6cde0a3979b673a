//! The append-only durable log behind the ingestion buffer.
//!
//! Format: newline-delimited JSON, one [`ChangeRecord`] per line, in arrival
//! order. Appends are a single `write_all` of pre-encoded lines followed by
//! `sync_data`, but the log is not a WAL: a crash mid-write can leave a
//! truncated final line, which [`DurableLog::read_all`] reports rather than
//! silently skipping.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::model::ChangeRecord;

use super::BufferError;

/// Handle to the newline-delimited JSON log file.
#[derive(Clone, Debug)]
pub struct DurableLog {
    path: PathBuf,
}

impl DurableLog {
    /// A log stored at `path`. The file is created lazily on first append.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `records` as one line each. Returns the number of bytes written.
    ///
    /// Every record is encoded before the file is touched, so a
    /// serialization failure never leaves a partial write behind.
    ///
    /// # Errors
    /// Returns [`BufferError::Encode`] if a record cannot be serialized, or
    /// [`BufferError::Io`] if the file cannot be opened or written.
    pub fn append(&self, records: &[ChangeRecord]) -> Result<u64, BufferError> {
        if records.is_empty() {
            return Ok(0);
        }
        let payload = encode_lines(records)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io("open", e))?;
        file.write_all(&payload).map_err(|e| self.io("append to", e))?;
        file.sync_data().map_err(|e| self.io("sync", e))?;

        Ok(payload.len() as u64)
    }

    /// Decode every record in file order. A missing file is an empty log.
    ///
    /// Blank lines are skipped.
    ///
    /// # Errors
    /// Returns [`BufferError::Decode`] with the 1-based line number of the
    /// first line that is not a valid record.
    pub fn read_all(&self) -> Result<Vec<ChangeRecord>, BufferError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io("open", e)),
        };

        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut line = String::new();
        let mut line_no = 0;
        loop {
            line.clear();
            let n = reader
                .read_line(&mut line)
                .map_err(|e| self.io("read", e))?;
            if n == 0 {
                break;
            }
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|source| BufferError::Decode {
                path: self.path.clone(),
                line: line_no,
                truncated: !line.ends_with('\n'),
                source,
            })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Truncate the log to empty. A missing file is already empty.
    ///
    /// # Errors
    /// Returns [`BufferError::Io`] if the file exists but cannot be truncated.
    pub fn truncate(&self) -> Result<(), BufferError> {
        match OpenOptions::new().write(true).open(&self.path) {
            Ok(file) => file.set_len(0).map_err(|e| self.io("truncate", e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io("open", e)),
        }
    }

    /// Replace the log's contents with `records` via write-to-temp + rename.
    ///
    /// # Errors
    /// Returns an error if encoding, writing or renaming fails.
    pub fn rewrite(&self, records: &[ChangeRecord]) -> Result<(), BufferError> {
        let payload = encode_lines(records)?;
        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut file = File::create(&tmp).map_err(|e| self.io("create", e))?;
            file.write_all(&payload).map_err(|e| self.io("write", e))?;
            file.sync_data().map_err(|e| self.io("sync", e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| self.io("replace", e))
    }

    /// Current size of the log file in bytes (0 if it does not exist).
    ///
    /// # Errors
    /// Returns [`BufferError::Io`] if the file metadata cannot be read.
    pub fn len_bytes(&self) -> Result<u64, BufferError> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(self.io("stat", e)),
        }
    }

    fn io(&self, op: &'static str, source: std::io::Error) -> BufferError {
        BufferError::Io {
            op,
            path: self.path.clone(),
            source,
        }
    }
}

fn encode_lines(records: &[ChangeRecord]) -> Result<Vec<u8>, BufferError> {
    let mut payload = Vec::new();
    for record in records {
        serde_json::to_writer(&mut payload, record).map_err(BufferError::Encode)?;
        payload.push(b'\n');
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rec(id: &str) -> ChangeRecord {
        ChangeRecord::edit(id, "alice", "a.txt", format!("content {id}\n"))
    }

    fn ids(records: &[ChangeRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let log = DurableLog::new(dir.path().join("pending.jsonl"));
        assert!(log.read_all().unwrap().is_empty());
        assert_eq!(log.len_bytes().unwrap(), 0);
        log.truncate().unwrap();
    }

    #[test]
    fn append_then_read_preserves_order() {
        let dir = TempDir::new().unwrap();
        let log = DurableLog::new(dir.path().join("pending.jsonl"));
        let written = log.append(&[rec("1"), rec("2")]).unwrap();
        log.append(&[rec("3")]).unwrap();

        assert!(written > 0);
        assert_eq!(ids(&log.read_all().unwrap()), vec!["1", "2", "3"]);
        let raw = fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.lines().count(), 3);
        assert!(raw.ends_with('\n'));
    }

    #[test]
    fn content_with_newlines_stays_on_one_line() {
        let dir = TempDir::new().unwrap();
        let log = DurableLog::new(dir.path().join("pending.jsonl"));
        let mut record = rec("1");
        record.content = "a\nb\r\nc\n".to_owned();
        log.append(std::slice::from_ref(&record)).unwrap();

        let raw = fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.lines().count(), 1);
        assert_eq!(log.read_all().unwrap(), vec![record]);
    }

    #[test]
    fn truncated_tail_is_reported_with_line_number() {
        let dir = TempDir::new().unwrap();
        let log = DurableLog::new(dir.path().join("pending.jsonl"));
        log.append(&[rec("1")]).unwrap();
        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        file.write_all(br#"{"id":"2","user_id":"al"#).unwrap();

        match log.read_all().unwrap_err() {
            BufferError::Decode {
                line, truncated, ..
            } => {
                assert_eq!(line, 2);
                assert!(truncated);
            }
            other => panic!("expected Decode, got {other:?}"),
        }
    }

    #[test]
    fn blank_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let log = DurableLog::new(dir.path().join("pending.jsonl"));
        log.append(&[rec("1")]).unwrap();
        fs::write(
            log.path(),
            format!("\n{}\n", fs::read_to_string(log.path()).unwrap()),
        )
        .unwrap();
        assert_eq!(ids(&log.read_all().unwrap()), vec!["1"]);
    }

    #[test]
    fn truncate_empties_the_log() {
        let dir = TempDir::new().unwrap();
        let log = DurableLog::new(dir.path().join("pending.jsonl"));
        log.append(&[rec("1"), rec("2")]).unwrap();
        log.truncate().unwrap();
        assert!(log.read_all().unwrap().is_empty());
        assert_eq!(log.len_bytes().unwrap(), 0);
    }

    #[test]
    fn rewrite_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let log = DurableLog::new(dir.path().join("pending.jsonl"));
        log.append(&[rec("1"), rec("2"), rec("3")]).unwrap();
        log.rewrite(&[rec("3")]).unwrap();
        assert_eq!(ids(&log.read_all().unwrap()), vec!["3"]);
        assert!(!dir.path().join("pending.jsonl.tmp").exists());
    }
}
