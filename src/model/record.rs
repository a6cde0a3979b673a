//! Change records: the unit of ingestion.
//!
//! A [`ChangeRecord`] carries one author's *complete* view of one file at a
//! point in time. Records never contain diffs: the merge engine computes
//! them itself against the author's last known baseline.
//!
//! The serde layout is the wire and durable-log format (one JSON object per
//! line):
//!
//! ```json
//! {"id":"7f3a…","user_id":"alice","timestamp":"2024-05-01T12:00:00Z",
//!  "type":"file_edit","file_path":"src/lib.rs","content":"…"}
//! ```

use std::fmt;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Directory names a record may never write into.
///
/// `.git` is version-control metadata; `.tandem` holds the durable log and
/// configuration.
pub const RESERVED_DIRS: &[&str] = &[".git", ".tandem"];

// ---------------------------------------------------------------------------
// ChangeKind
// ---------------------------------------------------------------------------

/// What a record asks the server to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// A full-content snapshot of `file_path`.
    #[serde(rename = "file_edit")]
    Edit,
    /// A commit marker. Carried through the log but not applied; reserved
    /// for future commands.
    #[serde(rename = "commit")]
    CommitMarker,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Edit => write!(f, "file_edit"),
            Self::CommitMarker => write!(f, "commit"),
        }
    }
}

// ---------------------------------------------------------------------------
// ChangeRecord
// ---------------------------------------------------------------------------

/// One submitted full-content snapshot of a file, attributed to a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Globally unique record id (assigned by the client).
    pub id: String,
    /// The submitting user.
    #[serde(rename = "user_id")]
    pub user: String,
    /// When the client produced the snapshot.
    pub timestamp: DateTime<Utc>,
    /// Record kind.
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// Path relative to the working tree root. Required for edits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// The sender's complete view of the file.
    #[serde(default)]
    pub content: String,
    /// Extra parameters for command records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<String>,
}

impl ChangeRecord {
    /// Build an edit record stamped with the current time.
    #[must_use]
    pub fn edit(
        id: impl Into<String>,
        user: impl Into<String>,
        file_path: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            user: user.into(),
            timestamp: Utc::now(),
            kind: ChangeKind::Edit,
            file_path: Some(file_path.into()),
            content: content.into(),
            params: None,
        }
    }

    /// Build a commit-marker record stamped with the current time.
    #[must_use]
    pub fn commit_marker(id: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user: user.into(),
            timestamp: Utc::now(),
            kind: ChangeKind::CommitMarker,
            file_path: None,
            content: String::new(),
            params: None,
        }
    }

    /// Generate a fresh random record id (32 lowercase hex characters).
    #[must_use]
    pub fn new_id() -> String {
        format!("{:032x}", rand::random::<u128>())
    }

    /// Returns `true` if this record carries file content to apply.
    #[must_use]
    pub fn is_edit(&self) -> bool {
        self.kind == ChangeKind::Edit
    }

    /// Length of the record's JSON encoding, the unit the ingestion buffer
    /// budgets memory in.
    ///
    /// # Errors
    /// Returns an error if the record cannot be serialized.
    pub fn encoded_len(&self) -> Result<usize, serde_json::Error> {
        serde_json::to_vec(self).map(|bytes| bytes.len())
    }

    /// Validate a freshly pushed record before it is accepted.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] naming the offending field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_token(Field::Id, &self.id)?;
        validate_token(Field::User, &self.user)?;
        match (self.kind, self.file_path.as_deref()) {
            (ChangeKind::Edit, None) => Err(ValidationError {
                field: Field::FilePath,
                value: String::new(),
                reason: "file_edit records must name a file".to_owned(),
            }),
            (_, Some(path)) => checked_relative_path(path).map(|_| ()),
            (ChangeKind::CommitMarker, None) => Ok(()),
        }
    }
}

/// Validate `raw` as a path that stays inside the working tree.
///
/// Accepts plain relative paths (`src/lib.rs`, `./notes.md`). Rejects empty
/// paths, absolute paths, `..` components and anything under
/// [`RESERVED_DIRS`].
///
/// # Errors
/// Returns a [`ValidationError`] for the `file_path` field.
pub fn checked_relative_path(raw: &str) -> Result<PathBuf, ValidationError> {
    let reject = |reason: &str| ValidationError {
        field: Field::FilePath,
        value: raw.to_owned(),
        reason: reason.to_owned(),
    };

    let mut clean = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => {
                if RESERVED_DIRS.iter().any(|r| part == *r) {
                    return Err(reject("path enters a reserved directory"));
                }
                clean.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir => return Err(reject("path must not contain '..'")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(reject("path must be relative to the working tree"));
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(reject("path must name a file"));
    }
    Ok(clean)
}

fn validate_token(field: Field, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError {
            field,
            value: value.to_owned(),
            reason: "must not be empty".to_owned(),
        });
    }
    if value.chars().any(char::is_control) {
        return Err(ValidationError {
            field,
            value: value.to_owned(),
            reason: "must not contain control characters".to_owned(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// Which record field failed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    /// `id`
    Id,
    /// `user_id`
    User,
    /// `file_path`
    FilePath,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id => write!(f, "id"),
            Self::User => write!(f, "user_id"),
            Self::FilePath => write!(f, "file_path"),
        }
    }
}

/// A pushed record was rejected before reaching the buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// The offending field.
    pub field: Field,
    /// The invalid value.
    pub value: String,
    /// Human-readable explanation.
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?}: {}", self.field, self.value, self.reason)
    }
}

impl std::error::Error for ValidationError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
