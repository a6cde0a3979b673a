//! Value types shared by backend implementations.

use std::fmt;

// ---------------------------------------------------------------------------
// CheckpointId
// ---------------------------------------------------------------------------

/// Identity of a recorded checkpoint.
///
/// For git this is the 40-character hex id of the new commit. Other
/// backends are free to use any stable, printable identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CheckpointId(String);

impl CheckpointId {
    /// Wrap a backend-specific identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// CommitIdentity
// ---------------------------------------------------------------------------

/// Author/committer identity used for checkpoints.
///
/// When unset, git falls back to the repository or global configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitIdentity {
    /// Display name (`user.name`).
    pub name: String,
    /// Email address (`user.email`).
    pub email: String,
}

impl CommitIdentity {
    /// Create an identity from a name and email.
    #[must_use]
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

impl fmt::Display for CommitIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}
