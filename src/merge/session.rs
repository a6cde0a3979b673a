//! Per-batch merge state: original file contents and per-user baselines.
//!
//! A [`MergeSession`] lives for exactly one batch and is then discarded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// What the merge engine remembers while replaying one batch.
#[derive(Debug, Default)]
pub struct MergeSession {
    /// On-disk content of each file the first time the batch touched it.
    originals: HashMap<PathBuf, String>,
    /// Content each user last authored for each file in this batch.
    baselines: HashMap<String, HashMap<PathBuf, String>>,
}

impl MergeSession {
    /// An empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `master` as the original content of `path` unless the batch
    /// has already seen the file.
    pub fn capture_original(&mut self, path: &Path, master: &str) {
        if !self.originals.contains_key(path) {
            self.originals.insert(path.to_owned(), master.to_owned());
        }
    }

    /// The original content captured for `path`, if any.
    #[must_use]
    pub fn original(&self, path: &Path) -> Option<&str> {
        self.originals.get(path).map(String::as_str)
    }

    /// The text `user`'s next edit of `path` is diffed against.
    ///
    /// This is what the user last authored in the batch, or else the file's
    /// original content. A user who has not touched the file yet always
    /// starts from the pre-batch original, even when earlier groups have
    /// since changed it; their edit is then patched onto the current file.
    #[must_use]
    pub fn baseline_for(&self, user: &str, path: &Path) -> &str {
        self.baselines
            .get(user)
            .and_then(|files| files.get(path))
            .or_else(|| self.originals.get(path))
            .map_or("", String::as_str)
    }

    /// Remember `content` as what `user` last authored for `path`.
    pub fn record_authored(&mut self, user: &str, path: &Path, content: &str) {
        self.baselines
            .entry(user.to_owned())
            .or_default()
            .insert(path.to_owned(), content.to_owned());
    }
}
