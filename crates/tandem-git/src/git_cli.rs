//! A [`CheckpointBackend`] over a git working tree.
//!
//! Staging and committing shell out to the `git` binary so hooks, attributes
//! and index extensions behave exactly as they do for a human running the
//! same commands. gix is used read-only: to validate the working tree when
//! the backend is opened and to resolve the new `HEAD` after a checkpoint.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, instrument};

use crate::backend::CheckpointBackend;
use crate::error::BackendError;
use crate::types::{CheckpointId, CommitIdentity};

/// Git-backed checkpoints for a non-bare repository.
///
/// Construct via [`GitCliBackend::open`].
#[derive(Clone, Debug)]
pub struct GitCliBackend {
    workdir: PathBuf,
    git_dir: PathBuf,
    identity: Option<CommitIdentity>,
}

impl GitCliBackend {
    /// Open the git working tree rooted at `path`.
    ///
    /// # Errors
    /// Returns [`BackendError::NotARepository`] if `path` is not a git
    /// repository or is a bare repository.
    pub fn open(path: &Path) -> Result<Self, BackendError> {
        let repo = gix::open(path).map_err(|e| BackendError::NotARepository {
            path: path.to_owned(),
            message: e.to_string(),
        })?;
        let workdir = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| BackendError::NotARepository {
                path: path.to_owned(),
                message: "repository is bare; a working tree is required".to_owned(),
            })?;
        let git_dir = repo.git_dir().to_path_buf();
        Ok(Self {
            workdir,
            git_dir,
            identity: None,
        })
    }

    /// Author every checkpoint as `identity` instead of the configured user.
    #[must_use]
    pub fn with_identity(mut self, identity: CommitIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// The working tree root that `stage()` operates on.
    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Make sure `pattern` is listed in `.git/info/exclude`.
    ///
    /// Used to keep tandem's own state directory out of `git add -A`.
    ///
    /// # Errors
    /// Returns an I/O error if the exclude file cannot be read or written.
    pub fn ensure_excluded(&self, pattern: &str) -> Result<(), BackendError> {
        let info_dir = self.git_dir.join("info");
        let exclude = info_dir.join("exclude");
        let existing = match fs::read_to_string(&exclude) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        if existing.lines().any(|line| line.trim() == pattern) {
            return Ok(());
        }
        fs::create_dir_all(&info_dir)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&exclude)?;
        if !existing.is_empty() && !existing.ends_with('\n') {
            writeln!(file)?;
        }
        writeln!(file, "{pattern}")?;
        debug!(pattern, path = %exclude.display(), "added exclude pattern");
        Ok(())
    }

    /// Resolve the commit `HEAD` currently points at.
    ///
    /// # Errors
    /// Returns an error if the repository cannot be reopened or `HEAD` is
    /// unborn.
    pub fn head(&self) -> Result<CheckpointId, BackendError> {
        // Reopen so the ref store reflects commits made by the git binary.
        let repo = gix::open(&self.workdir).map_err(|e| BackendError::Other {
            message: e.to_string(),
        })?;
        let id = repo.head_id().map_err(|e| BackendError::Other {
            message: format!("cannot resolve HEAD: {e}"),
        })?;
        Ok(CheckpointId::new(id.detach().to_string()))
    }

    fn git(&self, args: &[&str]) -> Result<String, BackendError> {
        let mut cmd = Command::new("git");
        if let Some(identity) = &self.identity {
            cmd.arg("-c")
                .arg(format!("user.name={}", identity.name))
                .arg("-c")
                .arg(format!("user.email={}", identity.email));
        }
        let output = cmd.args(args).current_dir(&self.workdir).output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            let stderr = if stderr.is_empty() {
                String::from_utf8_lossy(&output.stdout).trim().to_owned()
            } else {
                stderr
            };
            return Err(BackendError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                exit_code: output.status.code(),
                stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl CheckpointBackend for GitCliBackend {
    #[instrument(skip(self), fields(workdir = %self.workdir.display()))]
    fn stage(&self) -> Result<(), BackendError> {
        self.git(&["add", "-A"])?;
        Ok(())
    }

    #[instrument(skip(self), fields(workdir = %self.workdir.display()))]
    fn checkpoint(&self, message: &str, allow_empty: bool) -> Result<CheckpointId, BackendError> {
        let mut args = vec!["commit", "--quiet"];
        if allow_empty {
            args.push("--allow-empty");
        }
        args.extend(["-m", message]);
        self.git(&args)?;
        let id = self.head()?;
        debug!(checkpoint = %id, "checkpoint created");
        Ok(id)
    }
}
