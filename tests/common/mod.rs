//! Shared test helpers for tandem integration tests.
//!
//! All tests use temp directories; nothing touches the real repository.
//! Merge and commit tests run against [`RecordingBackend`]; end-to-end tests
//! get a real repository from [`setup_git_repo`].

#![allow(dead_code)]

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use tandem::buffer::BufferOptions;
use tandem::merge::MergeEngine;
use tandem::model::ChangeRecord;
use tandem::relay::state_dir;
use tandem::Relay;
use tandem_git::RecordingBackend;
use tempfile::TempDir;

/// A working tree plus a merge engine over a recording backend.
pub struct EngineFixture {
    pub dir: TempDir,
    pub backend: Arc<RecordingBackend>,
    pub engine: MergeEngine,
}

impl EngineFixture {
    pub fn new() -> Self {
        Self::with_backend(RecordingBackend::new())
    }

    pub fn with_backend(backend: RecordingBackend) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let backend = Arc::new(backend);
        let engine = MergeEngine::new(dir.path(), Arc::<RecordingBackend>::clone(&backend));
        Self {
            dir,
            backend,
            engine,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, rel: &str, content: &str) {
        write(self.root(), rel, content);
    }

    pub fn read(&self, rel: &str) -> String {
        read(self.root(), rel)
    }
}

/// A relay over a recording backend, rooted in a temp dir.
pub struct RelayFixture {
    pub dir: TempDir,
    pub backend: Arc<RecordingBackend>,
    pub relay: Arc<Relay>,
}

impl RelayFixture {
    pub fn new() -> Self {
        Self::with_backend(RecordingBackend::new())
    }

    pub fn with_backend(backend: RecordingBackend) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let backend = Arc::new(backend);
        let relay = Relay::with_backend(
            BufferOptions::new(state_dir(dir.path()).join("pending_diffs.jsonl")),
            dir.path(),
            Arc::<RecordingBackend>::clone(&backend),
        )
        .expect("failed to open relay");
        Self {
            dir,
            backend,
            relay: Arc::new(relay),
        }
    }

    pub fn read(&self, rel: &str) -> String {
        read(self.dir.path(), rel)
    }
}

/// An edit record with a deterministic id.
pub fn edit(id: &str, user: &str, path: &str, content: &str) -> ChangeRecord {
    ChangeRecord::edit(id, user, path, content)
}

pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

pub fn read(root: &Path, rel: &str) -> String {
    std::fs::read_to_string(root.join(rel))
        .unwrap_or_else(|e| panic!("cannot read {rel}: {e}"))
}

/// Run git in `dir`, asserting success. Returns stdout.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        out.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).into_owned()
}

/// A fresh git repository with an identity configured and signing off.
pub fn setup_git_repo() -> TempDir {
    let dir = TempDir::new().expect("failed to create temp dir");
    git(dir.path(), &["init", "--quiet"]);
    git(dir.path(), &["config", "user.name", "Test"]);
    git(dir.path(), &["config", "user.email", "test@example.com"]);
    git(dir.path(), &["config", "commit.gpgsign", "false"]);
    dir
}

/// Commit subjects, oldest first.
pub fn log_subjects(dir: &Path) -> Vec<String> {
    git(dir, &["log", "--reverse", "--format=%s"])
        .lines()
        .map(str::to_owned)
        .collect()
}
