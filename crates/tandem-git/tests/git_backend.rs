//! Integration tests for [`GitCliBackend`] against real repositories.
//!
//! Each test creates an isolated temp repo with `git init`.

use std::path::Path;
use std::process::Command;

use tandem_git::{BackendError, CheckpointBackend, CommitIdentity, GitCliBackend};
use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) -> String {
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

fn setup_repo() -> TempDir {
    let dir = TempDir::new().expect("failed to create temp dir");
    git(dir.path(), &["init", "--quiet"]);
    git(dir.path(), &["config", "user.name", "Test"]);
    git(dir.path(), &["config", "user.email", "test@example.com"]);
    git(dir.path(), &["config", "commit.gpgsign", "false"]);
    dir
}

fn log_subjects(dir: &Path) -> Vec<String> {
    git(dir, &["log", "--reverse", "--format=%s"])
        .lines()
        .map(str::to_owned)
        .collect()
}

#[test]
fn stage_and_checkpoint_records_files() {
    let repo = setup_repo();
    std::fs::write(repo.path().join("a.txt"), "hello\n").unwrap();

    let backend = GitCliBackend::open(repo.path()).unwrap();
    backend.stage().unwrap();
    let id = backend.checkpoint("tandem update by alice", true).unwrap();

    assert_eq!(id.as_str().len(), 40);
    assert_eq!(git(repo.path(), &["rev-parse", "HEAD"]).trim(), id.as_str());
    assert_eq!(log_subjects(repo.path()), vec!["tandem update by alice"]);
    assert_eq!(git(repo.path(), &["show", "HEAD:a.txt"]), "hello\n");
}

#[test]
fn empty_checkpoint_is_allowed() {
    let repo = setup_repo();
    let backend = GitCliBackend::open(repo.path()).unwrap();

    backend.stage().unwrap();
    let first = backend.checkpoint("first", true).unwrap();
    backend.stage().unwrap();
    let second = backend.checkpoint("second", true).unwrap();

    assert_ne!(first, second);
    assert_eq!(log_subjects(repo.path()), vec!["first", "second"]);
}

#[test]
fn empty_checkpoint_without_allow_fails_loudly() {
    let repo = setup_repo();
    let backend = GitCliBackend::open(repo.path()).unwrap();
    backend.checkpoint("seed", true).unwrap();

    let err = backend.checkpoint("nothing staged", false).unwrap_err();
    match err {
        BackendError::CommandFailed { command, .. } => {
            assert!(command.starts_with("git commit"), "{command}");
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }
}

#[test]
fn identity_overrides_configured_author() {
    let repo = setup_repo();
    let backend = GitCliBackend::open(repo.path())
        .unwrap()
        .with_identity(CommitIdentity::new("Relay", "relay@example.com"));
    backend.checkpoint("by relay", true).unwrap();

    let author = git(repo.path(), &["log", "-1", "--format=%an <%ae>"]);
    assert_eq!(author.trim(), "Relay <relay@example.com>");
}

#[test]
fn ensure_excluded_is_idempotent() {
    let repo = setup_repo();
    let backend = GitCliBackend::open(repo.path()).unwrap();
    backend.ensure_excluded(".tandem/").unwrap();
    backend.ensure_excluded(".tandem/").unwrap();

    let exclude = std::fs::read_to_string(repo.path().join(".git/info/exclude")).unwrap();
    assert_eq!(exclude.lines().filter(|l| *l == ".tandem/").count(), 1);

    std::fs::create_dir_all(repo.path().join(".tandem")).unwrap();
    std::fs::write(repo.path().join(".tandem/pending.jsonl"), "{}\n").unwrap();
    backend.stage().unwrap();
    let staged = git(repo.path(), &["diff", "--cached", "--name-only"]);
    assert!(!staged.contains(".tandem"), "state dir was staged: {staged}");
}
