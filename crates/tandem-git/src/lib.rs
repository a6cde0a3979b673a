//! Checkpoint backend for tandem.
//!
//! The merge engine never talks to git directly. It programs against the
//! [`CheckpointBackend`] trait, which exposes exactly the two primitives the
//! replay loop needs: stage every pending working-tree change, then record a
//! checkpoint (a commit) that may be empty.
//!
//! # Crate layout
//!
//! - [`backend`]: the [`CheckpointBackend`] trait.
//! - [`git_cli`]: [`GitCliBackend`], a git working tree driven through the
//!   `git` binary, validated and inspected with gix.
//! - [`memory`]: [`RecordingBackend`], an in-memory double that records
//!   every call (used by tests and dry runs).
//! - [`types`]: [`CheckpointId`] and [`CommitIdentity`].
//! - [`error`]: the [`BackendError`] enum returned by all trait methods.

pub mod backend;
pub mod error;
pub mod git_cli;
pub mod memory;
pub mod types;

pub use backend::CheckpointBackend;
pub use error::BackendError;
pub use git_cli::GitCliBackend;
pub use memory::{RecordedCheckpoint, RecordingBackend};
pub use types::{CheckpointId, CommitIdentity};
