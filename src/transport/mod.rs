//! HTTP transport: JSON request and response bodies shared by the server
//! and the client.
//!
//! | Method | Path          | Body                    | Success body          |
//! |--------|---------------|-------------------------|-----------------------|
//! | POST   | `/api/push`   | [`PushRequest`]         | [`OkResponse`]        |
//! | POST   | `/api/commit` | none                    | [`CommitResponse`]    |
//! | GET    | `/api/status` | none                    | [`PendingStats`]      |
//!
//! Every failure is an [`ErrorResponse`].

pub mod client;
pub mod server;

use serde::{Deserialize, Serialize};

use crate::buffer::PendingStats;
use crate::commit::CommitSummary;
use crate::model::ChangeRecord;

pub use client::Client;
pub use server::{routes, serve};

/// Body of `POST /api/push`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    /// The record to enqueue.
    pub entry: ChangeRecord,
}

/// `{"status":"ok"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OkResponse {
    /// Always `"ok"`.
    pub status: String,
}

impl Default for OkResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_owned(),
        }
    }
}

/// Body returned by a successful commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResponse {
    /// Always `"committed"`.
    pub status: String,
    /// Records merged.
    pub count: usize,
    /// Checkpoints created.
    pub checkpoints: usize,
    /// Hunks dropped because their context was not found.
    pub dropped_hunks: usize,
    /// Edits skipped because the target file is not UTF-8 text.
    #[serde(default)]
    pub skipped_edits: usize,
}

impl From<&CommitSummary> for CommitResponse {
    fn from(summary: &CommitSummary) -> Self {
        Self {
            status: "committed".to_owned(),
            count: summary.records,
            checkpoints: summary.checkpoints,
            dropped_hunks: summary.dropped_hunks,
            skipped_edits: summary.skipped_edits,
        }
    }
}

/// Body of every error response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always `"error"`.
    pub status: String,
    /// For commit failures, the step that failed (`drain`, `merge`, `reset`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Human-readable message.
    pub error: String,
}

impl ErrorResponse {
    /// An error with no stage.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            status: "error".to_owned(),
            stage: None,
            error: error.into(),
        }
    }

    /// Attach the failed commit step.
    #[must_use]
    pub fn with_stage(mut self, stage: &str) -> Self {
        self.stage = Some(stage.to_owned());
        self
    }
}

/// Body of `GET /api/status`.
pub type StatusResponse = PendingStats;
