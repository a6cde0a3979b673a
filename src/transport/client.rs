//! Blocking HTTP client for a running `tandem serve`.

use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use reqwest::blocking::Response;
use serde::de::DeserializeOwned;

use super::{CommitResponse, ErrorResponse, PushRequest, StatusResponse};
use crate::model::ChangeRecord;

/// Default server URL for CLI commands.
pub const DEFAULT_SERVER: &str = "http://localhost:8080";

/// Commits can run git for every group, so allow them a long time.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Talks to one tandem server.
#[derive(Clone, Debug)]
pub struct Client {
    base: String,
    http: reqwest::blocking::Client,
}

impl Client {
    /// A client for the server at `base_url` (e.g. `http://localhost:8080`).
    ///
    /// # Errors
    /// Fails if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("tandem/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            base: base_url.trim_end_matches('/').to_owned(),
            http,
        })
    }

    /// Push one record.
    ///
    /// # Errors
    /// Fails on connection errors or a non-success response.
    pub fn push(&self, record: &ChangeRecord) -> Result<()> {
        let body = PushRequest {
            entry: record.clone(),
        };
        let url = self.url("push");
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .with_context(|| format!("POST {url}"))?;
        check(response)?;
        Ok(())
    }

    /// Ask the server to commit everything pending.
    ///
    /// # Errors
    /// Fails on connection errors or if the commit failed; the error names
    /// the step that failed.
    pub fn commit(&self) -> Result<CommitResponse> {
        let url = self.url("commit");
        let response = self
            .http
            .post(&url)
            .send()
            .with_context(|| format!("POST {url}"))?;
        decode(check(response)?)
    }

    /// Fetch pending counts.
    ///
    /// # Errors
    /// Fails on connection errors or a non-success response.
    pub fn pending(&self) -> Result<StatusResponse> {
        let url = self.url("status");
        let response = self
            .http
            .get(&url)
            .send()
            .with_context(|| format!("GET {url}"))?;
        decode(check(response)?)
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/{endpoint}", self.base)
    }
}

/// Turn a non-2xx response into an error carrying the server's message.
fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(ErrorResponse {
            stage: Some(stage),
            error,
            ..
        }) => bail!("server returned {status} ({stage} failed): {error}"),
        Ok(ErrorResponse { error, .. }) => bail!("server returned {status}: {error}"),
        Err(_) => bail!("server returned {status}: {}", text.trim()),
    }
}

fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    response.json().context("decoding server response")
}
