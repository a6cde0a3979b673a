//! Server configuration (`tandem.toml`).
//!
//! Defines the typed configuration loaded by `tandem serve`, by default from
//! `.tandem/config.toml` under the repository root. Every field has a
//! default; command-line flags and environment variables override the file.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::buffer::{BufferOptions, DEFAULT_MAX_BUFFER_BYTES};

/// Directory (relative to the repository root) holding tandem's own state.
pub const STATE_DIR: &str = ".tandem";

/// Config file name inside [`STATE_DIR`].
pub const CONFIG_FILE: &str = "config.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level tandem configuration.
///
/// Missing fields use defaults. Missing file → all defaults (no error).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TandemConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Ingestion buffer settings.
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Working tree and commit identity.
    #[serde(default)]
    pub repo: RepoConfig,
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to listen on (default: `127.0.0.1:8080`).
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

// ---------------------------------------------------------------------------
// BufferConfig
// ---------------------------------------------------------------------------

/// Ingestion buffer settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BufferConfig {
    /// Pending log location. Relative paths are resolved against the state
    /// directory.
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Buffered bytes that force a synchronous flush.
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,

    /// Seconds between periodic flushes. Must be at least 1.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            max_buffer_bytes: default_max_buffer_bytes(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

impl BufferConfig {
    /// Buffer options for a repository whose state directory is `state_dir`.
    #[must_use]
    pub fn options(&self, state_dir: &Path) -> BufferOptions {
        BufferOptions::new(state_dir.join(&self.log_path))
            .with_max_buffer_bytes(self.max_buffer_bytes)
            .with_flush_interval(Duration::from_secs(self.flush_interval_secs))
    }
}

fn default_log_path() -> PathBuf {
    PathBuf::from("pending_diffs.jsonl")
}

const fn default_max_buffer_bytes() -> usize {
    DEFAULT_MAX_BUFFER_BYTES
}

const fn default_flush_interval_secs() -> u64 {
    5
}

// ---------------------------------------------------------------------------
// RepoConfig
// ---------------------------------------------------------------------------

/// Working tree and commit identity.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    /// Working tree the merge writes into (default: `"."`).
    #[serde(default = "default_repo_path")]
    pub path: PathBuf,

    /// Author name for checkpoints. Empty → git's configured identity.
    #[serde(default)]
    pub author_name: String,

    /// Author email for checkpoints.
    #[serde(default)]
    pub author_email: String,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            path: default_repo_path(),
            author_name: String::new(),
            author_email: String::new(),
        }
    }
}

impl RepoConfig {
    /// The configured commit identity, if both name and email are set.
    #[must_use]
    pub fn identity(&self) -> Option<(&str, &str)> {
        let name = self.author_name.trim();
        let email = self.author_email.trim();
        (!name.is_empty() && !email.is_empty()).then_some((name, email))
    }
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading a tandem configuration file.
#[derive(Debug)]
pub struct ConfigError {
    /// The path that was being loaded (if available).
    pub path: Option<PathBuf>,
    /// Human-readable message with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl TandemConfig {
    /// Default config file location for the repository at `repo_root`.
    #[must_use]
    pub fn default_path(repo_root: &Path) -> PathBuf {
        repo_root.join(STATE_DIR).join(CONFIG_FILE)
    }

    /// Load configuration from a TOML file.
    ///
    /// - If the file does not exist, returns all defaults (not an error).
    /// - If the file exists but is invalid, returns a [`ConfigError`] with
    ///   line-level detail.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found), parse
    /// errors, or invalid values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML, unknown fields, or values out
    /// of range.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line and environment overrides.
    ///
    /// `port_env` (the `PORT` variable) replaces the port of the configured
    /// address; an explicit `listen` flag replaces the whole address and
    /// wins over both.
    ///
    /// # Errors
    /// Returns `ConfigError` if `port_env` is not a port number.
    pub fn with_overrides(
        mut self,
        listen: Option<SocketAddr>,
        port_env: Option<&str>,
        repo: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        if let Some(raw) = port_env.map(str::trim).filter(|p| !p.is_empty()) {
            let port = raw.parse::<u16>().map_err(|e| ConfigError {
                path: None,
                message: format!("PORT={raw:?} is not a port number: {e}"),
            })?;
            self.server.listen.set_port(port);
        }
        if let Some(listen) = listen {
            self.server.listen = listen;
        }
        if let Some(repo) = repo {
            self.repo.path = repo;
        }
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError {
                path: None,
                message: message.to_owned(),
            })
        };
        if self.buffer.flush_interval_secs == 0 {
            return invalid("buffer.flush_interval_secs must be at least 1");
        }
        if self.buffer.max_buffer_bytes == 0 {
            return invalid("buffer.max_buffer_bytes must be at least 1");
        }
        if self.repo.author_name.trim().is_empty() != self.repo.author_email.trim().is_empty() {
            return invalid("repo.author_name and repo.author_email must be set together");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
