//! tandem library crate.
//!
//! The primary interface is the `tandem` binary. This crate exposes the
//! ingestion buffer, merge engine and transport so integration tests and
//! embedders can drive them directly.
//!
//! Data flow:
//!
//! ```text
//! push ──► IngestionBuffer ──(size / timer)──► pending log (NDJSON)
//!                                                  │
//! commit ──► CommitCoordinator ── drain ───────────┘
//!                  │
//!                  └─► MergeEngine ─► working tree ─► git checkpoint per author
//! ```

pub mod buffer;
pub mod commit;
pub mod config;
pub mod error;
pub mod merge;
pub mod model;
pub mod relay;
pub mod telemetry;
pub mod transport;

pub use error::TandemError;
pub use relay::Relay;
