//! Shared data model: change records, validation, and batch grouping.

pub mod group;
pub mod record;

pub use group::{Group, group_by_user};
pub use record::{ChangeKind, ChangeRecord, Field, ValidationError, checked_relative_path};
