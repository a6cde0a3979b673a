//! Partitioning a batch into per-author groups.
//!
//! A [`Group`] is a maximal run of consecutive records from the same user.
//! Groups are the unit of checkpointing: the merge engine records exactly
//! one checkpoint per group, so history keeps per-author granularity.

use super::record::ChangeRecord;

/// A maximal run of same-user records, borrowed from a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Group<'a> {
    user: &'a str,
    records: &'a [ChangeRecord],
}

impl<'a> Group<'a> {
    /// The user every record in this group belongs to.
    #[must_use]
    pub const fn user(&self) -> &'a str {
        self.user
    }

    /// Records in arrival order.
    #[must_use]
    pub const fn records(&self) -> &'a [ChangeRecord] {
        self.records
    }

    /// Number of records in the group (always at least one).
    #[must_use]
    pub const fn len(&self) -> usize {
        self.records.len()
    }

    /// Always `false`; groups are never empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Split `batch` into groups of consecutive same-user records, preserving
/// arrival order. An empty batch yields no groups.
#[must_use]
pub fn group_by_user(batch: &[ChangeRecord]) -> Vec<Group<'_>> {
    batch
        .chunk_by(|a, b| a.user == b.user)
        .map(|records| Group {
            user: &records[0].user,
            records,
        })
        .collect()
}
