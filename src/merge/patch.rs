//! Line patches computed between two texts and applied onto a third.
//!
//! [`Patch::compute`] diffs an author's baseline against what they submitted
//! and groups the changes into [`Hunk`]s with up to [`CONTEXT_LINES`] lines of
//! surrounding context. [`Patch::apply`] then replays those hunks onto a
//! *different* text: the current shared file, which may already contain
//! other authors' edits.
//!
//! Application is best effort. Each hunk is located by its "before" lines
//! (context plus deleted lines), searching outward from where the previous
//! hunks say it should be. If an exact match is not found, context is
//! trimmed one line at a time from both ends and the search repeated. A
//! needle with no context left is only searched for within
//! [`MAX_UNANCHORED_DRIFT`] lines of its expected position.
//!
//! A hunk that carries several separate changes and cannot be placed whole is
//! split into its change runs, each with the context around it, and those are
//! placed one by one. A hunk or run whose "after" lines are already in the
//! text counts as applied without touching it. Anything still unplaced is
//! dropped and counted; it is never an error.
//!
//! ```text
//! base    L1 L2 L3        patch(base → bob) = { keep L1 L2 | L3 → L3-B }
//! master  L1-A L2 L3      full "before" [L1 L2 L3] not in master
//!                         trim 1 → [L2 L3] found at line 1
//! result  L1-A L2 L3-B
//!
//! patch(base → carol) = { L1 → L1-A, keep L2, L3 → L3-C }
//! master  L1-A L2 L3      [L1 L2 L3] not found; split into two runs
//!                         [L1-A L2] already present, [L2 L3] found at line 1
//! result  L1-A L2 L3-C
//! ```

use similar::{Algorithm, DiffOp, DiffTag, capture_diff_slices, group_diff_ops};

/// Lines of context kept on each side of a change.
pub const CONTEXT_LINES: usize = 3;

/// How far from its expected line a needle without context may be found.
pub const MAX_UNANCHORED_DRIFT: usize = 64;

/// One contiguous change plus its context, in baseline coordinates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hunk {
    /// Index of the first `before` line in the baseline.
    old_start: usize,
    /// Context and removed lines, as they appear in the baseline.
    before: Vec<String>,
    /// Context and added lines, as they should appear after applying.
    after: Vec<String>,
    /// Unchanged lines at the start of both `before` and `after`.
    leading: usize,
    /// Unchanged lines at the end of both `before` and `after`.
    trailing: usize,
    /// One sub-hunk per change run, when there is more than one.
    parts: Vec<Hunk>,
}

impl Hunk {
    /// Index of the hunk's first line in the baseline.
    #[must_use]
    pub const fn old_start(&self) -> usize {
        self.old_start
    }

    /// Lines removed (including context).
    #[must_use]
    pub fn before(&self) -> &[String] {
        &self.before
    }

    /// Lines inserted (including context).
    #[must_use]
    pub fn after(&self) -> &[String] {
        &self.after
    }

    /// The separately placeable change runs, empty for a single-run hunk.
    #[must_use]
    pub fn parts(&self) -> &[Self] {
        &self.parts
    }

    fn trimmed(&self, trim: usize) -> (usize, &[String], &[String]) {
        let lead = trim.min(self.leading);
        let trail = trim.min(self.trailing);
        (
            lead,
            &self.before[lead..self.before.len() - trail],
            &self.after[lead..self.after.len() - trail],
        )
    }
}

/// A sequence of hunks transforming one text into another.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Patch {
    hunks: Vec<Hunk>,
}

/// Result of applying a [`Patch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchOutcome {
    /// The patched text.
    pub text: String,
    /// Hunks that were fully applied or found already present.
    pub applied: usize,
    /// Hunks with at least one change that could not be placed. Runs of a
    /// split hunk that could be placed still were.
    pub dropped: usize,
}

impl Patch {
    /// Diff `base` against `target`, line by line.
    ///
    /// Lines keep their terminators and are split exactly the way
    /// [`apply`](Self::apply) splits its input.
    #[must_use]
    pub fn compute(base: &str, target: &str) -> Self {
        let old = split_lines(base);
        let new = split_lines(target);
        let ops = capture_diff_slices(Algorithm::Myers, &old, &new);

        let hunks = group_diff_ops(ops, CONTEXT_LINES)
            .into_iter()
            .filter_map(|ops| {
                let mut hunk = hunk_from_ops(&ops, &old, &new)?;
                let runs = change_runs(&ops);
                if runs.len() > 1 {
                    hunk.parts = runs
                        .into_iter()
                        .filter_map(|run| hunk_from_ops(run, &old, &new))
                        .collect();
                }
                Some(hunk)
            })
            .collect();

        Self { hunks }
    }

    /// The hunks, in baseline order.
    #[must_use]
    pub fn hunks(&self) -> &[Hunk] {
        &self.hunks
    }

    /// Returns `true` if the two texts were identical.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    /// Replay the hunks onto `text`, skipping any that cannot be located.
    #[must_use]
    pub fn apply(&self, text: &str) -> PatchOutcome {
        let mut lines = split_lines(text);
        let mut delta: isize = 0;
        let mut applied = 0;
        let mut dropped = 0;

        for hunk in &self.hunks {
            if let Some(next) = place(hunk, &mut lines, delta) {
                delta = next;
                applied += 1;
                continue;
            }
            let mut complete = !hunk.parts.is_empty();
            for part in &hunk.parts {
                match place(part, &mut lines, delta) {
                    Some(next) => delta = next,
                    None => complete = false,
                }
            }
            if complete {
                applied += 1;
            } else {
                dropped += 1;
            }
        }

        PatchOutcome {
            text: lines.concat(),
            applied,
            dropped,
        }
    }
}

fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

fn hunk_from_ops(ops: &[DiffOp], old: &[&str], new: &[&str]) -> Option<Hunk> {
    let first = ops.first()?;
    let last = ops.last()?;
    let old_range = first.old_range().start..last.old_range().end;
    let new_range = first.new_range().start..last.new_range().end;
    let context = |op: &DiffOp| {
        if op.tag() == DiffTag::Equal {
            op.old_range().len()
        } else {
            0
        }
    };
    Some(Hunk {
        old_start: old_range.start,
        before: old[old_range].iter().map(|s| (*s).to_owned()).collect(),
        after: new[new_range].iter().map(|s| (*s).to_owned()).collect(),
        leading: context(first),
        trailing: context(last),
        parts: Vec::new(),
    })
}

/// Split a hunk's ops into runs of consecutive changes, each with the equal
/// ops on either side of it.
fn change_runs(ops: &[DiffOp]) -> Vec<&[DiffOp]> {
    let mut runs = Vec::new();
    let mut i = 0;
    while i < ops.len() {
        if ops[i].tag() == DiffTag::Equal {
            i += 1;
            continue;
        }
        let start = i.saturating_sub(1);
        let mut end = i;
        while end < ops.len() && ops[end].tag() != DiffTag::Equal {
            end += 1;
        }
        runs.push(&ops[start..(end + 1).min(ops.len())]);
        i = end;
    }
    runs
}

/// Apply `hunk` to `lines` in place.
///
/// Returns the drift after it, or `None` if the hunk was neither found nor
/// already present.
fn place<'a>(hunk: &'a Hunk, lines: &mut Vec<&'a str>, delta: isize) -> Option<isize> {
    let drift = |lead: usize, before_len: usize, target_end: usize| {
        target_end.cast_signed() - (hunk.old_start + lead + before_len).cast_signed()
    };

    if let Some((at, trim)) = locate(hunk, lines, delta) {
        let (lead, before, after) = hunk.trimmed(trim);
        lines.splice(at..at + before.len(), after.iter().map(String::as_str));
        return Some(drift(lead, before.len(), at + after.len()));
    }

    // An earlier group may already have written the same change.
    if hunk.after.is_empty() {
        return None;
    }
    let expected = hunk.old_start.saturating_add_signed(delta).min(lines.len());
    let reach = search_reach(hunk.leading == 0 && hunk.trailing == 0);
    let at = find_nearest(lines, &hunk.after, expected, reach)?;
    Some(drift(0, hunk.before.len(), at + hunk.after.len()))
}

const fn search_reach(unanchored: bool) -> usize {
    if unanchored {
        MAX_UNANCHORED_DRIFT
    } else {
        usize::MAX
    }
}

/// Find where `hunk` applies in `lines`.
///
/// Returns the start index and how many context lines had to be trimmed
/// from each end, or `None` if the hunk cannot be placed.
fn locate(hunk: &Hunk, lines: &[&str], delta: isize) -> Option<(usize, usize)> {
    let max_trim = hunk.leading.max(hunk.trailing);
    for trim in 0..=max_trim {
        let (lead, before, _) = hunk.trimmed(trim);
        let expected = (hunk.old_start + lead)
            .saturating_add_signed(delta)
            .min(lines.len());
        if before.is_empty() {
            // Only a hunk that never had anchor lines (insertion into an
            // empty baseline) may be placed blind.
            if hunk.before.is_empty() {
                return Some((expected, trim));
            }
            return None;
        }
        let reach = search_reach(trim >= hunk.leading && trim >= hunk.trailing);
        if let Some(at) = find_nearest(lines, before, expected, reach) {
            return Some((at, trim));
        }
    }
    None
}

/// Index of the occurrence of `needle` in `haystack` closest to `expected`,
/// at most `reach` lines away from it.
fn find_nearest(
    haystack: &[&str],
    needle: &[String],
    expected: usize,
    reach: usize,
) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    let last = haystack.len() - needle.len();
    let origin = expected.min(last);
    let matches_at = |i: usize| {
        haystack[i..i + needle.len()]
            .iter()
            .zip(needle)
            .all(|(have, want)| *have == want.as_str())
    };

    for distance in 0..=last.min(reach) {
        let forward = origin + distance;
        if forward <= last && matches_at(forward) {
            return Some(forward);
        }
        if distance > 0
            && let Some(backward) = origin.checked_sub(distance)
            && matches_at(backward)
        {
            return Some(backward);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merge(base: &str, authored: &str, master: &str) -> PatchOutcome {
        Patch::compute(base, authored).apply(master)
    }

    #[test]
    fn identical_texts_produce_no_hunks() {
        let patch = Patch::compute("a\nb\n", "a\nb\n");
        assert!(patch.is_empty());
        let out = patch.apply("anything\n");
        assert_eq!(out.text, "anything\n");
        assert_eq!((out.applied, out.dropped), (0, 0));
    }

    #[test]
    fn applies_onto_unchanged_base() {
        let out = merge("a\nb\nc\n", "a\nB\nc\n", "a\nb\nc\n");
        assert_eq!(out.text, "a\nB\nc\n");
        assert_eq!(out.applied, 1);
    }

    #[test]
    fn disjoint_edits_merge() {
        let base = "L1\nL2\nL3\n";
        let master = "L1-A\nL2\nL3\n";
        let out = merge(base, "L1\nL2\nL3-B\n", master);
        assert_eq!(out.text, "L1-A\nL2\nL3-B\n");
        assert_eq!((out.applied, out.dropped), (1, 0));
    }

    #[test]
    fn change_already_in_master_is_tolerated() {
        // The author's snapshot repeats a change someone else made first.
        let patch = Patch::compute("L1\nL2\nL3\n", "L1-A\nL2\nL3-B\n");
        assert_eq!(patch.hunks()[0].parts().len(), 2);
        let out = patch.apply("L1-A\nL2\nL3\n");
        assert_eq!(out.text, "L1-A\nL2\nL3-B\n");
        assert_eq!((out.applied, out.dropped), (1, 0));
    }

    #[test]
    fn split_hunk_keeps_the_runs_it_can_place() {
        let out = merge("a\nb\nc\nd\ne\n", "A\nb\nc\nd\nE\n", "z\nb\nc\nd\ne\n");
        assert_eq!(out.text, "z\nb\nc\nd\nE\n");
        assert_eq!((out.applied, out.dropped), (0, 1));
    }

    #[test]
    fn identical_change_by_two_authors_applies_once() {
        let out = merge("a\nb\nc\n", "a\nB\nc\n", "a\nB\nc\n");
        assert_eq!(out.text, "a\nB\nc\n");
        assert_eq!((out.applied, out.dropped), (1, 0));
    }

    #[test]
    fn hunk_without_context_stays_near_its_line() {
        let near = format!("{}a\n", "filler\n".repeat(10));
        let out = merge("a\n", "A\n", &near);
        assert_eq!(out.text, format!("{}A\n", "filler\n".repeat(10)));
        assert_eq!(out.dropped, 0);

        let far = format!("{}a\n", "filler\n".repeat(MAX_UNANCHORED_DRIFT + 1));
        let out = merge("a\n", "A\n", &far);
        assert_eq!(out.text, far);
        assert_eq!((out.applied, out.dropped), (0, 1));
    }

    #[test]
    fn hunk_follows_shifted_content() {
        let base = "a\nb\nc\nd\ne\nf\ng\nh\n";
        let authored = "a\nb\nc\nd\ne\nf\nG\nh\n";
        let master = "new1\nnew2\na\nb\nc\nd\ne\nf\ng\nh\n";
        let out = merge(base, authored, master);
        assert_eq!(out.text, "new1\nnew2\na\nb\nc\nd\ne\nf\nG\nh\n");
    }

    #[test]
    fn multiple_hunks_track_drift() {
        let base: String = (1..=20).map(|i| format!("line {i}\n")).collect();
        let authored = base
            .replace("line 2\n", "line 2\nextra a\nextra b\n")
            .replace("line 18\n", "LINE 18\n");
        let out = merge(&base, &authored, &base);
        assert_eq!(out.text, authored);
        assert_eq!((out.applied, out.dropped), (2, 0));
    }

    #[test]
    fn unlocatable_hunk_is_dropped() {
        let out = merge("a\nb\nc\n", "a\nB\nc\n", "x\ny\nz\n");
        assert_eq!(out.text, "x\ny\nz\n");
        assert_eq!((out.applied, out.dropped), (0, 1));
    }

    #[test]
    fn one_dropped_hunk_does_not_block_the_rest() {
        let base: String = (1..=20).map(|i| format!("line {i}\n")).collect();
        let authored = base
            .replace("line 2\n", "LINE 2\n")
            .replace("line 18\n", "LINE 18\n");
        // Someone else rewrote the top of the file entirely.
        let master = base
            .replace("line 1\n", "")
            .replace("line 2\n", "")
            .replace("line 3\n", "")
            .replace("line 4\n", "")
            .replace("line 5\n", "");
        let out = merge(&base, &authored, &master);
        assert_eq!((out.applied, out.dropped), (1, 1));
        assert!(out.text.contains("LINE 18\n"));
        assert!(!out.text.contains("LINE 2\n"));
    }

    #[test]
    fn creates_content_from_empty_base() {
        let out = merge("", "hello\nworld\n", "");
        assert_eq!(out.text, "hello\nworld\n");
        assert_eq!(out.applied, 1);
    }

    #[test]
    fn deletes_lines() {
        let out = merge("a\nb\nc\n", "a\nc\n", "a\nb\nc\n");
        assert_eq!(out.text, "a\nc\n");
    }

    #[test]
    fn appends_after_last_line() {
        let out = merge("a\nb\n", "a\nb\nc\n", "z\na\nb\n");
        assert_eq!(out.text, "z\na\nb\nc\n");
    }

    #[test]
    fn missing_trailing_newline_is_preserved() {
        let out = merge("a\nb", "a\nb\nc", "a\nb");
        assert_eq!(out.text, "a\nb\nc");
    }

    #[test]
    fn crlf_lines_round_trip() {
        let out = merge("a\r\nb\r\n", "a\r\nB\r\n", "a\r\nb\r\n");
        assert_eq!(out.text, "a\r\nB\r\n");
    }

    #[test]
    fn lone_carriage_return_stays_inside_its_line() {
        let out = merge("a\rb\nc\n", "a\rb\nC\n", "a\rb\nc\n");
        assert_eq!(out.text, "a\rb\nC\n");
        assert_eq!(out.dropped, 0);
    }

    #[test]
    fn hunk_accessors_expose_context() {
        let patch = Patch::compute("a\nb\nc\n", "a\nB\nc\n");
        let hunk = &patch.hunks()[0];
        assert_eq!(hunk.old_start(), 0);
        assert_eq!(hunk.before(), ["a\n", "b\n", "c\n"]);
        assert_eq!(hunk.after(), ["a\n", "B\n", "c\n"]);
    }
}
