//! Line-based side-by-side diff used by the conflict view.

use crate::constants::DEFAULT_DIFF_MAX_LINES;
use similar::{ChangeTag, TextDiff};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_DIFF_TIMEOUT: Duration = Duration::from_millis(500);

/// How a row differs between the two sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowTag {
    Equal,
    /// Line replaced; both sides present.
    Changed,
    /// Only on the left (disk) side.
    Removed,
    /// Only on the right (recovered) side.
    Added,
}

/// One line with its 1-based number on its side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub number: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRow {
    pub tag: RowTag,
    pub left: Option<DiffLine>,
    pub right: Option<DiffLine>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiffError {
    #[error("Input has {lines} lines; diff limit is {max}")]
    TooLarge { lines: usize, max: usize },

    #[error("Input contains binary data")]
    Binary,

    #[error("Diff engine failed: {0}")]
    Engine(String),
}

/// Diff capability used by [`ConflictResolver`](super::ConflictResolver).
pub trait DiffEngine: Send + Sync {
    /// Side-by-side rows from `left` (disk) to `right` (recovered).
    ///
    /// # Errors
    /// Returns [`DiffError`] when no diff can be produced.
    fn side_by_side(&self, left: &str, right: &str) -> Result<Vec<DiffRow>, DiffError>;
}

/// [`DiffEngine`] backed by `similar`'s line diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineDiff {
    pub max_lines: usize,
    /// Upper bound on diff search; past it `similar` falls back to a coarser diff.
    pub timeout: Duration,
}

impl Default for LineDiff {
    fn default() -> Self {
        Self {
            max_lines: DEFAULT_DIFF_MAX_LINES,
            timeout: DEFAULT_DIFF_TIMEOUT,
        }
    }
}

impl LineDiff {
    fn check_input(&self, text: &str) -> Result<(), DiffError> {
        if text.contains('\0') {
            return Err(DiffError::Binary);
        }
        let lines = text.lines().count();
        if lines > self.max_lines {
            return Err(DiffError::TooLarge {
                lines,
                max: self.max_lines,
            });
        }
        Ok(())
    }
}

fn line(number: usize, value: &str) -> DiffLine {
    DiffLine {
        number: number + 1,
        text: value.trim_end_matches(['\n', '\r']).to_string(),
    }
}

/// Pair buffered removals with insertions so replaced lines share a row.
fn flush_block(rows: &mut Vec<DiffRow>, removed: &mut Vec<DiffLine>, added: &mut Vec<DiffLine>) {
    let mut removed_iter = removed.drain(..);
    let mut added_iter = added.drain(..);
    loop {
        let row = match (removed_iter.next(), added_iter.next()) {
            (Some(left), Some(right)) => DiffRow {
                tag: RowTag::Changed,
                left: Some(left),
                right: Some(right),
            },
            (Some(left), None) => DiffRow {
                tag: RowTag::Removed,
                left: Some(left),
                right: None,
            },
            (None, Some(right)) => DiffRow {
                tag: RowTag::Added,
                left: None,
                right: Some(right),
            },
            (None, None) => break,
        };
        rows.push(row);
    }
}

impl DiffEngine for LineDiff {
    fn side_by_side(&self, left: &str, right: &str) -> Result<Vec<DiffRow>, DiffError> {
        self.check_input(left)?;
        self.check_input(right)?;

        let diff = TextDiff::configure()
            .timeout(self.timeout)
            .diff_lines(left, right);
        let mut rows = Vec::new();
        let mut removed = Vec::new();
        let mut added = Vec::new();
        for change in diff.iter_all_changes() {
            match (change.tag(), change.old_index(), change.new_index()) {
                (ChangeTag::Delete, Some(old), _) => removed.push(line(old, change.value())),
                (ChangeTag::Insert, _, Some(new)) => added.push(line(new, change.value())),
                (ChangeTag::Equal, Some(old), Some(new)) => {
                    flush_block(&mut rows, &mut removed, &mut added);
                    rows.push(DiffRow {
                        tag: RowTag::Equal,
                        left: Some(line(old, change.value())),
                        right: Some(line(new, change.value())),
                    });
                }
                (tag, old, new) => {
                    return Err(DiffError::Engine(format!(
                        "inconsistent change {:?} at {:?}/{:?}",
                        tag, old, new
                    )))
                }
            }
        }
        flush_block(&mut rows, &mut removed, &mut added);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaced_line_shares_a_row() {
        let rows = LineDiff::default()
            .side_by_side("a\nb\nc\n", "a\nB\nc\nd\n")
            .expect("diff");
        let tags: Vec<RowTag> = rows.iter().map(|row| row.tag).collect();
        assert_eq!(
            tags,
            vec![RowTag::Equal, RowTag::Changed, RowTag::Equal, RowTag::Added]
        );
        let changed = &rows[1];
        assert_eq!(changed.left.as_ref().map(|l| l.text.as_str()), Some("b"));
        assert_eq!(changed.right.as_ref().map(|l| l.text.as_str()), Some("B"));
        assert_eq!(rows[3].right.as_ref().map(|l| l.number), Some(4));
    }

    #[test]
    fn removed_lines_keep_left_numbers() {
        let rows = LineDiff::default()
            .side_by_side("keep\ndrop\n", "keep\n")
            .expect("diff");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].tag, RowTag::Removed);
        assert_eq!(rows[1].left.as_ref().map(|l| l.number), Some(2));
        assert!(rows[1].right.is_none());
    }

    #[test]
    fn oversized_input_is_rejected() {
        let engine = LineDiff {
            max_lines: 2,
            ..LineDiff::default()
        };
        assert_eq!(
            engine.side_by_side("1\n2\n3\n", "1\n"),
            Err(DiffError::TooLarge { lines: 3, max: 2 })
        );
    }

    #[test]
    fn binary_input_is_rejected() {
        assert_eq!(
            LineDiff::default().side_by_side("text", "bin\0ary"),
            Err(DiffError::Binary)
        );
    }
}
