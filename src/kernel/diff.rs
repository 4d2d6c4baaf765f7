//! Line-level projection for the side-by-side compare view.

use std::collections::BTreeSet;

use similar::{DiffOp, TextDiff};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffProjection {
    /// 1-based lines of the persisted buffer.
    pub removed_lines: BTreeSet<usize>,
    /// 1-based lines of the live buffer.
    pub added_lines: BTreeSet<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub added: usize,
    pub removed: usize,
}

impl DiffProjection {
    pub fn is_removed(&self, line: usize) -> bool {
        self.removed_lines.contains(&line)
    }

    pub fn is_added(&self, line: usize) -> bool {
        self.added_lines.contains(&line)
    }

    pub fn is_empty(&self) -> bool {
        self.removed_lines.is_empty() && self.added_lines.is_empty()
    }

    pub fn stats(&self) -> DiffStats {
        DiffStats {
            added: self.added_lines.len(),
            removed: self.removed_lines.len(),
        }
    }
}

pub fn project(before: &str, after: &str) -> DiffProjection {
    let mut out = DiffProjection::default();
    if before == after {
        return out;
    }

    let diff = TextDiff::from_lines(before, after);
    let (mut old_line, mut new_line) = (1usize, 1usize);
    for op in diff.ops() {
        match *op {
            DiffOp::Equal { len, .. } => {
                old_line += len;
                new_line += len;
            }
            DiffOp::Delete { old_len, .. } => {
                out.removed_lines.extend(old_line..old_line + old_len);
                old_line += old_len;
            }
            DiffOp::Insert { new_len, .. } => {
                out.added_lines.extend(new_line..new_line + new_len);
                new_line += new_len;
            }
            DiffOp::Replace {
                old_len, new_len, ..
            } => {
                out.removed_lines.extend(old_line..old_line + old_len);
                old_line += old_len;
                out.added_lines.extend(new_line..new_line + new_len);
                new_line += new_len;
            }
        }
    }
    out
}

#[cfg(test)]
#[path = "../../tests/unit/kernel/diff.rs"]
mod tests;
