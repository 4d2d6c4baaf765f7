//! Explorer tree snapshot.
//!
//! The snapshot is rebuilt wholesale from the runtime on every change; nodes
//! carry no identity across rebuilds beyond their path.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::kernel::services::ports::file::{join_path, normalize_path};
use crate::kernel::services::ports::{BoxFuture, DirEntryInfo, SandboxRuntime};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Root-relative slash path, unique within a snapshot.
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn file(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: NodeKind::File,
            children: Vec::new(),
        }
    }

    pub fn folder(id: impl Into<String>, name: impl Into<String>, children: Vec<TreeNode>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: NodeKind::Folder,
            children,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }
}

/// Snapshot of everything below `root`. Unreadable subtrees come back empty.
pub async fn build_tree(runtime: &dyn SandboxRuntime, root: &str) -> Vec<TreeNode> {
    load_dir(runtime, normalize_path(root)).await
}

fn load_dir<'a>(runtime: &'a dyn SandboxRuntime, path: String) -> BoxFuture<'a, Vec<TreeNode>> {
    Box::pin(async move {
        let mut entries = match runtime.read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "read_dir failed, subtree left empty");
                return Vec::new();
            }
        };
        entries.sort_by(compare_entries);

        let mut nodes = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = join_path(&path, &entry.name);
            if entry.is_dir {
                let children = load_dir(runtime, id.clone()).await;
                nodes.push(TreeNode::folder(id, entry.name, children));
            } else {
                nodes.push(TreeNode::file(id, entry.name));
            }
        }
        nodes
    })
}

fn compare_entries(a: &DirEntryInfo, b: &DirEntryInfo) -> Ordering {
    b.is_dir
        .cmp(&a.is_dir)
        .then_with(|| compare_names(&a.name, &b.name))
}

/// Locale-style name order: case-insensitive first, then lowercase before
/// uppercase at the first differing character.
///
/// Folded names compare by code point, with no accent folding. ASCII names
/// match `localeCompare`; accented letters sort after `z` (`"zeta"` before
/// `"Ärger"`).
pub fn compare_names(a: &str, b: &str) -> Ordering {
    let folded = a
        .chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase));
    if folded != Ordering::Equal {
        return folded;
    }
    for (ca, cb) in a.chars().zip(b.chars()) {
        if ca == cb {
            continue;
        }
        return match (ca.is_lowercase(), cb.is_lowercase()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => ca.cmp(&cb),
        };
    }
    a.len().cmp(&b.len())
}

/// Every node id in the snapshot, files and folders.
pub fn collect_paths(nodes: &[TreeNode]) -> FxHashSet<String> {
    let mut out = FxHashSet::default();
    let mut stack: Vec<&TreeNode> = nodes.iter().collect();
    while let Some(node) = stack.pop() {
        out.insert(node.id.clone());
        stack.extend(node.children.iter());
    }
    out
}

pub fn find<'a>(nodes: &'a [TreeNode], path: &str) -> Option<&'a TreeNode> {
    let mut level = nodes;
    let mut found = None;
    let mut prefix = String::new();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        prefix = join_path(&prefix, part);
        let node = level.iter().find(|n| n.id == prefix)?;
        level = &node.children;
        found = Some(node);
    }
    found
}

pub fn count_files(nodes: &[TreeNode]) -> usize {
    nodes
        .iter()
        .map(|n| match n.kind {
            NodeKind::File => 1,
            NodeKind::Folder => count_files(&n.children),
        })
        .sum()
}

#[cfg(test)]
#[path = "../../tests/unit/models/file_tree.rs"]
mod tests;
