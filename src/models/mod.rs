//! Data models.

pub mod file_tree;

pub use file_tree::{build_tree, collect_paths, NodeKind, TreeNode};
