//! Ephemeral in-memory tree built from one `ALL_FILES` reply.
//!
//! The tree only exists to answer stat/list for the duration of one call;
//! it holds node types and sizes, never file content.

use std::collections::BTreeMap;

use gantry_core::constants::HIDDEN_PREFIXES;
use gantry_core::protocol::FileEntry;

use crate::path::normalize;

/// What a path in the tree is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// A directory, reported or implied by a descendant.
    Directory,
    /// A regular file; the size is whatever the agent reported.
    File {
        /// Reported size in bytes.
        size: Option<u64>,
    },
}

/// Agent-relative paths mapped to their node kind.
#[derive(Clone, Debug, Default)]
pub struct MemTree {
    nodes: BTreeMap<String, NodeKind>,
}

fn is_hidden(path: &str) -> bool {
    HIDDEN_PREFIXES.iter().any(|hidden| {
        path == *hidden
            || path
                .strip_prefix(hidden)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

fn parent(path: &str) -> Option<&str> {
    match path.rsplit_once('/') {
        Some(("", "")) | None => None,
        Some(("", _)) => Some("/"),
        Some((parent, _)) => Some(parent),
    }
}

/// Last segment of `path`; `/` for the root.
pub fn base_name(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some((_, "")) | None => "/",
        Some((_, name)) => name,
    }
}

impl MemTree {
    /// Build the tree for a listing of `base`.
    ///
    /// `base` and every ancestor of a listed entry become directories;
    /// entries under a hidden prefix are skipped.
    pub fn from_listing(base: &str, entries: &[FileEntry]) -> Self {
        let mut tree = Self::default();
        tree.insert_dir_chain(&normalize(base));
        for entry in entries {
            let path = normalize(&entry.name);
            if path == "/" || is_hidden(&path) {
                continue;
            }
            if let Some(parent) = parent(&path) {
                tree.insert_dir_chain(parent);
            }
            let kind = if entry.directory {
                NodeKind::Directory
            } else {
                NodeKind::File { size: entry.size }
            };
            // A path already implied as a directory by a child stays one.
            let _ = tree.nodes.entry(path).or_insert(kind);
        }
        tree
    }

    fn insert_dir_chain(&mut self, path: &str) {
        let mut current = Some(path);
        while let Some(dir) = current {
            let _ = self.nodes.insert(dir.to_owned(), NodeKind::Directory);
            current = parent(dir);
        }
    }

    /// Kind of `path`, if present.
    pub fn kind(&self, path: &str) -> Option<NodeKind> {
        self.nodes.get(&normalize(path)).copied()
    }

    /// Direct children of the directory at `path`, sorted by name.
    ///
    /// `None` when `path` is absent or not a directory.
    pub fn children(&self, path: &str) -> Option<Vec<(&str, NodeKind)>> {
        let dir = normalize(path);
        if self.nodes.get(&dir) != Some(&NodeKind::Directory) {
            return None;
        }
        Some(
            self.nodes
                .iter()
                .filter(|(p, _)| p.as_str() != "/" && parent(p) == Some(dir.as_str()))
                .map(|(p, kind)| (base_name(p), *kind))
                .collect(),
        )
    }

    /// Number of nodes, including implied directories and the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
