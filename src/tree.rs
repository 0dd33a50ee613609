// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Category tree
//!
//! Nodes live in an arena owned by [`CategoryTree`] and refer to each other by
//! [`CategoryId`]. Parent links are plain indices, so the tree owns its nodes
//! strictly from the root downward while still supporting upward walks for
//! path resolution.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::merger::sanitize_label;
use crate::{ArborError, Result};

/// Handle to a node inside one [`CategoryTree`]
///
/// Ids are only handed out by the tree that owns the node and nodes are never
/// removed, so an id stays valid for the lifetime of its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CategoryId(usize);

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A named node in the category hierarchy, one directory on disk
#[derive(Debug, Clone)]
pub struct Category {
    name: String,
    parent: Option<CategoryId>,
    subcategories: Vec<CategoryId>,
    files: Vec<PathBuf>,
}

impl Category {
    fn new(name: &str, parent: Option<CategoryId>) -> Self {
        Self {
            name: name.to_string(),
            parent,
            subcategories: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enclosing category, `None` for the root
    pub fn parent(&self) -> Option<CategoryId> {
        self.parent
    }

    /// Children in insertion (display) order
    pub fn subcategories(&self) -> &[CategoryId] {
        &self.subcategories
    }

    /// Cached file handles; refreshed from disk by the directory loader
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn is_leaf(&self) -> bool {
        self.subcategories.is_empty()
    }
}

/// The full set of categories rooted at one node
#[derive(Debug, Clone)]
pub struct CategoryTree {
    nodes: Vec<Category>,
}

impl CategoryTree {
    /// Create a tree containing only the root
    pub fn new(root_name: &str) -> Self {
        Self {
            nodes: vec![Category::new(root_name, None)],
        }
    }

    pub fn root(&self) -> CategoryId {
        CategoryId(0)
    }

    pub fn get(&self, id: CategoryId) -> &Category {
        &self.nodes[id.0]
    }

    pub(crate) fn files_mut(&mut self, id: CategoryId) -> &mut Vec<PathBuf> {
        &mut self.nodes[id.0].files
    }

    pub fn parent(&self, id: CategoryId) -> Option<CategoryId> {
        self.get(id).parent
    }

    pub fn children(&self, id: CategoryId) -> &[CategoryId] {
        &self.get(id).subcategories
    }

    /// Number of nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Child of `parent` named `name`, without creating anything
    pub fn child(&self, parent: CategoryId, name: &str) -> Option<CategoryId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|&c| self.get(c).name == name)
    }

    /// Return the child of `parent` named `name`, appending a new one if absent.
    ///
    /// Calling this repeatedly with the same arguments always yields the same
    /// node; sibling names therefore stay unique.
    pub fn find_or_create_child(&mut self, parent: CategoryId, name: &str) -> CategoryId {
        if let Some(existing) = self.child(parent, name) {
            return existing;
        }

        let id = CategoryId(self.nodes.len());
        self.nodes.push(Category::new(name, Some(parent)));
        self.nodes[parent.0].subcategories.push(id);
        debug!("Created category '{}' under {}", name, self.display_path(parent));
        id
    }

    /// Look up `name` among the immediate children of `root` only.
    ///
    /// The search is shallow: a category with the same name deeper
    /// in the tree is not found, and a new top-level sibling is created instead.
    pub fn find_category_by_name(&mut self, root: CategoryId, name: &str) -> CategoryId {
        self.find_or_create_child(root, name)
    }

    /// Find a category by its slash-separated display path ("Sem - 3/CN").
    /// An empty path names the root.
    pub fn lookup(&self, path: &str) -> Option<CategoryId> {
        path.split('/')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .try_fold(self.root(), |current, segment| self.child(current, segment))
    }

    /// Names from the root's child down to `id`, joined with '/'
    pub fn display_path(&self, id: CategoryId) -> String {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            if node != self.root() {
                names.push(self.get(node).name.as_str());
            }
            current = self.parent(node);
        }
        names.reverse();
        names.join("/")
    }

    /// Replace the cached file list of a category wholesale
    pub fn replace_files(&mut self, id: CategoryId, files: Vec<PathBuf>) {
        self.nodes[id.0].files = files;
    }

    /// Category whose cache currently holds `file`, if any
    pub fn category_of_file(&self, file: &Path) -> Option<CategoryId> {
        self.nodes
            .iter()
            .position(|c| c.files.iter().any(|f| f == file))
            .map(CategoryId)
    }

    /// Depth-first pre-order walk from the root, yielding `(depth, id)`.
    /// The root has depth 0.
    pub fn walk(&self) -> Vec<(usize, CategoryId)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(0, self.root())];
        while let Some((depth, id)) = stack.pop() {
            out.push((depth, id));
            for &child in self.children(id).iter().rev() {
                stack.push((depth + 1, child));
            }
        }
        out
    }

    /// All categories without subcategories, in walk order
    pub fn leaves(&self) -> Vec<CategoryId> {
        self.walk()
            .into_iter()
            .map(|(_, id)| id)
            .filter(|&id| id != self.root() && self.get(id).is_leaf())
            .collect()
    }

    /// Verify the structural invariants: one parentless root, parent and child
    /// links agree, no cycles, unique sibling names.
    pub fn check_invariants(&self) -> Result<()> {
        for (index, node) in self.nodes.iter().enumerate() {
            let id = CategoryId(index);

            match node.parent {
                None if index != 0 => {
                    return Err(ArborError::StructuralViolation(format!(
                        "category '{}' has no parent but is not the root",
                        node.name
                    )));
                }
                Some(_) if index == 0 => {
                    return Err(ArborError::StructuralViolation("root has a parent".to_string()));
                }
                Some(parent) if !self.children(parent).contains(&id) => {
                    return Err(ArborError::StructuralViolation(format!(
                        "category '{}' is not listed by its parent",
                        node.name
                    )));
                }
                _ => {}
            }

            if index != 0 && !is_clean_name(&node.name) {
                return Err(ArborError::StructuralViolation(format!(
                    "category name {:?} is not a single path component",
                    node.name
                )));
            }

            let mut seen = HashSet::new();
            for &child in &node.subcategories {
                if self.parent(child) != Some(id) {
                    return Err(ArborError::StructuralViolation(format!(
                        "child '{}' of '{}' points at another parent",
                        self.get(child).name,
                        node.name
                    )));
                }
                if !seen.insert(self.get(child).name.as_str()) {
                    return Err(ArborError::StructuralViolation(format!(
                        "duplicate sibling '{}' under '{}'",
                        self.get(child).name,
                        node.name
                    )));
                }
            }

            // Every upward walk must reach the root within `len` steps
            let mut steps = 0;
            let mut current = node.parent;
            while let Some(p) = current {
                steps += 1;
                if steps > self.nodes.len() {
                    return Err(ArborError::StructuralViolation(format!(
                        "cycle above category '{}'",
                        node.name
                    )));
                }
                current = self.parent(p);
            }
        }
        Ok(())
    }

    /// Names-only copy of the tree for persistence
    pub fn snapshot(&self) -> CategorySnapshot {
        self.snapshot_of(self.root())
    }

    fn snapshot_of(&self, id: CategoryId) -> CategorySnapshot {
        CategorySnapshot {
            name: self.get(id).name.clone(),
            subcategories: self
                .children(id)
                .iter()
                .map(|&c| self.snapshot_of(c))
                .collect(),
        }
    }

    /// Add every category named in `snapshot` that is not present yet.
    /// Existing nodes are reused, so restoring is idempotent. A name that is
    /// not a single clean path component is dropped along with its subtree.
    pub fn restore(&mut self, snapshot: &CategorySnapshot) {
        let root = self.root();
        self.restore_under(root, &snapshot.subcategories);
    }

    fn restore_under(&mut self, parent: CategoryId, children: &[CategorySnapshot]) {
        for child in children {
            if !is_clean_name(&child.name) {
                warn!("Ignoring snapshot category with unsafe name {:?}", child.name);
                continue;
            }
            let id = self.find_or_create_child(parent, &child.name);
            self.restore_under(id, &child.subcategories);
        }
    }
}

fn is_clean_name(name: &str) -> bool {
    sanitize_label(name).as_deref() == Some(name)
}

/// Serializable names-only form of a tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySnapshot {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subcategories: Vec<CategorySnapshot>,
}

impl CategorySnapshot {
    /// Read a snapshot; a missing file yields `None`
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
