// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Category to filesystem path resolution

use std::path::{Path, PathBuf};

use crate::tree::{CategoryId, CategoryTree};

/// Maps categories onto directories beneath one base directory
#[derive(Debug, Clone)]
pub struct PathResolver {
    base_dir: PathBuf,
}

impl PathResolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Canonical directory of `category`: the base directory joined with the
    /// names from the root's child down to `category`. The root resolves to
    /// the base directory itself.
    pub fn resolve(&self, tree: &CategoryTree, category: CategoryId) -> PathBuf {
        let mut names = Vec::new();
        let mut current = category;
        while let Some(parent) = tree.parent(current) {
            names.push(tree.get(current).name());
            current = parent;
        }

        names
            .into_iter()
            .rev()
            .fold(self.base_dir.clone(), |path, name| path.join(name))
    }

    /// Path a file named `file_name` would have inside `category`
    pub fn resolve_file(&self, tree: &CategoryTree, category: CategoryId, file_name: &str) -> PathBuf {
        self.resolve(tree, category).join(file_name)
    }
}
