// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Reads the files physically present in a category's directory

use std::io;
use std::path::PathBuf;
use tracing::debug;

use crate::paths::PathResolver;
use crate::tree::{CategoryId, CategoryTree};
use crate::Result;

/// Lists category directories on demand. Nothing is cached: every call
/// reads the disk again.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    resolver: PathResolver,
}

impl DirectoryLoader {
    pub fn new(resolver: PathResolver) -> Self {
        Self { resolver }
    }

    /// Regular files directly inside the category's directory, sorted by
    /// name. A directory that does not exist yet yields an empty list.
    pub async fn load(&self, tree: &CategoryTree, category: CategoryId) -> Result<Vec<PathBuf>> {
        let dir = self.resolver.resolve(tree, category);

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No directory yet for {:?}", dir);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            // Follows symlinks so linked files are listed too
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => files.push(path),
                Ok(_) => {}
                Err(e) => debug!("Skipping unreadable entry {:?}: {}", path, e),
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        Ok(files)
    }

    /// Replace the category's cached file list with what is on disk.
    /// Returns the number of files found.
    pub async fn refresh(&self, tree: &mut CategoryTree, category: CategoryId) -> Result<usize> {
        let files = self.load(tree, category).await?;
        let count = files.len();
        tree.replace_files(category, files);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn setup() -> (tempfile::TempDir, CategoryTree, CategoryId, DirectoryLoader) {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = CategoryTree::new("Subjects");
        let root = tree.root();
        let sem = tree.find_or_create_child(root, "Sem - 3");
        let cn = tree.find_or_create_child(sem, "CN");
        let loader = DirectoryLoader::new(PathResolver::new(dir.path()));
        (dir, tree, cn, loader)
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let (_dir, tree, cn, loader) = setup();

        let files = loader.load(&tree, cn).await.unwrap();

        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn lists_files_only_without_recursing() {
        let (dir, tree, cn, loader) = setup();
        let cn_dir = dir.path().join("Sem - 3").join("CN");
        fs::create_dir_all(cn_dir.join("Labs")).unwrap();
        fs::write(cn_dir.join("b.pdf"), b"b").unwrap();
        fs::write(cn_dir.join("a.pdf"), b"a").unwrap();
        fs::write(cn_dir.join("Labs").join("nested.pdf"), b"n").unwrap();

        let files = loader.load(&tree, cn).await.unwrap();

        assert_eq!(files, vec![cn_dir.join("a.pdf"), cn_dir.join("b.pdf")]);
    }

    #[tokio::test]
    async fn refresh_replaces_cache_wholesale() {
        let (dir, mut tree, cn, loader) = setup();
        let cn_dir = dir.path().join("Sem - 3").join("CN");
        fs::create_dir_all(&cn_dir).unwrap();
        fs::write(cn_dir.join("real.pdf"), b"r").unwrap();
        tree.replace_files(cn, vec![cn_dir.join("stale.pdf")]);

        let count = loader.refresh(&mut tree, cn).await.unwrap();

        assert_eq!(count, 1);
        assert_eq!(tree.get(cn).files(), &[cn_dir.join("real.pdf")]);

        fs::remove_file(cn_dir.join("real.pdf")).unwrap();
        loader.refresh(&mut tree, cn).await.unwrap();
        assert!(tree.get(cn).files().is_empty());
    }
}
