// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Move, rename and delete files while keeping the category tree in sync
//!
//! The tree is only mutated after the physical operation has succeeded. The
//! one exception is a cross-device move whose copy succeeded but whose source
//! could not be removed: the file then exists in both places, both cached
//! lists say so, and the caller gets [`ArborError::PartialMove`].

use async_trait::async_trait;
use chrono::Local;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use crate::history::{create_entry, History, HistoryAction};
use crate::paths::PathResolver;
use crate::tree::{CategoryId, CategoryTree};
use crate::{ArborError, Result};

#[cfg(unix)]
const CROSS_DEVICE: i32 = 18; // EXDEV
#[cfg(windows)]
const CROSS_DEVICE: i32 = 17; // ERROR_NOT_SAME_DEVICE
#[cfg(not(any(unix, windows)))]
const CROSS_DEVICE: i32 = -1;

const MAX_CONFLICT_SUFFIX: u32 = 1000;

pub(crate) fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(CROSS_DEVICE)
}

/// Physical filesystem primitives used by [`FileOperationsManager`]
#[async_trait]
pub trait FsBackend: Send + Sync {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    async fn exists(&self, path: &Path) -> bool;

    /// Atomic rename; fails across devices
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    async fn copy(&self, from: &Path, to: &Path) -> io::Result<u64>;

    async fn remove_file(&self, path: &Path) -> io::Result<()>;

    async fn checksum(&self, path: &Path) -> io::Result<blake3::Hash> {
        let data = tokio::fs::read(path).await?;
        Ok(blake3::hash(&data))
    }
}

/// The local filesystem through `tokio::fs`
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

#[async_trait]
impl FsBackend for LocalFs {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        tokio::fs::rename(from, to).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        tokio::fs::copy(from, to).await
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}

/// Yes/no capability required before a file is deleted
pub trait Confirm {
    fn confirm(&mut self, file: &Path) -> bool;
}

impl<F: FnMut(&Path) -> bool> Confirm for F {
    fn confirm(&mut self, file: &Path) -> bool {
        self(file)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Move,
    Rename,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Requested,
    InFlight,
    Committed,
    Failed,
}

/// Progress of one single-file operation
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub kind: OperationKind,
    pub file: PathBuf,
    /// New location for moves and renames once committed
    pub destination: Option<PathBuf>,
    pub state: OperationState,
}

impl OperationRecord {
    fn requested(kind: OperationKind, file: &Path) -> Self {
        debug!("{:?} requested: {:?}", kind, file);
        Self {
            kind,
            file: file.to_path_buf(),
            destination: None,
            state: OperationState::Requested,
        }
    }

    fn advance(&mut self, state: OperationState) {
        debug!("{:?} {:?}: {:?} -> {:?}", self.kind, self.file, self.state, state);
        self.state = state;
    }

    fn commit(mut self, destination: Option<PathBuf>) -> Self {
        self.destination = destination;
        self.advance(OperationState::Committed);
        self
    }

    fn fail(&mut self, error: &ArborError) {
        self.advance(OperationState::Failed);
        warn!("{:?} of {:?} failed: {}", self.kind, self.file, error);
    }
}

/// Performs file operations against the filesystem and the category tree
pub struct FileOperationsManager {
    resolver: PathResolver,
    fs: Box<dyn FsBackend>,
    history: Option<History>,
    rename_on_conflict: bool,
}

impl FileOperationsManager {
    pub fn new(resolver: PathResolver) -> Self {
        Self {
            resolver,
            fs: Box::new(LocalFs),
            history: None,
            rename_on_conflict: true,
        }
    }

    pub fn with_backend(mut self, fs: Box<dyn FsBackend>) -> Self {
        self.fs = fs;
        self
    }

    /// Record committed moves and renames for undo
    pub fn with_history(mut self, history: History) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_rename_on_conflict(mut self, enabled: bool) -> Self {
        self.rename_on_conflict = enabled;
        self
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Move `file` into the directory of `destination`.
    ///
    /// `source` is the category whose cache lists the file, or `None` for a
    /// file coming from outside the tree.
    pub async fn move_file(
        &self,
        tree: &mut CategoryTree,
        file: &Path,
        source: Option<CategoryId>,
        destination: CategoryId,
    ) -> Result<OperationRecord> {
        let mut record = OperationRecord::requested(OperationKind::Move, file);
        let dest_dir = self.resolver.resolve(tree, destination);
        record.advance(OperationState::InFlight);

        let target = match self.transfer(file, &dest_dir).await {
            Ok(target) => target,
            Err(e) => {
                if let ArborError::PartialMove { to, .. } = &e {
                    push_once(tree.files_mut(destination), to.clone());
                }
                record.fail(&e);
                return Err(e);
            }
        };

        if let Some(source) = source.filter(|&s| s != destination) {
            tree.files_mut(source).retain(|f| f != file);
        }
        push_once(tree.files_mut(destination), target.clone());

        if target != file {
            info!("Moved: {:?} -> {:?}", file, target);
            self.record_history(HistoryAction::Move, file, &target, Some(tree.display_path(destination)));
        }
        Ok(record.commit(Some(target)))
    }

    /// Physically move `file` into `dest_dir`, returning its new path
    async fn transfer(&self, file: &Path, dest_dir: &Path) -> Result<PathBuf> {
        let file_name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ArborError::InvalidName(file.display().to_string()))?;

        if file.parent() == Some(dest_dir) {
            if self.fs.exists(file).await {
                debug!("{:?} already in {:?}", file, dest_dir);
                return Ok(file.to_path_buf());
            }
            return Err(ArborError::operation(
                "move",
                file,
                io::Error::new(io::ErrorKind::NotFound, "file does not exist"),
            ));
        }

        self.fs
            .create_dir_all(dest_dir)
            .await
            .map_err(|e| ArborError::operation("create directory", dest_dir, e))?;

        let target = self.target_path(dest_dir, file_name).await?;

        match self.fs.rename(file, &target).await {
            Ok(()) => Ok(target),
            Err(e) if is_cross_device(&e) => {
                debug!("Rename crosses devices, copying {:?} instead", file);
                self.copy_then_remove(file, &target).await?;
                Ok(target)
            }
            Err(e) => Err(ArborError::operation("move", file, e)),
        }
    }

    async fn copy_then_remove(&self, file: &Path, target: &Path) -> Result<()> {
        if let Err(e) = self.fs.copy(file, target).await {
            self.discard(target).await;
            return Err(ArborError::operation("copy", file, e));
        }

        let verified = match (self.fs.checksum(file).await, self.fs.checksum(target).await) {
            (Ok(a), Ok(b)) if a == b => Ok(()),
            (Err(e), _) | (_, Err(e)) => Err(e),
            _ => Err(io::Error::new(io::ErrorKind::InvalidData, "checksum mismatch after copy")),
        };
        if let Err(e) = verified {
            self.discard(target).await;
            return Err(ArborError::operation("verify", target, e));
        }

        self.fs
            .remove_file(file)
            .await
            .map_err(|cause| ArborError::PartialMove {
                from: file.to_path_buf(),
                to: target.to_path_buf(),
                cause,
            })
    }

    async fn discard(&self, partial: &Path) {
        if let Err(e) = self.fs.remove_file(partial).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Could not remove partial copy {:?}: {}", partial, e);
            }
        }
    }

    /// Free path for `file_name` in `dir`, suffixing a timestamp on collision
    async fn target_path(&self, dir: &Path, file_name: &str) -> Result<PathBuf> {
        let candidate = dir.join(file_name);
        if !self.fs.exists(&candidate).await {
            return Ok(candidate);
        }
        if !self.rename_on_conflict {
            return Err(ArborError::AlreadyExists(candidate));
        }

        let path = Path::new(file_name);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(file_name);
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        let stamp = Local::now().format("%Y%m%d_%H%M%S");

        for n in 0..MAX_CONFLICT_SUFFIX {
            let name = if n == 0 {
                format!("{}_{}{}", stem, stamp, ext)
            } else {
                format!("{}_{}_{}{}", stem, stamp, n, ext)
            };
            let alternative = dir.join(&name);
            if !self.fs.exists(&alternative).await {
                info!("Filename conflict resolved: {} -> {}", file_name, name);
                return Ok(alternative);
            }
        }
        Err(ArborError::AlreadyExists(candidate))
    }

    /// Rename `file` within its directory. The cached entry keeps its index.
    pub async fn rename_file(
        &self,
        tree: &mut CategoryTree,
        file: &Path,
        category: CategoryId,
        new_name: &str,
    ) -> Result<OperationRecord> {
        let mut record = OperationRecord::requested(OperationKind::Rename, file);
        if let Err(e) = self.ensure_in_category(tree, file, category) {
            record.fail(&e);
            return Err(e);
        }

        let result = self.rename_on_disk(file, new_name, &mut record).await;
        let target = match result {
            Ok(target) => target,
            Err(e) => {
                record.fail(&e);
                return Err(e);
            }
        };

        let files = tree.files_mut(category);
        match files.iter().position(|f| f == file) {
            Some(index) => files[index] = target.clone(),
            None => push_once(files, target.clone()),
        }

        if target != file {
            info!("Renamed: {:?} -> {:?}", file, target);
            self.record_history(HistoryAction::Rename, file, &target, Some(tree.display_path(category)));
        }
        Ok(record.commit(Some(target)))
    }

    async fn rename_on_disk(&self, file: &Path, new_name: &str, record: &mut OperationRecord) -> Result<PathBuf> {
        validate_file_name(new_name)?;
        let dir = file
            .parent()
            .ok_or_else(|| ArborError::InvalidName(file.display().to_string()))?;
        let target = dir.join(new_name);
        record.advance(OperationState::InFlight);

        if target == file {
            return Ok(target);
        }
        if self.fs.exists(&target).await {
            return Err(ArborError::AlreadyExists(target));
        }

        self.fs
            .rename(file, &target)
            .await
            .map_err(|e| ArborError::operation("rename", file, e))?;
        Ok(target)
    }

    /// Delete `file` after `confirm` agrees. Declining leaves everything as is.
    pub async fn delete_file<C: Confirm + ?Sized>(
        &self,
        tree: &mut CategoryTree,
        file: &Path,
        category: CategoryId,
        confirm: &mut C,
    ) -> Result<OperationRecord> {
        let mut record = OperationRecord::requested(OperationKind::Delete, file);
        if let Err(e) = self.ensure_in_category(tree, file, category) {
            record.fail(&e);
            return Err(e);
        }

        if !confirm.confirm(file) {
            let e = ArborError::DeleteNotConfirmed(file.to_path_buf());
            record.fail(&e);
            return Err(e);
        }

        record.advance(OperationState::InFlight);
        if let Err(cause) = self.fs.remove_file(file).await {
            let e = ArborError::operation("delete", file, cause);
            record.fail(&e);
            return Err(e);
        }

        tree.files_mut(category).retain(|f| f != file);
        info!("Deleted: {:?}", file);
        Ok(record.commit(None))
    }

    /// Renames and deletes only touch files directly inside the category's directory
    fn ensure_in_category(&self, tree: &CategoryTree, file: &Path, category: CategoryId) -> Result<()> {
        if file.parent() == Some(self.resolver.resolve(tree, category).as_path()) {
            return Ok(());
        }
        Err(ArborError::OutsideCategory {
            path: file.to_path_buf(),
            category: tree.display_path(category),
        })
    }

    fn record_history(&self, action: HistoryAction, from: &Path, to: &Path, category: Option<String>) {
        if let Some(history) = &self.history {
            let entry = create_entry(action, from.to_path_buf(), to.to_path_buf(), category);
            if let Err(e) = history.append(&entry) {
                warn!("Failed to write history entry: {}", e);
            }
        }
    }
}

fn push_once(files: &mut Vec<PathBuf>, path: PathBuf) {
    if !files.contains(&path) {
        files.push(path);
    }
}

/// A new name must be exactly one normal path component
fn validate_file_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single || name.contains(['/', '\\']) || name.trim().is_empty() {
        return Err(ArborError::InvalidName(name.to_string()));
    }
    Ok(())
}
